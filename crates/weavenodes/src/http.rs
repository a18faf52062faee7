use crate::BuiltinNode;
use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;
use weavecore::{Node, NodeContext, NodeError, NodeOutput, Value, ValueMap};
use weaveruntime::{NodeFactory, NodeMetadata, PortDefinition};

/// HTTP request node
///
/// Config: `url` (required), `method` (default `GET`), `headers` object,
/// `body` and `timeout_ms`. When no `body` is configured the input field
/// `body` is sent instead. Object and array bodies go out as JSON, anything
/// else as text.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn method(config: &ValueMap) -> Result<Method, NodeError> {
        let method = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        match method.as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(NodeError::Configuration(format!(
                "Unsupported method: {}",
                method
            ))),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        BuiltinNode::HttpRequest.as_str()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = ctx.require_config_str("url")?.to_string();
        let method = Self::method(&ctx.config)?;

        ctx.events.info(format!("{} {}", method, url));

        let mut request = self.client.request(method.clone(), &url);

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                request = request.header(key.as_str(), value.to_text());
            }
        }

        let body = ctx.config.get("body").or_else(|| ctx.inputs.get("body"));
        if method != Method::GET {
            match body {
                Some(value @ (Value::Object(_) | Value::Array(_))) => {
                    request = request.json(&serde_json::Value::from(value.clone()));
                }
                Some(Value::Null) | None => {}
                Some(other) => request = request.body(other.to_text()),
            }
        }

        if let Some(ms) = ctx.config.get("timeout_ms").and_then(Value::to_number) {
            request = request.timeout(Duration::from_millis(ms.max(0.0) as u64));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers: ValueMap = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or_default())))
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str::<serde_json::Value>(&text)
            .map(Value::from)
            .unwrap_or(Value::String(text));

        ctx.events.info(format!("Response status: {}", status.as_u16()));

        Ok(NodeOutput::new()
            .with_output("status", status.as_u16() as u64)
            .with_output("ok", status.is_success())
            .with_output("url", url)
            .with_output("method", method.as_str())
            .with_output("body", body)
            .with_output("headers", headers))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        if !config.contains_key("url") {
            return Err(NodeError::Configuration("Missing config: url".to_string()));
        }
        Self::method(config).map(|_| ())
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, _config: &ValueMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(HttpRequestNode::new()))
    }

    fn node_type(&self) -> &str {
        BuiltinNode::HttpRequest.as_str()
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            inputs: vec![PortDefinition::new("input", "Optional request body under `body`")],
            outputs: vec![PortDefinition::new(
                "output",
                "status, ok, url, method, body and headers",
            )],
            ..NodeMetadata::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_defaults_to_get_and_rejects_unknown() {
        let mut config = ValueMap::new();
        assert_eq!(HttpRequestNode::method(&config).unwrap(), Method::GET);

        config.insert("method".into(), Value::from("patch"));
        assert_eq!(HttpRequestNode::method(&config).unwrap(), Method::PATCH);

        config.insert("method".into(), Value::from("TRACE"));
        assert!(HttpRequestNode::method(&config).is_err());
    }

    #[test]
    fn url_is_required() {
        let node = HttpRequestNode::new();
        assert!(matches!(
            node.validate_config(&ValueMap::new()),
            Err(NodeError::Configuration(_))
        ));
    }
}
