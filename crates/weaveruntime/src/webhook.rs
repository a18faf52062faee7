//! HTTP-triggerable endpoints bound to workflows.
//!
//! The ingress owns its endpoints, their rate limiters and their analytics.
//! Requests are rejected (unmatched route, rate limit, validation) before any
//! execution is created; accepted requests are dispatched to the engine and
//! answered without waiting for the run to finish.

use crate::catalog::WorkflowCatalog;
use crate::executor::ExecutionEngine;
use crate::rate_limit::{FixedWindowLimiter, RateLimitConfig, RateLimitResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use weavecore::{Value, ValueMap, WorkflowError, WorkflowId};

pub type EndpointId = Uuid;

/// Header checked against [`ValidationPolicy::secret`] when no other name is set
pub const DEFAULT_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Endpoint already registered: {method} {path}")]
    DuplicateEndpoint { method: String, path: String },

    #[error("Invalid webhook path: {0}")]
    InvalidPath(String),

    #[error("Webhook endpoint not found: {0}")]
    NotFound(EndpointId),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Checks applied to a request after rate limiting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationPolicy {
    /// Headers that must be present (case-insensitive)
    pub required_headers: Vec<String>,
    /// Shared secret expected in `secret_header`
    pub secret: Option<String>,
    pub secret_header: Option<String>,
    /// Source addresses allowed to call; empty allows all
    pub allowed_ips: Vec<String>,
    /// Reject requests whose body is not a JSON object
    pub require_json_body: bool,
}

/// What a caller supplies to register an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub validation: ValidationPolicy,
}

fn default_method() -> String {
    "POST".to_string()
}

impl EndpointSpec {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            rate_limit: None,
            validation: ValidationPolicy::default(),
        }
    }

    pub fn with_rate_limit(mut self, max_requests: u32, window_seconds: u64) -> Self {
        self.rate_limit = Some(RateLimitConfig::new(max_requests, window_seconds));
        self
    }

    pub fn with_validation(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    pub id: EndpointId,
    pub workflow_id: WorkflowId,
    pub path: String,
    pub method: String,
    pub is_active: bool,
    pub rate_limit: Option<RateLimitConfig>,
    pub validation: ValidationPolicy,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAnalytics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Inbound request as seen by the ingress
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
    pub source_ip: Option<String>,
}

impl WebhookRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP-style answer; `body` always carries a `success` flag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl WebhookResponse {
    fn accepted(execution_id: Uuid) -> Self {
        Self {
            status: 200,
            body: json!({ "success": true, "executionId": execution_id }),
        }
    }

    fn rejected(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "success": false, "error": error.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

struct EndpointState {
    endpoint: WebhookEndpoint,
    limiter: Option<FixedWindowLimiter>,
    analytics: WebhookAnalytics,
}

pub struct WebhookIngress {
    endpoints: RwLock<HashMap<EndpointId, EndpointState>>,
    workflows: Arc<WorkflowCatalog>,
    engine: ExecutionEngine,
}

impl WebhookIngress {
    pub fn new(workflows: Arc<WorkflowCatalog>, engine: ExecutionEngine) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            workflows,
            engine,
        }
    }

    /// Bind a new endpoint to `workflow_id`
    pub async fn create_endpoint(
        &self,
        workflow_id: WorkflowId,
        spec: EndpointSpec,
    ) -> Result<WebhookEndpoint, WebhookError> {
        if self.workflows.get(workflow_id).await.is_none() {
            return Err(WorkflowError::NotFound(workflow_id.to_string()).into());
        }
        let path = normalize_path(&spec.path)?;
        let method = spec.method.trim().to_ascii_uppercase();

        let mut endpoints = self.endpoints.write().await;
        if endpoints
            .values()
            .any(|s| s.endpoint.method == method && s.endpoint.path == path)
        {
            return Err(WebhookError::DuplicateEndpoint { method, path });
        }

        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4(),
            workflow_id,
            path,
            method,
            is_active: true,
            rate_limit: spec.rate_limit,
            validation: spec.validation,
            created_at: Utc::now(),
        };
        tracing::info!(
            "Registered webhook {} {} for workflow {}",
            endpoint.method,
            endpoint.path,
            workflow_id
        );
        endpoints.insert(
            endpoint.id,
            EndpointState {
                limiter: endpoint.rate_limit.map(FixedWindowLimiter::new),
                endpoint: endpoint.clone(),
                analytics: WebhookAnalytics::default(),
            },
        );
        Ok(endpoint)
    }

    pub async fn remove_endpoint(&self, id: EndpointId) -> Result<WebhookEndpoint, WebhookError> {
        self.endpoints
            .write()
            .await
            .remove(&id)
            .map(|s| s.endpoint)
            .ok_or(WebhookError::NotFound(id))
    }

    pub async fn set_active(&self, id: EndpointId, active: bool) -> Result<(), WebhookError> {
        let mut endpoints = self.endpoints.write().await;
        let state = endpoints.get_mut(&id).ok_or(WebhookError::NotFound(id))?;
        state.endpoint.is_active = active;
        Ok(())
    }

    pub async fn list_endpoints(&self) -> Vec<WebhookEndpoint> {
        let mut endpoints: Vec<WebhookEndpoint> = self
            .endpoints
            .read()
            .await
            .values()
            .map(|s| s.endpoint.clone())
            .collect();
        endpoints.sort_by_key(|e| e.created_at);
        endpoints
    }

    pub async fn analytics(&self, id: EndpointId) -> Result<WebhookAnalytics, WebhookError> {
        self.endpoints
            .read()
            .await
            .get(&id)
            .map(|s| s.analytics.clone())
            .ok_or(WebhookError::NotFound(id))
    }

    /// Route, limit, validate and dispatch one request
    pub async fn process_request(&self, request: WebhookRequest) -> WebhookResponse {
        let method = request.method.trim().to_ascii_uppercase();
        let Ok(path) = normalize_path(&request.path) else {
            return WebhookResponse::rejected(404, "Webhook endpoint not found");
        };

        let endpoint = {
            let mut endpoints = self.endpoints.write().await;
            let Some(state) = endpoints.values_mut().find(|s| {
                s.endpoint.is_active && s.endpoint.method == method && s.endpoint.path == path
            }) else {
                tracing::debug!("No webhook registered for {} {}", method, path);
                return WebhookResponse::rejected(404, "Webhook endpoint not found");
            };

            state.analytics.total_requests += 1;
            state.analytics.last_request_at = Some(Utc::now());

            if let Some(RateLimitResult::Exceeded { retry_after }) =
                state.limiter.as_ref().map(FixedWindowLimiter::check)
            {
                state.analytics.failed_requests += 1;
                tracing::warn!("Rate limit exceeded for webhook {} {}", method, path);
                let mut response = WebhookResponse::rejected(429, "Rate limit exceeded");
                response.body["retryAfter"] = json!(retry_after.as_secs());
                return response;
            }

            if let Err((status, error)) = validate(&state.endpoint.validation, &request) {
                state.analytics.failed_requests += 1;
                tracing::warn!("Webhook {} {} rejected: {}", method, path, error);
                return WebhookResponse::rejected(status, error);
            }

            state.endpoint.clone()
        };

        let response = match self.workflows.get(endpoint.workflow_id).await {
            None => WebhookResponse::rejected(
                404,
                WorkflowError::NotFound(endpoint.workflow_id.to_string()).to_string(),
            ),
            Some(workflow) if !workflow.active => WebhookResponse::rejected(
                409,
                WorkflowError::Inactive(workflow.id.to_string()).to_string(),
            ),
            Some(workflow) => {
                let trigger_data = trigger_data(&endpoint, &request, &method, &path);
                let handle = self
                    .engine
                    .start_workflow(workflow, trigger_data, &format!("webhook:{}", endpoint.id))
                    .await;
                tracing::info!(
                    "Webhook {} {} started execution {}",
                    method,
                    path,
                    handle.execution_id
                );
                WebhookResponse::accepted(handle.execution_id)
            }
        };

        if let Some(state) = self.endpoints.write().await.get_mut(&endpoint.id) {
            if response.is_success() {
                state.analytics.successful_requests += 1;
            } else {
                state.analytics.failed_requests += 1;
            }
        }
        response
    }
}

fn normalize_path(path: &str) -> Result<String, WebhookError> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return Err(WebhookError::InvalidPath(path.to_string()));
    }
    Ok(format!("/{}", trimmed))
}

fn validate(policy: &ValidationPolicy, request: &WebhookRequest) -> Result<(), (u16, String)> {
    if !policy.allowed_ips.is_empty() {
        let allowed = request
            .source_ip
            .as_deref()
            .is_some_and(|ip| policy.allowed_ips.iter().any(|a| a == ip));
        if !allowed {
            return Err((403, "Source IP not allowed".to_string()));
        }
    }

    if let Some(secret) = &policy.secret {
        let header = policy.secret_header.as_deref().unwrap_or(DEFAULT_SECRET_HEADER);
        if request.header(header) != Some(secret.as_str()) {
            return Err((401, "Invalid webhook secret".to_string()));
        }
    }

    if let Some(missing) = policy
        .required_headers
        .iter()
        .find(|h| request.header(h).is_none())
    {
        return Err((400, format!("Missing required header: {}", missing)));
    }

    if policy.require_json_body && request.body.as_object().is_none() {
        return Err((400, "Request body must be a JSON object".to_string()));
    }
    Ok(())
}

fn trigger_data(
    endpoint: &WebhookEndpoint,
    request: &WebhookRequest,
    method: &str,
    path: &str,
) -> ValueMap {
    let to_map = |pairs: &HashMap<String, String>| -> Value {
        Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), Value::from(v.as_str())))
                .collect(),
        )
    };

    let mut data = ValueMap::new();
    data.insert("method".into(), Value::from(method));
    data.insert("path".into(), Value::from(path));
    data.insert("headers".into(), to_map(&request.headers));
    data.insert("query".into(), to_map(&request.query));
    data.insert("body".into(), request.body.clone());
    data.insert(
        "source_ip".into(),
        request
            .source_ip
            .as_deref()
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    data.insert("endpoint_id".into(), Value::from(endpoint.id.to_string()));
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("orders/").unwrap(), "/orders");
        assert_eq!(normalize_path("/a/b").unwrap(), "/a/b");
        assert!(normalize_path("/").is_err());
        assert!(normalize_path("has space").is_err());
    }

    #[test]
    fn validation_checks_secret_headers_and_body() {
        let policy = ValidationPolicy {
            required_headers: vec!["X-Source".into()],
            secret: Some("s3cret".into()),
            require_json_body: true,
            ..ValidationPolicy::default()
        };

        let bad_secret = WebhookRequest::new("POST", "/x").with_header("x-webhook-secret", "nope");
        assert_eq!(validate(&policy, &bad_secret).unwrap_err().0, 401);

        let missing_header =
            WebhookRequest::new("POST", "/x").with_header("X-Webhook-Secret", "s3cret");
        assert_eq!(validate(&policy, &missing_header).unwrap_err().0, 400);

        let ok = WebhookRequest::new("POST", "/x")
            .with_header("x-webhook-secret", "s3cret")
            .with_header("x-source", "crm")
            .with_body(Value::Object(ValueMap::new()));
        assert!(validate(&policy, &ok).is_ok());
    }

    #[test]
    fn ip_allow_list_rejects_unknown_sources() {
        let policy = ValidationPolicy {
            allowed_ips: vec!["10.0.0.1".into()],
            ..ValidationPolicy::default()
        };
        let mut request = WebhookRequest::new("POST", "/x");
        assert_eq!(validate(&policy, &request).unwrap_err().0, 403);
        request.source_ip = Some("10.0.0.1".into());
        assert!(validate(&policy, &request).is_ok());
    }
}
