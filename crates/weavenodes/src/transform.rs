use crate::BuiltinNode;
use async_trait::async_trait;
use std::str::FromStr;
use weavecore::{Node, NodeContext, NodeError, NodeOutput, Value, ValueMap};
use weaveruntime::{NodeFactory, NodeMetadata, PortDefinition};

/// Declarative reshaping applied by `transform-data`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOperation {
    /// `mappings: {newKey: "source.path"}` builds a new object
    Map,
    /// `fields: [...]` keeps only the listed top-level keys
    Select,
    Passthrough,
    Uppercase,
    Lowercase,
    /// Parse the JSON text at `field` in place
    JsonParse,
}

impl FromStr for TransformOperation {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "map" => TransformOperation::Map,
            "select" => TransformOperation::Select,
            "passthrough" => TransformOperation::Passthrough,
            "uppercase" => TransformOperation::Uppercase,
            "lowercase" => TransformOperation::Lowercase,
            "json_parse" => TransformOperation::JsonParse,
            other => {
                return Err(NodeError::Configuration(format!(
                    "Unsupported transform operation: {}",
                    other
                )))
            }
        })
    }
}

pub struct TransformDataNode;

impl TransformDataNode {
    fn operation(config: &ValueMap) -> Result<TransformOperation, NodeError> {
        match config.get("operation").or_else(|| config.get("type")) {
            Some(op) => op.as_str().unwrap_or_default().parse(),
            None if config.contains_key("mappings") => Ok(TransformOperation::Map),
            None => Ok(TransformOperation::Passthrough),
        }
    }

    fn apply(
        operation: TransformOperation,
        config: &ValueMap,
        inputs: &ValueMap,
    ) -> Result<ValueMap, NodeError> {
        match operation {
            TransformOperation::Passthrough => Ok(inputs.clone()),
            TransformOperation::Uppercase => Ok(map_strings(inputs, str::to_uppercase)),
            TransformOperation::Lowercase => Ok(map_strings(inputs, str::to_lowercase)),
            TransformOperation::Map => {
                let mappings = config
                    .get("mappings")
                    .and_then(Value::as_object)
                    .ok_or_else(|| NodeError::Configuration("Missing config: mappings".into()))?;
                let source = Value::Object(inputs.clone());
                Ok(mappings
                    .iter()
                    .filter_map(|(target, path)| {
                        let path = path.as_str()?;
                        source.get_path(path).map(|v| (target.clone(), v.clone()))
                    })
                    .collect())
            }
            TransformOperation::Select => {
                let fields = config
                    .get("fields")
                    .and_then(Value::as_array)
                    .ok_or_else(|| NodeError::Configuration("Missing config: fields".into()))?;
                Ok(fields
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|f| inputs.get(f).map(|v| (f.to_string(), v.clone())))
                    .collect())
            }
            TransformOperation::JsonParse => {
                let field = config
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| NodeError::Configuration("Missing config: field".into()))?;
                let text = inputs
                    .get(field)
                    .ok_or_else(|| NodeError::MissingInput(field.to_string()))?;
                let text = text.as_str().ok_or_else(|| NodeError::InvalidInputType {
                    field: field.to_string(),
                    expected: "string".to_string(),
                    actual: text.type_name().to_string(),
                })?;
                let parsed: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

                let mut out = inputs.clone();
                out.insert(field.to_string(), Value::from(parsed));
                Ok(out)
            }
        }
    }
}

fn map_strings(inputs: &ValueMap, f: fn(&str) -> String) -> ValueMap {
    inputs
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => Value::String(f(s)),
                other => other.clone(),
            };
            (k.clone(), v)
        })
        .collect()
}

#[async_trait]
impl Node for TransformDataNode {
    fn node_type(&self) -> &str {
        BuiltinNode::TransformData.as_str()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let operation = Self::operation(&ctx.config)?;
        let data = Self::apply(operation, &ctx.config, &ctx.inputs)?;

        if operation == TransformOperation::Map {
            if let Some(mappings) = ctx.config.get("mappings").and_then(Value::as_object) {
                for target in mappings.keys().filter(|k| !data.contains_key(*k)) {
                    ctx.events.warn(format!("Mapping for '{}' did not resolve", target));
                }
            }
        }
        Ok(NodeOutput::from_data(data))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        Self::operation(config).map(|_| ())
    }
}

pub struct TransformDataNodeFactory;

impl NodeFactory for TransformDataNodeFactory {
    fn create(&self, _config: &ValueMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(TransformDataNode))
    }

    fn node_type(&self) -> &str {
        BuiltinNode::TransformData.as_str()
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Rename, select or normalise fields".to_string(),
            category: "data".to_string(),
            inputs: vec![PortDefinition::new("input", "Data to reshape")],
            outputs: vec![PortDefinition::new("output", "Reshaped object")],
            ..NodeMetadata::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> ValueMap {
        match Value::from(value) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn map_renames_nested_paths() {
        let config = map(json!({ "mappings": { "customer": "user.name", "missing": "nope" } }));
        let inputs = map(json!({ "user": { "name": "Ada" }, "other": 1 }));

        let out = TransformDataNode::apply(TransformOperation::Map, &config, &inputs).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["customer"], Value::from("Ada"));
    }

    #[test]
    fn select_keeps_listed_fields() {
        let config = map(json!({ "operation": "select", "fields": ["a", "c"] }));
        let inputs = map(json!({ "a": 1, "b": 2, "c": 3 }));

        let op = TransformDataNode::operation(&config).unwrap();
        let out = TransformDataNode::apply(op, &config, &inputs).unwrap();
        let mut keys: Vec<_> = out.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn case_operations_touch_only_strings() {
        let inputs = map(json!({ "name": "Ada", "age": 36 }));
        let out = TransformDataNode::apply(TransformOperation::Uppercase, &ValueMap::new(), &inputs).unwrap();
        assert_eq!(out["name"], Value::from("ADA"));
        assert_eq!(out["age"], Value::Number(36.0));
    }

    #[test]
    fn json_parse_replaces_text_field() {
        let config = map(json!({ "operation": "json_parse", "field": "payload" }));
        let inputs = map(json!({ "payload": "{\"ok\":true}" }));
        let out = TransformDataNode::apply(TransformOperation::JsonParse, &config, &inputs).unwrap();
        assert_eq!(out["payload"].get_path("ok"), Some(&Value::Bool(true)));
    }

    #[test]
    fn operation_defaults() {
        assert_eq!(
            TransformDataNode::operation(&ValueMap::new()).unwrap(),
            TransformOperation::Passthrough
        );
        assert_eq!(
            TransformDataNode::operation(&map(json!({ "mappings": {} }))).unwrap(),
            TransformOperation::Map
        );
        assert!(TransformDataNode::operation(&map(json!({ "operation": "explode" }))).is_err());
    }
}
