use crate::BuiltinNode;
use async_trait::async_trait;
use weavecore::{Node, NodeContext, NodeError, NodeOutput, Value, ValueMap};
use weaveruntime::{NodeFactory, NodeKind, NodeMetadata, PortDefinition};

/// Port every trigger emits on
pub const TRIGGER_PORT: &str = "trigger";

fn trigger_output(inputs: ValueMap, source: &str) -> NodeOutput {
    NodeOutput::from_data(inputs)
        .with_output("trigger", source)
        .on_port(TRIGGER_PORT)
}

fn trigger_metadata(description: &str) -> NodeMetadata {
    NodeMetadata {
        description: description.to_string(),
        category: "trigger".to_string(),
        kind: NodeKind::Trigger,
        inputs: vec![],
        outputs: vec![PortDefinition::new(TRIGGER_PORT, "Trigger data")],
    }
}

/// Started by hand; echoes the trigger data it was seeded with
pub struct ManualTriggerNode;

#[async_trait]
impl Node for ManualTriggerNode {
    fn node_type(&self) -> &str {
        BuiltinNode::ManualTrigger.as_str()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(trigger_output(ctx.inputs, "manual"))
    }
}

pub struct ManualTriggerNodeFactory;

impl NodeFactory for ManualTriggerNodeFactory {
    fn create(&self, _config: &ValueMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ManualTriggerNode))
    }

    fn node_type(&self) -> &str {
        BuiltinNode::ManualTrigger.as_str()
    }

    fn metadata(&self) -> NodeMetadata {
        trigger_metadata("Start a workflow manually with supplied data")
    }
}

/// Entry point for webhook-bound workflows.
///
/// The ingress seeds it with `{method, path, headers, query, body, source_ip,
/// endpoint_id}`. With `flatten_body: true` the fields of an object body are
/// also copied to the top level.
pub struct WebhookTriggerNode;

#[async_trait]
impl Node for WebhookTriggerNode {
    fn node_type(&self) -> &str {
        BuiltinNode::WebhookTrigger.as_str()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let flatten = ctx
            .get_config_or("flatten_body", Value::Bool(false))
            .as_bool()
            .unwrap_or(false);

        let mut data = ctx.inputs.clone();
        if flatten {
            if let Some(body) = ctx.inputs.get("body").and_then(Value::as_object) {
                for (key, value) in body {
                    data.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        Ok(trigger_output(data, "webhook"))
    }
}

pub struct WebhookTriggerNodeFactory;

impl NodeFactory for WebhookTriggerNodeFactory {
    fn create(&self, _config: &ValueMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(WebhookTriggerNode))
    }

    fn node_type(&self) -> &str {
        BuiltinNode::WebhookTrigger.as_str()
    }

    fn metadata(&self) -> NodeMetadata {
        trigger_metadata("Start a workflow from an HTTP request")
    }
}
