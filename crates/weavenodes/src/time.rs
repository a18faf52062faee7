use crate::BuiltinNode;
use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use weavecore::{Node, NodeContext, NodeError, NodeOutput, Value, ValueMap};
use weaveruntime::{NodeFactory, NodeMetadata, PortDefinition};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Suspend this execution path for `delay_ms` before passing inputs on.
///
/// Only the calling task sleeps; sibling branches keep running.
pub struct DelayNode;

impl DelayNode {
    fn delay_ms(config: &ValueMap) -> Result<u64, NodeError> {
        let Some(value) = config.get("delay_ms").or_else(|| config.get("delay")) else {
            return Ok(DEFAULT_DELAY_MS);
        };
        match value.to_number() {
            Some(ms) if ms >= 0.0 && ms.is_finite() => Ok(ms as u64),
            _ => Err(NodeError::InvalidInputType {
                field: "delay_ms".to_string(),
                expected: "non-negative number".to_string(),
                actual: value.type_name().to_string(),
            }),
        }
    }
}

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        BuiltinNode::Delay.as_str()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = Self::delay_ms(&ctx.config)?;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));
        sleep(Duration::from_millis(delay_ms)).await;
        ctx.events.progress(100.0, Some("Delay finished".to_string()));

        Ok(NodeOutput::from_data(ctx.inputs)
            .with_output("delayed", true)
            .with_output("delay_ms", delay_ms as f64))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        Self::delay_ms(config).map(|_| ())
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, _config: &ValueMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DelayNode))
    }

    fn node_type(&self) -> &str {
        BuiltinNode::Delay.as_str()
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            outputs: vec![PortDefinition::new("output", "Inputs plus delayed and delay_ms")],
            ..NodeMetadata::default()
        }
    }
}
