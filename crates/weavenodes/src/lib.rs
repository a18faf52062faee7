//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod condition;
mod email;
mod http;
mod time;
mod transform;
mod trigger;

pub use condition::{ConditionNode, ConditionNodeFactory, Operator};
pub use email::{EmailMessage, EmailTransport, LogTransport, SendEmailNode, SendEmailNodeFactory};
pub use http::{HttpRequestNode, HttpRequestNodeFactory};
pub use time::{DelayNode, DelayNodeFactory};
pub use transform::{TransformDataNode, TransformDataNodeFactory, TransformOperation};
pub use trigger::{
    ManualTriggerNode, ManualTriggerNodeFactory, WebhookTriggerNode, WebhookTriggerNodeFactory,
    TRIGGER_PORT,
};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use weaveruntime::NodeRegistry;

/// Node types shipped with weave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinNode {
    ManualTrigger,
    WebhookTrigger,
    HttpRequest,
    SendEmail,
    Condition,
    TransformData,
    Delay,
}

impl BuiltinNode {
    pub const ALL: [BuiltinNode; 7] = [
        BuiltinNode::ManualTrigger,
        BuiltinNode::WebhookTrigger,
        BuiltinNode::HttpRequest,
        BuiltinNode::SendEmail,
        BuiltinNode::Condition,
        BuiltinNode::TransformData,
        BuiltinNode::Delay,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            BuiltinNode::ManualTrigger => "manual-trigger",
            BuiltinNode::WebhookTrigger => "webhook-trigger",
            BuiltinNode::HttpRequest => "http-request",
            BuiltinNode::SendEmail => "send-email",
            BuiltinNode::Condition => "condition",
            BuiltinNode::TransformData => "transform-data",
            BuiltinNode::Delay => "delay",
        }
    }
}

impl fmt::Display for BuiltinNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuiltinNode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinNode::ALL
            .into_iter()
            .find(|node| node.as_str() == s)
            .ok_or_else(|| format!("Unknown built-in node type: {}", s))
    }
}

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    register_with_email_transport(registry, Arc::new(LogTransport));
}

/// Same as [`register_all`] but delivering email through `transport`
pub fn register_with_email_transport(
    registry: &mut NodeRegistry,
    transport: Arc<dyn EmailTransport>,
) {
    registry.register(Arc::new(ManualTriggerNodeFactory));
    registry.register(Arc::new(WebhookTriggerNodeFactory));
    registry.register(Arc::new(HttpRequestNodeFactory));
    registry.register(Arc::new(SendEmailNodeFactory::new(transport)));
    registry.register(Arc::new(ConditionNodeFactory));
    registry.register(Arc::new(TransformDataNodeFactory));
    registry.register(Arc::new(DelayNodeFactory));
}

/// A registry holding every built-in node
pub fn default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_is_registered() {
        let registry = default_registry();
        for node in BuiltinNode::ALL {
            assert!(registry.contains(node.as_str()), "{} missing", node);
            assert_eq!(node.as_str().parse::<BuiltinNode>(), Ok(node));
        }
        assert!(registry.is_trigger("manual-trigger"));
        assert!(registry.is_trigger("webhook-trigger"));
        assert!(!registry.is_trigger("delay"));
    }
}
