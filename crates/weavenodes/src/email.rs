//! `send-email`: render a message from the node input and hand it to an
//! [`EmailTransport`].
//!
//! `subject` and `body` arrive with `{{path}}` placeholders already resolved
//! against the merged input. A transport failure does not fail the node: it completes
//! with `emailSent: false` and the error message so downstream nodes can
//! react to it.

use crate::BuiltinNode;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use weavecore::{Node, NodeContext, NodeError, NodeOutput, Value, ValueMap};
use weaveruntime::{NodeFactory, NodeMetadata, PortDefinition};

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub from: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Delivery backend used by [`SendEmailNode`]
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Deliver the message, returning a provider message id
    async fn send(&self, message: &EmailMessage) -> Result<String, String>;
}

/// Writes messages to the process log instead of delivering them
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, message: &EmailMessage) -> Result<String, String> {
        let id = Uuid::new_v4().to_string();
        info!(to = %message.to, subject = %message.subject, message_id = %id, "email sent");
        Ok(id)
    }
}

pub struct SendEmailNode {
    transport: Arc<dyn EmailTransport>,
}

impl SendEmailNode {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }

    fn text(config: &ValueMap, key: &str) -> String {
        config.get(key).map(Value::to_text).unwrap_or_default()
    }
}

#[async_trait]
impl Node for SendEmailNode {
    fn node_type(&self) -> &str {
        BuiltinNode::SendEmail.as_str()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let to = ctx.require_config("to")?.to_text();
        if to.is_empty() {
            return Err(NodeError::Configuration("Missing config: to".to_string()));
        }

        let message = EmailMessage {
            to,
            from: ctx.config.get("from").map(Value::to_text),
            subject: Self::text(&ctx.config, "subject"),
            body: Self::text(&ctx.config, "body"),
        };

        let output = NodeOutput::new()
            .with_output("to", message.to.clone())
            .with_output("subject", message.subject.clone());

        match self.transport.send(&message).await {
            Ok(message_id) => {
                ctx.events.info(format!("Email sent to {}", message.to));
                Ok(output
                    .with_output("emailSent", true)
                    .with_output("success", true)
                    .with_output("messageId", message_id))
            }
            Err(error) => {
                ctx.events.warn(format!("Email to {} failed: {}", message.to, error));
                Ok(output
                    .with_output("emailSent", false)
                    .with_output("success", false)
                    .with_output("error_message", error))
            }
        }
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        match config.get("to") {
            Some(to) if !to.to_text().is_empty() => Ok(()),
            _ => Err(NodeError::Configuration("Missing config: to".to_string())),
        }
    }
}

pub struct SendEmailNodeFactory {
    transport: Arc<dyn EmailTransport>,
}

impl SendEmailNodeFactory {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }
}

impl Default for SendEmailNodeFactory {
    fn default() -> Self {
        Self::new(Arc::new(LogTransport))
    }
}

impl NodeFactory for SendEmailNodeFactory {
    fn create(&self, _config: &ValueMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(SendEmailNode::new(self.transport.clone())))
    }

    fn node_type(&self) -> &str {
        BuiltinNode::SendEmail.as_str()
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Send an email with templated subject and body".to_string(),
            category: "communication".to_string(),
            inputs: vec![PortDefinition::new("input", "Template data")],
            outputs: vec![PortDefinition::new(
                "output",
                "emailSent, success, messageId or error_message",
            )],
            ..NodeMetadata::default()
        }
    }
}
