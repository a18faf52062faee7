use crate::{events::EventEmitter, ExecutionId, NodeError, NodeId, Value, ValueMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Port name used when an executor does not pick one explicitly
pub const DEFAULT_OUTPUT_PORT: &str = "output";

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "http-request", "condition")
    fn node_type(&self) -> &str;

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Validate configuration at workflow load time
    fn validate_config(&self, _config: &ValueMap) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    pub execution_id: ExecutionId,

    /// Merged data from every predecessor connection that fired
    pub inputs: ValueMap,

    /// Data delivered per named input port
    pub ports: ValueMap,

    /// Node configuration with `{{...}}` placeholders already resolved
    pub config: ValueMap,

    /// Event emitter for real-time updates
    pub events: EventEmitter,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, execution_id: ExecutionId, events: EventEmitter) -> Self {
        Self {
            node_id: node_id.into(),
            execution_id,
            inputs: ValueMap::new(),
            ports: ValueMap::new(),
            config: ValueMap::new(),
            events,
        }
    }

    pub fn with_inputs(mut self, inputs: ValueMap) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_ports(mut self, ports: ValueMap) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_config(mut self, config: ValueMap) -> Self {
        self.config = config;
        self
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Required string config value
    pub fn require_config_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_config(name)?;
        value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: value.type_name().to_string(),
        })
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Resolved inputs viewed as one object, for dotted-path lookups
    pub fn input_value(&self) -> Value {
        Value::Object(self.inputs.clone())
    }
}

/// Output from node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Result data handed to downstream nodes
    pub data: ValueMap,

    /// Output port whose connections fire
    pub port: String,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            data: ValueMap::new(),
            port: DEFAULT_OUTPUT_PORT.to_string(),
        }
    }

    /// Start from an existing map, e.g. to pass inputs through
    pub fn from_data(data: ValueMap) -> Self {
        Self {
            data,
            port: DEFAULT_OUTPUT_PORT.to_string(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn on_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}
