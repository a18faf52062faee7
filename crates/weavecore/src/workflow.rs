use crate::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Node identifier, unique within its workflow
pub type NodeId = String;

/// Complete workflow definition
///
/// Immutable for the duration of a run; the engine only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

fn default_active() -> bool {
    true
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            active: true,
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(
        &mut self,
        source_node_id: impl Into<NodeId>,
        source_output: impl Into<String>,
        target_node_id: impl Into<NodeId>,
        target_input: impl Into<String>,
    ) {
        self.connections.push(Connection {
            source_node_id: source_node_id.into(),
            source_output: source_output.into(),
            target_node_id: target_node_id.into(),
            target_input: target_input.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub node_type: String,
    #[serde(default)]
    pub config: ValueMap,
    /// Display-only data from the editor; never read by the engine.
    #[serde(default)]
    pub metadata: ValueMap,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: ValueMap::new(),
            metadata: ValueMap::new(),
            retry_policy: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.metadata.insert("label".to_string(), Value::String(label.into()));
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        let mut position = ValueMap::new();
        position.insert("x".to_string(), Value::Number(x));
        position.insert("y".to_string(), Value::Number(y));
        self.metadata.insert("position".to_string(), Value::Object(position));
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            ..RetryPolicy::default()
        });
        self
    }
}

/// Connection from a named output port to a named input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source_node_id: NodeId,
    pub source_output: String,
    pub target_node_id: NodeId,
    pub target_input: String,
}

/// Retry policy for node execution
///
/// `max_attempts` counts the first try, so `1` means no retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> u64 {
        let factor = self.backoff_multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let delay = (self.delay_ms as f64 * factor) as u64;
        delay.min(self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// Global workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Upper bound for a single executor invocation.
    pub max_execution_time_ms: Option<u64>,
    pub max_parallel_nodes: usize,
    pub on_error: ErrorHandling,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_execution_time_ms: None,
            max_parallel_nodes: 10,
            on_error: ErrorHandling::StopWorkflow,
        }
    }
}

/// What the engine does with the rest of the graph after a node fails.
///
/// The execution ends `failed` in both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ErrorHandling {
    /// Dispatch nothing new; nodes already running finish.
    #[default]
    StopWorkflow,
    /// Keep running branches that do not depend on the failed node.
    ContinueOnError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_backs_off_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_for(1), 100);
        assert_eq!(policy.delay_for(2), 200);
        assert_eq!(policy.delay_for(3), 350);
    }

    #[test]
    fn workflow_defaults_to_active_when_field_missing() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "minimal",
            "nodes": [{ "id": "start", "node_type": "manual-trigger" }]
        });
        let workflow: Workflow = serde_json::from_value(json).unwrap();
        assert!(workflow.active);
        assert!(workflow.connections.is_empty());
        assert_eq!(workflow.settings.on_error, ErrorHandling::StopWorkflow);
    }
}
