//! Execution records produced by the engine and kept by the execution store.

use crate::{NodeId, ValueMap, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExecutionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of a workflow from trigger to terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub actor_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub trigger_data: ValueMap,
    pub node_executions: Vec<NodeExecution>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
}

impl Execution {
    /// Fresh record in `pending`.
    pub fn new(workflow_id: WorkflowId, trigger_data: ValueMap, actor_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            actor_id: actor_id.into(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            trigger_data,
            node_executions: Vec::new(),
            error_message: None,
            duration_ms: None,
        }
    }

    pub fn node_execution(&self, node_id: &str) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|ne| ne.node_id == node_id)
    }

    pub(crate) fn node_execution_mut(&mut self, node_id: &str) -> Option<&mut NodeExecution> {
        self.node_executions.iter_mut().find(|ne| ne.node_id == node_id)
    }

    /// Move to `running` and restart the clock.
    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Utc::now();
    }

    /// Move to a terminal state. Only the first call has any effect.
    pub fn finish(&mut self, status: ExecutionStatus, error_message: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        if self.error_message.is_none() {
            self.error_message = error_message;
        }
    }

    /// Fail a run that no engine owns any more, closing its open node records too.
    pub fn interrupt(&mut self, reason: &str) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        for ne in self.node_executions.iter_mut() {
            if !ne.status.is_terminal() {
                ne.status = ExecutionStatus::Failed;
                ne.completed_at = Some(now);
                ne.error_message = Some(reason.to_string());
            }
        }
        self.finish(ExecutionStatus::Failed, Some(reason.to_string()));
    }

    /// Record that `node_id` has started. Returns the index of the new record.
    pub fn start_node(&mut self, node_id: &str, node_type: &str, input_data: ValueMap) -> usize {
        self.node_executions.push(NodeExecution {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            input_data,
            output_data: None,
            output_port: None,
            error_message: None,
            retry_count: 0,
        });
        self.node_executions.len() - 1
    }

    pub fn complete_node(&mut self, node_id: &str, output_data: ValueMap, port: String, retry_count: u32) {
        if let Some(ne) = self.node_execution_mut(node_id) {
            ne.status = ExecutionStatus::Completed;
            ne.completed_at = Some(Utc::now());
            ne.output_data = Some(output_data);
            ne.output_port = Some(port);
            ne.retry_count = retry_count;
        }
    }

    pub fn fail_node(&mut self, node_id: &str, error: String, retry_count: u32) {
        if let Some(ne) = self.node_execution_mut(node_id) {
            ne.status = ExecutionStatus::Failed;
            ne.completed_at = Some(Utc::now());
            ne.error_message = Some(error);
            ne.retry_count = retry_count;
        }
    }
}

/// The record of one node's participation in an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: NodeId,
    pub node_type: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input_data: ValueMap,
    pub output_data: Option<ValueMap>,
    /// Output port the executor declared on success.
    pub output_port: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl NodeExecution {
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds().max(0) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Per-execution log line kept alongside the execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub node_id: Option<NodeId>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            node_id: None,
        }
    }

    pub fn for_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}
