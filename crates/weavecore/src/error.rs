use crate::ExecutionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by an executor while running a single node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },
}

impl NodeError {
    /// Whether a retry policy may re-run the node after this error.
    ///
    /// Input and configuration problems fail identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::ExecutionFailed(_) | NodeError::Timeout { .. })
    }
}

/// Configuration errors: terminal for the run, never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Workflow is not active: {0}")]
    Inactive(String),

    #[error("No trigger nodes found in workflow")]
    NoTriggerNodes,

    #[error("Workflow contains a cycle")]
    CycleDetected,

    #[error("Self-loop detected on node {0}")]
    SelfLoop(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("No executor found for node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Execution not found: {0}")]
    NotFound(ExecutionId),

    #[error("Execution {0} is terminal and cannot be overwritten")]
    TerminalExecution(ExecutionId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
