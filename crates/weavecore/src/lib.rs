//! Core abstractions for the weave workflow engine
//!
//! This crate provides the data model, the node contract, execution
//! records, event types and template substitution that every other crate
//! depends on. It performs no I/O of its own.

mod error;
pub mod events;
mod execution;
mod node;
pub mod template;
mod value;
mod workflow;

pub use error::{FlowError, NodeError, StoreError, WorkflowError};
pub use events::*;
pub use execution::{Execution, ExecutionId, ExecutionStatus, LogEntry, LogLevel, NodeExecution};
pub use node::{Node, NodeContext, NodeOutput, DEFAULT_OUTPUT_PORT};
pub use value::{Value, ValueMap};
pub use workflow::{
    Connection, ErrorHandling, NodeId, NodeSpec, RetryPolicy, Workflow, WorkflowId,
    WorkflowSettings,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
