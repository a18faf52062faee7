//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows, the node registry,
//! graph resolution, execution history, monitoring, realtime fan-out and
//! webhook ingress.

mod catalog;
mod executor;
mod monitor;
mod rate_limit;
mod realtime;
mod registry;
mod resolver;
mod runtime;
mod store;
mod webhook;

pub use catalog::WorkflowCatalog;
pub use executor::{ExecutionEngine, ExecutionHandle};
pub use monitor::{ExecutionMetrics, HealthStatus, Monitor, RecentError, SystemHealth};
pub use rate_limit::{FixedWindowLimiter, RateLimitConfig, RateLimitResult};
pub use realtime::{MessageType, RealtimeMessage, SessionHub, SubscriberId};
pub use registry::{FactoryError, NodeFactory, NodeKind, NodeMetadata, NodeRegistry, PortDefinition};
pub use resolver::{ExecutionPlan, GraphResolver, Route};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use store::ExecutionStore;
pub use webhook::{
    EndpointId, EndpointSpec, ValidationPolicy, WebhookAnalytics, WebhookEndpoint, WebhookError,
    WebhookIngress, WebhookRequest, WebhookResponse, DEFAULT_SECRET_HEADER,
};
