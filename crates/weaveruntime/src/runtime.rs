use crate::catalog::WorkflowCatalog;
use crate::executor::{ExecutionEngine, ExecutionHandle};
use crate::monitor::Monitor;
use crate::realtime::SessionHub;
use crate::registry::NodeRegistry;
use crate::resolver::{ExecutionPlan, GraphResolver};
use crate::store::ExecutionStore;
use crate::webhook::WebhookIngress;
use std::sync::Arc;
use tokio::task::JoinHandle;
use weavecore::{
    EventBus, Execution, ExecutionEvent, ExecutionId, FlowError, ValueMap, Workflow, WorkflowError,
    WorkflowId,
};

/// Main runtime: owns the engine and every collaborator it reports to
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    engine: ExecutionEngine,
    event_bus: Arc<EventBus>,
    store: Arc<ExecutionStore>,
    monitor: Arc<Monitor>,
    sessions: Arc<SessionHub>,
    workflows: Arc<WorkflowCatalog>,
    webhooks: Arc<WebhookIngress>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings and no node types
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let store = match config.max_history {
            Some(max) => ExecutionStore::new().with_max_history(max),
            None => ExecutionStore::new(),
        };
        let store = Arc::new(store);
        let monitor = Arc::new(Monitor::new(config.recent_errors_limit));
        let sessions = Arc::new(SessionHub::new(config.subscriber_buffer_size));
        let workflows = Arc::new(WorkflowCatalog::new());

        let engine = ExecutionEngine::new(
            registry.clone(),
            store.clone(),
            event_bus.clone(),
            monitor.clone(),
        )
        .with_max_parallel(config.max_parallel_nodes)
        .with_default_timeout(config.default_node_timeout_ms);

        let webhooks = Arc::new(WebhookIngress::new(workflows.clone(), engine.clone()));

        Self {
            registry,
            engine,
            event_bus,
            store,
            monitor,
            sessions,
            workflows,
            webhooks,
        }
    }

    /// Check a workflow against the registry without running it
    pub fn validate(&self, workflow: &Workflow) -> Result<ExecutionPlan, WorkflowError> {
        GraphResolver::resolve(workflow, &self.registry)
    }

    /// Register or replace a workflow
    pub async fn register_workflow(&self, workflow: Workflow) -> WorkflowId {
        let id = workflow.id;
        tracing::info!("Registered workflow {} ({})", workflow.name, id);
        self.workflows.insert(workflow).await;
        id
    }

    pub async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        self.workflows
            .get(id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()).into())
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        self.workflows.list().await
    }

    pub async fn remove_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        self.workflows
            .remove(id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()).into())
    }

    /// Execute a registered workflow by ID and wait for it to finish
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        trigger_data: ValueMap,
        actor_id: &str,
    ) -> Result<Execution, FlowError> {
        let workflow = self.active_workflow(workflow_id).await?;
        Ok(self
            .engine
            .execute_workflow(&workflow, trigger_data, actor_id)
            .await)
    }

    /// Start a registered workflow in the background
    pub async fn start_workflow(
        &self,
        workflow_id: WorkflowId,
        trigger_data: ValueMap,
        actor_id: &str,
    ) -> Result<ExecutionHandle, FlowError> {
        let workflow = self.active_workflow(workflow_id).await?;
        Ok(self
            .engine
            .start_workflow(workflow, trigger_data, actor_id)
            .await)
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(&self, workflow: &Workflow, trigger_data: ValueMap, actor_id: &str) -> Execution {
        self.engine
            .execute_workflow(workflow, trigger_data, actor_id)
            .await
    }

    pub async fn cancel_execution(&self, execution_id: ExecutionId) -> bool {
        self.engine.cancel(execution_id).await
    }

    /// Re-run one node of a stored execution as a new execution
    pub async fn retry_node(
        &self,
        execution_id: ExecutionId,
        node_id: &str,
        actor_id: &str,
    ) -> Result<Execution, FlowError> {
        let original = self.store.get(execution_id).await?;
        let workflow = self.get_workflow(original.workflow_id).await?;
        self.engine
            .retry_node(&workflow, execution_id, node_id, actor_id)
            .await
    }

    /// Forward bus events to realtime sessions until the bus closes
    pub fn start_realtime(&self) -> JoinHandle<()> {
        self.sessions.clone().pump(&self.event_bus)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn store(&self) -> &Arc<ExecutionStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn sessions(&self) -> &Arc<SessionHub> {
        &self.sessions
    }

    pub fn webhooks(&self) -> &Arc<WebhookIngress> {
        &self.webhooks
    }

    async fn active_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        let workflow = self.get_workflow(id).await?;
        if !workflow.active {
            return Err(WorkflowError::Inactive(id.to_string()).into());
        }
        Ok(workflow)
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Queue length per realtime session
    pub subscriber_buffer_size: usize,
    pub recent_errors_limit: usize,
    /// Keep at most this many executions in the store
    pub max_history: Option<usize>,
    pub default_node_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            subscriber_buffer_size: 64,
            recent_errors_limit: 10,
            max_history: None,
            default_node_timeout_ms: None,
        }
    }
}
