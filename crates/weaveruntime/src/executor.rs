use crate::monitor::Monitor;
use crate::registry::NodeRegistry;
use crate::resolver::{ExecutionPlan, GraphResolver};
use crate::store::ExecutionStore;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use weavecore::{
    template, ErrorHandling, EventBus, Execution, ExecutionEvent, ExecutionId, ExecutionStatus,
    FlowError, LogEntry, LogLevel, Node, NodeContext, NodeError, NodeId, NodeOutput, RetryPolicy,
    Value, ValueMap, Workflow, WorkflowError,
};

type NodeTask = BoxFuture<'static, (NodeId, Result<NodeRun, JoinError>)>;

/// Drives workflow runs over a resolved graph.
///
/// Ready nodes are spawned as independent tasks up to the parallel limit;
/// a node becomes ready once every inbound connection from a reachable
/// source has settled and at least one of them fired.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<NodeRegistry>,
    store: Arc<ExecutionStore>,
    event_bus: Arc<EventBus>,
    monitor: Arc<Monitor>,
    max_parallel: usize,
    default_node_timeout_ms: Option<u64>,
    active: Arc<RwLock<HashMap<ExecutionId, CancellationToken>>>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        store: Arc<ExecutionStore>,
        event_bus: Arc<EventBus>,
        monitor: Arc<Monitor>,
    ) -> Self {
        Self {
            registry,
            store,
            event_bus,
            monitor,
            max_parallel: 10,
            default_node_timeout_ms: None,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Timeout applied to nodes of workflows that set none themselves
    pub fn with_default_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.default_node_timeout_ms = timeout_ms;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ExecutionStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Run a workflow to a terminal state.
    ///
    /// Never fails: configuration and executor errors end up on the
    /// returned execution record.
    pub async fn execute_workflow(
        &self,
        workflow: &Workflow,
        trigger_data: ValueMap,
        actor_id: &str,
    ) -> Execution {
        let execution = Execution::new(workflow.id, trigger_data, actor_id);
        self.run(workflow, execution, CancellationToken::new()).await
    }

    /// Spawn a run and return immediately with its id
    pub async fn start_workflow(
        &self,
        workflow: Workflow,
        trigger_data: ValueMap,
        actor_id: &str,
    ) -> ExecutionHandle {
        let execution = Execution::new(workflow.id, trigger_data, actor_id);
        let execution_id = execution.id;
        let token = CancellationToken::new();

        self.active.write().await.insert(execution_id, token.clone());
        if let Err(e) = self.store.save(&execution).await {
            tracing::warn!("Failed to save execution {}: {}", execution_id, e);
        }

        let engine = self.clone();
        let run_token = token.clone();
        let join = tokio::spawn(async move { engine.run(&workflow, execution, run_token).await });

        ExecutionHandle {
            execution_id,
            token,
            join,
        }
    }

    /// Ask a running execution to stop dispatching nodes.
    ///
    /// Returns false when the execution is unknown or already finished.
    pub async fn cancel(&self, execution_id: ExecutionId) -> bool {
        match self.active.read().await.get(&execution_id) {
            Some(token) => {
                tracing::info!("Cancellation requested for execution {}", execution_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, execution_id: ExecutionId) -> bool {
        self.active.read().await.contains_key(&execution_id)
    }

    /// Re-run one node of a stored execution with the input it originally
    /// received. The result is a new execution holding just that node.
    pub async fn retry_node(
        &self,
        workflow: &Workflow,
        execution_id: ExecutionId,
        node_id: &str,
        actor_id: &str,
    ) -> Result<Execution, FlowError> {
        let original = self.store.get(execution_id).await?;
        if original.workflow_id != workflow.id {
            return Err(FlowError::Execution(format!(
                "Execution {} does not belong to workflow {}",
                execution_id, workflow.id
            )));
        }
        let previous = original
            .node_execution(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;
        if workflow.find_node(node_id).is_none() {
            return Err(WorkflowError::NodeNotFound(node_id.to_string()).into());
        }

        let execution = Execution::new(workflow.id, original.trigger_data.clone(), actor_id);
        let token = CancellationToken::new();
        self.active.write().await.insert(execution.id, token.clone());

        let mut run = Run::new(self, workflow, None, execution, token);
        run.begin().await;
        run.log(
            LogLevel::Info,
            format!("Retrying node {} from execution {}", node_id, execution_id),
            Some(node_id),
        )
        .await;
        run.ready.push_back(ReadyNode {
            node_id: node_id.to_string(),
            inputs: previous.input_data.clone(),
            ports: ValueMap::new(),
        });
        Ok(run.drive().await)
    }

    #[tracing::instrument(skip_all, fields(execution_id = %execution.id, workflow_id = %workflow.id))]
    async fn run(&self, workflow: &Workflow, execution: Execution, token: CancellationToken) -> Execution {
        self.active.write().await.insert(execution.id, token.clone());

        let plan = match GraphResolver::resolve(workflow, &self.registry) {
            Ok(plan) => plan,
            Err(e) => {
                let mut run = Run::new(self, workflow, None, execution, token);
                run.persist().await;
                run.log(LogLevel::Error, format!("Workflow validation failed: {}", e), None)
                    .await;
                run.first_error = Some(e.to_string());
                return run.finalize().await;
            }
        };

        let mut run = Run::new(self, workflow, Some(&plan), execution, token);
        run.begin().await;
        for trigger in plan.triggers() {
            run.ready.push_back(ReadyNode {
                node_id: trigger.clone(),
                inputs: run.execution.trigger_data.clone(),
                ports: ValueMap::new(),
            });
        }
        run.drive().await
    }
}

/// Handle to a spawned run
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    token: CancellationToken,
    join: JoinHandle<Execution>,
}

impl ExecutionHandle {
    /// Stop dispatching further nodes
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(self) -> Result<Execution, FlowError> {
        self.join
            .await
            .map_err(|e| FlowError::Execution(format!("Task join error: {}", e)))
    }
}

struct ReadyNode {
    node_id: NodeId,
    inputs: ValueMap,
    ports: ValueMap,
}

/// Data arriving on one fired connection
struct Arrival {
    connection_index: usize,
    target_input: String,
    data: ValueMap,
}

struct JoinState {
    remaining: usize,
    arrivals: Vec<Arrival>,
}

struct NodeRun {
    output: Result<NodeOutput, NodeError>,
    retry_count: u32,
    duration_ms: u64,
}

/// State of a single execution while it is being driven
struct Run<'a> {
    engine: &'a ExecutionEngine,
    workflow: &'a Workflow,
    plan: Option<&'a ExecutionPlan>,
    execution: Execution,
    token: CancellationToken,
    ready: VecDeque<ReadyNode>,
    joins: HashMap<NodeId, JoinState>,
    first_error: Option<String>,
    halted: bool,
    cancelled: bool,
}

impl<'a> Run<'a> {
    fn new(
        engine: &'a ExecutionEngine,
        workflow: &'a Workflow,
        plan: Option<&'a ExecutionPlan>,
        execution: Execution,
        token: CancellationToken,
    ) -> Self {
        Self {
            engine,
            workflow,
            plan,
            execution,
            token,
            ready: VecDeque::new(),
            joins: HashMap::new(),
            first_error: None,
            halted: false,
            cancelled: false,
        }
    }

    async fn begin(&mut self) {
        self.execution.mark_running();
        self.persist().await;
        self.log(
            LogLevel::Info,
            format!("Execution started for workflow {}", self.workflow.id),
            None,
        )
        .await;
        self.engine.event_bus.emit(ExecutionEvent::ExecutionStarted {
            execution_id: self.execution.id,
            workflow_id: self.workflow.id,
            timestamp: Utc::now(),
        });
    }

    async fn drive(mut self) -> Execution {
        let limit = self
            .workflow
            .settings
            .max_parallel_nodes
            .min(self.engine.max_parallel)
            .max(1);
        let mut running: FuturesUnordered<NodeTask> = FuturesUnordered::new();

        loop {
            while running.len() < limit && !self.halted {
                if self.token.is_cancelled() {
                    if !self.ready.is_empty() {
                        self.cancelled = true;
                    }
                    break;
                }
                let Some(next) = self.ready.pop_front() else {
                    break;
                };
                if let Some(task) = self.dispatch(next).await {
                    running.push(task);
                }
            }

            // Nothing in flight and nothing dispatchable
            let Some((node_id, joined)) = running.next().await else {
                break;
            };

            let node_run = joined.unwrap_or_else(|e| NodeRun {
                output: Err(NodeError::ExecutionFailed(format!("Task join error: {}", e))),
                retry_count: 0,
                duration_ms: 0,
            });
            self.complete(node_id, node_run).await;
        }

        self.finalize().await
    }

    async fn dispatch(&mut self, ready: ReadyNode) -> Option<NodeTask> {
        let ReadyNode {
            node_id,
            inputs,
            ports,
        } = ready;

        let Some(spec) = self.workflow.find_node(&node_id) else {
            let error = WorkflowError::NodeNotFound(node_id.clone()).to_string();
            self.log(LogLevel::Error, error.clone(), Some(&node_id)).await;
            self.record_failure(error);
            return None;
        };

        let config = template::render_map(&spec.config, &Value::Object(inputs.clone()));

        self.execution
            .start_node(&node_id, &spec.node_type, inputs.clone());
        self.persist().await;
        self.log(
            LogLevel::Info,
            format!("Starting node {} ({})", node_id, spec.node_type),
            Some(&node_id),
        )
        .await;
        self.engine.event_bus.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution.id,
            node_id: node_id.clone(),
            node_type: spec.node_type.clone(),
            timestamp: Utc::now(),
        });

        let node = match self.engine.registry.lookup(&spec.node_type, &config) {
            Ok(node) => node,
            Err(e) => {
                self.node_failed(&node_id, e.to_string(), 0).await;
                return None;
            }
        };
        if let Err(e) = node.validate_config(&config) {
            self.node_failed(&node_id, e.to_string(), 0).await;
            return None;
        }

        let events = self
            .engine
            .event_bus
            .create_emitter(self.execution.id, node_id.clone());
        let ctx = NodeContext::new(node_id.clone(), self.execution.id, events)
            .with_inputs(inputs)
            .with_ports(ports)
            .with_config(config);
        let timeout_ms = self
            .workflow
            .settings
            .max_execution_time_ms
            .or(self.engine.default_node_timeout_ms);

        let handle = tokio::spawn(invoke(
            node,
            ctx,
            spec.retry_policy.clone(),
            timeout_ms,
            self.engine.store.clone(),
        ));
        Some(async move { (node_id, handle.await) }.boxed())
    }

    async fn complete(&mut self, node_id: NodeId, run: NodeRun) {
        match run.output {
            Ok(output) => {
                self.execution.complete_node(
                    &node_id,
                    output.data.clone(),
                    output.port.clone(),
                    run.retry_count,
                );
                self.persist().await;
                self.log(
                    LogLevel::Info,
                    format!(
                        "Node {} completed on port '{}' in {}ms",
                        node_id, output.port, run.duration_ms
                    ),
                    Some(&node_id),
                )
                .await;
                self.engine.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id: self.execution.id,
                    node_id: node_id.clone(),
                    port: output.port.clone(),
                    duration_ms: run.duration_ms,
                    timestamp: Utc::now(),
                });
                self.route(&node_id, Some(&output));
            }
            Err(e) => self.node_failed(&node_id, e.to_string(), run.retry_count).await,
        }
    }

    async fn node_failed(&mut self, node_id: &str, error: String, retry_count: u32) {
        self.execution.fail_node(node_id, error.clone(), retry_count);
        self.persist().await;
        self.log(
            LogLevel::Error,
            format!("Node {} failed: {}", node_id, error),
            Some(node_id),
        )
        .await;
        self.engine.event_bus.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution.id,
            node_id: node_id.to_string(),
            error: error.clone(),
            timestamp: Utc::now(),
        });
        self.record_failure(error);
        self.route(node_id, None);
    }

    fn record_failure(&mut self, error: String) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
        if self.workflow.settings.on_error == ErrorHandling::StopWorkflow {
            self.halted = true;
        }
    }

    /// Settle every connection leaving `source`. Only connections on the
    /// emitted port fire; the rest are not taken, and a node whose inbound
    /// connections all settle without firing is skipped along with its
    /// own outgoing connections.
    fn route(&mut self, source: &str, output: Option<&NodeOutput>) {
        let Some(plan) = self.plan else {
            return;
        };

        let mut settling: VecDeque<(NodeId, Option<&NodeOutput>)> = VecDeque::new();
        settling.push_back((source.to_string(), output));

        while let Some((from, output)) = settling.pop_front() {
            for route in plan.routes_from(&from) {
                let target = &route.target_node_id;
                let join = self
                    .joins
                    .entry(target.clone())
                    .or_insert_with(|| JoinState {
                        remaining: plan.required_inputs(target),
                        arrivals: Vec::new(),
                    });
                join.remaining = join.remaining.saturating_sub(1);

                if let Some(out) = output.filter(|o| o.port == route.source_output) {
                    join.arrivals.push(Arrival {
                        connection_index: route.connection_index,
                        target_input: route.target_input.clone(),
                        data: out.data.clone(),
                    });
                }

                if join.remaining > 0 {
                    continue;
                }
                let Some(mut join) = self.joins.remove(target) else {
                    continue;
                };

                if join.arrivals.is_empty() {
                    tracing::debug!("Skipping node {}: no inbound connection fired", target);
                    settling.push_back((target.clone(), None));
                    continue;
                }

                join.arrivals.sort_by_key(|a| a.connection_index);
                let mut inputs = ValueMap::new();
                let mut ports = ValueMap::new();
                for arrival in join.arrivals {
                    inputs.extend(arrival.data.clone());
                    ports.insert(arrival.target_input, Value::Object(arrival.data));
                }
                self.ready.push_back(ReadyNode {
                    node_id: target.clone(),
                    inputs,
                    ports,
                });
            }
        }
    }

    async fn finalize(mut self) -> Execution {
        let (status, error) = if let Some(error) = self.first_error.take() {
            (ExecutionStatus::Failed, Some(error))
        } else if self.cancelled {
            (ExecutionStatus::Cancelled, Some("Execution cancelled".to_string()))
        } else {
            (ExecutionStatus::Completed, None)
        };
        self.execution.finish(status, error);
        self.persist().await;

        let execution_id = self.execution.id;
        let workflow_id = self.execution.workflow_id;
        let duration_ms = self.execution.duration_ms.unwrap_or(0);
        let timestamp = Utc::now();

        match self.execution.status {
            ExecutionStatus::Completed => {
                self.log(
                    LogLevel::Info,
                    format!("Execution completed in {}ms", duration_ms),
                    None,
                )
                .await;
                self.engine.event_bus.emit(ExecutionEvent::ExecutionCompleted {
                    execution_id,
                    workflow_id,
                    duration_ms,
                    timestamp,
                });
            }
            ExecutionStatus::Cancelled => {
                self.log(LogLevel::Warn, "Execution cancelled".to_string(), None)
                    .await;
                self.engine.event_bus.emit(ExecutionEvent::ExecutionCancelled {
                    execution_id,
                    workflow_id,
                    timestamp,
                });
            }
            _ => {
                let error = self.execution.error_message.clone().unwrap_or_default();
                self.log(LogLevel::Error, format!("Execution failed: {}", error), None)
                    .await;
                self.engine.event_bus.emit(ExecutionEvent::ExecutionFailed {
                    execution_id,
                    workflow_id,
                    error,
                    duration_ms,
                    timestamp,
                });
            }
        }

        self.engine.monitor.record(&self.execution).await;
        self.engine.active.write().await.remove(&execution_id);
        self.execution
    }

    async fn persist(&self) {
        if let Err(e) = self.engine.store.save(&self.execution).await {
            tracing::warn!("Failed to save execution {}: {}", self.execution.id, e);
        }
    }

    async fn log(&self, level: LogLevel, message: String, node_id: Option<&str>) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        let mut entry = LogEntry::new(level, message);
        if let Some(node_id) = node_id {
            entry = entry.for_node(node_id);
        }
        self.engine.store.append_log(self.execution.id, entry).await;
    }
}

/// Run one node, applying the timeout to every attempt and retrying
/// retryable errors according to `policy`.
async fn invoke(
    node: Box<dyn Node>,
    ctx: NodeContext,
    policy: Option<RetryPolicy>,
    timeout_ms: Option<u64>,
    store: Arc<ExecutionStore>,
) -> NodeRun {
    let max_attempts = policy.as_ref().map_or(1, |p| p.max_attempts.max(1));
    let started = Instant::now();
    let mut retry_count = 0;

    loop {
        let attempt = match timeout_ms {
            Some(ms) => match timeout(Duration::from_millis(ms), node.execute(ctx.clone())).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout { millis: ms }),
            },
            None => node.execute(ctx.clone()).await,
        };

        match (attempt, policy.as_ref()) {
            (Err(e), Some(policy)) if e.is_retryable() && retry_count + 1 < max_attempts => {
                retry_count += 1;
                let delay = policy.delay_for(retry_count);
                let message = format!(
                    "Node {} failed: {}. Retry {}/{} in {}ms",
                    ctx.node_id,
                    e,
                    retry_count,
                    max_attempts - 1,
                    delay
                );
                tracing::warn!("{}", message);
                store
                    .append_log(
                        ctx.execution_id,
                        LogEntry::new(LogLevel::Warn, message).for_node(ctx.node_id.clone()),
                    )
                    .await;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            (output, _) => {
                return NodeRun {
                    output,
                    retry_count,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }
}
