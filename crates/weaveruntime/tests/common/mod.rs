#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weavecore::{Node, NodeContext, NodeError, NodeOutput, Value, ValueMap};
use weaveruntime::{FlowRuntime, NodeFactory, NodeKind, NodeMetadata, NodeRegistry, RuntimeConfig};

/// Trigger that forwards its trigger data on port "trigger"
pub struct StartNode;

#[async_trait]
impl Node for StartNode {
    fn node_type(&self) -> &str {
        "start"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::from_data(ctx.inputs).on_port("trigger"))
    }
}

/// Forwards its inputs, tagging them with `visited_<node id>`.
/// `sleep_ms` in config delays completion.
pub struct PassNode;

#[async_trait]
impl Node for PassNode {
    fn node_type(&self) -> &str {
        "pass"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        if let Some(ms) = ctx.config.get("sleep_ms").and_then(Value::as_f64) {
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        }
        let mut data = ctx.inputs.clone();
        data.insert(format!("visited_{}", ctx.node_id), Value::Bool(true));
        for (key, value) in &ctx.config {
            data.insert(format!("config_{}", key), value.clone());
        }
        Ok(NodeOutput::from_data(data))
    }
}

/// Emits on the port named by its `port` config
pub struct BranchNode;

#[async_trait]
impl Node for BranchNode {
    fn node_type(&self) -> &str {
        "branch"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let port = ctx.require_config_str("port")?.to_string();
        Ok(NodeOutput::from_data(ctx.inputs).on_port(port))
    }
}

pub struct FailNode;

#[async_trait]
impl Node for FailNode {
    fn node_type(&self) -> &str {
        "fail"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Err(NodeError::ExecutionFailed("intentional failure".into()))
    }
}

/// Fails until it has been called `failures + 1` times
pub struct FlakyNode {
    pub calls: Arc<AtomicU32>,
    pub failures: u32,
}

#[async_trait]
impl Node for FlakyNode {
    fn node_type(&self) -> &str {
        "flaky"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(NodeError::ExecutionFailed(format!("attempt {} failed", call + 1)));
        }
        Ok(NodeOutput::new().with_output("attempts", (call + 1) as f64))
    }
}

/// Factory backed by a closure
pub struct TestFactory<F> {
    pub node_type: &'static str,
    pub kind: NodeKind,
    pub make: F,
}

impl<F> NodeFactory for TestFactory<F>
where
    F: Fn() -> Box<dyn Node> + Send + Sync,
{
    fn create(&self, _config: &ValueMap) -> Result<Box<dyn Node>, NodeError> {
        Ok((self.make)())
    }

    fn node_type(&self) -> &str {
        self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            kind: self.kind,
            ..NodeMetadata::default()
        }
    }
}

pub fn register<F>(registry: &mut NodeRegistry, node_type: &'static str, kind: NodeKind, make: F)
where
    F: Fn() -> Box<dyn Node> + Send + Sync + 'static,
{
    registry.register(Arc::new(TestFactory {
        node_type,
        kind,
        make,
    }));
}

/// Registry with start, pass, branch and fail node types
pub fn test_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register(&mut registry, "start", NodeKind::Trigger, || Box::new(StartNode));
    register(&mut registry, "pass", NodeKind::Action, || Box::new(PassNode));
    register(&mut registry, "branch", NodeKind::Branch, || Box::new(BranchNode));
    register(&mut registry, "fail", NodeKind::Action, || Box::new(FailNode));
    registry
}

pub fn test_runtime() -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(test_registry()), RuntimeConfig::default())
}

pub fn runtime_with(registry: NodeRegistry) -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(registry), RuntimeConfig::default())
}

pub fn trigger_data(pairs: &[(&str, Value)]) -> ValueMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
