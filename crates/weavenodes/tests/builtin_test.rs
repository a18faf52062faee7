use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use weavecore::{ExecutionStatus, NodeSpec, Value, ValueMap, Workflow};
use weavenodes::{register_with_email_transport, EmailMessage, EmailTransport, LogTransport};
use weaveruntime::{EndpointSpec, FlowRuntime, NodeRegistry, RuntimeConfig, WebhookRequest};

fn runtime_with_transport(transport: Arc<dyn EmailTransport>) -> FlowRuntime {
    let mut registry = NodeRegistry::new();
    register_with_email_transport(&mut registry, transport);
    FlowRuntime::with_registry(Arc::new(registry), RuntimeConfig::default())
}

fn runtime() -> FlowRuntime {
    runtime_with_transport(Arc::new(LogTransport))
}

fn data(value: serde_json::Value) -> ValueMap {
    match Value::from(value) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

struct RejectingTransport;

#[async_trait]
impl EmailTransport for RejectingTransport {
    async fn send(&self, _message: &EmailMessage) -> Result<String, String> {
        Err("mailbox unavailable".to_string())
    }
}

fn order_workflow() -> Workflow {
    let mut wf = Workflow::new("order routing");
    wf.add_node(NodeSpec::new("trigger", "manual-trigger"));
    wf.add_node(
        NodeSpec::new("check", "condition")
            .with_config("field", "status")
            .with_config("operator", "equals")
            .with_config("value", "success"),
    );
    wf.add_node(
        NodeSpec::new("notify", "send-email")
            .with_config("to", "ops@example.com")
            .with_config("subject", "Order {{order.id}} {{status}}"),
    );
    wf.add_node(NodeSpec::new("fallback", "transform-data"));
    wf.connect("trigger", "trigger", "check", "input");
    wf.connect("check", "true", "notify", "input");
    wf.connect("check", "false", "fallback", "input");
    wf
}

#[tokio::test]
async fn test_condition_fires_only_matching_branch() {
    let runtime = runtime();
    let execution = runtime
        .execute(
            &order_workflow(),
            data(json!({ "status": "success", "order": { "id": 42 } })),
            "tester",
        )
        .await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let check = execution.node_execution("check").unwrap();
    assert_eq!(check.output_port.as_deref(), Some("true"));
    assert_eq!(
        check.output_data.as_ref().unwrap()["conditionMet"],
        Value::Bool(true)
    );

    let notify = execution.node_execution("notify").unwrap();
    let output = notify.output_data.as_ref().unwrap();
    assert_eq!(output["emailSent"], Value::Bool(true));
    assert_eq!(output["subject"], Value::from("Order 42 success"));
    assert!(execution.node_execution("fallback").is_none());
}

#[tokio::test]
async fn test_condition_false_branch() {
    let runtime = runtime();
    let execution = runtime
        .execute(&order_workflow(), data(json!({ "status": "pending" })), "tester")
        .await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.node_execution("notify").is_none());
    let fallback = execution.node_execution("fallback").unwrap();
    assert_eq!(
        fallback.output_data.as_ref().unwrap()["status"],
        Value::from("pending")
    );
}

#[tokio::test]
async fn test_email_transport_failure_is_soft() {
    let runtime = runtime_with_transport(Arc::new(RejectingTransport));
    let execution = runtime
        .execute(&order_workflow(), data(json!({ "status": "success" })), "tester")
        .await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let notify = execution.node_execution("notify").unwrap();
    assert_eq!(notify.status, ExecutionStatus::Completed);
    let output = notify.output_data.as_ref().unwrap();
    assert_eq!(output["emailSent"], Value::Bool(false));
    assert_eq!(output["error_message"], Value::from("mailbox unavailable"));
}

#[tokio::test]
async fn test_email_without_recipient_fails_node() {
    let mut wf = Workflow::new("no recipient");
    wf.add_node(NodeSpec::new("trigger", "manual-trigger"));
    wf.add_node(NodeSpec::new("notify", "send-email").with_config("subject", "hi"));
    wf.connect("trigger", "trigger", "notify", "input");

    let execution = runtime().execute(&wf, ValueMap::new(), "tester").await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.node_execution("notify").unwrap().status,
        ExecutionStatus::Failed
    );
}

#[tokio::test]
async fn test_delay_blocks_only_its_path() {
    let mut wf = Workflow::new("delay");
    wf.add_node(NodeSpec::new("trigger", "manual-trigger"));
    wf.add_node(NodeSpec::new("wait", "delay").with_config("delay_ms", 100.0));
    wf.connect("trigger", "trigger", "wait", "input");

    let started = Instant::now();
    let execution = runtime().execute(&wf, ValueMap::new(), "tester").await;
    assert!(started.elapsed() >= Duration::from_millis(100));

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.duration_ms.unwrap() >= 100);
    let wait = execution.node_execution("wait").unwrap();
    assert!(wait.duration_ms().unwrap() >= 100);
    assert_eq!(
        wait.output_data.as_ref().unwrap()["delayed"],
        Value::Bool(true)
    );
}

#[tokio::test]
async fn test_parallel_delays_overlap() {
    let mut wf = Workflow::new("fan out");
    wf.add_node(NodeSpec::new("trigger", "manual-trigger"));
    for id in ["a", "b", "c"] {
        wf.add_node(NodeSpec::new(id, "delay").with_config("delay_ms", 150.0));
        wf.connect("trigger", "trigger", id, "input");
    }

    let started = Instant::now();
    let execution = runtime().execute(&wf, ValueMap::new(), "tester").await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.node_executions.len(), 4);
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn test_unknown_node_type_fails_execution() {
    let mut wf = Workflow::new("unknown");
    wf.add_node(NodeSpec::new("trigger", "manual-trigger"));
    wf.add_node(NodeSpec::new("mystery", "teleport"));
    wf.connect("trigger", "trigger", "mystery", "input");

    let execution = runtime().execute(&wf, ValueMap::new(), "tester").await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error_message
        .unwrap()
        .contains("No executor found for node type: teleport"));
}

#[tokio::test]
async fn test_workflow_without_trigger_is_rejected() {
    let mut wf = Workflow::new("headless");
    wf.add_node(NodeSpec::new("wait", "delay").with_config("delay_ms", 0.0));

    let execution = runtime().execute(&wf, ValueMap::new(), "tester").await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.error_message.as_deref(),
        Some("No trigger nodes found in workflow")
    );
    assert!(execution.node_executions.is_empty());
}

#[tokio::test]
async fn test_transform_maps_nested_fields() {
    let mut wf = Workflow::new("transform");
    wf.add_node(NodeSpec::new("trigger", "manual-trigger"));
    wf.add_node(NodeSpec::new("shape", "transform-data").with_config(
        "mappings",
        json!({ "customer": "user.name", "total": "order.total" }),
    ));
    wf.connect("trigger", "trigger", "shape", "input");

    let execution = runtime()
        .execute(
            &wf,
            data(json!({ "user": { "name": "Ada" }, "order": { "total": 99.5 } })),
            "tester",
        )
        .await;

    let output = execution
        .node_execution("shape")
        .and_then(|n| n.output_data.clone())
        .unwrap();
    assert_eq!(output.len(), 2);
    assert_eq!(output["customer"], Value::from("Ada"));
    assert_eq!(output["total"], Value::Number(99.5));
}

#[tokio::test]
async fn test_webhook_trigger_receives_request() {
    let runtime = runtime();
    let mut wf = Workflow::new("inbound");
    wf.add_node(NodeSpec::new("hook", "webhook-trigger").with_config("flatten_body", true));
    wf.add_node(
        NodeSpec::new("check", "condition")
            .with_config("field", "amount")
            .with_config("operator", "greater_than")
            .with_config("value", 10.0),
    );
    wf.connect("hook", "trigger", "check", "input");
    let workflow_id = runtime.register_workflow(wf).await;

    runtime
        .webhooks()
        .create_endpoint(workflow_id, EndpointSpec::new("POST", "/payments"))
        .await
        .unwrap();

    let response = runtime
        .webhooks()
        .process_request(
            WebhookRequest::new("POST", "/payments").with_body(Value::from(json!({ "amount": 25 }))),
        )
        .await;
    assert_eq!(response.status, 200);

    let execution_id = serde_json::from_value(response.body["executionId"].clone()).unwrap();
    let mut execution = None;
    for _ in 0..100 {
        if let Ok(found) = runtime.store().get(execution_id).await {
            if found.status.is_terminal() {
                execution = Some(found);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let execution = execution.expect("webhook execution finished");
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.actor_id.starts_with("webhook:"));
    let check = execution.node_execution("check").unwrap();
    assert_eq!(check.output_port.as_deref(), Some("true"));
}

#[tokio::test]
async fn test_email_placeholders_in_input_stay_literal() {
    let mut wf = Workflow::new("literal braces");
    wf.add_node(NodeSpec::new("trigger", "manual-trigger"));
    wf.add_node(
        NodeSpec::new("notify", "send-email")
            .with_config("to", "ops@example.com")
            .with_config("subject", "Hi {{name}}")
            .with_config("body", "Note: {{note}}"),
    );
    wf.connect("trigger", "trigger", "notify", "input");

    let execution = runtime()
        .execute(
            &wf,
            data(json!({ "name": "{{secret}}", "note": "{{name}}", "secret": "hunter2" })),
            "tester",
        )
        .await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let output = execution
        .node_execution("notify")
        .and_then(|n| n.output_data.clone())
        .unwrap();
    assert_eq!(output["subject"], Value::from("Hi {{secret}}"));
}
