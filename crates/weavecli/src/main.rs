use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use weavecore::{
    ExecutionEvent, ExecutionStatus, NodeEvent, NodeSpec, Value, ValueMap, Workflow,
};
use weaveruntime::{FlowRuntime, GraphResolver, NodeRegistry, RuntimeConfig};

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Weave workflow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Actor recorded on the execution
        #[arg(long, default_value = "cli")]
        actor: String,

        /// Per-node timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            actor,
            timeout_ms,
        } => run_workflow(&file, input, &actor, timeout_ms).await,
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Nodes => {
            list_nodes();
            Ok(())
        }
        Commands::Init { output } => create_example_workflow(&output),
    }
}

fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    weavenodes::register_all(&mut registry);
    registry
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&workflow_json)
        .with_context(|| format!("{} is not a valid workflow", file.display()))
}

fn parse_input(input: Option<String>) -> Result<ValueMap> {
    let Some(input) = input else {
        return Ok(ValueMap::new());
    };
    let json: serde_json::Value = serde_json::from_str(&input).context("Input is not valid JSON")?;
    match Value::from(json) {
        Value::Object(map) => Ok(map),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    actor: &str,
    timeout_ms: Option<u64>,
) -> Result<()> {
    println!("Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;
    println!("Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let trigger_data = parse_input(input)?;

    let config = RuntimeConfig {
        default_node_timeout_ms: timeout_ms,
        ..RuntimeConfig::default()
    };
    let runtime = FlowRuntime::with_registry(Arc::new(builtin_registry()), config);

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::ExecutionStarted { execution_id, .. } => {
                    println!("Execution {} started", execution_id);
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  > {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    port,
                    duration_ms,
                    ..
                } => {
                    println!("  ok {} -> {} in {}ms", node_id, port, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  FAILED {}: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => println!("     [{}] {}", node_id, message),
                    NodeEvent::Warning { message } => {
                        println!("     [{}] warning: {}", node_id, message)
                    }
                    NodeEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     [{}] {}% - {}", node_id, percent, msg),
                        None => println!("     [{}] {}%", node_id, percent),
                    },
                },
                ExecutionEvent::ExecutionCompleted { duration_ms, .. } => {
                    println!("Completed in {}ms", duration_ms);
                    break;
                }
                ExecutionEvent::ExecutionFailed { error, duration_ms, .. } => {
                    println!("Failed after {}ms: {}", duration_ms, error);
                    break;
                }
                ExecutionEvent::ExecutionCancelled { .. } => {
                    println!("Cancelled");
                    break;
                }
            }
        }
    });

    let execution = runtime.execute(&workflow, trigger_data, actor).await;

    // the listener exits on the terminal event; give it a moment to drain
    if tokio::time::timeout(Duration::from_millis(500), event_task)
        .await
        .is_err()
    {
        tracing::debug!("Event listener did not finish in time");
    }

    println!();
    println!("Execution Summary:");
    println!("   Execution ID: {}", execution.id);
    println!("   Status: {}", execution.status);
    println!(
        "   Nodes run: {}/{}",
        execution.node_executions.len(),
        workflow.nodes.len()
    );

    for node in &execution.node_executions {
        match (&node.output_data, &node.error_message) {
            (Some(output), _) if !output.is_empty() => {
                println!("   Node {}:", node.node_id);
                println!("     {}", Value::Object(output.clone()).to_text());
            }
            (_, Some(error)) => println!("   Node {} failed: {}", node.node_id, error),
            _ => {}
        }
    }

    if execution.status != ExecutionStatus::Completed {
        bail!(
            "Execution {}: {}",
            execution.status,
            execution.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let registry = builtin_registry();
    let plan = GraphResolver::resolve(&workflow, &registry)
        .with_context(|| format!("Workflow '{}' is invalid", workflow.name))?;

    println!("Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!("   Triggers: {}", plan.triggers().join(", "));
    println!("   Reachable nodes: {}", plan.reachable_count());

    Ok(())
}

fn list_nodes() {
    println!("Available Node Types:");
    println!();

    let registry = builtin_registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  * {} ({}, {:?})", node_type, metadata.category, metadata.kind);
            println!("    {}", metadata.description);
        } else {
            println!("  * {}", node_type);
        }
    }
}

fn example_workflow() -> Workflow {
    let mut workflow = Workflow::new("Order notification");
    workflow.description =
        Some("Emails the team when an order succeeds, reshapes it otherwise".to_string());

    let trigger = workflow.add_node(
        NodeSpec::new("trigger", "manual-trigger")
            .with_label("Start")
            .with_position(100.0, 100.0),
    );
    let check = workflow.add_node(
        NodeSpec::new("check-status", "condition")
            .with_label("Succeeded?")
            .with_config("field", "status")
            .with_config("operator", "equals")
            .with_config("value", "success")
            .with_position(300.0, 100.0),
    );
    let notify = workflow.add_node(
        NodeSpec::new("notify", "send-email")
            .with_label("Notify team")
            .with_config("to", "team@example.com")
            .with_config("subject", "Order {{order.id}} succeeded")
            .with_config("body", "Total: {{order.total}}")
            .with_position(500.0, 50.0),
    );
    let reshape = workflow.add_node(
        NodeSpec::new("summarize", "transform-data")
            .with_label("Summarize failure")
            .with_config(
                "mappings",
                serde_json::json!({ "order_id": "order.id", "status": "status" }),
            )
            .with_position(500.0, 150.0),
    );

    workflow.connect(trigger.as_str(), "trigger", check.as_str(), "input");
    workflow.connect(check.as_str(), "true", notify.as_str(), "input");
    workflow.connect(check.as_str(), "false", reshape, "input");
    workflow
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let workflow = example_workflow();
    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  weave run --file {} --input '{{\"status\": \"success\", \"order\": {{\"id\": 7, \"total\": 42}}}}'",
        output.display()
    );

    Ok(())
}
