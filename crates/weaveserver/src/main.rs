mod config;

use actix_cors::Cors;
use actix_web::{
    delete, get, http::StatusCode, post, web, App, HttpRequest, HttpResponse, HttpServer,
    Responder, Result as ActixResult,
};
use actix_ws::Message;
use config::ServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use weavecore::{ExecutionId, FlowError, StoreError, Value, ValueMap, Workflow, WorkflowError};
use weaveruntime::{EndpointSpec, FlowRuntime, NodeRegistry, WebhookError, WebhookRequest};

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
}

/// Request body for workflow execution
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    inputs: ValueMap,
    /// Return immediately with the execution id instead of the finished record
    #[serde(default)]
    background: bool,
    #[serde(default)]
    actor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEndpointRequest {
    workflow_id: Uuid,
    #[serde(flatten)]
    spec: EndpointSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsQuery {
    execution_id: Option<ExecutionId>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: Uuid,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
    })
}

fn flow_error_status(err: &FlowError) -> StatusCode {
    match err {
        FlowError::Workflow(WorkflowError::NotFound(_)) => StatusCode::NOT_FOUND,
        FlowError::Workflow(WorkflowError::Inactive(_)) => StatusCode::CONFLICT,
        FlowError::Workflow(_) => StatusCode::BAD_REQUEST,
        FlowError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        FlowError::Node(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn flow_error(err: FlowError) -> HttpResponse {
    let status = flow_error_status(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    error_response(status, err)
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let health = data.runtime.monitor().get_system_health().await;
    HttpResponse::Ok().json(serde_json::json!({
        "status": health.status,
        "version": env!("CARGO_PKG_VERSION"),
        "service": "weave"
    }))
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflow_list: Vec<_> = data
        .runtime
        .list_workflows()
        .await
        .into_iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "description": w.description,
                "active": w.active,
                "nodes": w.nodes.len(),
                "connections": w.connections.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Create a new workflow
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> ActixResult<impl Responder> {
    let workflow = workflow.into_inner();

    if let Err(e) = data.runtime.validate(&workflow) {
        warn!("Rejected workflow {}: {}", workflow.name, e);
        return Ok(error_response(StatusCode::BAD_REQUEST, e));
    }

    info!("Creating workflow: {} ({})", workflow.name, workflow.id);
    let workflow_id = data.runtime.register_workflow(workflow).await;

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id: workflow_id,
        message: "Workflow created successfully".to_string(),
    }))
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.runtime.get_workflow(path.into_inner()).await {
        Ok(workflow) => Ok(HttpResponse::Ok().json(workflow)),
        Err(e) => Ok(flow_error(e)),
    }
}

/// Delete a workflow
#[delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    match data.runtime.remove_workflow(workflow_id).await {
        Ok(_) => {
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        Err(e) => Ok(flow_error(e)),
    }
}

/// Execute a workflow
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<ExecuteRequest>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let req = req.into_inner();
    let actor_id = req.actor_id.unwrap_or_else(|| "api".to_string());

    info!("Executing workflow: {}", workflow_id);

    if req.background {
        return match data
            .runtime
            .start_workflow(workflow_id, req.inputs, &actor_id)
            .await
        {
            Ok(handle) => Ok(HttpResponse::Accepted().json(serde_json::json!({
                "executionId": handle.execution_id,
            }))),
            Err(e) => Ok(flow_error(e)),
        };
    }

    match data
        .runtime
        .execute_workflow(workflow_id, req.inputs, &actor_id)
        .await
    {
        Ok(execution) => {
            info!(
                "Workflow {} finished: {} ({} nodes)",
                workflow_id,
                execution.status,
                execution.node_executions.len()
            );
            Ok(HttpResponse::Ok().json(execution))
        }
        Err(e) => Ok(flow_error(e)),
    }
}

/// Executions of one workflow, oldest first
#[get("/api/workflows/{id}/executions")]
async fn list_workflow_executions(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let executions = data.runtime.store().list_by_workflow(path.into_inner()).await;
    Ok(HttpResponse::Ok().json(executions))
}

#[get("/api/executions")]
async fn list_executions(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.runtime.store().list_all().await))
}

#[delete("/api/executions")]
async fn clear_executions(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let removed = data.runtime.store().clear_history().await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed })))
}

#[get("/api/executions/{id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<ExecutionId>,
) -> ActixResult<impl Responder> {
    match data.runtime.store().get(path.into_inner()).await {
        Ok(execution) => Ok(HttpResponse::Ok().json(execution)),
        Err(e) => Ok(flow_error(e.into())),
    }
}

#[get("/api/executions/{id}/logs")]
async fn get_execution_logs(
    data: web::Data<AppState>,
    path: web::Path<ExecutionId>,
) -> ActixResult<impl Responder> {
    match data.runtime.store().get_logs(path.into_inner()).await {
        Ok(logs) => Ok(HttpResponse::Ok().json(logs)),
        Err(e) => Ok(flow_error(e.into())),
    }
}

#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<ExecutionId>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    if data.runtime.cancel_execution(execution_id).await {
        info!("Cancellation requested for execution {}", execution_id);
        Ok(HttpResponse::Accepted().json(serde_json::json!({ "cancelled": true })))
    } else {
        Ok(error_response(
            StatusCode::NOT_FOUND,
            format!("Execution {} is not running", execution_id),
        ))
    }
}

/// Re-run a single node of a stored execution
#[post("/api/executions/{id}/nodes/{node_id}/retry")]
async fn retry_node(
    data: web::Data<AppState>,
    path: web::Path<(ExecutionId, String)>,
) -> ActixResult<impl Responder> {
    let (execution_id, node_id) = path.into_inner();
    match data.runtime.retry_node(execution_id, &node_id, "api").await {
        Ok(execution) => Ok(HttpResponse::Ok().json(execution)),
        Err(e) => Ok(flow_error(e)),
    }
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();

    let nodes: Vec<_> = registry
        .list_node_types()
        .into_iter()
        .filter_map(|node_type| {
            let metadata = registry.get_metadata(&node_type)?;
            Some(serde_json::json!({
                "type": node_type,
                "description": metadata.description,
                "category": metadata.category,
                "kind": metadata.kind,
                "inputs": metadata.inputs,
                "outputs": metadata.outputs,
            }))
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

#[get("/api/metrics")]
async fn metrics(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.runtime.monitor().get_metrics().await))
}

#[get("/api/health")]
async fn system_health(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.runtime.monitor().get_system_health().await))
}

fn webhook_error(err: WebhookError) -> HttpResponse {
    let status = match &err {
        WebhookError::NotFound(_) | WebhookError::Workflow(WorkflowError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        WebhookError::DuplicateEndpoint { .. } => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, err)
}

#[get("/api/webhooks")]
async fn list_webhooks(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.runtime.webhooks().list_endpoints().await))
}

#[post("/api/webhooks")]
async fn create_webhook(
    data: web::Data<AppState>,
    req: web::Json<CreateEndpointRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    match data
        .runtime
        .webhooks()
        .create_endpoint(req.workflow_id, req.spec)
        .await
    {
        Ok(endpoint) => {
            info!("Webhook {} {} -> {}", endpoint.method, endpoint.path, endpoint.workflow_id);
            Ok(HttpResponse::Created().json(endpoint))
        }
        Err(e) => Ok(webhook_error(e)),
    }
}

#[delete("/api/webhooks/{id}")]
async fn delete_webhook(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.runtime.webhooks().remove_endpoint(path.into_inner()).await {
        Ok(endpoint) => Ok(HttpResponse::Ok().json(endpoint)),
        Err(e) => Ok(webhook_error(e)),
    }
}

#[get("/api/webhooks/{id}/analytics")]
async fn webhook_analytics(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.runtime.webhooks().analytics(path.into_inner()).await {
        Ok(analytics) => Ok(HttpResponse::Ok().json(analytics)),
        Err(e) => Ok(webhook_error(e)),
    }
}

/// Decode a query string pair by pair, dropping pairs that do not decode
/// so a bad parameter never turns into a non-JSON rejection.
fn parse_query(query_string: &str) -> HashMap<String, String> {
    query_string
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            match web::Query::<HashMap<String, String>>::from_query(pair) {
                Ok(decoded) => Some(decoded.into_inner()),
                Err(e) => {
                    warn!("Ignoring webhook query parameter {:?}: {}", pair, e);
                    None
                }
            }
        })
        .flatten()
        .collect()
}

/// Inbound webhook calls on any method under `/webhook/`
async fn receive_webhook(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    let body = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(json) => Value::from(json),
            Err(_) => Value::String(String::from_utf8_lossy(&body).into_owned()),
        }
    };

    let request = WebhookRequest {
        method: req.method().as_str().to_string(),
        path: format!("/{}", path.into_inner()),
        headers,
        query: parse_query(req.query_string()),
        body,
        source_ip: req.peer_addr().map(|addr| addr.ip().to_string()),
    };

    let response = data.runtime.webhooks().process_request(request).await;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(response.body)
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<EventsQuery>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let sessions = data.runtime.sessions().clone();
    let (subscriber_id, mut messages) = sessions.subscribe(query.execution_id).await;
    info!("WebSocket client connected: {}", subscriber_id);

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                message = messages.recv() => {
                    let Some(message) = message else { break };
                    if let Ok(json) = serde_json::to_string(&message) {
                        if session.text(json).await.is_err() {
                            break;
                        }
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        sessions.unsubscribe(subscriber_id).await;
        info!("WebSocket client disconnected: {}", subscriber_id);
        let _ = session.close(None).await;
    });

    Ok(res)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!("Starting weave server");

    let mut registry = NodeRegistry::new();
    weavenodes::register_all(&mut registry);
    let runtime = Arc::new(FlowRuntime::with_registry(
        Arc::new(registry),
        config.runtime.clone(),
    ));

    if let Some(path) = config.history_file.as_ref().filter(|p| p.exists()) {
        match runtime.store().load_snapshot(path).await {
            Ok(count) => info!("Loaded {} executions from {}", count, path.display()),
            Err(e) => warn!("Could not load history from {}: {}", path.display(), e),
        }
    }

    let realtime = runtime.start_realtime();
    info!(
        "Runtime initialized with {} node types",
        runtime.registry().list_node_types().len()
    );

    let app_state = web::Data::new(AppState {
        runtime: runtime.clone(),
    });

    info!("Server starting on http://{}", config.bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_workflows)
            .service(create_workflow)
            .service(get_workflow)
            .service(delete_workflow)
            .service(execute_workflow)
            .service(list_workflow_executions)
            .service(list_executions)
            .service(clear_executions)
            .service(get_execution)
            .service(get_execution_logs)
            .service(cancel_execution)
            .service(retry_node)
            .service(list_node_types)
            .service(metrics)
            .service(system_health)
            .service(list_webhooks)
            .service(create_webhook)
            .service(delete_webhook)
            .service(webhook_analytics)
            .service(websocket_events)
            .route("/webhook/{path:.*}", web::route().to(receive_webhook))
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    realtime.abort();

    if let Some(path) = &config.history_file {
        runtime.store().save_snapshot(path).await?;
        info!("Saved execution history to {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_decode_independently() {
        let query = parse_query("source=shop&flag&&note=a%20b");
        assert_eq!(query.len(), 3);
        assert_eq!(query["source"], "shop");
        assert_eq!(query["flag"], "");
        assert_eq!(query["note"], "a b");
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn workflow_errors_map_to_client_statuses() {
        let missing = FlowError::Workflow(WorkflowError::NotFound("missing".to_string()));
        assert_eq!(flow_error_status(&missing), StatusCode::NOT_FOUND);
    }
}
