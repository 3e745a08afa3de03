use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::agents::AgentInfo;
use crate::error::{EntityKind, HubError};
use crate::hub::AgentHub;
use crate::orchestrator::{Task, TaskResults};
use crate::quality::QualityAssessment;
use crate::router::DeliveryReport;
use crate::store::MessageRecord;
use crate::telemetry::TelemetrySink;

pub struct ServerState {
    pub hub: Arc<AgentHub>,
    pub telemetry: TelemetrySink,
    pub history_limit: usize,
}

#[derive(Debug, Serialize)]
pub struct ServerHealthResponse {
    pub status: &'static str,
    pub agents: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub description: String,
    pub creator_id: Option<String>,
    #[serde(default)]
    pub execute: bool,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task: Task,
    pub assessment: Option<QualityAssessment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImproveRequest {
    pub min_quality: Option<f64>,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub task_id: String,
    pub results: TaskResults,
    pub quality_score: Option<f64>,
    pub iterations: u32,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub from: String,
    pub to: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub from: String,
    pub to: String,
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub from: String,
    pub message: String,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub agent: Option<String>,
    pub limit: Option<usize>,
}

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn hub_error(err: HubError) -> ApiError {
    let status = match &err {
        HubError::NotFound { .. } => StatusCode::NOT_FOUND,
        HubError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    api_error(status, err.to_string())
}

/// `{agent_id: {"response": ..} | {"error": ..}}`
pub fn delivery_report_json(report: &DeliveryReport) -> Value {
    let entries = report
        .iter()
        .map(|(agent_id, outcome)| {
            let entry = match outcome {
                Ok(response) => json!({ "response": response }),
                Err(err) => json!({ "error": err.to_string() }),
            };
            (agent_id.clone(), entry)
        })
        .collect::<Map<_, _>>();
    Value::Object(entries)
}

fn results_response(state: &ServerState, task_id: &str, results: TaskResults) -> ApiResult<ResultsResponse> {
    let task = state
        .hub
        .orchestrator()
        .task(task_id)
        .ok_or_else(|| hub_error(HubError::not_found(EntityKind::Task, task_id)))?;
    Ok(Json(ResultsResponse {
        task_id: task.id,
        results,
        quality_score: task.quality_score,
        iterations: task.iterations,
    }))
}

pub async fn handle_server_health(State(state): State<Arc<ServerState>>) -> Json<ServerHealthResponse> {
    Json(ServerHealthResponse {
        status: "ok",
        agents: state.hub.registry().len(),
    })
}

pub async fn handle_server_agents(State(state): State<Arc<ServerState>>) -> Json<Vec<AgentInfo>> {
    Json(state.hub.registry().infos())
}

pub async fn handle_server_create_task(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<TaskResponse> {
    let orchestrator = state.hub.orchestrator();
    let task_id = orchestrator
        .create_task(&req.description, req.creator_id.as_deref())
        .await
        .map_err(hub_error)?;
    if req.execute {
        orchestrator.execute_task(&task_id).await.map_err(hub_error)?;
    }
    handle_server_get_task(State(state), Path(task_id)).await
}

pub async fn handle_server_get_task(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskResponse> {
    let orchestrator = state.hub.orchestrator();
    let task = orchestrator
        .task(&task_id)
        .ok_or_else(|| hub_error(HubError::not_found(EntityKind::Task, &task_id)))?;
    Ok(Json(TaskResponse {
        assessment: orchestrator.assessment(&task_id),
        task,
    }))
}

pub async fn handle_server_execute_task(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
) -> ApiResult<ResultsResponse> {
    let results = state
        .hub
        .orchestrator()
        .execute_task(&task_id)
        .await
        .map_err(hub_error)?;
    results_response(&state, &task_id, results)
}

pub async fn handle_server_improve_task(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
    body: Option<Json<ImproveRequest>>,
) -> ApiResult<ResultsResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if let Some(min) = req.min_quality
        && !(0.0..=1.0).contains(&min)
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "min_quality must be between 0 and 1",
        ));
    }
    let results = state
        .hub
        .orchestrator()
        .improve_task_results(&task_id, req.min_quality, req.max_iterations.map(|n| n.max(1)))
        .await
        .map_err(hub_error)?;
    results_response(&state, &task_id, results)
}

pub async fn handle_server_send_message(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<SendMessageResponse> {
    if req.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message cannot be empty"));
    }
    let response = state
        .hub
        .router()
        .send(&req.from, &req.to, &req.message)
        .await
        .map_err(hub_error)?;
    Ok(Json(SendMessageResponse {
        from: req.from,
        to: req.to,
        response,
    }))
}

pub async fn handle_server_broadcast(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<BroadcastRequest>,
) -> ApiResult<Value> {
    if req.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message cannot be empty"));
    }
    let report = state
        .hub
        .router()
        .broadcast(&req.from, &req.message, &req.exclude)
        .await;
    Ok(Json(json!({ "deliveries": delivery_report_json(&report) })))
}

pub async fn handle_server_conversations(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ConversationQuery>,
) -> ApiResult<Vec<MessageRecord>> {
    let limit = query.limit.unwrap_or(state.history_limit).max(1);
    let rows = state
        .hub
        .log()
        .conversation_history(query.agent.as_deref(), limit)
        .await
        .map_err(hub_error)?;
    Ok(Json(rows))
}

pub fn build_server_router(state: Arc<ServerState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(handle_server_health))
        .route("/v1/agents", get(handle_server_agents))
        .route("/v1/tasks", post(handle_server_create_task))
        .route("/v1/tasks/{id}", get(handle_server_get_task))
        .route("/v1/tasks/{id}/execute", post(handle_server_execute_task))
        .route("/v1/tasks/{id}/improve", post(handle_server_improve_task))
        .route("/v1/messages", post(handle_server_send_message))
        .route("/v1/broadcast", post(handle_server_broadcast))
        .route("/v1/conversations", get(handle_server_conversations))
        .with_state(state)
}

pub async fn run_server(
    hub: Arc<AgentHub>,
    host: String,
    port: u16,
    history_limit: usize,
    telemetry: &TelemetrySink,
) -> Result<()> {
    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server bind address '{}:{}'", host, port))?;
    let state = Arc::new(ServerState {
        hub,
        telemetry: telemetry.clone(),
        history_limit,
    });

    state.telemetry.emit(
        "server.started",
        json!({ "host": host, "port": port, "agents": state.hub.registry().len() }),
    );
    println!("Agent hub API listening on http://{addr} (health: /healthz, tasks: /v1/tasks)");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server listener")?;
    axum::serve(listener, build_server_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed")
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { println!("\nReceived Ctrl+C, shutting down gracefully..."); }
        _ = terminate => { println!("\nReceived SIGTERM, shutting down gracefully..."); }
    }
}
