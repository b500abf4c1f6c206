//! HTTP/SSE monitoring and control surface
//!
//! JSON everywhere, CORS wide open, SSE for the live event stream. Control
//! endpoints pass through token resolution, the permission matrix and the
//! rate limiter; read endpoints are unauthenticated monitoring surface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::auth::Action;
use crate::error::MindmuxError;
use crate::events::BusEvent;
use crate::metrics::{status_snapshot, HealthState, StatusFilters};
use crate::model::AgentKind;
use crate::orchestrator::Orchestrator;

/// Shared state behind every handler
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the router with all routes and layers attached
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/events", get(events))
        .route("/discover", get(discover))
        .route("/agent/create", post(create_agent))
        .route("/agent/:id/start", post(start_agent))
        .route("/agent/:id/stop", post(stop_agent))
        .route("/agent/:id/remove", post(remove_agent))
        .route("/task/queue", post(queue_task))
        .route("/task/:id/cancel", post(cancel_task))
        .route("/pane/:id/fork", post(fork_pane))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until the process shuts down
pub async fn serve(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let bind_addr = orchestrator.config.bind_addr.clone();
    let app = router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "http surface listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ----- error envelope -----

struct ApiError(MindmuxError);

impl From<MindmuxError> for ApiError {
    fn from(err: MindmuxError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let mut body = json!({ "error": self.0.public_message() });
        if let MindmuxError::RateLimit { retry_after_ms } = &self.0 {
            body["retryAfterMs"] = json!(retry_after_ms);
        }
        (status, Json(body)).into_response()
    }
}

// ----- middleware -----

fn client_id(headers: &HeaderMap) -> String {
    bearer_token(headers).unwrap_or_else(|| "anonymous".to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

/// Count the request and enforce the per-client rate limit
async fn track_request(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    state.orchestrator.metrics.record_api_request();

    let decision = state
        .orchestrator
        .rate_limiter
        .check_limit(&client_id(request.headers()));
    if !decision.allowed {
        return ApiError(MindmuxError::RateLimit {
            retry_after_ms: decision.reset_ms,
        })
        .into_response();
    }

    next.run(request).await
}

// ----- read endpoints -----

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "mindmux",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/status",
            "/metrics",
            "/events",
            "/agent/create",
            "/task/queue",
        ],
    }))
}

async fn health(State(state): State<ApiState>) -> Response {
    let orch = &state.orchestrator;
    let report = orch.health.report(orch.metrics.snapshot(&orch.cache));
    let status = if report.status == HealthState::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    agent_status: Option<String>,
    task_status: Option<String>,
}

async fn status(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Json<serde_json::Value> {
    let filters = StatusFilters::parse(
        query.agent_status.as_deref(),
        query.task_status.as_deref(),
    );
    let snapshot = status_snapshot(&state.orchestrator.cache, &filters);
    Json(serde_json::to_value(snapshot).unwrap_or_else(|_| json!({})))
}

async fn metrics(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let orch = &state.orchestrator;
    let snapshot = orch.metrics.snapshot(&orch.cache);
    Json(serde_json::to_value(snapshot).unwrap_or_else(|_| json!({})))
}

fn to_sse_event(event: &BusEvent) -> SseEvent {
    SseEvent::default()
        .event(event.event_type.as_str())
        .data(event.sse_data().to_string())
}

/// SSE stream: connection comment, bounded replay, then live events.
/// Subscribers that fall behind the broadcast channel are evicted by
/// ending their stream.
async fn events(State(state): State<ApiState>) -> Response {
    let (queued, rx) = state.orchestrator.bus.subscribe();

    let hello = tokio_stream::once(Ok::<SseEvent, Infallible>(
        SseEvent::default().comment("SSE connection established"),
    ));
    let replay = tokio_stream::iter(
        queued
            .iter()
            .map(to_sse_event)
            .map(Ok::<SseEvent, Infallible>)
            .collect::<Vec<_>>(),
    );
    let live = BroadcastStream::new(rx)
        .take_while(|item| item.is_ok())
        .filter_map(|item| item.ok())
        .map(|event| Ok::<SseEvent, Infallible>(to_sse_event(&event)));

    let stream = hello.chain(replay).chain(live);
    let sse = Sse::new(stream).keep_alive(KeepAlive::default());

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        sse,
    )
        .into_response()
}

async fn discover(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let discovered = state.orchestrator.discover()?;
    Ok(Json(
        serde_json::to_value(discovered).unwrap_or_else(|_| json!([])),
    ))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not found" })),
    )
        .into_response()
}

// ----- control endpoints -----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAgentRequest {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    capabilities: Vec<String>,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

async fn create_agent(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateAgentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orch = &state.orchestrator;
    let ctx = orch.access.resolve(bearer_token(&headers).as_deref());
    orch.access
        .authorize(&ctx, Action::AgentCreate, &body.name, "agent")?;

    let kind = AgentKind::parse(&body.kind).ok_or_else(|| {
        MindmuxError::validation(format!("unknown agent type '{}'", body.kind))
    })?;
    let agent = orch.create_agent(
        &body.name,
        kind,
        body.capabilities,
        body.config.unwrap_or_else(|| json!({})),
    )?;
    Ok(Json(serde_json::to_value(agent).unwrap_or_else(|_| json!({}))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAgentRequest {
    #[serde(default = "default_work_dir")]
    work_dir: String,
}

fn default_work_dir() -> String {
    ".".to_string()
}

async fn start_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StartAgentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orch = &state.orchestrator;
    let ctx = orch.access.resolve(bearer_token(&headers).as_deref());
    orch.access.authorize(&ctx, Action::AgentStart, &id, "agent")?;

    let session = orch.start_agent(&id, &body.work_dir).await?;
    Ok(Json(serde_json::to_value(session).unwrap_or_else(|_| json!({}))))
}

async fn stop_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orch = &state.orchestrator;
    let ctx = orch.access.resolve(bearer_token(&headers).as_deref());
    orch.access.authorize(&ctx, Action::AgentStop, &id, "agent")?;

    let agent = orch.stop_agent(&id).await?;
    Ok(Json(serde_json::to_value(agent).unwrap_or_else(|_| json!({}))))
}

async fn remove_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orch = &state.orchestrator;
    let ctx = orch.access.resolve(bearer_token(&headers).as_deref());
    orch.access
        .authorize(&ctx, Action::AgentDelete, &id, "agent")?;

    let agent = orch.remove_agent(&id)?;
    Ok(Json(serde_json::to_value(agent).unwrap_or_else(|_| json!({}))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueTaskRequest {
    prompt: String,
    #[serde(default)]
    required_capabilities: Vec<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    max_retries: u32,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

async fn queue_task(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<QueueTaskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orch = &state.orchestrator;
    let ctx = orch.access.resolve(bearer_token(&headers).as_deref());
    orch.access.authorize(&ctx, Action::TaskQueue, "*", "task")?;

    let task = orch.queue_task(
        &body.prompt,
        body.required_capabilities,
        body.priority,
        body.depends_on,
        body.max_retries,
        body.timeout_ms,
    )?;
    Ok(Json(serde_json::to_value(task).unwrap_or_else(|_| json!({}))))
}

async fn cancel_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orch = &state.orchestrator;
    let ctx = orch.access.resolve(bearer_token(&headers).as_deref());
    orch.access.authorize(&ctx, Action::TaskCancel, &id, "task")?;

    let task = orch.cancel_task(&id).await?;
    Ok(Json(serde_json::to_value(task).unwrap_or_else(|_| json!({}))))
}

async fn fork_pane(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orch = &state.orchestrator;
    let ctx = orch.access.resolve(bearer_token(&headers).as_deref());
    orch.access
        .authorize(&ctx, Action::SessionAttach, &id, "session")?;

    let new_pane = orch.fork_session(&id).await?;
    Ok(Json(json!({ "paneId": new_pane })))
}
