//! HTTP Routes
//!
//! - `/` - UI page
//! - `/health` - Health check
//! - `/api/status` - Executor dependency and initialization status
//! - `/api/agent/init` - Construct the executor eagerly
//! - `/api/run` - Run a task, streaming NDJSON
//! - `/api/history` - Recent event records
//! - `/api/progress` - Event bus snapshot
//! - `/api/events` - Server-Sent Events from the event bus
//! - `/api/settings` - Read and write settings

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{Html, Response};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{ApiError, AppState};
use crate::events::{BusSnapshot, EventRecord};
use crate::executor::probe_dependency;

const PLACEHOLDER_PAGE: &str = "<!doctype html>\n<html><head><title>agentstream</title></head>\
<body><h1>agentstream</h1><p>No UI configured. POST a prompt to <code>/api/run</code>.</p></body></html>\n";

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Response of `/api/status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub executor_dependency_ok: bool,
    pub agent_initialized: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetSettingRequest {
    pub path: String,
    pub value: Value,
}

/// UI page, or a placeholder when none is configured
pub async fn index(State(state): State<AppState>) -> Html<String> {
    if let Some(path) = &state.config.server.ui_path {
        match tokio::fs::read_to_string(path).await {
            Ok(page) => return Html(page),
            Err(e) => warn!("Failed to read UI page {}: {}", path.display(), e),
        }
    }
    Html(PLACEHOLDER_PAGE.to_string())
}

/// Health check endpoint.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "agentstream"
    }))
}

/// Whether the executor's dependency answers and the executor exists
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let executor = &state.config.executor;
    let executor_dependency_ok = probe_dependency(&executor.probe, executor.probe_timeout()).await;
    Json(StatusResponse {
        executor_dependency_ok,
        agent_initialized: state.executors.is_initialized(),
    })
}

/// Construct the executor now instead of on the first run
pub async fn init_agent(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    debug!("init_agent: called");
    state
        .executors
        .get_or_init()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    info!("Executor initialized");
    Ok(Json(json!({ "status": "initialized" })))
}

/// Run a task, streaming one JSON object per line until the terminal event
pub async fn run_task(State(state): State<AppState>, Json(request): Json<RunRequest>) -> Result<Response, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }
    info!(prompt_len = request.prompt.len(), "Starting streamed task");

    let stream = state
        .bridge
        .start(request.prompt)
        .map(|event| Ok::<_, Infallible>(event.to_ndjson()));

    Response::builder()
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Most recent event records, oldest first
pub async fn history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Json<Vec<EventRecord>> {
    let limit = query.limit.unwrap_or(state.config.bus.history_limit);
    Json(state.bus.history(limit))
}

pub async fn progress(State(state): State<AppState>) -> Json<BusSnapshot> {
    Json(state.bus.snapshot())
}

/// SSE endpoint streaming every bus event from now on.
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    debug!("events: new SSE subscriber");
    let stream = state.bus.subscribe().into_stream().map(|record| {
        SseEvent::default()
            .event(record.event_type.as_str())
            .id(record.id.to_string())
            .json_data(&record)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Whole settings document, or one value by dotted `path`
pub async fn get_settings(
    State(state): State<AppState>,
    Query(query): Query<SettingsQuery>,
) -> Result<Json<Value>, ApiError> {
    let settings = state.settings.lock().await;
    match query.path {
        None => Ok(Json(settings.to_value())),
        Some(path) => settings
            .get(&path)
            .cloned()
            .map(Json)
            .ok_or(ApiError::NotFound(path)),
    }
}

/// Set one value by dotted path and persist
pub async fn set_settings(
    State(state): State<AppState>,
    Json(request): Json<SetSettingRequest>,
) -> Result<Json<Value>, ApiError> {
    debug!(path = %request.path, "set_settings: called");
    let mut settings = state.settings.lock().await;
    // The shared store only changes once the new value is on disk
    let mut updated = settings.clone();
    updated
        .set(&request.path, request.value.clone())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    updated.save().map_err(|e| ApiError::Internal(e.to_string()))?;
    *settings = updated;
    Ok(Json(json!({
        "status": "ok",
        "path": request.path,
        "value": request.value
    })))
}
