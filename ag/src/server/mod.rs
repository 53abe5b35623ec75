//! HTTP surface for agent sessions
//!
//! # Architecture
//!
//! ```text
//! Browser UI
//!     ↓ POST /api/run (NDJSON)      ↓ GET /api/events (SSE)
//! routes (this module)            EventBus subscription
//!     ↓
//! TaskStreamBridge → TaskExecutor
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use agentstream::server::{AppState, serve};
//!
//! let state = AppState::from_config(config, sessions)?;
//! serve(state).await?;
//! ```

pub mod routes;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use eyre::{Context, Result};
use serde_json::json;
use settingsstore::SettingsStore;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bridge::{SessionRegistry, TaskStreamBridge};
use crate::config::Config;
use crate::events::{EventBus, create_event_bus};
use crate::executor::{CommandExecutor, ExecutorError, ExecutorSlot, TaskExecutor};

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: Arc<EventBus>,
    pub executors: Arc<ExecutorSlot>,
    pub bridge: Arc<TaskStreamBridge>,
    pub settings: Arc<Mutex<SettingsStore>>,
}

impl AppState {
    /// Wire up the bus, bridge and settings around an executor slot
    pub fn new(
        config: Config,
        executors: Arc<ExecutorSlot>,
        sessions: SessionRegistry,
        settings: SettingsStore,
    ) -> Self {
        debug!("AppState::new: called");
        let bus = create_event_bus(config.bus.capacity, config.bus.subscriber_buffer);
        let bridge = Arc::new(TaskStreamBridge::new(
            Arc::clone(&executors),
            sessions,
            Arc::clone(&bus),
            config.bridge.clone(),
        ));
        Self {
            config: Arc::new(config),
            bus,
            executors,
            bridge,
            settings: Arc::new(Mutex::new(settings)),
        }
    }

    /// Build state for the configured command executor
    ///
    /// The executor itself is constructed lazily, on the first run or an
    /// explicit init request.
    pub fn from_config(config: Config, sessions: SessionRegistry) -> Result<Self> {
        let settings_path = config.settings.resolved_path();
        let settings = match SettingsStore::open(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %settings_path.display(), error = %e, "Unreadable settings file, using defaults");
                SettingsStore::with_defaults(&settings_path)
            }
        };

        let executor_config = config.executor.clone();
        let executors = Arc::new(ExecutorSlot::new(Arc::new(
            move || -> Result<Arc<dyn TaskExecutor>, ExecutorError> {
                let executor = CommandExecutor::from_config(&executor_config)?;
                Ok(Arc::new(executor))
            },
        )));

        Ok(Self::new(config, executors, sessions, settings))
    }
}

/// Build the router over `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::status))
        .route("/api/agent/init", axum::routing::post(routes::init_agent))
        .route("/api/run", axum::routing::post(routes::run_task))
        .route("/api/history", get(routes::history))
        .route("/api/progress", get(routes::progress))
        .route("/api/events", get(routes::events))
        .route("/api/settings", get(routes::get_settings).post(routes::set_settings))
        .with_state(state)
}

/// Bind the configured address and serve until the process exits
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind {addr}"))?;
    info!("agentstream listening on http://{}", addr);

    axum::serve(listener, router(state)).await.context("Server error")?;
    Ok(())
}

/// Errors returned by route handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Setting not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
