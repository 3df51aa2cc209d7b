//! ==============================================================================
//! api.rs - json control api
//! ==============================================================================
//!
//! purpose:
//!     http surface for operators and the dashboard backend.
//!     reads never touch the orchestrator: they copy from the snapshot the
//!     polling task publishes after every step. writes are forwarded to the
//!     polling task as `Control` messages and answered over a oneshot.
//!
//! endpoints:
//!     GET  /api/devices          per-device status
//!     GET  /api/stats            gateway counters
//!     GET  /api/polling          what the polling loop is doing
//!     POST /api/poll/start       queue every paired device
//!     POST /api/poll/device      {"device_id": ...}
//!     POST /api/poll/abort       force the active device to ERROR
//!     POST /api/device/pair      {"device_id", "table_left"?, "table_right"?, "secret"?}
//!     POST /api/device/remove    {"device_id": ...}
//!
//! relationships:
//!     - reads: domain.rs (GatewaySnapshot)
//!     - sends: orchestrator.rs (Control / ControlReply)
//!     - spawned by: main.rs
//!
//! ==============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tower_http::cors::CorsLayer;

use crate::domain::{DeviceSnapshot, GatewaySnapshot, GatewayStats, PollingStatus};
use crate::error::RegistryError;
use crate::orchestrator::{Control, ControlReply};
use crate::registry::PairRequest;

/// one control request and where to send its answer
pub struct ApiCommand {
    pub control: Control,
    pub reply: oneshot::Sender<Result<ControlReply, RegistryError>>,
}

#[derive(Clone)]
pub struct ApiState {
    pub snapshot: Arc<RwLock<GatewaySnapshot>>,
    pub commands: mpsc::Sender<ApiCommand>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("polling task is not running")]
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Registry(RegistryError::AlreadyPaired(_)) => StatusCode::CONFLICT,
            ApiError::Registry(RegistryError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = serde_json::json!({"status": "error", "message": self.to_string()});
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct DeviceRef {
    device_id: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/stats", get(stats))
        .route("/api/polling", get(polling))
        .route("/api/poll/start", post(start_polling))
        .route("/api/poll/device", post(poll_device))
        .route("/api/poll/abort", post(abort_polling))
        .route("/api/device/pair", post(pair_device))
        .route("/api/device/remove", post(remove_device))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: SocketAddr, state: ApiState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("[API] Listening on http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ==============================================================================
// handlers
// ==============================================================================

async fn list_devices(State(state): State<ApiState>) -> Json<Vec<DeviceSnapshot>> {
    Json(state.snapshot.read().await.devices.clone())
}

async fn stats(State(state): State<ApiState>) -> Json<GatewayStats> {
    Json(state.snapshot.read().await.stats.clone())
}

async fn polling(State(state): State<ApiState>) -> Json<PollingStatus> {
    Json(state.snapshot.read().await.polling.clone())
}

async fn start_polling(State(state): State<ApiState>) -> Result<Json<ControlReply>, ApiError> {
    dispatch(&state, Control::StartCycle).await
}

async fn poll_device(
    State(state): State<ApiState>,
    Json(body): Json<DeviceRef>,
) -> Result<Json<ControlReply>, ApiError> {
    dispatch(&state, Control::PollDevice(body.device_id)).await
}

async fn abort_polling(State(state): State<ApiState>) -> Result<Json<ControlReply>, ApiError> {
    dispatch(&state, Control::Abort).await
}

async fn pair_device(
    State(state): State<ApiState>,
    Json(request): Json<PairRequest>,
) -> Result<Json<ControlReply>, ApiError> {
    dispatch(&state, Control::Pair(request)).await
}

async fn remove_device(
    State(state): State<ApiState>,
    Json(body): Json<DeviceRef>,
) -> Result<Json<ControlReply>, ApiError> {
    dispatch(&state, Control::Remove(body.device_id)).await
}

async fn dispatch(state: &ApiState, control: Control) -> Result<Json<ControlReply>, ApiError> {
    tracing::debug!("[API] {:?}", control);
    let (reply, answer) = oneshot::channel();
    state
        .commands
        .send(ApiCommand { control, reply })
        .await
        .map_err(|_| ApiError::Unavailable)?;
    let result = answer.await.map_err(|_| ApiError::Unavailable)?;
    Ok(Json(result?))
}
