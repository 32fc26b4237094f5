use super::state::AppState;
use crate::session::SessionStatus;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteResponse {
    pub muted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /live/connect
/// Start the live session; failures show up as `status: "error"`
pub async fn connect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Connect requested over HTTP");
    let status = state.controller.connect().await;
    (StatusCode::OK, Json(StatusResponse { status }))
}

/// POST /live/disconnect
/// Stop the live session and release devices
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Disconnect requested over HTTP");
    let status = state.controller.disconnect().await;
    (StatusCode::OK, Json(StatusResponse { status }))
}

/// POST /live/mute
/// Suppress or resume outbound microphone audio
pub async fn set_muted(State(state): State<AppState>, Json(req): Json<MuteRequest>) -> impl IntoResponse {
    state.controller.set_muted(req.muted);
    (
        StatusCode::OK,
        Json(MuteResponse {
            muted: state.controller.muted(),
        }),
    )
}

/// GET /live/status
/// Session status, mute state, volume meter and counters
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.controller.stats().await))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
