//! HTTP API server for external control (research UI)
//!
//! This module provides a REST API for driving the live session:
//! - POST /live/connect - Start the session
//! - POST /live/disconnect - Stop the session
//! - POST /live/mute - Mute or unmute the microphone
//! - GET /live/status - Query status, volume and counters
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{MuteRequest, MuteResponse, StatusResponse};
pub use routes::create_router;
pub use state::AppState;
