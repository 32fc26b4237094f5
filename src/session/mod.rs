//! Live session management
//!
//! This module provides the `SessionController` that manages:
//! - Microphone and camera acquisition
//! - Streaming audio blocks and camera frames to the live channel
//! - Gapless playback of the model's audio replies
//! - Session status, mute state and the microphone volume meter

mod config;
mod controller;
mod stats;

pub use config::SessionConfig;
pub use controller::SessionController;
pub use stats::{SessionStats, SessionStatus};
