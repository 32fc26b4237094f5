use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::live::LiveConfig;
use crate::video::DEFAULT_JPEG_QUALITY;

/// Configuration for a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Remote channel parameters (model, persona, voice)
    pub live: LiveConfig,

    /// Rate of audio sent to the model (16kHz)
    pub capture_sample_rate: u32,

    /// Rate of audio replies from the model (24kHz)
    pub playback_sample_rate: u32,

    /// Amplification applied to block RMS for the volume meter
    pub meter_gain: f32,

    /// Interval between camera frames sent to the model
    /// Default: 1 second
    pub video_interval: Duration,

    /// JPEG quality of camera frames (1-100)
    pub jpeg_quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            live: LiveConfig::default(),
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            meter_gain: 5.0,
            video_interval: Duration::from_secs(1), // 1 FPS
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}
