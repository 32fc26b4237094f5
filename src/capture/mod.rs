//! Media capture: microphone blocks and camera snapshots
//!
//! - `backend`: the `MediaCapture` trait, capture sources and factory
//! - `microphone`: system microphone (cpal) with a still-image camera
//! - `file`: WAV/still-image backed capture

pub mod backend;
pub mod file;
pub mod microphone;

pub use backend::{
    AudioFrame, CaptureConfig, CaptureFactory, CaptureSource, ConfiguredDevices, MediaCapture,
    MediaDevices,
};
pub use file::FileCapture;
pub use microphone::MicrophoneCapture;
