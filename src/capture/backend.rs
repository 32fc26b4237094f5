use std::path::PathBuf;
use tokio::sync::mpsc;

use super::file::FileCapture;
use super::microphone::MicrophoneCapture;
use crate::error::LiveError;
use crate::video::VideoFrame;

/// Raw capture block (f32, interleaved, native device rate)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Normalized samples in [-1, 1], interleaved by channel
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Configuration for media capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample frames per audio block
    pub block_size: usize,
    /// Blocks buffered between the device and the session before dropping
    pub queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            queue_depth: 32,
        }
    }
}

/// Microphone + camera capture
///
/// One instance owns the devices for a session's lifetime. The audio block
/// sequence is handed out once per `acquire()`; after `release()` a new
/// `acquire()` is needed.
#[async_trait::async_trait]
pub trait MediaCapture: Send + Sync {
    /// Request simultaneous audio and video capture
    async fn acquire(&mut self) -> Result<(), LiveError>;

    /// Take the audio block stream (`None` if not acquired or already taken)
    fn audio_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>>;

    /// Grab the current camera frame
    fn video_snapshot(&mut self) -> Result<VideoFrame, LiveError>;

    /// Stop all device tracks; safe to call repeatedly or before `acquire()`
    fn release(&mut self);

    /// Check if devices are currently held
    fn is_capturing(&self) -> bool;

    /// Get capture name for logging
    fn name(&self) -> &str;
}

/// Source of a fresh [`MediaCapture`] per session
pub trait MediaDevices: Send + Sync {
    fn create(&self) -> Result<Box<dyn MediaCapture>, LiveError>;
}

/// Capture source type
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Default system microphone; camera from a still image (test card if
    /// `None`)
    Microphone { image: Option<PathBuf> },
    /// Microphone from a WAV file (silence if `None`), camera from a still
    /// image (test card if `None`)
    File {
        audio: Option<PathBuf>,
        image: Option<PathBuf>,
    },
}

/// Capture factory
pub struct CaptureFactory;

impl CaptureFactory {
    /// Create a capture for the given source
    pub fn create(
        source: &CaptureSource,
        config: CaptureConfig,
    ) -> Result<Box<dyn MediaCapture>, LiveError> {
        match source {
            CaptureSource::Microphone { image } => {
                Ok(Box::new(MicrophoneCapture::new(image.clone(), config)))
            }

            CaptureSource::File { audio, image } => Ok(Box::new(FileCapture::new(
                audio.clone(),
                image.clone(),
                config,
            ))),
        }
    }
}

/// [`MediaDevices`] built from static configuration
#[derive(Debug, Clone)]
pub struct ConfiguredDevices {
    pub source: CaptureSource,
    pub config: CaptureConfig,
}

impl MediaDevices for ConfiguredDevices {
    fn create(&self) -> Result<Box<dyn MediaCapture>, LiveError> {
        CaptureFactory::create(&self.source, self.config.clone())
    }
}
