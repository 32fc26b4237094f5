// File-backed media capture
//
// Stands in for a microphone and camera: the "microphone" loops a WAV file
// (or silence) and delivers fixed-size blocks paced in real time, the
// "camera" returns a still image (or a test card) on every snapshot.

use image::RgbImage;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, CaptureConfig, MediaCapture};
use crate::audio::{AudioFile, CAPTURE_SAMPLE_RATE};
use crate::error::LiveError;
use crate::video::{self, VideoFrame};

const TEST_CARD_SIZE: (u32, u32) = (640, 480);

pub struct FileCapture {
    audio_path: Option<PathBuf>,
    image_path: Option<PathBuf>,
    config: CaptureConfig,
    image: Option<RgbImage>,
    audio_rx: Option<mpsc::Receiver<AudioFrame>>,
    pacer: Option<JoinHandle<()>>,
    capturing: bool,
}

impl FileCapture {
    pub fn new(audio_path: Option<PathBuf>, image_path: Option<PathBuf>, config: CaptureConfig) -> Self {
        Self {
            audio_path,
            image_path,
            config,
            image: None,
            audio_rx: None,
            pacer: None,
            capturing: false,
        }
    }

    fn load_audio(&self) -> Result<(Vec<f32>, u32, u16), LiveError> {
        match &self.audio_path {
            Some(path) => {
                check_readable(path, "microphone source")?;
                let audio = AudioFile::open(path).map_err(|e| {
                    LiveError::DeviceUnavailable(format!("microphone source {}: {:#}", path.display(), e))
                })?;
                Ok((audio.samples, audio.sample_rate, audio.channels))
            }
            None => Ok((Vec::new(), CAPTURE_SAMPLE_RATE, 1)),
        }
    }

    fn load_image(&self) -> Result<RgbImage, LiveError> {
        load_still_image(self.image_path.as_deref())
    }
}

/// Camera frame from a still image, or a test card if none is configured
pub(crate) fn load_still_image(path: Option<&Path>) -> Result<RgbImage, LiveError> {
    match path {
        Some(path) => {
            check_readable(path, "camera source")?;
            let img = image::open(path).map_err(|e| {
                LiveError::DeviceUnavailable(format!("camera source {}: {}", path.display(), e))
            })?;
            Ok(img.to_rgb8())
        }
        None => Ok(video::test_pattern(TEST_CARD_SIZE.0, TEST_CARD_SIZE.1)),
    }
}

fn check_readable(path: &Path, what: &str) -> Result<(), LiveError> {
    match std::fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(LiveError::PermissionDenied(
            format!("{} {}: {}", what, path.display(), e),
        )),
        Err(e) => Err(LiveError::DeviceUnavailable(format!(
            "{} {}: {}",
            what,
            path.display(),
            e
        ))),
    }
}

/// Deliver looping blocks of `samples` at real-time pace until the receiver goes away
async fn pace_blocks(
    tx: mpsc::Sender<AudioFrame>,
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
    block_size: usize,
) {
    let block_len = block_size * channels.max(1) as usize;
    let period = Duration::from_secs_f64(block_size as f64 / sample_rate.max(1) as f64);
    let mut ticker = tokio::time::interval(period);
    let mut position = 0usize;
    let mut timestamp_ms = 0u64;

    loop {
        ticker.tick().await;

        let block: Vec<f32> = if samples.is_empty() {
            vec![0.0; block_len]
        } else {
            (0..block_len)
                .map(|i| samples[(position + i) % samples.len()])
                .collect()
        };
        if !samples.is_empty() {
            position = (position + block_len) % samples.len();
        }

        let frame = AudioFrame {
            samples: block,
            sample_rate,
            channels,
            timestamp_ms,
        };
        timestamp_ms += period.as_millis() as u64;

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("Capture queue full, dropping audio block at {}ms", timestamp_ms);
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    debug!("File capture pacer stopped");
}

#[async_trait::async_trait]
impl MediaCapture for FileCapture {
    async fn acquire(&mut self) -> Result<(), LiveError> {
        if self.capturing {
            return Err(LiveError::DeviceUnavailable("capture already acquired".to_string()));
        }

        let (samples, sample_rate, channels) = self.load_audio()?;
        let image = self.load_image()?;

        info!(
            "File capture acquired: {}Hz, {} channels, camera {}x{}",
            sample_rate,
            channels,
            image.width(),
            image.height()
        );

        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        let pacer = tokio::spawn(pace_blocks(
            tx,
            Arc::new(samples),
            sample_rate,
            channels,
            self.config.block_size.max(1),
        ));

        self.image = Some(image);
        self.audio_rx = Some(rx);
        self.pacer = Some(pacer);
        self.capturing = true;

        Ok(())
    }

    fn audio_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.audio_rx.take()
    }

    fn video_snapshot(&mut self) -> Result<VideoFrame, LiveError> {
        match (&self.image, self.capturing) {
            (Some(image), true) => Ok(VideoFrame::new(image.clone())),
            _ => Err(LiveError::DeviceUnavailable("camera not acquired".to_string())),
        }
    }

    fn release(&mut self) {
        if let Some(pacer) = self.pacer.take() {
            pacer.abort();
        }
        self.audio_rx = None;
        self.image = None;

        if self.capturing {
            info!("File capture released");
        }
        self.capturing = false;
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "file"
    }
}

impl Drop for FileCapture {
    fn drop(&mut self) {
        if self.capturing {
            warn!("File capture dropped without release");
            self.release();
        }
    }
}
