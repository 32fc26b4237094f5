// System microphone capture (cpal)
//
// cpal streams are not Send, so the input stream lives on its own thread for
// the whole capture. The data callback collects interleaved samples into
// fixed-size blocks and hands them to the session over a bounded channel.
// The camera is a still image (or a test card).

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use image::RgbImage;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, CaptureConfig, MediaCapture};
use super::file::load_still_image;
use crate::error::LiveError;
use crate::video::VideoFrame;

/// Opened input device, reported back by the stream thread
#[derive(Debug, Clone)]
struct InputInfo {
    device: String,
    sample_rate: u32,
    channels: u16,
}

/// Stream thread handle; dropping `stop` ends the stream
struct InputThread {
    stop: std_mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl InputThread {
    fn shutdown(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("Microphone thread panicked");
        }
    }
}

pub struct MicrophoneCapture {
    image_path: Option<PathBuf>,
    config: CaptureConfig,
    image: Option<RgbImage>,
    audio_rx: Option<mpsc::Receiver<AudioFrame>>,
    input: Option<InputThread>,
    capturing: bool,
}

impl MicrophoneCapture {
    /// Nothing is opened until `acquire()`
    pub fn new(image_path: Option<PathBuf>, config: CaptureConfig) -> Self {
        Self {
            image_path,
            config,
            image: None,
            audio_rx: None,
            input: None,
            capturing: false,
        }
    }
}

#[async_trait::async_trait]
impl MediaCapture for MicrophoneCapture {
    async fn acquire(&mut self) -> Result<(), LiveError> {
        if self.capturing {
            return Err(LiveError::DeviceUnavailable("capture already acquired".to_string()));
        }

        let image = load_still_image(self.image_path.as_deref())?;

        let (frame_tx, frame_rx) = mpsc::channel(self.config.queue_depth.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let block_size = self.config.block_size.max(1);

        let handle = thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || run_input(frame_tx, block_size, ready_tx, stop_rx))
            .map_err(|e| LiveError::DeviceUnavailable(format!("failed to start microphone thread: {}", e)))?;

        let opened = match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(LiveError::DeviceUnavailable(
                "microphone thread exited before the device opened".to_string(),
            )),
        };

        let info = match opened {
            Ok(info) => info,
            Err(e) => {
                let _ = handle.join();
                return Err(e);
            }
        };

        info!(
            "Microphone acquired: {} ({}Hz, {} channels), camera {}x{}",
            info.device,
            info.sample_rate,
            info.channels,
            image.width(),
            image.height()
        );

        self.image = Some(image);
        self.audio_rx = Some(frame_rx);
        self.input = Some(InputThread { stop: stop_tx, handle });
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
        if let Some(input) = self.input.take() {
            input.shutdown();
        }
        self.audio_rx = None;
        self.image = None;

        if self.capturing {
            info!("Microphone released");
        }
        self.capturing = false;
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        if self.capturing {
            warn!("Microphone capture dropped without release");
            self.release();
        }
    }
}

/// Body of the stream thread: open, report, then park until stopped
fn run_input(
    frames: mpsc::Sender<AudioFrame>,
    block_size: usize,
    ready: oneshot::Sender<Result<InputInfo, LiveError>>,
    stop: std_mpsc::Receiver<()>,
) {
    let stream = match open_input(frames, block_size) {
        Ok((stream, info)) => {
            let _ = ready.send(Ok(info));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Returns on release() or when the capture is dropped mid-acquire
    let _ = stop.recv();
    drop(stream);
    debug!("Microphone stream closed");
}

fn open_input(
    frames: mpsc::Sender<AudioFrame>,
    block_size: usize,
) -> Result<(cpal::Stream, InputInfo), LiveError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| LiveError::DeviceUnavailable("no default input device".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "unknown input".to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| device_error("input config", e))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let info = InputInfo {
        device: name,
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let mut blocks = BlockAssembler::new(frames, info.sample_rate, info.channels, block_size);
    let on_error = |e: cpal::StreamError| warn!("Microphone stream error: {}", e);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| blocks.push(data.iter().copied()),
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                blocks.push(data.iter().map(|&s| s as f32 / 32768.0))
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                blocks.push(data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0))
            },
            on_error,
            None,
        ),
        other => {
            return Err(LiveError::DeviceUnavailable(format!(
                "unsupported input sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| device_error("input stream", e))?;

    stream.play().map_err(|e| device_error("input stream", e))?;

    Ok((stream, info))
}

/// Map a host error onto the capture taxonomy
///
/// Hosts report a refused microphone through backend-specific errors, so the
/// message text is all there is to go on.
fn device_error(what: &str, err: impl Display) -> LiveError {
    let message = format!("{}: {}", what, err);
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted") {
        LiveError::PermissionDenied(message)
    } else {
        LiveError::DeviceUnavailable(message)
    }
}

/// Cuts the callback's sample stream into `block_size`-frame blocks
struct BlockAssembler {
    frames: mpsc::Sender<AudioFrame>,
    sample_rate: u32,
    channels: u16,
    block_len: usize,
    pending: Vec<f32>,
    frames_emitted: u64,
    dropped: u64,
}

impl BlockAssembler {
    fn new(frames: mpsc::Sender<AudioFrame>, sample_rate: u32, channels: u16, block_size: usize) -> Self {
        let block_len = block_size * channels.max(1) as usize;
        Self {
            frames,
            sample_rate,
            channels,
            block_len,
            pending: Vec::with_capacity(block_len),
            frames_emitted: 0,
            dropped: 0,
        }
    }

    fn push(&mut self, samples: impl IntoIterator<Item = f32>) {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() >= self.block_len {
                self.emit();
            }
        }
    }

    fn emit(&mut self) {
        let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_len));
        let frame_count = (samples.len() / self.channels.max(1) as usize) as u64;
        let timestamp_ms = self.frames_emitted * 1000 / self.sample_rate.max(1) as u64;
        self.frames_emitted += frame_count;

        let frame = AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_ms,
        };

        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Consumer is behind; live audio is not worth queueing
                self.dropped += 1;
                if self.dropped == 1 || self.dropped % 50 == 0 {
                    warn!("Microphone queue full, {} blocks dropped", self.dropped);
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
