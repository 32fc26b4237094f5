// Test doubles for the live session: scripted capture, channel and output.
//
// Each mock reports what the controller did to it through a shared tracker.

#![allow(dead_code)]

use anyhow::Result;
use image::RgbImage;
use live_scientist::audio::{AudioChunk, AudioOutput, OutputFactory, PlaybackSourceHandle};
use live_scientist::capture::{AudioFrame, MediaCapture, MediaDevices};
use live_scientist::live::{ChannelState, LiveChannel, LiveConfig, LiveConnection, LiveConnector, LiveEvent};
use live_scientist::video::VideoFrame;
use live_scientist::{LiveError, SessionConfig, SessionController, SessionStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Capture
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Ok,
    /// `acquire()` is refused
    PermissionDenied,
    /// No device can be created at all
    Unavailable,
}

#[derive(Default)]
pub struct CaptureTracker {
    sender: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub snapshots: AtomicUsize,
}

impl CaptureTracker {
    /// Push one mono block at `sample_rate`, every sample set to `level`
    pub async fn push_block(&self, level: f32, len: usize, sample_rate: u32) {
        let sender = self.sender.lock().unwrap().clone();
        let sender = sender.expect("capture not acquired");
        sender
            .send(AudioFrame {
                samples: vec![level; len],
                sample_rate,
                channels: 1,
                timestamp_ms: 0,
            })
            .await
            .expect("session stopped reading audio");
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

pub struct MockDevices {
    pub mode: DeviceMode,
    pub tracker: Arc<CaptureTracker>,
}

impl MediaDevices for MockDevices {
    fn create(&self) -> Result<Box<dyn MediaCapture>, LiveError> {
        if self.mode == DeviceMode::Unavailable {
            return Err(LiveError::DeviceUnavailable("no camera".to_string()));
        }
        Ok(Box::new(MockCapture {
            mode: self.mode,
            tracker: Arc::clone(&self.tracker),
            receiver: None,
            capturing: false,
        }))
    }
}

pub struct MockCapture {
    mode: DeviceMode,
    tracker: Arc<CaptureTracker>,
    receiver: Option<mpsc::Receiver<AudioFrame>>,
    capturing: bool,
}

#[async_trait::async_trait]
impl MediaCapture for MockCapture {
    async fn acquire(&mut self) -> Result<(), LiveError> {
        if self.mode == DeviceMode::PermissionDenied {
            return Err(LiveError::PermissionDenied("user dismissed the prompt".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        *self.tracker.sender.lock().unwrap() = Some(tx);
        self.receiver = Some(rx);
        self.capturing = true;
        self.tracker.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn audio_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.receiver.take()
    }

    fn video_snapshot(&mut self) -> Result<VideoFrame, LiveError> {
        if !self.capturing {
            return Err(LiveError::DeviceUnavailable("not capturing".to_string()));
        }
        self.tracker.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(VideoFrame::new(RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]))))
    }

    fn release(&mut self) {
        self.capturing = false;
        self.receiver = None;
        self.tracker.sender.lock().unwrap().take();
        self.tracker.released.fetch_add(1, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Live channel
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Ok,
    Fail,
    /// `open()` never completes
    Hang,
}

#[derive(Default)]
pub struct ChannelTracker {
    events: Mutex<Option<mpsc::Sender<LiveEvent>>>,
    pub audio: Mutex<Vec<String>>,
    pub images: Mutex<Vec<String>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    close_delay: Mutex<Duration>,
}

impl ChannelTracker {
    /// Deliver an event as if it came from the remote
    pub async fn emit(&self, event: LiveEvent) {
        let sender = self.events.lock().unwrap().clone();
        sender
            .expect("no channel open")
            .send(event)
            .await
            .expect("session stopped reading events");
    }

    pub fn audio_sent(&self) -> Vec<String> {
        self.audio.lock().unwrap().clone()
    }

    pub fn images_sent(&self) -> Vec<String> {
        self.images.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Make every later `close()` take `delay` to finish
    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = delay;
    }
}

pub struct MockConnector {
    pub mode: ConnectMode,
    pub tracker: Arc<ChannelTracker>,
}

#[async_trait::async_trait]
impl LiveConnector for MockConnector {
    async fn open(&self, _config: &LiveConfig) -> Result<LiveConnection, LiveError> {
        self.tracker.opens.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            ConnectMode::Fail => Err(LiveError::ConnectFailed("handshake refused".to_string())),
            ConnectMode::Hang => std::future::pending().await,
            ConnectMode::Ok => {
                let (tx, rx) = mpsc::channel(64);
                *self.tracker.events.lock().unwrap() = Some(tx);
                Ok(LiveConnection {
                    channel: Arc::new(MockChannel {
                        tracker: Arc::clone(&self.tracker),
                    }),
                    events: rx,
                })
            }
        }
    }
}

pub struct MockChannel {
    tracker: Arc<ChannelTracker>,
}

#[async_trait::async_trait]
impl LiveChannel for MockChannel {
    fn send_audio(&self, data: String) {
        self.tracker.audio.lock().unwrap().push(data);
    }

    fn send_image(&self, data: String) {
        self.tracker.images.lock().unwrap().push(data);
    }

    fn state(&self) -> ChannelState {
        ChannelState::Open
    }

    async fn close(&self) {
        let delay = *self.tracker.close_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.tracker.events.lock().unwrap().take();
        self.tracker.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Playback output
// ============================================================================

#[derive(Debug, Clone)]
pub struct PlayedChunk {
    pub handle: u64,
    pub samples: Vec<f32>,
    pub start_at: f64,
}

#[derive(Default)]
pub struct OutputTracker {
    pub plays: Mutex<Vec<PlayedChunk>>,
    pub stops: Mutex<Vec<u64>>,
    pub closes: AtomicUsize,
}

impl OutputTracker {
    pub fn plays(&self) -> Vec<PlayedChunk> {
        self.plays.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<u64> {
        self.stops.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockOutputFactory {
    pub tracker: Arc<OutputTracker>,
}

impl OutputFactory for MockOutputFactory {
    fn create(&self, _sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(MockOutput {
            tracker: Arc::clone(&self.tracker),
        }))
    }
}

/// Output whose clock never advances, so nothing finishes on its own
pub struct MockOutput {
    tracker: Arc<OutputTracker>,
}

impl AudioOutput for MockOutput {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn play(&mut self, handle: PlaybackSourceHandle, chunk: &AudioChunk, start_at: f64) -> Result<()> {
        self.tracker.plays.lock().unwrap().push(PlayedChunk {
            handle: handle.id(),
            samples: chunk.samples.clone(),
            start_at,
        });
        Ok(())
    }

    fn stop(&mut self, handle: PlaybackSourceHandle) {
        self.tracker.stops.lock().unwrap().push(handle.id());
    }

    fn close(&mut self) -> Result<()> {
        self.tracker.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: Arc<SessionController>,
    pub capture: Arc<CaptureTracker>,
    pub channel: Arc<ChannelTracker>,
    pub output: Arc<OutputTracker>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), DeviceMode::Ok, ConnectMode::Ok)
    }

    pub fn with(config: SessionConfig, device_mode: DeviceMode, connect_mode: ConnectMode) -> Self {
        let capture = Arc::new(CaptureTracker::default());
        let channel = Arc::new(ChannelTracker::default());
        let output = Arc::new(OutputTracker::default());

        let controller = SessionController::new(
            config,
            Arc::new(MockDevices {
                mode: device_mode,
                tracker: Arc::clone(&capture),
            }),
            Arc::new(MockConnector {
                mode: connect_mode,
                tracker: Arc::clone(&channel),
            }),
            Arc::new(MockOutputFactory {
                tracker: Arc::clone(&output),
            }),
        );

        Self {
            controller: Arc::new(controller),
            capture,
            channel,
            output,
        }
    }

    /// Connect, deliver `Open` and wait for the session to report Connected
    pub async fn connect_and_open(&self) {
        let status = self.controller.connect().await;
        assert_eq!(status, SessionStatus::Connecting, "connect() waits for the channel to open");
        self.channel.emit(LiveEvent::Open).await;
        self.wait_for_status(SessionStatus::Connected).await;
    }

    pub async fn wait_for_status(&self, expected: SessionStatus) {
        let mut rx = self.controller.subscribe_status();
        let reached = tokio::time::timeout(Duration::from_secs(2), async {
            let _ = rx.wait_for(|s| *s == expected).await;
        })
        .await;
        assert!(
            reached.is_ok(),
            "status never became {} (still {})",
            expected,
            self.controller.status()
        );
    }
}

/// Session config with the video timer effectively off
pub fn test_config() -> SessionConfig {
    SessionConfig {
        video_interval: Duration::from_secs(3600),
        ..SessionConfig::default()
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
