use super::config::SessionConfig;
use super::stats::{SessionCounters, SessionStats, SessionStatus};
use crate::audio::{codec, convert, OutputFactory, PlaybackScheduler};
use crate::capture::{AudioFrame, MediaCapture, MediaDevices};
use crate::error::LiveError;
use crate::live::{InboundAudio, LiveChannel, LiveConnection, LiveConnector, LiveEvent};
use crate::video;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type SharedCapture = Arc<Mutex<Box<dyn MediaCapture>>>;
type SharedPlayback = Arc<Mutex<PlaybackScheduler>>;

/// Identity of the current (or last) session
#[derive(Debug, Clone)]
struct SessionInfo {
    session_id: String,
    started_at: DateTime<Utc>,
}

/// Resources owned by one live session
///
/// Created by `connect()`, torn down by `disconnect()` or by the pump when
/// the channel fails or closes.
struct LiveContext {
    epoch: u64,
    capture: SharedCapture,
    channel: Arc<dyn LiveChannel>,
    playback: SharedPlayback,
    pump: Option<JoinHandle<()>>,
}

impl LiveContext {
    async fn teardown(mut self) {
        // Cancels the video timer and the audio loop before anything is released
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        self.channel.close().await;

        {
            let mut capture = self.capture.lock().await;
            capture.release();
        }

        self.playback.lock().await.shutdown();

        debug!("Live context torn down (epoch {})", self.epoch);
    }
}

/// Why an in-flight `connect()` did not install a session
enum ConnectAbort {
    /// `disconnect()` ran while connecting
    Cancelled,
    Failed(LiveError),
}

impl From<LiveError> for ConnectAbort {
    fn from(err: LiveError) -> Self {
        ConnectAbort::Failed(err)
    }
}

/// State shared between the controller and its session pump
struct Shared {
    status_tx: watch::Sender<SessionStatus>,
    volume_tx: watch::Sender<f32>,
    /// Bumped by every `connect()` and `disconnect()`; stale work checks it
    epoch_tx: watch::Sender<u64>,
    muted: AtomicBool,
    counters: SessionCounters,
    session: Mutex<Option<SessionInfo>>,
    context: Mutex<Option<LiveContext>>,
    /// Pump that took its own context out of the slot and is still releasing it
    retiring: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        *self.epoch_tx.borrow() == epoch
    }

    fn advance_epoch(&self) -> u64 {
        let mut next = 0;
        self.epoch_tx.send_modify(|epoch| {
            *epoch += 1;
            next = *epoch;
        });
        next
    }

    fn set_status(&self, status: SessionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            info!("Session status: {} -> {}", current, status);
            *current = status;
            true
        });
    }

    /// Set `status` unless a newer connect/disconnect superseded `epoch`
    async fn set_status_if_current(&self, epoch: u64, status: SessionStatus) {
        let _slot = self.context.lock().await;
        if self.is_current(epoch) {
            if !status.is_active() {
                self.volume_tx.send_replace(0.0);
            }
            self.set_status(status);
        }
    }

    /// Resolves once `epoch` is no longer current
    async fn superseded(&self, epoch: u64) {
        let mut epoch_rx = self.epoch_tx.subscribe();
        loop {
            if *epoch_rx.borrow_and_update() != epoch {
                return;
            }
            if epoch_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run `fut` unless `epoch` is superseded first
    async fn until_superseded<F: Future>(&self, epoch: u64, fut: F) -> Option<F::Output> {
        tokio::select! {
            output = fut => Some(output),
            _ = self.superseded(epoch) => None,
        }
    }

    /// Tear down the session of `epoch` from inside its pump
    async fn finish(&self, epoch: u64, status: SessionStatus) {
        let context = {
            let mut slot = self.context.lock().await;
            if slot.as_ref().is_some_and(|context| context.epoch == epoch) {
                let mut context = slot.take();
                // The pump is the caller; park its handle so disconnect() and
                // connect() can wait for the release instead of aborting it
                if let Some(pump) = context.as_mut().and_then(|c| c.pump.take()) {
                    *self.retiring.lock().await = Some(pump);
                }
                context
            } else {
                None
            }
        };

        let Some(context) = context else {
            return;
        };

        context.teardown().await;

        self.set_status_if_current(epoch, status).await;
    }

    /// Wait for a pump-initiated teardown still in flight, if any
    async fn await_retiring(&self) {
        let retiring = self.retiring.lock().await.take();
        if let Some(pump) = retiring {
            debug!("Waiting for the previous session to release its devices");
            if let Err(e) = pump.await {
                if e.is_panic() {
                    error!("Session pump panicked during teardown: {}", e);
                }
            }
        }
    }
}

/// Top-level live session state machine
///
/// `Disconnected -> Connecting -> Connected -> {Disconnected, Error}`. At most
/// one session exists at a time; `Error` is left by calling `connect()` again.
pub struct SessionController {
    config: SessionConfig,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn LiveConnector>,
    outputs: Arc<dyn OutputFactory>,
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn LiveConnector>,
        outputs: Arc<dyn OutputFactory>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Disconnected);
        let (volume_tx, _) = watch::channel(0.0);
        let (epoch_tx, _) = watch::channel(0);

        Self {
            config,
            devices,
            connector,
            outputs,
            shared: Arc::new(Shared {
                status_tx,
                volume_tx,
                epoch_tx,
                muted: AtomicBool::new(false),
                counters: SessionCounters::default(),
                session: Mutex::new(None),
                context: Mutex::new(None),
                retiring: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status_tx.borrow()
    }

    pub fn muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    pub fn volume_level(&self) -> f32 {
        *self.shared.volume_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe_volume(&self) -> watch::Receiver<f32> {
        self.shared.volume_tx.subscribe()
    }

    /// Suppress (or resume) outbound audio; capture and metering continue
    pub fn set_muted(&self, muted: bool) {
        let previous = self.shared.muted.swap(muted, Ordering::SeqCst);
        if previous != muted {
            info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        }
    }

    /// Start a live session
    ///
    /// Failures are logged and reported only through the returned/observable
    /// status. Calling this while a session is connecting or connected is a
    /// no-op.
    pub async fn connect(&self) -> SessionStatus {
        let epoch = {
            let _slot = self.shared.context.lock().await;
            let current = self.status();
            if current.is_active() {
                warn!("connect() ignored: session already {}", current);
                return current;
            }

            let epoch = self.shared.advance_epoch();
            self.shared.counters.reset();
            self.shared.volume_tx.send_replace(0.0);
            self.shared.set_status(SessionStatus::Connecting);
            epoch
        };

        // Devices of an errored session may still be closing
        self.shared.await_retiring().await;

        let session_id = uuid::Uuid::new_v4().to_string();
        info!("Starting live session {} (model {})", session_id, self.config.live.model);
        *self.shared.session.lock().await = Some(SessionInfo {
            session_id,
            started_at: Utc::now(),
        });

        match self.establish(epoch).await {
            Ok(()) => {
                debug!("Live session installed, waiting for channel open");
                self.status()
            }
            Err(ConnectAbort::Cancelled) => {
                info!("Connect cancelled by disconnect");
                SessionStatus::Disconnected
            }
            Err(ConnectAbort::Failed(e)) => {
                error!("Live session connect failed: {}", e);
                self.shared.set_status_if_current(epoch, SessionStatus::Error).await;
                self.status()
            }
        }
    }

    /// Stop the session and release every resource; never fails
    pub async fn disconnect(&self) -> SessionStatus {
        let context = {
            let mut slot = self.shared.context.lock().await;
            self.shared.advance_epoch();
            slot.take()
        };

        match context {
            Some(context) => {
                info!("Disconnecting live session");
                context.teardown().await;
            }
            None => debug!("disconnect(): no live resources held"),
        }
        self.shared.await_retiring().await;

        {
            let _slot = self.shared.context.lock().await;
            self.shared.volume_tx.send_replace(0.0);
            self.shared.set_status(SessionStatus::Disconnected);
        }

        SessionStatus::Disconnected
    }

    /// Get current session statistics
    pub async fn stats(&self) -> SessionStats {
        let playback_sources_live = {
            let slot = self.shared.context.lock().await;
            match slot.as_ref() {
                Some(context) => {
                    let mut playback = context.playback.lock().await;
                    let now = playback.current_time();
                    playback.reap(now);
                    playback.live_count()
                }
                None => 0,
            }
        };

        let info = self.shared.session.lock().await.clone();
        let counters = &self.shared.counters;

        SessionStats {
            session_id: info.as_ref().map(|i| i.session_id.clone()),
            status: self.status(),
            muted: self.muted(),
            volume_level: self.volume_level(),
            started_at: info.as_ref().map(|i| i.started_at),
            duration_secs: info
                .as_ref()
                .map(|i| Utc::now().signed_duration_since(i.started_at).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0),
            audio_chunks_sent: SessionCounters::read(&counters.audio_chunks_sent),
            audio_chunks_muted: SessionCounters::read(&counters.audio_chunks_muted),
            video_frames_sent: SessionCounters::read(&counters.video_frames_sent),
            audio_chunks_received: SessionCounters::read(&counters.audio_chunks_received),
            playback_sources_live,
        }
    }

    async fn establish(&self, epoch: u64) -> Result<(), ConnectAbort> {
        let mut capture = self.devices.create()?;

        let (audio_rx, connection) = match self.open_pipelines(epoch, &mut capture).await {
            Ok(opened) => opened,
            Err(abort) => {
                capture.release();
                return Err(abort);
            }
        };

        let output = match self.outputs.create(self.config.playback_sample_rate) {
            Ok(output) => output,
            Err(e) => {
                connection.channel.close().await;
                capture.release();
                return Err(LiveError::DeviceUnavailable(format!("audio output: {:#}", e)).into());
            }
        };

        let mut slot = self.shared.context.lock().await;
        if !self.shared.is_current(epoch) {
            drop(slot);
            connection.channel.close().await;
            capture.release();
            return Err(ConnectAbort::Cancelled);
        }

        let capture: SharedCapture = Arc::new(Mutex::new(capture));
        let playback: SharedPlayback = Arc::new(Mutex::new(PlaybackScheduler::new(output)));

        let pump = Pump {
            shared: Arc::clone(&self.shared),
            epoch,
            capture: Arc::clone(&capture),
            channel: Arc::clone(&connection.channel),
            playback: Arc::clone(&playback),
            capture_sample_rate: self.config.capture_sample_rate,
            playback_sample_rate: self.config.playback_sample_rate,
            meter_gain: self.config.meter_gain,
            video_interval: self.config.video_interval,
            jpeg_quality: self.config.jpeg_quality,
        };
        let pump = tokio::spawn(pump.run(connection.events, audio_rx));

        *slot = Some(LiveContext {
            epoch,
            capture,
            channel: connection.channel,
            playback,
            pump: Some(pump),
        });

        Ok(())
    }

    /// Acquire media, then open the remote channel
    async fn open_pipelines(
        &self,
        epoch: u64,
        capture: &mut Box<dyn MediaCapture>,
    ) -> Result<(mpsc::Receiver<AudioFrame>, LiveConnection), ConnectAbort> {
        info!("Acquiring media from {}", capture.name());
        self.shared
            .until_superseded(epoch, capture.acquire())
            .await
            .ok_or(ConnectAbort::Cancelled)??;

        let audio_rx = capture.audio_frames().ok_or_else(|| {
            LiveError::DeviceUnavailable("capture produced no audio stream".to_string())
        })?;

        let connection = self
            .shared
            .until_superseded(epoch, self.connector.open(&self.config.live))
            .await
            .ok_or(ConnectAbort::Cancelled)??;

        Ok((audio_rx, connection))
    }
}

/// Per-session event loop
///
/// Multiplexes channel events, microphone blocks and the video timer on one
/// task, so their handlers never run concurrently.
struct Pump {
    shared: Arc<Shared>,
    epoch: u64,
    capture: SharedCapture,
    channel: Arc<dyn LiveChannel>,
    playback: SharedPlayback,
    capture_sample_rate: u32,
    playback_sample_rate: u32,
    meter_gain: f32,
    video_interval: Duration,
    jpeg_quality: u8,
}

impl Pump {
    async fn run(self, mut events: mpsc::Receiver<LiveEvent>, mut audio_rx: mpsc::Receiver<AudioFrame>) {
        let mut opened = false;
        let mut microphone_live = true;
        let mut video_tick = tokio::time::interval_at(Instant::now() + self.video_interval, self.video_interval);
        video_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(LiveEvent::Open) => {
                        if !opened {
                            opened = true;
                            video_tick.reset();
                            self.shared.set_status_if_current(self.epoch, SessionStatus::Connected).await;
                        }
                    }
                    Some(LiveEvent::Audio(audio)) => self.on_model_audio(audio).await,
                    Some(LiveEvent::Interrupted) => self.on_interrupted().await,
                    Some(LiveEvent::TurnComplete) => debug!("Model turn complete"),
                    Some(LiveEvent::Error(message)) => {
                        error!("Live transport error: {}", message);
                        break SessionStatus::Error;
                    }
                    Some(LiveEvent::Close(reason)) => {
                        info!("Live channel closed: {}", reason.as_deref().unwrap_or("no reason given"));
                        // A close before the remote acknowledged setup is a failed connect
                        break if opened { SessionStatus::Disconnected } else { SessionStatus::Error };
                    }
                    None => {
                        warn!("Live event stream ended without a close event");
                        break if opened { SessionStatus::Disconnected } else { SessionStatus::Error };
                    }
                },
                frame = audio_rx.recv(), if microphone_live => match frame {
                    Some(frame) if opened => self.on_audio_block(frame),
                    Some(_) => debug!("Dropping audio block captured before channel open"),
                    None => {
                        warn!("Microphone stream ended");
                        microphone_live = false;
                    }
                },
                _ = video_tick.tick(), if opened => self.on_video_tick().await,
            }
        };

        self.shared.finish(self.epoch, outcome).await;
    }

    fn on_audio_block(&self, frame: AudioFrame) {
        let mono = convert::to_mono(&frame.samples, frame.channels);

        let level = convert::volume_level(&mono, self.meter_gain);
        self.shared.volume_tx.send_replace(level);

        if self.shared.muted.load(Ordering::SeqCst) {
            SessionCounters::bump(&self.shared.counters.audio_chunks_muted);
            return;
        }

        let samples = convert::resample(&mono, frame.sample_rate, self.capture_sample_rate);
        self.channel.send_audio(codec::encode(&samples));
        SessionCounters::bump(&self.shared.counters.audio_chunks_sent);
    }

    async fn on_model_audio(&self, audio: InboundAudio) {
        let sample_rate = audio
            .mime_type
            .as_deref()
            .and_then(codec::pcm_rate_from_mime)
            .unwrap_or(self.playback_sample_rate);

        let chunk = match codec::decode(&audio.data, sample_rate) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Discarding undecodable audio reply: {}", e);
                return;
            }
        };
        SessionCounters::bump(&self.shared.counters.audio_chunks_received);

        if chunk.is_empty() {
            return;
        }

        let mut playback = self.playback.lock().await;
        if let Err(e) = playback.schedule_now(&chunk) {
            warn!("Failed to schedule audio reply: {:#}", e);
        }
    }

    async fn on_interrupted(&self) {
        info!("Model reply interrupted, flushing playback");
        self.playback.lock().await.stop_all();
    }

    async fn on_video_tick(&self) {
        if !self.shared.is_current(self.epoch) {
            return;
        }

        let snapshot = {
            let mut capture = self.capture.lock().await;
            capture.video_snapshot()
        };

        let frame = match snapshot {
            Ok(frame) if frame.is_empty() => {
                debug!("Camera not ready, skipping frame");
                return;
            }
            Ok(frame) => frame,
            Err(e) => {
                warn!("Camera snapshot failed: {}", e);
                return;
            }
        };

        let encoded = match video::encode_jpeg_base64(&frame, self.jpeg_quality) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Dropping camera frame: {}", e);
                return;
            }
        };

        if !self.shared.is_current(self.epoch) {
            return;
        }

        self.channel.send_image(encoded);
        SessionCounters::bump(&self.shared.counters.video_frames_sent);
    }
}
