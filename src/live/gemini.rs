//! Gemini Live WebSocket channel
//!
//! One writer task owns the sink so outbound messages leave in send order;
//! one reader task turns server frames into [`LiveEvent`]s. The server sends
//! JSON in both Text and Binary frames.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{parse_server_message, RealtimeInputMessage, SetupMessage};
use super::transport::{
    ChannelState, ChannelStateCell, LiveChannel, LiveConfig, LiveConnection, LiveConnector,
    LiveEvent,
};
use crate::audio::codec::pcm_mime_type;
use crate::audio::CAPTURE_SAMPLE_RATE;
use crate::error::LiveError;
use crate::video::JPEG_MIME;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug)]
enum Outbound {
    Media { mime_type: String, data: String },
    Close,
}

/// Opens channels to the Gemini Live API
#[derive(Debug, Default, Clone)]
pub struct GeminiConnector;

impl GeminiConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl LiveConnector for GeminiConnector {
    async fn open(&self, config: &LiveConfig) -> Result<LiveConnection, LiveError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LiveError::ConnectFailed("no API key configured".to_string()))?;

        info!(
            model = %config.model,
            voice = %config.voice,
            "Connecting to live endpoint {}",
            config.endpoint
        );

        let url = format!("{}?key={}", config.endpoint, api_key);
        let (ws, _response) =
            tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    LiveError::ConnectFailed(format!(
                        "handshake timed out after {:?}",
                        config.connect_timeout
                    ))
                })?
                .map_err(|e| LiveError::ConnectFailed(e.to_string()))?;

        let (mut sink, stream) = ws.split();

        let setup = serde_json::to_string(&SetupMessage::new(config))
            .map_err(|e| LiveError::ConnectFailed(format!("failed to encode setup: {}", e)))?;
        sink.send(Message::text(setup))
            .await
            .map_err(|e| LiveError::ConnectFailed(format!("failed to send setup: {}", e)))?;

        debug!("Setup sent, waiting for acknowledgement");

        let state = Arc::new(ChannelStateCell::new(ChannelState::Connecting));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(256);

        let writer = tokio::spawn(write_loop(sink, out_rx));
        let reader = tokio::spawn(read_loop(stream, event_tx, Arc::clone(&state)));

        let channel = GeminiChannel {
            out_tx,
            state,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            close_timeout: config.close_timeout,
            dropped: AtomicU64::new(0),
        };

        Ok(LiveConnection {
            channel: Arc::new(channel),
            events: event_rx,
        })
    }
}

/// Outbound handle of an open Gemini Live channel
pub struct GeminiChannel {
    out_tx: mpsc::UnboundedSender<Outbound>,
    state: Arc<ChannelStateCell>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    close_timeout: std::time::Duration,
    dropped: AtomicU64,
}

impl GeminiChannel {
    fn enqueue(&self, kind: &str, mime_type: String, data: String) {
        let state = self.state.get();
        if state != ChannelState::Open {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Dropping outbound {} ({:?} channel, {} dropped)", kind, state, dropped);
            return;
        }

        if self.out_tx.send(Outbound::Media { mime_type, data }).is_err() {
            debug!("Dropping outbound {}: writer stopped", kind);
        }
    }

    /// Messages discarded because the channel was not open
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl LiveChannel for GeminiChannel {
    fn send_audio(&self, data: String) {
        self.enqueue("audio", pcm_mime_type(CAPTURE_SAMPLE_RATE), data);
    }

    fn send_image(&self, data: String) {
        self.enqueue("image", JPEG_MIME.to_string(), data);
    }

    fn state(&self) -> ChannelState {
        self.state.get()
    }

    async fn close(&self) {
        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();

        if writer.is_none() && reader.is_none() {
            return;
        }

        info!("Closing live channel");
        self.state.set(ChannelState::Closing);

        if let Some(mut writer) = writer {
            // Queued media drains ahead of the close frame
            let _ = self.out_tx.send(Outbound::Close);
            if tokio::time::timeout(self.close_timeout, &mut writer).await.is_err() {
                warn!("Live channel did not drain within {:?}", self.close_timeout);
                writer.abort();
            }
        }

        if let Some(reader) = reader {
            reader.abort();
        }

        self.state.set(ChannelState::Closed);
        info!("Live channel closed");
    }
}

async fn write_loop(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    let mut sent: u64 = 0;

    while let Some(command) = rx.recv().await {
        match command {
            Outbound::Media { mime_type, data } => {
                let message = RealtimeInputMessage::media(mime_type, data);
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode media message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::text(json)).await {
                    warn!("Live channel send failed, stopping writer: {}", e);
                    break;
                }

                sent += 1;
                if sent == 1 || sent % 100 == 0 {
                    debug!("Sent {} media messages", sent);
                }
            }
            Outbound::Close => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!("Close frame not delivered: {}", e);
                }
                break;
            }
        }
    }

    let _ = sink.close().await;
    debug!("Live writer stopped after {} media messages", sent);
}

async fn read_loop(mut stream: WsSource, events: mpsc::Sender<LiveEvent>, state: Arc<ChannelStateCell>) {
    let terminal = 'read: loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                if matches!(state.get(), ChannelState::Closing | ChannelState::Closed) {
                    break LiveEvent::Close(None);
                }
                break LiveEvent::Error(e.to_string());
            }
            None => break LiveEvent::Close(None),
        };

        let text = match &message {
            Message::Text(text) => Some(text.as_str()),
            Message::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
            Message::Binary(data) => {
                warn!("Skipping non-JSON binary frame ({} bytes)", data.len());
                None
            }
            Message::Close(frame) => {
                let reason = frame.as_ref().map(|f| f.reason.as_str().to_string());
                info!("Live channel closed by server: {:?}", reason);
                break LiveEvent::Close(reason);
            }
            _ => None,
        };

        let Some(text) = text else {
            continue;
        };

        let parsed = match parse_server_message(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Failed to parse server message: {}", e);
                continue;
            }
        };

        for event in parsed {
            if event.is_terminal() {
                break 'read event;
            }

            if event == LiveEvent::Open {
                if !state.transition(ChannelState::Connecting, ChannelState::Open) {
                    continue;
                }
                info!("Live channel open");
            }

            if events.send(event).await.is_err() {
                debug!("Live event receiver dropped, stopping reader");
                state.set(ChannelState::Closed);
                return;
            }
        }
    };

    state.set(ChannelState::Closed);
    debug!("Live reader finished with {:?}", terminal);
    let _ = events.send(terminal).await;
}
