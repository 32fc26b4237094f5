use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::LiveError;

/// Gemini Live WebSocket endpoint
pub const GEMINI_LIVE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_VOICE: &str = "Kore";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an advanced AI Scientist. You are seeing the user's camera and hearing them. Answer scientific questions, analyze what you see in the lab or on paper, and be helpful, precise, and concise. Adopt a professional but curious persona.";

/// Parameters for opening a live channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// WebSocket endpoint of the remote service
    pub endpoint: String,

    /// API key appended to the endpoint
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Target model identifier (without the `models/` prefix)
    pub model: String,

    /// Persona/behavior text for the model
    pub system_instruction: String,

    /// Prebuilt output voice
    pub voice: String,

    /// Handshake timeout
    pub connect_timeout: Duration,

    /// How long `close()` waits for queued messages to drain
    pub close_timeout: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: GEMINI_LIVE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            connect_timeout: Duration::from_secs(15),
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Lifecycle of a live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Transport up, waiting for the remote to acknowledge setup
    Connecting,
    /// Ready for media
    Open,
    /// Close requested, draining
    Closing,
    Closed,
}

impl ChannelState {
    fn as_u8(self) -> u8 {
        match self {
            ChannelState::Connecting => 0,
            ChannelState::Open => 1,
            ChannelState::Closing => 2,
            ChannelState::Closed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

/// Lock-free holder for a [`ChannelState`] shared between tasks
#[derive(Debug)]
pub struct ChannelStateCell(AtomicU8);

impl ChannelStateCell {
    pub fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ChannelState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Move `from` -> `to`; returns false if the state was something else
    pub fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Encoded audio received from the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAudio {
    /// Base64 PCM
    pub data: String,
    pub mime_type: Option<String>,
}

/// Events delivered by a live channel, in arrival order
///
/// `Open` happens at most once. Exactly one terminal event (`Error` or
/// `Close`) ends every run.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Remote acknowledged setup; media may flow
    Open,
    /// Audio reply chunk
    Audio(InboundAudio),
    /// The user spoke over the model; the pending reply is void
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// Fatal transport failure
    Error(String),
    /// Normal or server-initiated termination
    Close(Option<String>),
}

impl LiveEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LiveEvent::Error(_) | LiveEvent::Close(_))
    }
}

/// Outbound half of a live channel
///
/// Sends are fire-and-forget. Anything sent while the channel is not `Open`
/// is dropped silently.
#[async_trait::async_trait]
pub trait LiveChannel: Send + Sync {
    fn send_audio(&self, data: String);

    fn send_image(&self, data: String);

    fn state(&self) -> ChannelState;

    /// Explicitly close the channel; idempotent
    async fn close(&self);
}

/// An opened channel plus its inbound event stream
pub struct LiveConnection {
    pub channel: Arc<dyn LiveChannel>,
    pub events: mpsc::Receiver<LiveEvent>,
}

/// Opens live channels to the remote model
#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    async fn open(&self, config: &LiveConfig) -> Result<LiveConnection, LiveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_transitions() {
        let cell = ChannelStateCell::new(ChannelState::Connecting);
        assert!(cell.transition(ChannelState::Connecting, ChannelState::Open));
        assert!(!cell.transition(ChannelState::Connecting, ChannelState::Open));
        assert_eq!(cell.get(), ChannelState::Open);
        cell.set(ChannelState::Closed);
        assert_eq!(cell.get(), ChannelState::Closed);
    }

    #[test]
    fn test_terminal_events() {
        assert!(LiveEvent::Error("boom".into()).is_terminal());
        assert!(LiveEvent::Close(None).is_terminal());
        assert!(!LiveEvent::Open.is_terminal());
        assert!(!LiveEvent::Interrupted.is_terminal());
    }
}
