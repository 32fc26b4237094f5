//! Duplex channel to the remote conversational model
//!
//! - `transport`: channel traits, lifecycle state and events
//! - `messages`: Gemini Live wire format
//! - `gemini`: WebSocket implementation

pub mod gemini;
pub mod messages;
pub mod transport;

pub use gemini::{GeminiChannel, GeminiConnector};
pub use messages::{parse_server_message, MediaChunk, RealtimeInputMessage, SetupMessage};
pub use transport::{
    ChannelState, ChannelStateCell, InboundAudio, LiveChannel, LiveConfig, LiveConnection,
    LiveConnector, LiveEvent,
};
