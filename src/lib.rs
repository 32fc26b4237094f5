pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;
pub mod video;

pub use audio::{
    AudioChunk, AudioFile, AudioOutput, OutputFactory, OutputTarget, PlaybackScheduler,
    PlaybackSourceHandle,
};
pub use capture::{AudioFrame, CaptureConfig, CaptureSource, ConfiguredDevices, MediaCapture, MediaDevices};
pub use config::Config;
pub use error::{CodecError, LiveError};
pub use http::{create_router, AppState};
pub use live::{GeminiConnector, LiveChannel, LiveConfig, LiveConnection, LiveConnector, LiveEvent};
pub use session::{SessionConfig, SessionController, SessionStats, SessionStatus};
pub use video::VideoFrame;
