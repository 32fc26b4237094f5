use thiserror::Error;

/// Failures while converting between PCM transport blobs and samples
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM payload has an odd byte count ({0})")]
    OddLength(usize),
}

/// Errors raised by the live session components
///
/// None of these reach the UI directly: the session controller logs them
/// and reports a status transition instead.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Camera or microphone access was refused
    #[error("media permission denied: {0}")]
    PermissionDenied(String),

    /// No usable camera/microphone (or output device)
    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The remote channel could not be opened
    #[error("failed to open live channel: {0}")]
    ConnectFailed(String),

    /// Mid-session failure reported by the transport
    #[error("live transport error: {0}")]
    TransportError(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("video frame encoding failed: {0}")]
    Video(#[from] image::ImageError),
}

impl LiveError {
    /// Whether retrying `connect()` can reasonably succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LiveError::DeviceUnavailable(_))
    }
}
