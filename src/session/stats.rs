use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Externally visible state of the live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SessionStatus {
    /// Whether a session currently holds (or is acquiring) resources
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Connected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Statistics about the current (or last) live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier, set on `connect()`
    pub session_id: Option<String>,

    pub status: SessionStatus,

    pub muted: bool,

    /// Microphone meter level (0.0 to 1.0)
    pub volume_level: f32,

    /// When the session was started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub duration_secs: f64,

    /// Audio blocks sent to the model
    pub audio_chunks_sent: u64,

    /// Audio blocks captured while muted (metered, not sent)
    pub audio_chunks_muted: u64,

    /// Camera frames sent to the model
    pub video_frames_sent: u64,

    /// Audio replies received from the model
    pub audio_chunks_received: u64,

    /// Reply buffers still scheduled or playing
    pub playback_sources_live: usize,
}

/// Per-session counters updated from the session pump
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub audio_chunks_sent: AtomicU64,
    pub audio_chunks_muted: AtomicU64,
    pub video_frames_sent: AtomicU64,
    pub audio_chunks_received: AtomicU64,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        for counter in [
            &self.audio_chunks_sent,
            &self.audio_chunks_muted,
            &self.video_frames_sent,
            &self.audio_chunks_received,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
        assert_eq!(SessionStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_active_states() {
        assert!(SessionStatus::Connecting.is_active());
        assert!(SessionStatus::Connected.is_active());
        assert!(!SessionStatus::Disconnected.is_active());
        assert!(!SessionStatus::Error.is_active());
    }
}
