use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{OutputTarget, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::capture::{CaptureConfig, CaptureSource};
use crate::live::transport::{DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE, GEMINI_LIVE_URL};
use crate::live::LiveConfig;
use crate::session::SessionConfig;
use crate::video::DEFAULT_JPEG_QUALITY;

/// Prefix of environment overrides, e.g. `LIVE_SCIENTIST__LIVE__MODEL`
const ENV_PREFIX: &str = "LIVE_SCIENTIST";

/// Fallback environment variable for the API key
const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_OUTPUT_WAV: &str = "live-scientist-replies.wav";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveSection,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub capture: CaptureSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "live-scientist".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveSection {
    pub endpoint: String,
    pub model: String,
    pub system_instruction: String,
    pub voice: String,
    pub api_key: Option<String>,
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            endpoint: GEMINI_LIVE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    /// Sample frames per microphone block
    pub block_size: usize,
    pub meter_gain: f32,
    /// Where model replies are played
    pub output: OutputKind,
    /// File for `output = "wav"`
    pub output_wav: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Speaker,
    Wav,
    Null,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            block_size: CaptureConfig::default().block_size,
            meter_gain: 5.0,
            output: OutputKind::Speaker,
            output_wav: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub interval_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Capture inputs; an audio file replaces the microphone, an image file
/// replaces the test card
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub audio_file: Option<String>,
    pub image_file: Option<String>,
}

impl Config {
    /// Load `path` (any extension the `config` crate knows, optional) and
    /// apply `LIVE_SCIENTIST__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// API key from the config, falling back to `GEMINI_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        self.live
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            live: LiveConfig {
                endpoint: self.live.endpoint.clone(),
                api_key: self.api_key(),
                model: self.live.model.clone(),
                system_instruction: self.live.system_instruction.clone(),
                voice: self.live.voice.clone(),
                ..LiveConfig::default()
            },
            capture_sample_rate: self.audio.capture_sample_rate,
            playback_sample_rate: self.audio.playback_sample_rate,
            meter_gain: self.audio.meter_gain,
            video_interval: Duration::from_millis(self.video.interval_ms.max(1)),
            jpeg_quality: self.video.jpeg_quality.clamp(1, 100),
        }
    }

    /// Where microphone and camera input come from
    ///
    /// The system microphone unless an audio file is configured.
    pub fn capture_source(&self) -> CaptureSource {
        let image = self.capture.image_file.as_deref().map(expand_path);

        match self.capture.audio_file.as_deref() {
            Some(audio) => CaptureSource::File {
                audio: Some(expand_path(audio)),
                image,
            },
            None => CaptureSource::Microphone { image },
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            block_size: self.audio.block_size.max(1),
            ..CaptureConfig::default()
        }
    }

    pub fn output_target(&self) -> OutputTarget {
        match self.audio.output {
            OutputKind::Speaker => OutputTarget::Speaker,
            OutputKind::Null => OutputTarget::Null,
            OutputKind::Wav => OutputTarget::Wav(expand_path(
                self.audio.output_wav.as_deref().unwrap_or(DEFAULT_OUTPUT_WAV),
            )),
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.service.http.port, 3100);
        assert_eq!(cfg.audio.capture_sample_rate, 16000);
        assert_eq!(cfg.audio.playback_sample_rate, 24000);
        assert!(matches!(cfg.capture_source(), CaptureSource::Microphone { image: None }));
        assert!(matches!(cfg.output_target(), OutputTarget::Speaker));

        let session = cfg.session_config();
        assert_eq!(session.video_interval, Duration::from_secs(1));
        assert_eq!(session.jpeg_quality, 50);
        assert_eq!(session.live.voice, "Kore");
    }

    #[test]
    fn test_load_partial_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("live.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(
            file,
            "[live]\nmodel = \"test-model\"\napi_key = \"k\"\n\n[video]\ninterval_ms = 250\n\n[capture]\nimage_file = \"~/card.png\""
        )?;

        let cfg = Config::load(path.to_str().unwrap_or_default())?;

        assert_eq!(cfg.live.model, "test-model");
        assert_eq!(cfg.live.voice, "Kore", "unset keys keep their defaults");
        assert_eq!(cfg.api_key().as_deref(), Some("k"));

        let session = cfg.session_config();
        assert_eq!(session.video_interval, Duration::from_millis(250));

        // An image alone keeps the microphone
        match cfg.capture_source() {
            CaptureSource::Microphone { image } => {
                let image = image.unwrap_or_default();
                assert!(image.ends_with("card.png"));
                assert!(!image.to_string_lossy().starts_with('~'), "tilde is expanded");
            }
            other => panic!("expected microphone capture, got {:?}", other),
        }
        assert!(matches!(cfg.output_target(), OutputTarget::Speaker));

        Ok(())
    }

    #[test]
    fn test_file_capture_and_wav_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("offline.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(
            file,
            "[audio]\noutput = \"wav\"\n\n[capture]\naudio_file = \"/tmp/question.wav\""
        )?;

        let cfg = Config::load(path.to_str().unwrap_or_default())?;

        match cfg.capture_source() {
            CaptureSource::File { audio, image } => {
                assert_eq!(audio.unwrap_or_default(), PathBuf::from("/tmp/question.wav"));
                assert!(image.is_none(), "test card");
            }
            other => panic!("expected file capture, got {:?}", other),
        }
        match cfg.output_target() {
            OutputTarget::Wav(path) => assert_eq!(path, PathBuf::from(DEFAULT_OUTPUT_WAV)),
            other => panic!("expected wav output, got {:?}", other),
        }

        Ok(())
    }
}
