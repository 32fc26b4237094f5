// PCM codec for the live channel
//
// Outbound: normalized f32 samples -> 16-bit little-endian PCM -> base64.
// Inbound:  base64 -> 16-bit little-endian PCM -> normalized f32 samples.
//
// Quantization makes the round trip approximate (within 1/32768).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CodecError;

/// Sample rate of audio sent to the remote model
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio replies from the remote model
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

const PCM16_SCALE: f32 = 32768.0;

/// Transport form of an audio span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// Normalized floating point samples in [-1, 1]
    Float32,
    /// Signed 16-bit little-endian PCM bytes
    Pcm16,
    /// Base64 text of `Pcm16` bytes
    Base64Pcm16,
}

/// Contiguous mono samples at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// MIME type announcing raw PCM at `sample_rate`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Sample rate announced by a PCM MIME type such as `audio/pcm;rate=24000`
pub fn pcm_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
        .filter(|&rate| rate > 0)
}

/// Quantize one normalized sample; out-of-range input saturates, NaN maps to 0
pub fn sample_to_pcm16(sample: f32) -> i16 {
    let scaled = (sample.clamp(-1.0, 1.0) * PCM16_SCALE).clamp(-32768.0, 32767.0);
    scaled as i16
}

/// Convert samples to 16-bit little-endian PCM bytes
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| sample_to_pcm16(s).to_le_bytes())
        .collect()
}

/// Encode samples as a base64 PCM blob ready for a JSON message
pub fn encode(samples: &[f32]) -> String {
    STANDARD.encode(encode_pcm16(samples))
}

/// Convert 16-bit little-endian PCM bytes back to normalized samples
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

/// Decode a base64 PCM blob recorded at `sample_rate`
pub fn decode(blob: &str, sample_rate: u32) -> Result<AudioChunk, CodecError> {
    let bytes = STANDARD.decode(blob)?;
    let samples = decode_pcm16(&bytes)?;
    Ok(AudioChunk::new(samples, sample_rate))
}
