//! Camera snapshots and their JPEG transport encoding
//!
//! Frames are produced on a fixed cadence, encoded immediately and never
//! buffered. A newer frame always supersedes an older one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::error::LiveError;

/// MIME type of encoded frames on the live channel
pub const JPEG_MIME: &str = "image/jpeg";

/// Default JPEG quality (1-100)
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

/// A single RGB snapshot of the camera
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl VideoFrame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    /// A 0x0 frame means the camera has not produced a picture yet
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Compress a frame to JPEG bytes
pub fn encode_jpeg(frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, LiveError> {
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder.encode_image(&frame.image)?;
    }
    Ok(buf)
}

/// Compress a frame to JPEG and base64 it for the live channel
pub fn encode_jpeg_base64(frame: &VideoFrame, quality: u8) -> Result<String, LiveError> {
    Ok(STANDARD.encode(encode_jpeg(frame, quality)?))
}

/// Gradient test card used when no camera image is configured
pub fn test_pattern(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 128])
    })
}
