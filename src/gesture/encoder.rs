//! Frame encoder for classifier input
//!
//! Downscales a decoded frame to a bounded width and compresses it to JPEG.
//! Encoding is CPU bound; the pipeline runs it on the blocking pool.
//!
//! ```text
//! RGB24 ──image::resize──> ≤ max_width ──turbojpeg──> JPEG ──> base64
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::video::{PixelFormat, Resolution, VideoFrame};

/// Resolution/quality trade-off for classifier input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncodeProfile {
    /// ≤ 320 px wide at JPEG quality 60
    #[default]
    Fast,
    /// ≤ 640 px wide at JPEG quality 80
    Quality,
}

impl EncodeProfile {
    pub fn max_width(&self) -> u32 {
        match self {
            EncodeProfile::Fast => 320,
            EncodeProfile::Quality => 640,
        }
    }

    pub fn jpeg_quality(&self) -> i32 {
        match self {
            EncodeProfile::Fast => 60,
            EncodeProfile::Quality => 80,
        }
    }
}

impl std::fmt::Display for EncodeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeProfile::Fast => write!(f, "fast"),
            EncodeProfile::Quality => write!(f, "quality"),
        }
    }
}

/// Compressed image ready for the classifier
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub jpeg: Bytes,
    pub resolution: Resolution,
}

impl EncodedImage {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.jpeg)
    }

    /// `data:` URL accepted by the vision endpoint
    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.to_base64())
    }
}

/// Stateless frame encoder; cheap to clone into blocking tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder {
    profile: EncodeProfile,
}

impl FrameEncoder {
    pub fn new(profile: EncodeProfile) -> Self {
        Self { profile }
    }

    /// Encode one frame. Corrupt or truncated frames are rejected with
    /// [`AppError::Encode`].
    pub fn encode(&self, frame: &VideoFrame) -> Result<EncodedImage> {
        if !frame.is_complete() {
            return Err(AppError::Encode(format!(
                "{} frame #{} too small: {} bytes for {}",
                frame.format,
                frame.sequence,
                frame.len(),
                frame.resolution
            )));
        }

        let source = frame.resolution;
        let target = source.fit_width(self.profile.max_width());
        let size = frame.format.frame_size(source);
        let data = &frame.data()[..size];

        let img = match frame.format {
            PixelFormat::Rgb24 => RgbImage::from_raw(source.width, source.height, data.to_vec())
                .ok_or_else(|| AppError::Encode("RGB buffer size mismatch".to_string()))?,
        };
        let img = if target != source {
            imageops::resize(&img, target.width, target.height, FilterType::Triangle)
        } else {
            img
        };

        let jpeg = self.compress(&img.into_raw(), target)?;
        Ok(EncodedImage {
            jpeg: Bytes::from(jpeg),
            resolution: target,
        })
    }

    fn compress(&self, pixels: &[u8], resolution: Resolution) -> Result<Vec<u8>> {
        let mut compressor = turbojpeg::Compressor::new().map_err(|e| {
            AppError::Encode(format!("Failed to create turbojpeg compressor: {}", e))
        })?;
        compressor
            .set_quality(self.profile.jpeg_quality())
            .map_err(|e| AppError::Encode(format!("Failed to set JPEG quality: {}", e)))?;

        let width = resolution.width as usize;
        let image = turbojpeg::Image {
            pixels,
            width,
            pitch: width * PixelFormat::Rgb24.bytes_per_pixel(),
            height: resolution.height as usize,
            format: turbojpeg::PixelFormat::RGB,
        };

        compressor
            .compress_to_vec(image)
            .map_err(|e| AppError::Encode(format!("JPEG compression failed: {}", e)))
    }
}
