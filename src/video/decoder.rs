//! H.264 decoder for the inbound video track
//!
//! Access units arrive in Annex-B form (start-code delimited NAL units) from
//! the RTP depacketizer and come out as RGB24 [`VideoFrame`]s.

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use tracing::debug;

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use crate::error::{AppError, Result};

/// Turns compressed access units into raw frames
pub trait FrameDecoder: Send {
    /// Decode one access unit. `Ok(None)` means the decoder needs more data
    /// (for example it is still waiting for a keyframe).
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<VideoFrame>>;

    /// Drop all reference state; the next decodable unit must be a keyframe.
    fn reset(&mut self) -> Result<()>;
}

/// Software H.264 decoder (Cisco OpenH264)
pub struct H264Decoder {
    decoder: Decoder,
    sequence: u64,
}

impl H264Decoder {
    pub fn new() -> Result<Self> {
        let decoder = Decoder::new()
            .map_err(|e| AppError::WebRtc(format!("Failed to create H.264 decoder: {}", e)))?;
        Ok(Self {
            decoder,
            sequence: 0,
        })
    }
}

impl FrameDecoder for H264Decoder {
    fn decode(&mut self, access_unit: &[u8]) -> Result<Option<VideoFrame>> {
        let decoded = self
            .decoder
            .decode(access_unit)
            .map_err(|e| AppError::Encode(format!("H.264 decode failed: {}", e)))?;

        let Some(yuv) = decoded else {
            return Ok(None);
        };

        let (width, height) = yuv.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let mut rgb = vec![0u8; width * height * 3];
        yuv.write_rgb8(&mut rgb);

        self.sequence += 1;
        if self.sequence % 300 == 1 {
            debug!("Decoded H.264 frame #{} ({}x{})", self.sequence, width, height);
        }

        Ok(Some(VideoFrame::from_vec(
            rgb,
            Resolution::new(width as u32, height as u32),
            PixelFormat::Rgb24,
            self.sequence,
        )))
    }

    fn reset(&mut self) -> Result<()> {
        self.decoder = Decoder::new()
            .map_err(|e| AppError::WebRtc(format!("Failed to recreate H.264 decoder: {}", e)))?;
        Ok(())
    }
}
