//! Video frame data structures

use bytes::Bytes;

use super::format::{PixelFormat, Resolution};

/// A decoded video frame with metadata.
///
/// Cloning is cheap: pixel data is reference counted.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw pixel data, tightly packed rows
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Frame sequence number
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new video frame
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            sequence,
        }
    }

    /// Create a frame from a Vec<u8>
    pub fn from_vec(
        data: Vec<u8>,
        resolution: Resolution,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self::new(Bytes::from(data), resolution, format, sequence)
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get data length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if frame is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the buffer holds at least one full image for its declared
    /// resolution and format.
    pub fn is_complete(&self) -> bool {
        self.resolution.pixels() > 0 && self.len() >= self.format.frame_size(self.resolution)
    }
}
