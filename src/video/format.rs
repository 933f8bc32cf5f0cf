//! Pixel format and resolution definitions for decoded frames

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw pixel layouts a decoded frame may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// RGB24 format (3 bytes per pixel), as produced by the H.264 decoder
    Rgb24,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
        }
    }

    /// Expected tightly packed frame size for a given resolution
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        resolution.pixels() as usize * self.bytes_per_pixel()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Rgb24 => write!(f, "RGB24"),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Scale down proportionally so that width does not exceed `max_width`.
    ///
    /// Resolutions already within the bound are returned unchanged. Height
    /// never drops below one pixel.
    pub fn fit_width(&self, max_width: u32) -> Resolution {
        if self.width <= max_width || self.width == 0 {
            return *self;
        }
        let scale = max_width as f64 / self.width as f64;
        let height = ((self.height as f64 * scale) as u32).max(1);
        Resolution::new(max_width, height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_width_scales_proportionally() {
        assert_eq!(Resolution::new(1280, 720).fit_width(320), Resolution::new(320, 180));
        assert_eq!(Resolution::new(640, 480).fit_width(640), Resolution::new(640, 480));
        assert_eq!(Resolution::new(200, 100).fit_width(320), Resolution::new(200, 100));
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(PixelFormat::Rgb24.frame_size(Resolution::new(4, 2)), 24);
    }
}
