//! Decoded video frames and the H.264 decoder feeding gesture analysis

pub mod decoder;
pub mod format;
pub mod frame;

pub use decoder::{FrameDecoder, H264Decoder};
pub use format::{PixelFormat, Resolution};
pub use frame::VideoFrame;
