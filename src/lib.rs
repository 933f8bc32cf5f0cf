//! gesture-rtc - WebRTC relay with on-demand hand-gesture analysis
//!
//! Browsers connect over WebRTC; their video and audio are relayed back
//! unchanged while a control data channel carries commands, chat and
//! gesture results. When analysis is enabled, sampled video frames are
//! classified by a vision model in the background.

pub mod ai;
pub mod config;
pub mod error;
pub mod gesture;
pub mod session;
pub mod state;
pub mod utils;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
