//! Control channel: the text data channel between a peer and the server
//!
//! The session and the gesture result router only see the
//! [`ControlChannel`] trait; the webrtc-rs data channel is one
//! implementation of it.

use std::sync::Arc;

use async_trait::async_trait;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

use crate::error::{AppError, Result};

/// Bidirectional UTF-8 text channel bound to one session
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Channel label as negotiated by the peer
    fn label(&self) -> &str;

    /// Whether the channel ready-state is open
    fn is_open(&self) -> bool;

    /// Send one text message. Fails if the channel is not open.
    async fn send_text(&self, text: &str) -> Result<()>;
}

/// [`ControlChannel`] backed by a webrtc-rs data channel
pub struct RtcControlChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

impl RtcControlChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self {
            label: dc.label().to_string(),
            dc,
        }
    }
}

#[async_trait]
impl ControlChannel for RtcControlChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(AppError::Channel {
                label: self.label.clone(),
                reason: format!("not open (state {})", self.dc.ready_state()),
            });
        }
        self.dc
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| AppError::Channel {
                label: self.label.clone(),
                reason: e.to_string(),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingChannel;
    use super::*;

    #[test]
    fn test_closed_channel_rejects_send() {
        let channel = RecordingChannel::new();
        tokio_test::block_on(channel.send_text("hello")).unwrap();

        channel.set_open(false);
        let err = tokio_test::block_on(channel.send_text("lost")).unwrap_err();
        assert!(matches!(err, AppError::Channel { .. }));
        assert_eq!(channel.sent(), vec!["hello".to_string()]);
    }
}
