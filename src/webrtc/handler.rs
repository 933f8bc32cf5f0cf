//! Typed event interface between the WebRTC transport and a session
//!
//! The peer connection invokes these callbacks; the session implements them.
//! Nothing is attached to the transport after construction.

use std::sync::Arc;

use async_trait::async_trait;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use super::datachannel::ControlChannel;
use crate::error::Result;
use crate::gesture::AnalysisPipeline;

/// Kind of an inbound media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn from_codec_type(kind: RTPCodecType) -> Option<Self> {
        match kind {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Connection-level state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    pub fn from_rtc(state: RTCPeerConnectionState) -> Option<Self> {
        match state {
            RTCPeerConnectionState::New => Some(LinkState::New),
            RTCPeerConnectionState::Connecting => Some(LinkState::Connecting),
            RTCPeerConnectionState::Connected => Some(LinkState::Connected),
            RTCPeerConnectionState::Disconnected => Some(LinkState::Disconnected),
            RTCPeerConnectionState::Failed => Some(LinkState::Failed),
            RTCPeerConnectionState::Closed => Some(LinkState::Closed),
            _ => None,
        }
    }

    /// The link will not recover from this state
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Failed | LinkState::Closed)
    }
}

/// Callbacks a peer connection delivers to its owning session
#[async_trait]
pub trait PeerEventHandler: Send + Sync {
    /// A data channel reached the open state. Returns whether it was
    /// bound as the session's control channel; messages and close events
    /// of channels that were not bound are never delivered.
    async fn on_channel_open(&self, channel: Arc<dyn ControlChannel>) -> bool;

    /// A text message arrived on the control channel
    async fn on_channel_message(&self, text: String);

    /// The control channel closed
    async fn on_channel_close(&self);

    async fn on_connection_state_change(&self, state: LinkState);

    /// An inbound track started. For video the session may return the
    /// pipeline its frames should be offered to.
    async fn on_track(&self, kind: TrackKind) -> Option<AnalysisPipeline>;

    /// An inbound track ended
    async fn on_track_ended(&self, kind: TrackKind);
}

/// Transport handle owned by a session, released on close
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn close(&self) -> Result<()>;
}
