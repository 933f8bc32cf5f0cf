//! WebRTC transport
//!
//! Architecture:
//! ```text
//! Browser ──── SDP offer/answer (HTTP) ────> PeerFactory
//!    │
//!    ├── video (H.264) ──> RelayTrack ──> outbound video ──> Browser
//!    │                        └─tap──> AnalysisTap ──> decoder ──> AnalysisPipeline
//!    ├── audio (Opus)  ──> RelayTrack ──> outbound audio ──> Browser
//!    └── data channel  <──> ControlChannel <──> ConnectionSession
//! ```

pub mod config;
pub mod datachannel;
pub mod handler;
pub mod peer;
pub mod relay;
pub mod signaling;
pub mod tap;

pub use datachannel::{ControlChannel, RtcControlChannel};
pub use handler::{LinkState, PeerEventHandler, PeerTransport, TrackKind};
pub use peer::{Negotiated, PeerFactory};
pub use relay::{NoTap, PacketSink, PacketSource, PacketTap, RelayTrack};
pub use signaling::{AnswerResponse, OfferRequest, StopRequest};
pub use tap::AnalysisTap;
