//! Peer connection setup
//!
//! [`PeerFactory::answer`] builds one `RTCPeerConnection` for an offer,
//! wires its callbacks to a [`PeerEventHandler`] and returns the answer SDP
//! once ICE gathering has completed (or timed out). The connection itself is
//! handed back as a [`PeerTransport`] for the session to own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webrtc::api::API;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::config::{build_api, gathering_timeout, h264_capability, opus_capability, rtc_configuration};
use super::datachannel::{ControlChannel, RtcControlChannel};
use super::handler::{LinkState, PeerEventHandler, PeerTransport, TrackKind};
use super::relay::{NoTap, RelayTrack};
use super::signaling::count_candidates;
use super::tap::AnalysisTap;
use crate::config::WebRtcConfig;
use crate::error::{AppError, Result};
use crate::gesture::AnalysisPipeline;
use crate::video::H264Decoder;

const STREAM_ID: &str = "gesture-rtc";

/// [`PeerTransport`] over a webrtc-rs peer connection
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to close peer connection: {}", e)))
    }
}

/// Outbound tracks mirroring what the peer sends
#[derive(Clone)]
struct LocalTracks {
    video: Arc<TrackLocalStaticRTP>,
    audio: Arc<TrackLocalStaticRTP>,
}

/// Negotiated answer plus the connection that produced it
pub struct Negotiated {
    pub sdp: String,
    pub transport: Arc<dyn PeerTransport>,
}

/// Creates peer connections from offers
pub struct PeerFactory {
    api: API,
    config: WebRtcConfig,
}

impl PeerFactory {
    pub fn new(config: WebRtcConfig) -> Result<Self> {
        Ok(Self {
            api: build_api()?,
            config,
        })
    }

    /// Answer `offer_sdp` with a connection whose events go to `handler`
    pub async fn answer(
        &self,
        session_id: &str,
        offer_sdp: String,
        handler: Weak<dyn PeerEventHandler>,
    ) -> Result<Negotiated> {
        let offered = count_candidates(&offer_sdp);
        if offered == 0 {
            info!("Session {}: offer carries no a=candidate lines (trickle or mDNS only)", session_id);
        } else {
            debug!("Session {}: offer carries {} candidate(s)", session_id, offered);
        }

        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_configuration(&self.config))
                .await
                .map_err(|e| AppError::WebRtc(format!("Failed to create peer connection: {}", e)))?,
        );

        // Closes the connection on error and when this future is dropped
        let mut guard = CloseGuard::new(session_id, pc.clone());
        let sdp = self.negotiate(session_id, &pc, offer_sdp, handler).await?;
        guard.disarm();

        Ok(Negotiated {
            sdp,
            transport: Arc::new(RtcTransport { pc }),
        })
    }

    async fn negotiate(
        &self,
        session_id: &str,
        pc: &Arc<RTCPeerConnection>,
        offer_sdp: String,
        handler: Weak<dyn PeerEventHandler>,
    ) -> Result<String> {
        let tracks = LocalTracks {
            video: Arc::new(TrackLocalStaticRTP::new(
                h264_capability(),
                "video".to_string(),
                STREAM_ID.to_string(),
            )),
            audio: Arc::new(TrackLocalStaticRTP::new(
                opus_capability(),
                "audio".to_string(),
                STREAM_ID.to_string(),
            )),
        };

        for track in [tracks.video.clone(), tracks.audio.clone()] {
            let sender = pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| AppError::WebRtc(format!("Failed to add relay track: {}", e)))?;
            drain_rtcp(sender);
        }

        register_callbacks(session_id, pc, tracks, handler);

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| AppError::BadRequest(format!("Invalid SDP offer: {}", e)))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to set remote description: {}", e)))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to create answer: {}", e)))?;

        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(answer)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to set local description: {}", e)))?;

        let timeout = gathering_timeout(&self.config);
        if tokio::time::timeout(timeout, gathered.recv()).await.is_err() {
            warn!(
                "Session {}: ICE gathering not complete after {:?}, answering with what we have",
                session_id, timeout
            );
        }

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| AppError::WebRtc("No local description after answer".to_string()))?;
        debug!(
            "Session {}: answer carries {} candidate(s)",
            session_id,
            count_candidates(&local.sdp)
        );
        Ok(local.sdp)
    }
}

/// Closes a half-negotiated peer connection unless disarmed
struct CloseGuard {
    session_id: String,
    pc: Option<Arc<RTCPeerConnection>>,
}

impl CloseGuard {
    fn new(session_id: &str, pc: Arc<RTCPeerConnection>) -> Self {
        Self {
            session_id: session_id.to_string(),
            pc: Some(pc),
        }
    }

    fn disarm(&mut self) {
        self.pc = None;
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let Some(pc) = self.pc.take() else {
            return;
        };
        let session_id = std::mem::take(&mut self.session_id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            if let Err(e) = pc.close().await {
                debug!("Session {}: close after failed negotiation: {}", session_id, e);
            } else {
                debug!("Session {}: abandoned peer connection closed", session_id);
            }
        });
    }
}

/// Read RTCP from a sender so interceptors keep running
fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}

fn register_callbacks(
    session_id: &str,
    pc: &Arc<RTCPeerConnection>,
    tracks: LocalTracks,
    handler: Weak<dyn PeerEventHandler>,
) {
    let h = handler.clone();
    let id = session_id.to_string();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let h = h.clone();
        let id = id.clone();
        Box::pin(async move {
            let Some(state) = LinkState::from_rtc(s) else {
                return;
            };
            debug!("Session {}: peer connection {}", id, s);
            if let Some(handler) = h.upgrade() {
                handler.on_connection_state_change(state).await;
            }
        })
    }));

    let h = handler.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let h = h.clone();
        Box::pin(async move {
            bind_data_channel(dc, h);
        })
    }));

    let weak_pc = Arc::downgrade(pc);
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _tr: Arc<RTCRtpTransceiver>| {
            let h = handler.clone();
            let tracks = tracks.clone();
            let weak_pc = weak_pc.clone();
            Box::pin(async move {
                let Some(kind) = TrackKind::from_codec_type(track.kind()) else {
                    return;
                };
                tokio::spawn(relay_track(kind, track, tracks, h, weak_pc));
            })
        },
    ));
}

fn bind_data_channel(dc: Arc<RTCDataChannel>, handler: Weak<dyn PeerEventHandler>) {
    info!("Data channel '{}' announced", dc.label());

    // Set once the session accepts this channel as its control channel
    let bound = Arc::new(AtomicBool::new(false));

    let h = handler.clone();
    let open_dc = dc.clone();
    let open_bound = bound.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            if let Some(handler) = h.upgrade() {
                let channel: Arc<dyn ControlChannel> = Arc::new(RtcControlChannel::new(open_dc));
                if handler.on_channel_open(channel).await {
                    open_bound.store(true, Ordering::Release);
                }
            }
        })
    }));

    let h = handler.clone();
    let msg_bound = bound.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let h = h.clone();
        let bound = msg_bound.load(Ordering::Acquire);
        Box::pin(async move {
            if !bound {
                debug!("Ignoring message on an unbound data channel");
                return;
            }
            let text = match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Ignoring non-UTF-8 data channel message ({} bytes)", msg.data.len());
                    return;
                }
            };
            if let Some(handler) = h.upgrade() {
                handler.on_channel_message(text).await;
            }
        })
    }));

    dc.on_close(Box::new(move || {
        let h = handler.clone();
        let bound = bound.load(Ordering::Acquire);
        Box::pin(async move {
            if !bound {
                debug!("Unbound data channel closed");
                return;
            }
            if let Some(handler) = h.upgrade() {
                handler.on_channel_close().await;
            }
        })
    }));
}

async fn relay_track(
    kind: TrackKind,
    remote: Arc<TrackRemote>,
    tracks: LocalTracks,
    handler: Weak<dyn PeerEventHandler>,
    pc: Weak<RTCPeerConnection>,
) {
    let pipeline = match handler.upgrade() {
        Some(h) => h.on_track(kind).await,
        None => return,
    };
    info!("Relaying {} track {} (ssrc {})", kind, remote.id(), remote.ssrc());

    let label = format!("{}:{}", kind, remote.id());
    let stats = match (kind, pipeline) {
        (TrackKind::Video, Some(pipeline)) => {
            relay_video_with_analysis(label, remote, tracks.video, pipeline, pc).await
        }
        (TrackKind::Video, None) => RelayTrack::new(label, remote, tracks.video, NoTap).run().await,
        (TrackKind::Audio, _) => RelayTrack::new(label, remote, tracks.audio, NoTap).run().await,
    };
    debug!("{} relay finished after {} packets", kind, stats.packets);

    if let Some(h) = handler.upgrade() {
        h.on_track_ended(kind).await;
    }
}

async fn relay_video_with_analysis(
    label: String,
    remote: Arc<TrackRemote>,
    local: Arc<TrackLocalStaticRTP>,
    pipeline: AnalysisPipeline,
    pc: Weak<RTCPeerConnection>,
) -> super::relay::RelayStatsSnapshot {
    let decoder = match H264Decoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!("Analysis disabled for {}: {}", label, e);
            return RelayTrack::new(label, remote, local, NoTap).run().await;
        }
    };

    let media_ssrc = remote.ssrc();
    let (tap, mut keyframes, _worker) = AnalysisTap::spawn(pipeline, Box::new(decoder));

    // Ends when the tap (and its watch sender) is dropped with the relay
    tokio::spawn(async move {
        while keyframes.changed().await.is_ok() {
            let Some(pc) = pc.upgrade() else {
                break;
            };
            let pli = PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            };
            if let Err(e) = pc.write_rtcp(&[Box::new(pli)]).await {
                debug!("PLI for ssrc {} not sent: {}", media_ssrc, e);
            }
        }
    });

    RelayTrack::new(label, remote, local, tap).run().await
}

/// Ceiling on how long an offer may take to answer, for callers that
/// want to bound the signaling request as a whole.
pub fn answer_deadline(config: &WebRtcConfig) -> Duration {
    gathering_timeout(config) + Duration::from_secs(5)
}
