//! WebRTC engine configuration
//!
//! Video is negotiated as H.264 only (the server decodes it for analysis),
//! audio as Opus.

use std::time::Duration;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;

use crate::config::WebRtcConfig;
use crate::error::{AppError, Result};

/// H.264 payload type offered in answers
pub const H264_PAYLOAD_TYPE: u8 = 102;
/// Opus payload type offered in answers
pub const OPUS_PAYLOAD_TYPE: u8 = 111;

/// Codec capability of the H.264 relay track
pub fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            .to_string(),
        rtcp_feedback: vec![
            RTCPFeedback {
                typ: "goog-remb".to_string(),
                parameter: String::new(),
            },
            RTCPFeedback {
                typ: "ccm".to_string(),
                parameter: "fir".to_string(),
            },
            RTCPFeedback {
                typ: "nack".to_string(),
                parameter: String::new(),
            },
            RTCPFeedback {
                typ: "nack".to_string(),
                parameter: "pli".to_string(),
            },
        ],
    }
}

/// Codec capability of the Opus relay track
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

fn media_engine() -> Result<MediaEngine> {
    let mut engine = MediaEngine::default();

    engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: h264_capability(),
                payload_type: H264_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| AppError::WebRtc(format!("Failed to register H.264: {}", e)))?;

    engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: opus_capability(),
                payload_type: OPUS_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| AppError::WebRtc(format!("Failed to register Opus: {}", e)))?;

    Ok(engine)
}

/// Build the WebRTC API object shared by all peer connections
pub fn build_api() -> Result<API> {
    let mut engine = media_engine()?;
    let registry = register_default_interceptors(Registry::new(), &mut engine)
        .map_err(|e| AppError::WebRtc(format!("Failed to register interceptors: {}", e)))?;

    Ok(APIBuilder::new()
        .with_media_engine(engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Peer connection configuration from the app settings
pub fn rtc_configuration(config: &WebRtcConfig) -> RTCConfiguration {
    let ice_servers = config
        .stun_servers
        .iter()
        .filter(|url| !url.trim().is_empty())
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

pub fn gathering_timeout(config: &WebRtcConfig) -> Duration {
    Duration::from_secs(config.gathering_timeout_secs.max(1))
}
