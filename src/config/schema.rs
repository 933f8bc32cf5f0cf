use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gesture::EncodeProfile;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Text/vision service settings
    pub ai: AiConfig,
    /// Gesture analysis settings
    pub analysis: AnalysisConfig,
    /// Session lifecycle settings
    pub session: SessionConfig,
    /// Peer connection settings
    pub webrtc: WebRtcConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// Listen port
    pub port: u16,
    /// Enable HTTPS
    pub https_enabled: bool,
    /// Custom SSL certificate path
    pub ssl_cert_path: Option<PathBuf>,
    /// Custom SSL key path
    pub ssl_key_path: Option<PathBuf>,
    /// Where generated certificates are kept
    pub data_dir: PathBuf,
    /// Landing page and assets
    pub static_dir: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            https_enabled: true,
            ssl_cert_path: None,
            ssl_key_path: None,
            data_dir: PathBuf::from("./data"),
            static_dir: PathBuf::from("./static"),
        }
    }
}

/// Request shape spoken by the vision endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisionApi {
    /// `POST /responses` with `input_text` + `input_image` parts
    #[default]
    Responses,
    /// `POST /chat/completions` with `text` + `image_url` parts
    ChatCompletions,
}

/// Text and vision service configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Base URL of an OpenAI-compatible endpoint
    pub endpoint_url: String,
    /// Bearer credential
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model for chat fallback replies
    pub chat_model: String,
    /// Model for gesture classification
    pub vision_model: String,
    pub vision_api: VisionApi,
    /// Chat request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o-mini".to_string(),
            vision_api: VisionApi::default(),
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("chat_model", &self.chat_model)
            .field("vision_model", &self.vision_model)
            .field("vision_api", &self.vision_api)
            .finish()
    }
}

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest accepted classifier timeout
pub const MAX_CLASSIFY_TIMEOUT_SECS: f64 = 300.0;

/// Gesture analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum seconds between two samples (clamped to >= 1)
    pub interval_secs: f64,
    /// Minimum confidence (0-100) for a result to be routed
    pub confidence_threshold: i64,
    /// Only every n-th eligible frame is considered
    pub sample_stride: u64,
    pub encode_profile: EncodeProfile,
    /// Concurrent passes per session
    pub workers: usize,
    /// Upper bound on one classifier call
    pub classify_timeout_secs: f64,
}

impl AnalysisConfig {
    pub fn interval(&self) -> Duration {
        secs_f64(self.interval_secs, DEFAULT_INTERVAL)
    }

    pub fn classify_timeout(&self) -> Duration {
        secs_f64(self.classify_timeout_secs, DEFAULT_CLASSIFY_TIMEOUT)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL.as_secs_f64(),
            confidence_threshold: 60,
            sample_stride: 10,
            encode_profile: EncodeProfile::Fast,
            workers: 1,
            classify_timeout_secs: DEFAULT_CLASSIFY_TIMEOUT.as_secs_f64(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Heartbeat period in seconds
    pub heartbeat_secs: u64,
    /// Concurrent session cap
    pub max_sessions: usize,
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            max_sessions: 16,
        }
    }
}

/// Peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// Upper bound on waiting for ICE gathering before answering
    pub gathering_timeout_secs: u64,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            gathering_timeout_secs: 5,
        }
    }
}

/// Positive, representable seconds; anything else falls back to `default`
fn secs_f64(secs: f64, default: Duration) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => d,
        _ => default,
    }
}
