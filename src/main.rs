use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, ValueEnum};
use rustls::crypto::{ring, CryptoProvider};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gesture_rtc::ai::{AiClient, ChatResponder, OpenAiChat, OpenAiVisionClassifier};
use gesture_rtc::config::{AppConfig, VisionApi, MAX_CLASSIFY_TIMEOUT_SECS};
use gesture_rtc::gesture::{EncodeProfile, GestureClassifier};
use gesture_rtc::session::SessionContext;
use gesture_rtc::state::AppState;
use gesture_rtc::utils::access_urls;
use gesture_rtc::web;
use gesture_rtc::webrtc::PeerFactory;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VisionApiArg {
    Responses,
    ChatCompletions,
}

impl From<VisionApiArg> for VisionApi {
    fn from(arg: VisionApiArg) -> Self {
        match arg {
            VisionApiArg::Responses => VisionApi::Responses,
            VisionApiArg::ChatCompletions => VisionApi::ChatCompletions,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EncodeProfileArg {
    Fast,
    Quality,
}

impl From<EncodeProfileArg> for EncodeProfile {
    fn from(arg: EncodeProfileArg) -> Self {
        match arg {
            EncodeProfileArg::Fast => EncodeProfile::Fast,
            EncodeProfileArg::Quality => EncodeProfile::Quality,
        }
    }
}

/// gesture-rtc command line arguments
#[derive(Parser, Debug)]
#[command(name = "gesture-rtc")]
#[command(version, about = "WebRTC relay with AI hand-gesture analysis", long_about = None)]
struct CliArgs {
    /// Listen address
    #[arg(short = 'a', long, value_name = "ADDRESS", default_value = "0.0.0.0")]
    address: IpAddr,

    /// Listen port
    #[arg(short = 'p', long, value_name = "PORT", default_value_t = 8000)]
    port: u16,

    /// Serve plain HTTP instead of HTTPS
    #[arg(long, overrides_with = "https")]
    no_https: bool,

    /// Serve HTTPS (default)
    #[arg(long, overrides_with = "no_https")]
    https: bool,

    /// Path to SSL certificate file (generates self-signed if not provided)
    #[arg(long, value_name = "FILE", requires = "ssl_key")]
    ssl_cert: Option<PathBuf>,

    /// Path to SSL private key file
    #[arg(long, value_name = "FILE", requires = "ssl_cert")]
    ssl_key: Option<PathBuf>,

    /// Data directory path
    #[arg(short = 'd', long, value_name = "DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Directory holding index.html and static assets
    #[arg(long, value_name = "DIR", default_value = "./static")]
    static_dir: PathBuf,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// OpenAI-compatible endpoint for chat and vision
    #[arg(long, env = "ENDPOINT_URL", value_name = "URL")]
    endpoint_url: Option<String>,

    /// Credential for the AI endpoint
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model used for chat replies
    #[arg(long, env = "MODEL_FOR_CHAT", value_name = "MODEL")]
    chat_model: Option<String>,

    /// Model used for gesture classification
    #[arg(long, env = "MODEL", value_name = "MODEL")]
    vision_model: Option<String>,

    /// Request shape of the vision endpoint
    #[arg(long, value_name = "API", default_value = "responses")]
    vision_api: VisionApiArg,

    /// Minimum seconds between analysed frames (clamped to >= 1)
    #[arg(long, value_name = "SECS", default_value_t = 2.0)]
    analysis_interval_secs: f64,

    /// Minimum confidence (0-100) for a gesture to be reported
    #[arg(long, value_name = "PERCENT", default_value_t = 60)]
    confidence_threshold: i64,

    /// Consider every n-th eligible frame
    #[arg(long, value_name = "N", default_value_t = 10)]
    sample_stride: u64,

    /// JPEG size/quality trade-off for classifier uploads
    #[arg(long, value_name = "PROFILE", default_value = "fast")]
    encode_profile: EncodeProfileArg,

    /// Concurrent analysis passes per session
    #[arg(long, value_name = "N", default_value_t = 1)]
    analysis_workers: usize,

    /// Upper bound on one classifier call (clamped to 1-300)
    #[arg(long, value_name = "SECS", default_value_t = 10.0)]
    classify_timeout_secs: f64,

    /// Heartbeat period on the data channel
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    heartbeat_secs: u64,

    /// Maximum concurrent sessions
    #[arg(long, value_name = "N", default_value_t = 16)]
    max_sessions: usize,

    /// STUN server URL (repeatable)
    #[arg(long = "stun", value_name = "URL")]
    stun: Vec<String>,
}

impl CliArgs {
    fn into_config(self) -> AppConfig {
        let mut config = AppConfig::default();

        config.web.bind_address = self.address.to_string();
        config.web.port = self.port;
        config.web.https_enabled = self.https || !self.no_https;
        config.web.ssl_cert_path = self.ssl_cert;
        config.web.ssl_key_path = self.ssl_key;
        config.web.data_dir = self.data_dir;
        config.web.static_dir = self.static_dir;

        if let Some(url) = self.endpoint_url.filter(|s| !s.trim().is_empty()) {
            config.ai.endpoint_url = url;
        }
        config.ai.api_key = self.api_key.filter(|s| !s.trim().is_empty());
        if let Some(model) = self.chat_model.filter(|s| !s.trim().is_empty()) {
            config.ai.chat_model = model;
        }
        if let Some(model) = self.vision_model.filter(|s| !s.trim().is_empty()) {
            config.ai.vision_model = model;
        }
        config.ai.vision_api = self.vision_api.into();

        if self.analysis_interval_secs.is_finite() {
            config.analysis.interval_secs = self.analysis_interval_secs.max(1.0);
        }
        config.analysis.confidence_threshold = self.confidence_threshold.clamp(0, 100);
        config.analysis.sample_stride = self.sample_stride.max(1);
        config.analysis.encode_profile = self.encode_profile.into();
        config.analysis.workers = self.analysis_workers.max(1);
        if self.classify_timeout_secs.is_finite() {
            config.analysis.classify_timeout_secs =
                self.classify_timeout_secs.clamp(1.0, MAX_CLASSIFY_TIMEOUT_SECS);
        }

        config.session.heartbeat_secs = self.heartbeat_secs;
        config.session.max_sessions = self.max_sessions;

        if !self.stun.is_empty() {
            config.webrtc.stun_servers = self.stun;
        }

        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    // Install default crypto provider (required by rustls 0.23+)
    if CryptoProvider::install_default(ring::default_provider()).is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!("Starting gesture-rtc v{}", env!("CARGO_PKG_VERSION"));

    let config = args.into_config();
    tracing::debug!("Configuration: {:?}", config);
    let data_dir = config.web.data_dir.clone();
    tokio::fs::create_dir_all(&data_dir).await?;
    tracing::info!("Data directory: {}", data_dir.display());

    let ai = AiClient::new(&config.ai)?;
    let chat: Arc<dyn ChatResponder> = Arc::new(OpenAiChat::new(ai.clone(), config.ai.chat_model.clone()));
    let classifier = if analyzer_configured(&config) {
        tracing::info!(
            "Gesture analyzer: {} via {}",
            config.ai.vision_model,
            ai.base_url()
        );
        let classifier: Arc<dyn GestureClassifier> = Arc::new(OpenAiVisionClassifier::new(
            ai.clone(),
            config.ai.vision_model.clone(),
            config.ai.vision_api,
        ));
        Some(classifier)
    } else {
        tracing::warn!("No API key or custom endpoint configured, gesture analysis unavailable");
        None
    };

    let session_ctx = SessionContext {
        chat,
        classifier,
        analysis: config.analysis.clone(),
        heartbeat_interval: config.session.heartbeat_interval(),
    };
    let peers = PeerFactory::new(config.webrtc.clone())?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(config, peers, session_ctx, shutdown_tx.clone());

    let app = web::create_router(state.clone());

    let web_config = &state.config.web;
    let ip: IpAddr = web_config
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", web_config.bind_address))?;
    let addr = SocketAddr::new(ip, web_config.port);
    let listener = std::net::TcpListener::bind(addr)
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    listener.set_nonblocking(true)?;

    // Setup graceful shutdown
    let mut shutdown_rx = state.shutdown_signal();
    let shutdown_signal = async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for CTRL+C: {}", e);
                }
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
            }
            _ = shutdown_rx.recv() => {}
        }
    };

    if web_config.https_enabled {
        let tls_config = match (&web_config.ssl_cert_path, &web_config.ssl_key_path) {
            (Some(cert_path), Some(key_path)) => RustlsConfig::from_pem_file(cert_path, key_path).await?,
            _ => {
                let (cert_path, key_path) = ensure_certificate(&data_dir.join("certs")).await?;
                RustlsConfig::from_pem_file(&cert_path, &key_path).await?
            }
        };

        print_banner("https", addr);
        let server = axum_server::from_tcp_rustls(listener, tls_config)
            .serve(app.into_make_service());

        tokio::select! {
            _ = shutdown_signal => {}
            result = server => {
                if let Err(e) = result {
                    tracing::error!("HTTPS server error: {}", e);
                }
            }
        }
    } else {
        print_banner("http", addr);
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let server = axum::serve(listener, app);

        tokio::select! {
            _ = shutdown_signal => {}
            result = server => {
                if let Err(e) = result {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
        }
    }

    state.registry.close_all().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "gesture_rtc=error,tower_http=error",
        LogLevel::Warn => "gesture_rtc=warn,tower_http=warn",
        LogLevel::Info => "gesture_rtc=info,tower_http=info",
        LogLevel::Verbose => "gesture_rtc=debug,tower_http=info",
        LogLevel::Debug => "gesture_rtc=debug,tower_http=debug",
        LogLevel::Trace => "gesture_rtc=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Classification needs either a credential or a self-hosted endpoint
fn analyzer_configured(config: &AppConfig) -> bool {
    config.ai.api_key.is_some() || config.ai.endpoint_url != AppConfig::default().ai.endpoint_url
}

fn print_banner(scheme: &str, addr: SocketAddr) {
    let (local, lan) = access_urls(scheme, addr);
    tracing::info!("Listening on {}", addr);
    tracing::info!("  Local:   {}", local);
    if let Some(lan) = lan {
        tracing::info!("  Network: {}", lan);
    }
}

/// Reuse the certificate in `cert_dir`, generating a self-signed one if missing
async fn ensure_certificate(cert_dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let cert_path = cert_dir.join("server.crt");
    let key_path = cert_dir.join("server.key");

    if cert_path.exists() && key_path.exists() {
        tracing::info!("Using existing TLS certificate from {}", cert_dir.display());
    } else {
        tracing::info!("Generating new self-signed TLS certificate");
        let (cert_pem, key_pem) = generate_self_signed_cert()?;
        tokio::fs::create_dir_all(cert_dir).await?;
        tokio::fs::write(&cert_path, cert_pem).await?;
        tokio::fs::write(&key_path, key_pem).await?;
    }

    Ok((cert_path, key_path))
}

/// Generate a self-signed TLS certificate, returned as (cert, key) PEM
fn generate_self_signed_cert() -> anyhow::Result<(String, String)> {
    let subject_alt_names = vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];

    let params = rcgen::CertificateParams::new(subject_alt_names)?;
    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_config() {
        let config = CliArgs::parse_from(["gesture-rtc"]).into_config();
        assert_eq!(config.web.port, 8000);
        assert!(config.web.https_enabled);
        assert_eq!(config.analysis.confidence_threshold, 60);
        assert_eq!(config.analysis.encode_profile, EncodeProfile::Fast);
        assert_eq!(config.webrtc.stun_servers, AppConfig::default().webrtc.stun_servers);
    }

    #[test]
    fn test_flags_are_clamped() {
        let config = CliArgs::parse_from([
            "gesture-rtc",
            "--no-https",
            "--analysis-interval-secs",
            "0.2",
            "--confidence-threshold",
            "150",
            "--vision-api",
            "chat-completions",
            "--stun",
            "stun:a:3478",
            "--stun",
            "stun:b:3478",
        ])
        .into_config();
        assert!(!config.web.https_enabled);
        assert_eq!(config.analysis.interval_secs, 1.0);
        assert_eq!(config.analysis.confidence_threshold, 100);
        assert_eq!(config.ai.vision_api, VisionApi::ChatCompletions);
        assert_eq!(config.webrtc.stun_servers.len(), 2);
    }

    #[test]
    fn test_classify_timeout_is_bounded() {
        let config = CliArgs::parse_from(["gesture-rtc", "--classify-timeout-secs", "1e30"]).into_config();
        assert_eq!(config.analysis.classify_timeout_secs, MAX_CLASSIFY_TIMEOUT_SECS);

        let config = CliArgs::parse_from(["gesture-rtc", "--classify-timeout-secs", "0"]).into_config();
        assert_eq!(config.analysis.classify_timeout().as_secs(), 1);

        let config = CliArgs::parse_from(["gesture-rtc", "--analysis-interval-secs", "inf"]).into_config();
        assert_eq!(config.analysis.interval_secs, 2.0);
    }

    #[test]
    fn test_analyzer_requires_key_or_custom_endpoint() {
        let mut config = AppConfig::default();
        assert!(!analyzer_configured(&config));
        config.ai.api_key = Some("sk-test".to_string());
        assert!(analyzer_configured(&config));

        let mut config = AppConfig::default();
        config.ai.endpoint_url = "http://localhost:11434/v1".to_string();
        assert!(analyzer_configured(&config));
    }

    #[tokio::test]
    async fn test_certificate_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let cert_dir = dir.path().join("certs");

        let (cert, key) = ensure_certificate(&cert_dir).await.unwrap();
        let first = std::fs::read_to_string(&cert).unwrap();
        assert!(first.contains("BEGIN CERTIFICATE"));
        assert!(std::fs::read_to_string(&key).unwrap().contains("PRIVATE KEY"));

        ensure_certificate(&cert_dir).await.unwrap();
        assert_eq!(std::fs::read_to_string(&cert).unwrap(), first);
    }
}
