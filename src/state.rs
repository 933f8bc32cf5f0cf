use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::session::{SessionContext, SessionRegistry};
use crate::webrtc::PeerFactory;

/// Application-wide state shared across handlers
///
/// Built once in `main`; the registry is the only part mutated after
/// startup.
pub struct AppState {
    /// Startup configuration (read-only)
    pub config: AppConfig,
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
    /// Peer connection factory
    pub peers: PeerFactory,
    /// Collaborators handed to each new session
    pub session_ctx: SessionContext,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        peers: PeerFactory,
        session_ctx: SessionContext,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.session.max_sessions));
        Arc::new(Self {
            config,
            registry,
            peers,
            session_ctx,
            shutdown_tx,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Subscribe to the shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
