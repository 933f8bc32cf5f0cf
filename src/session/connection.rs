//! One peer's session
//!
//! Owns the control channel, the analysis pipeline, the transport handle and
//! the heartbeat task. Any teardown trigger (stop request, channel close,
//! track end, failed link, heartbeat on a dead channel) funnels into
//! [`ConnectionSession::close`], which runs once.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::command::{self, ControlCommand};
use super::heartbeat;
use super::registry::SessionRegistry;
use super::state::SessionState;
use crate::ai::ChatResponder;
use crate::config::AnalysisConfig;
use crate::gesture::{AnalysisPipeline, AnalysisSnapshot, GestureClassifier};
use crate::webrtc::datachannel::ControlChannel;
use crate::webrtc::handler::{LinkState, PeerEventHandler, PeerTransport, TrackKind};

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionContext {
    pub chat: Arc<dyn ChatResponder>,
    /// `None` when no vision backend is configured
    pub classifier: Option<Arc<dyn GestureClassifier>>,
    pub analysis: AnalysisConfig,
    pub heartbeat_interval: Duration,
}

/// Status view of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub analysis: Option<AnalysisSnapshot>,
}

pub struct ConnectionSession {
    id: String,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    ctx: SessionContext,
    channel: Mutex<Option<Arc<dyn ControlChannel>>>,
    pipeline: Mutex<Option<AnalysisPipeline>>,
    transport: Mutex<Option<Arc<dyn PeerTransport>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    registry: Weak<SessionRegistry>,
    me: Weak<ConnectionSession>,
}

impl ConnectionSession {
    pub fn new(id: String, ctx: SessionContext, registry: Weak<SessionRegistry>) -> Arc<Self> {
        debug!("Session {} created", id);
        Arc::new_cyclic(|me| Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Negotiating),
            ctx,
            channel: Mutex::new(None),
            pipeline: Mutex::new(None),
            transport: Mutex::new(None),
            heartbeat: Mutex::new(None),
            registry,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn pipeline(&self) -> Option<AnalysisPipeline> {
        self.pipeline.lock().clone()
    }

    pub fn channel(&self) -> Option<Arc<dyn ControlChannel>> {
        self.channel.lock().clone()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
            analysis: self.pipeline().map(|p| p.snapshot()),
        }
    }

    /// Hand the negotiated transport to the session. A session already
    /// tearing down closes it right away.
    pub async fn attach_transport(&self, transport: Arc<dyn PeerTransport>) {
        if self.state().is_terminating() {
            if let Err(e) = transport.close().await {
                debug!("Session {}: late transport close failed: {}", self.id, e);
            }
            return;
        }
        *self.transport.lock() = Some(transport);
    }

    /// Move forward to `next`; false if the move is not a forward step
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return false;
        }
        debug!("Session {}: {} -> {}", self.id, *state, next);
        *state = next;
        true
    }

    /// Tear the session down. Safe to call any number of times from any
    /// trigger; only the first call does work.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.is_terminating() {
                return;
            }
            *state = SessionState::Closing;
        }
        info!("Session {} closing", self.id);

        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
        if let Some(pipeline) = self.pipeline.lock().take() {
            pipeline.shutdown();
        }
        self.channel.lock().take();

        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!("Session {}: failed to close transport: {}", self.id, e);
            }
        }

        self.transition(SessionState::Closed);
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id).await;
        }
        info!("Session {} closed", self.id);
    }

    /// Send on the control channel, logging and dropping on failure
    pub(crate) async fn send(&self, text: &str) -> bool {
        let Some(channel) = self.channel() else {
            debug!("Session {}: no control channel, dropping message", self.id);
            return false;
        };
        match channel.send_text(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Session {}: send failed: {}", self.id, e);
                false
            }
        }
    }

    async fn handle_command(&self, cmd: ControlCommand) {
        let pipeline = match &cmd {
            ControlCommand::Text(text) => {
                self.reply_to_text(text).await;
                return;
            }
            ControlCommand::Invalid(reason) => {
                self.send(&command::invalid_command(reason)).await;
                return;
            }
            _ => match self.pipeline() {
                Some(pipeline) => pipeline,
                None => {
                    warn!("Session {}: gesture command without an analyzer", self.id);
                    self.send(&command::analyzer_unavailable()).await;
                    return;
                }
            },
        };

        match cmd {
            ControlCommand::StartAnalysis => {
                if let Some(channel) = self.channel() {
                    pipeline.bind_channel(channel);
                }
                pipeline.enable();
                self.send(&command::analysis_started()).await;
                self.send(&command::test_animation()).await;
            }
            ControlCommand::StopAnalysis => {
                pipeline.disable();
                self.send(&command::analysis_stopped()).await;
            }
            ControlCommand::SetInterval(interval) => {
                let effective = pipeline.set_interval(interval);
                self.send(&command::interval_set(effective)).await;
            }
            ControlCommand::SetThreshold(threshold) => {
                let effective = pipeline.set_threshold(threshold);
                self.send(&command::threshold_set(effective)).await;
            }
            ControlCommand::Text(_) | ControlCommand::Invalid(_) => {}
        }
    }

    async fn reply_to_text(&self, text: &str) {
        let reply = match self.ctx.chat.reply(text).await {
            Ok(answer) => {
                debug!("Session {}: chat '{}' answered", self.id, self.ctx.chat.name());
                command::chat_reply(&answer)
            }
            Err(e) => {
                warn!("Session {}: chat failed, echoing: {}", self.id, e);
                command::echo(text)
            }
        };
        self.send(&reply).await;
    }
}

#[async_trait]
impl PeerEventHandler for ConnectionSession {
    async fn on_channel_open(&self, channel: Arc<dyn ControlChannel>) -> bool {
        {
            let mut slot = self.channel.lock();
            if slot.is_some() || self.state().is_terminating() {
                debug!(
                    "Session {}: ignoring extra channel '{}'",
                    self.id,
                    channel.label()
                );
                return false;
            }
            *slot = Some(channel.clone());
        }
        if !self.transition(SessionState::Open) {
            return false;
        }
        info!("Session {}: control channel '{}' open", self.id, channel.label());

        if let Some(pipeline) = self.pipeline() {
            pipeline.bind_channel(channel);
        }

        self.send(&command::greeting()).await;
        self.send(&command::connection_id(&self.id)).await;

        let handle = heartbeat::spawn(self.me.clone(), self.ctx.heartbeat_interval);
        *self.heartbeat.lock() = Some(handle);
        true
    }

    async fn on_channel_message(&self, text: String) {
        if self.state() != SessionState::Open {
            debug!("Session {}: message ignored in state {}", self.id, self.state());
            return;
        }
        debug!("Session {}: received {} bytes", self.id, text.len());
        self.handle_command(ControlCommand::parse(&text)).await;
    }

    async fn on_channel_close(&self) {
        info!("Session {}: control channel closed", self.id);
        self.close().await;
    }

    async fn on_connection_state_change(&self, state: LinkState) {
        info!("Session {}: connection state {:?}", self.id, state);
        if state.is_terminal() {
            self.close().await;
        }
    }

    async fn on_track(&self, kind: TrackKind) -> Option<AnalysisPipeline> {
        info!("Session {}: {} track received", self.id, kind);
        if kind != TrackKind::Video {
            return None;
        }
        let Some(classifier) = self.ctx.classifier.clone() else {
            warn!("Session {}: no vision backend, analysis unavailable", self.id);
            return None;
        };

        let pipeline = {
            // close() marks Closing before taking this slot, so checking the
            // state under the slot lock keeps it from missing a new pipeline
            let mut slot = self.pipeline.lock();
            if self.state().is_terminating() {
                return None;
            }
            slot.get_or_insert_with(|| AnalysisPipeline::new(&self.ctx.analysis, classifier))
                .clone()
        };
        if let Some(channel) = self.channel() {
            pipeline.bind_channel(channel);
        }
        Some(pipeline)
    }

    async fn on_track_ended(&self, kind: TrackKind) {
        info!("Session {}: {} track ended", self.id, kind);
        self.close().await;
    }
}
