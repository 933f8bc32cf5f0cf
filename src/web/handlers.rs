use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::session::{ConnectionSession, SessionInfo, StopOutcome};
use crate::state::AppState;
use crate::webrtc::handler::PeerEventHandler;
use crate::webrtc::peer::answer_deadline;
use crate::webrtc::signaling::{AnswerResponse, OfferRequest, StopRequest};

// ============================================================================
// Health & Status
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub sessions: Vec<SessionInfo>,
    pub session_count: usize,
    pub max_sessions: usize,
    pub analyzer_available: bool,
    pub uptime_secs: u64,
}

/// Active sessions in registry order
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let sessions = state.registry.list().await;
    Json(StatusResponse {
        session_count: sessions.len(),
        sessions,
        max_sessions: state.registry.max_sessions(),
        analyzer_available: state.session_ctx.classifier.is_some(),
        uptime_secs: state.uptime_secs(),
    })
}

// ============================================================================
// Signaling
// ============================================================================

/// Answer an SDP offer and register the resulting session
pub async fn offer(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<OfferRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(format!("Invalid offer: {}", e)))?;
    req.validate()?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = ConnectionSession::new(
        session_id.clone(),
        state.session_ctx.clone(),
        Arc::downgrade(&state.registry),
    );
    state.registry.add(session.clone()).await?;
    info!("Session {} created", session_id);

    let handler: Arc<dyn PeerEventHandler> = session.clone();
    let deadline = answer_deadline(&state.config.webrtc);
    let negotiated = match tokio::time::timeout(
        deadline,
        state.peers.answer(&session_id, req.sdp, Arc::downgrade(&handler)),
    )
    .await
    {
        Ok(Ok(negotiated)) => negotiated,
        Ok(Err(e)) => {
            warn!("Session {}: negotiation failed: {}", session_id, e);
            session.close().await;
            return Err(e);
        }
        Err(_) => {
            warn!("Session {}: no answer within {:?}", session_id, deadline);
            session.close().await;
            return Err(AppError::WebRtc(format!(
                "Negotiation timed out after {:?}",
                deadline
            )));
        }
    };

    session.attach_transport(negotiated.transport).await;
    Ok(Json(AnswerResponse::new(negotiated.sdp, session_id)))
}

#[derive(Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

/// Tear down a session by id
pub async fn stop(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<StopRequest>, JsonRejection>,
) -> Result<Json<StopResponse>> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(format!("Invalid stop request: {}", e)))?;

    match state.registry.stop_and_remove(&req.session_id).await {
        StopOutcome::Stopped => Ok(Json(StopResponse {
            success: true,
            message: format!("Session {} stopped", req.session_id),
        })),
        StopOutcome::AlreadyStopped => Ok(Json(StopResponse {
            success: true,
            message: format!("Session {} already stopped", req.session_id),
        })),
        StopOutcome::NotFound => Err(AppError::NotFound(format!(
            "Session {} not found",
            req.session_id
        ))),
    }
}
