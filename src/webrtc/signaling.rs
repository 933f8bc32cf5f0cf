//! Signaling payloads exchanged over HTTP

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// SDP offer posted by the browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    /// SDP content
    pub sdp: String,
    /// Description type, must be `offer`
    #[serde(rename = "type")]
    pub kind: String,
}

impl OfferRequest {
    pub fn validate(&self) -> Result<()> {
        if self.kind != "offer" {
            return Err(AppError::BadRequest(format!(
                "Expected description type 'offer', got '{}'",
                self.kind
            )));
        }
        if !self.sdp.trim_start().starts_with("v=0") {
            return Err(AppError::BadRequest("SDP body is not a session description".to_string()));
        }
        Ok(())
    }
}

/// SDP answer returned to the browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Id used with the stop endpoint
    pub session_id: String,
}

impl AnswerResponse {
    pub fn new(sdp: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".to_string(),
            session_id: session_id.into(),
        }
    }
}

/// Stop request for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    pub session_id: String,
}

/// Number of `a=candidate` lines in an SDP body
pub fn count_candidates(sdp: &str) -> usize {
    sdp.lines()
        .filter(|line| line.trim_start().starts_with("a=candidate"))
        .count()
}
