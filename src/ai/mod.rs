//! Text and vision service clients
//!
//! Both talk to one OpenAI-compatible endpoint (`ENDPOINT_URL`, `API_KEY`)
//! through a single shared HTTP client built at startup.

pub mod chat;
pub mod vision;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::AiConfig;
use crate::error::{AppError, Result};

pub use chat::{ChatResponder, OpenAiChat};
pub use vision::OpenAiVisionClassifier;

/// Shared HTTP handle to the AI endpoint
#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl AiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .user_agent(concat!("gesture-rtc/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.endpoint_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// POST a JSON body to `{base_url}/{path}` and return the JSON reply
    pub(crate) async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "{} returned {}: {}",
                url,
                status,
                truncate(&text, 200)
            )));
        }
        Ok(response.json().await?)
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Local stand-in for the AI endpoint

    use std::net::SocketAddr;

    use axum::{routing::post, Json, Router};
    use serde_json::Value;

    use super::*;

    /// Serve `reply` on `path` and return a config pointing at it
    pub async fn serve_json(path: &'static str, status: u16, reply: Value) -> AiConfig {
        let app = Router::new().route(
            path,
            post(move |Json(_body): Json<Value>| {
                let reply = reply.clone();
                async move {
                    (
                        axum::http::StatusCode::from_u16(status).unwrap(),
                        Json(reply),
                    )
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        AiConfig {
            endpoint_url: format!("http://{}/v1/", addr),
            api_key: Some("test-key".to_string()),
            ..Default::default()
        }
    }
}
