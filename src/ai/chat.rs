//! Chat fallback for control-channel text that is not a command

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::AiClient;
use crate::error::{AppError, Result};

/// System prompt for free-text replies
pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Produces a reply to free text sent by the peer
#[async_trait]
pub trait ChatResponder: Send + Sync {
    async fn reply(&self, message: &str) -> Result<String>;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

/// `POST /chat/completions` against an OpenAI-compatible endpoint
pub struct OpenAiChat {
    client: AiClient,
    model: String,
}

impl OpenAiChat {
    pub fn new(client: AiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

/// `choices[0].message.content` of a chat completion
pub(crate) fn completion_text(reply: &Value) -> Option<String> {
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
}

#[async_trait]
impl ChatResponder for OpenAiChat {
    async fn reply(&self, message: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: CHAT_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: message,
                },
            ],
        };

        let reply = self
            .client
            .post_json("chat/completions", &request)
            .await
            .map_err(|e| AppError::Chat(e.to_string()))?;
        let text = completion_text(&reply)
            .ok_or_else(|| AppError::Chat("reply has no message content".to_string()))?;
        debug!("Chat model '{}' replied with {} chars", self.model, text.len());
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Replies with a fixed text, or fails when `None`
    pub struct ScriptedChat(pub Option<String>);

    #[async_trait]
    impl ChatResponder for ScriptedChat {
        async fn reply(&self, _message: &str) -> Result<String> {
            self.0
                .clone()
                .ok_or_else(|| AppError::Chat("offline".to_string()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::serve_json;
    use serde_json::json;

    #[tokio::test]
    async fn test_reply_from_completion() {
        let config = serve_json(
            "/v1/chat/completions",
            200,
            json!({"choices": [{"message": {"role": "assistant", "content": " Hi there! "}}]}),
        )
        .await;
        let chat = OpenAiChat::new(AiClient::new(&config).unwrap(), "test-model");
        assert_eq!(chat.reply("hello").await.unwrap(), "Hi there!");
    }

    #[tokio::test]
    async fn test_missing_content_is_chat_error() {
        let config = serve_json("/v1/chat/completions", 200, json!({"choices": []})).await;
        let chat = OpenAiChat::new(AiClient::new(&config).unwrap(), "test-model");
        assert!(matches!(chat.reply("hello").await, Err(AppError::Chat(_))));
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "system",
                content: CHAT_SYSTEM_PROMPT,
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["content"], CHAT_SYSTEM_PROMPT);
    }
}
