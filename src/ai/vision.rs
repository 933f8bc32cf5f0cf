//! Vision classifier over an OpenAI-compatible endpoint

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::chat::completion_text;
use super::AiClient;
use crate::config::VisionApi;
use crate::error::{AppError, Result};
use crate::gesture::classifier::{gesture_prompt, ClassificationResult, GestureClassifier};
use crate::gesture::EncodedImage;

/// [`GestureClassifier`] that asks a vision model
pub struct OpenAiVisionClassifier {
    client: AiClient,
    model: String,
    api: VisionApi,
    prompt: String,
}

impl OpenAiVisionClassifier {
    pub fn new(client: AiClient, model: impl Into<String>, api: VisionApi) -> Self {
        Self {
            client,
            model: model.into(),
            api,
            prompt: gesture_prompt(),
        }
    }

    fn request_body(&self, image_url: &str) -> Value {
        match self.api {
            VisionApi::Responses => json!({
                "model": self.model,
                "input": [{
                    "role": "user",
                    "content": [
                        { "type": "input_text", "text": self.prompt },
                        { "type": "input_image", "image_url": image_url },
                    ],
                }],
            }),
            VisionApi::ChatCompletions => json!({
                "model": self.model,
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text", "text": self.prompt },
                        { "type": "image_url", "image_url": { "url": image_url, "detail": "low" } },
                    ],
                }],
                "max_tokens": 200,
                "temperature": 0.1,
            }),
        }
    }

    fn path(&self) -> &'static str {
        match self.api {
            VisionApi::Responses => "responses",
            VisionApi::ChatCompletions => "chat/completions",
        }
    }
}

/// Concatenated text output of a responses-API reply
pub(crate) fn responses_output_text(reply: &Value) -> Option<String> {
    if let Some(text) = reply.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let mut text = String::new();
    for item in reply.get("output")?.as_array()? {
        let Some(parts) = item.get("content").and_then(Value::as_array) else {
            continue;
        };
        for part in parts {
            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
        }
    }
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl GestureClassifier for OpenAiVisionClassifier {
    async fn classify(&self, image: &EncodedImage) -> Result<ClassificationResult> {
        let started = Instant::now();
        let body = self.request_body(&image.data_url());

        let reply = self
            .client
            .post_json(self.path(), &body)
            .await
            .map_err(|e| AppError::Classifier(e.to_string()))?;

        let text = match self.api {
            VisionApi::Responses => responses_output_text(&reply),
            VisionApi::ChatCompletions => completion_text(&reply),
        }
        .ok_or_else(|| AppError::Classifier("reply has no text output".to_string()))?;

        debug!(
            "Vision model '{}' answered in {:.2}s ({} bytes image)",
            self.model,
            started.elapsed().as_secs_f64(),
            image.jpeg.len()
        );
        Ok(ClassificationResult::from_reply(&text))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
