//! Gesture classifier boundary
//!
//! The classifier is an external vision service behind a request/response
//! contract: an encoded image plus a fixed prompt go in, a single JSON object
//! `{gesture, confidence, description, emoji}` comes out, possibly wrapped in
//! prose. Parsing is lenient; anything unusable becomes the neutral result.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::encoder::EncodedImage;
use crate::error::Result;

/// Emoji used when the classifier omits one
pub const DEFAULT_EMOJI: &str = "🤏";

/// Closed gesture taxonomy: `(label, emoji, description)`
pub const GESTURE_TAXONOMY: &[(&str, &str, &str)] = &[
    ("thumbs_up", "👍", "thumb up, other fingers closed"),
    ("thumbs_down", "👎", "thumb down, other fingers closed"),
    ("ok", "👌", "thumb and index forming a circle, other fingers extended"),
    ("victory", "✌️", "index and middle fingers extended in a V, others closed"),
    ("fist", "✊", "all fingers closed into a fist"),
    ("stop", "✋", "open palm facing the camera, fingers extended"),
    ("wave", "👋", "open hand waving or in a greeting position"),
    ("rock", "🤟", "little finger, index and thumb extended"),
    ("pinch", "🤏", "thumb and index almost touching"),
    ("clap", "👏", "two hands clapping or palms together"),
    ("handshake", "🤝", "two hands joined in a handshake"),
    ("thanks", "🙏", "palms pressed together in a praying position"),
    ("rock_on", "🤘", "index and little finger extended"),
    ("heart", "🫶", "hands forming a heart"),
    ("punch", "👊", "closed fist pushed towards the camera"),
];

/// Build the fixed instruction prompt sent with every image
pub fn gesture_prompt() -> String {
    let mut prompt = String::from(
        "🤏 Analyze this image and detect clearly visible hand gestures.\n\n\
         Reply ONLY with valid JSON in this format:\n\
         {\n  \"gesture\": \"gesture_name\",\n  \"confidence\": 85,\n  \
         \"description\": \"short description\",\n  \"emoji\": \"👍\"\n}\n\n\
         Gestures to detect (only when they are clear and obvious):\n",
    );
    for (label, emoji, description) in GESTURE_TAXONOMY {
        prompt.push_str(&format!("- {} {} ({})\n", emoji, label, description));
    }
    prompt.push_str(
        "\nIMPORTANT: only report a gesture when confidence is above 70%. \
         If there is no clear gesture or the image is blurry, use \"gesture\": null",
    );
    prompt
}

/// Structured classifier output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub gesture: Option<String>,
    /// 0..=100
    pub confidence: u8,
    pub description: String,
    pub emoji: String,
}

impl ClassificationResult {
    /// "No gesture, zero confidence"
    pub fn neutral() -> Self {
        Self {
            gesture: None,
            confidence: 0,
            description: String::new(),
            emoji: DEFAULT_EMOJI.to_string(),
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.gesture.is_none() && self.confidence == 0
    }

    /// Build a result from a parsed JSON value, tolerating missing fields,
    /// float or string confidences and empty gesture names.
    pub fn from_value(value: &Value) -> Self {
        let gesture = value
            .get("gesture")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|g| !g.is_empty() && !g.eq_ignore_ascii_case("null"))
            .map(str::to_string);

        let confidence = match value.get("confidence") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
            _ => 0.0,
        };
        let confidence = confidence.round().clamp(0.0, 100.0) as u8;

        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let emoji = value
            .get("emoji")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_EMOJI)
            .to_string();

        Self {
            gesture,
            confidence,
            description,
            emoji,
        }
    }

    /// Parse a free-form classifier reply. Falls back to
    /// [`neutral`](Self::neutral) when no JSON object can be found.
    pub fn from_reply(text: &str) -> Self {
        match extract_json_object(text) {
            Some(value) => Self::from_value(&value),
            None => Self::neutral(),
        }
    }
}

/// Find the first well-formed JSON object embedded in `text`.
///
/// Scans for `{`, walks to its balanced `}` (ignoring braces inside string
/// literals) and returns the first span that parses as a JSON object.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str(&text[open..=close]) {
                return Some(value);
            }
        }
        start = open + 1;
    }
    None
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Vision backend classifying one encoded frame
#[async_trait]
pub trait GestureClassifier: Send + Sync {
    /// Classify an image. Errors are mapped to a neutral result by the
    /// pipeline; implementations need not do it themselves.
    async fn classify(&self, image: &EncodedImage) -> Result<ClassificationResult>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted classifier for pipeline tests

    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct ScriptedClassifier {
        reply: Option<String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedClassifier {
        /// Replies with `reply` (parsed like a real provider reply)
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        /// Always fails with a provider error
        pub fn failing() -> Self {
            Self {
                reply: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GestureClassifier for ScriptedClassifier {
        async fn classify(&self, _image: &EncodedImage) -> Result<ClassificationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.reply {
                Some(reply) => Ok(ClassificationResult::from_reply(reply)),
                None => Err(AppError::Classifier("provider unavailable".to_string())),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}
