//! Result routing onto the session's control channel
//!
//! A result passes the filter when it names a gesture and its confidence is
//! at least the threshold. Passing results become two independent messages:
//! a human-readable notice and an animation trigger
//! `GESTURE_ANIMATION:<emoji>:<label>`. Sends are fire-and-forget.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::classifier::ClassificationResult;
use crate::webrtc::datachannel::ControlChannel;

/// Marker prefix of animation trigger messages
pub const ANIMATION_MARKER: &str = "GESTURE_ANIMATION";

/// What happened to one routed result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No gesture, or below threshold
    Filtered,
    /// No channel bound
    NoChannel,
    /// Channel bound but not open; messages dropped
    ChannelClosed,
    /// Both messages handed to the channel
    Sent,
}

/// Format the animation trigger message
pub fn animation_message(emoji: &str, label: &str) -> String {
    format!("{}:{}:{}", ANIMATION_MARKER, emoji, label)
}

/// Format the human-readable detection notice
pub fn notice_message(result: &ClassificationResult) -> String {
    let gesture = result.gesture.as_deref().unwrap_or("unknown");
    let mut text = format!(
        "🤏 AI detected: {} {} ({}% confidence)",
        result.emoji, gesture, result.confidence
    );
    if !result.description.is_empty() {
        text.push_str(" - ");
        text.push_str(&result.description);
    }
    text
}

/// Whether `result` should be routed at `threshold`
pub fn passes_filter(result: &ClassificationResult, threshold: u8) -> bool {
    result.gesture.is_some() && result.confidence >= threshold
}

/// Dispatches classification results to one bound control channel
#[derive(Default)]
pub struct GestureResultRouter {
    channel: RwLock<Option<Arc<dyn ControlChannel>>>,
}

impl GestureResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the channel. Returns false if one was already bound (the
    /// existing binding is kept).
    pub fn bind(&self, channel: Arc<dyn ControlChannel>) -> bool {
        let mut slot = self.channel.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(channel);
        true
    }

    pub fn unbind(&self) {
        self.channel.write().take();
    }

    pub fn is_bound(&self) -> bool {
        self.channel.read().is_some()
    }

    /// Filter and send one result
    pub async fn route(&self, result: &ClassificationResult, threshold: u8) -> RouteOutcome {
        if !passes_filter(result, threshold) {
            debug!(
                "Result filtered: gesture={:?} confidence={} threshold={}",
                result.gesture, result.confidence, threshold
            );
            return RouteOutcome::Filtered;
        }

        // Clone out so the lock is not held across awaits
        let channel = match self.channel.read().clone() {
            Some(ch) => ch,
            None => return RouteOutcome::NoChannel,
        };

        if !channel.is_open() {
            warn!(
                "Control channel '{}' not open, dropping gesture result",
                channel.label()
            );
            return RouteOutcome::ChannelClosed;
        }

        let label = result.gesture.as_deref().unwrap_or_default();
        let notice = notice_message(result);
        let animation = animation_message(&result.emoji, label);

        for message in [notice, animation] {
            if let Err(e) = channel.send_text(&message).await {
                warn!("Dropped gesture message: {}", e);
            }
        }
        RouteOutcome::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::datachannel::testing::RecordingChannel;

    fn result(gesture: Option<&str>, confidence: u8) -> ClassificationResult {
        ClassificationResult {
            gesture: gesture.map(str::to_string),
            confidence,
            description: "thumb up".to_string(),
            emoji: "👍".to_string(),
        }
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let channel = RecordingChannel::new();
        let router = GestureResultRouter::new();
        router.bind(channel.clone());

        let below = router.route(&result(Some("thumbs_up"), 59), 60).await;
        assert_eq!(below, RouteOutcome::Filtered);
        assert!(channel.sent().is_empty());

        let at = router.route(&result(Some("thumbs_up"), 60), 60).await;
        assert_eq!(at, RouteOutcome::Sent);
        assert_eq!(
            channel.sent(),
            vec![
                "🤏 AI detected: 👍 thumbs_up (60% confidence) - thumb up".to_string(),
                "GESTURE_ANIMATION:👍:thumbs_up".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_null_gesture_filtered() {
        let channel = RecordingChannel::new();
        let router = GestureResultRouter::new();
        router.bind(channel.clone());

        assert_eq!(
            router.route(&result(None, 100), 0).await,
            RouteOutcome::Filtered
        );
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unbound_and_closed_channels_drop() {
        let router = GestureResultRouter::new();
        assert_eq!(
            router.route(&result(Some("fist"), 90), 60).await,
            RouteOutcome::NoChannel
        );

        let channel = RecordingChannel::new();
        channel.set_open(false);
        router.bind(channel.clone());
        assert_eq!(
            router.route(&result(Some("fist"), 90), 60).await,
            RouteOutcome::ChannelClosed
        );
        assert!(channel.sent().is_empty());

        router.unbind();
        assert!(!router.is_bound());
    }

    #[test]
    fn test_bind_keeps_first_channel() {
        let router = GestureResultRouter::new();
        assert!(router.bind(RecordingChannel::new()));
        assert!(!router.bind(RecordingChannel::new()));
    }

    #[test]
    fn test_notice_without_description() {
        let mut r = result(Some("wave"), 80);
        r.description.clear();
        r.emoji = "👋".to_string();
        assert_eq!(notice_message(&r), "🤏 AI detected: 👋 wave (80% confidence)");
    }
}
