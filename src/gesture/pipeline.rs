//! Per-session analysis pipeline
//!
//! ```text
//! frame ──FrameSampler──> spawn pass ──┐        (frame path returns here)
//!                                      │
//!        ┌─────────────────────────────┘
//!        ▼
//!   worker permit ─> encode (blocking pool) ─> classify (timeout) ─> route
//!        └──────────── in-flight slot released on every exit ───────────┘
//! ```
//!
//! [`AnalysisPipeline::offer_frame`] never awaits: it makes the sampling
//! decision and, on a hit, spawns the pass as its own task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::classifier::{ClassificationResult, GestureClassifier};
use super::encoder::FrameEncoder;
use super::router::{GestureResultRouter, RouteOutcome};
use super::sampler::{FrameSampler, InFlightGuard};
use super::state::{AnalysisSnapshot, AnalysisState};
use crate::config::AnalysisConfig;
use crate::video::VideoFrame;
use crate::webrtc::datachannel::ControlChannel;

struct PipelineInner {
    state: Arc<AnalysisState>,
    sampler: FrameSampler,
    encoder: FrameEncoder,
    classifier: Arc<dyn GestureClassifier>,
    router: GestureResultRouter,
    /// Session-local worker pool
    workers: Arc<Semaphore>,
    classify_timeout: Duration,
    closed: AtomicBool,
    pass_seq: AtomicU64,
}

/// Sampler, encoder, classifier and router composed for one session.
///
/// Cheap to clone; all clones share one [`AnalysisState`].
#[derive(Clone)]
pub struct AnalysisPipeline {
    inner: Arc<PipelineInner>,
}

impl AnalysisPipeline {
    pub fn new(config: &AnalysisConfig, classifier: Arc<dyn GestureClassifier>) -> Self {
        let workers = config.workers.max(1);
        let state = Arc::new(AnalysisState::new(
            config.interval(),
            config.confidence_threshold,
            workers,
        ));

        Self {
            inner: Arc::new(PipelineInner {
                state,
                sampler: FrameSampler::new(config.sample_stride),
                encoder: FrameEncoder::new(config.encode_profile),
                classifier,
                router: GestureResultRouter::new(),
                workers: Arc::new(Semaphore::new(workers)),
                classify_timeout: config.classify_timeout(),
                closed: AtomicBool::new(false),
                pass_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn enable(&self) {
        if !self.is_closed() {
            self.inner.state.set_enabled(true);
            info!(
                "Gesture analysis enabled (classifier: {})",
                self.inner.classifier.name()
            );
        }
    }

    pub fn disable(&self) {
        self.inner.state.set_enabled(false);
        info!("Gesture analysis disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.is_enabled()
    }

    /// Returns the effective (clamped) interval
    pub fn set_interval(&self, interval: Duration) -> Duration {
        self.inner.state.set_interval(interval)
    }

    /// Returns the effective (clamped) threshold
    pub fn set_threshold(&self, threshold: i64) -> u8 {
        self.inner.state.set_threshold(threshold)
    }

    /// Bind the control channel results are routed to. No-op if bound.
    pub fn bind_channel(&self, channel: Arc<dyn ControlChannel>) -> bool {
        self.inner.router.bind(channel)
    }

    pub fn is_bound(&self) -> bool {
        self.inner.router.is_bound()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.in_flight()
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        self.inner.state.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Offer a decoded frame. Never blocks; returns whether a pass started.
    pub fn offer_frame(&self, frame: VideoFrame) -> bool {
        self.offer_frame_at(frame, Instant::now())
    }

    /// [`offer_frame`](Self::offer_frame) with an explicit arrival time.
    /// Must be called from within a tokio runtime.
    pub fn offer_frame_at(&self, frame: VideoFrame, now: Instant) -> bool {
        if self.is_closed() {
            return false;
        }
        let guard = match self.inner.sampler.begin_pass(now, &self.inner.state) {
            Some(guard) => guard,
            None => return false,
        };

        let pass_id = self.inner.pass_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_pass(pass_id, frame, guard).await;
        });
        true
    }

    /// Stop starting passes and unbind the channel. A pass already running
    /// finishes but its result is not emitted.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.state.set_enabled(false);
        self.inner.router.unbind();
        self.inner.workers.close();
        debug!("Analysis pipeline shut down");
    }
}

impl PipelineInner {
    async fn run_pass(&self, pass_id: u64, frame: VideoFrame, _slot: InFlightGuard) {
        let _permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Pass #{} skipped: worker pool closed", pass_id);
                return;
            }
        };

        let started = Instant::now();
        debug!(
            "Pass #{} started on frame #{} ({})",
            pass_id, frame.sequence, frame.resolution
        );

        let encoder = self.encoder;
        let image = match tokio::task::spawn_blocking(move || encoder.encode(&frame)).await {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                warn!("Pass #{} aborted: {}", pass_id, e);
                return;
            }
            Err(e) => {
                error!("Pass #{} encode task failed: {}", pass_id, e);
                return;
            }
        };

        let result = match tokio::time::timeout(
            self.classify_timeout,
            self.classifier.classify(&image),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Pass #{} classifier '{}' failed: {}", pass_id, self.classifier.name(), e);
                ClassificationResult::neutral()
            }
            Err(_) => {
                warn!(
                    "Pass #{} classifier '{}' timed out after {:?}",
                    pass_id,
                    self.classifier.name(),
                    self.classify_timeout
                );
                ClassificationResult::neutral()
            }
        };

        debug!(
            "Pass #{} classified in {:?}: gesture={:?} confidence={}",
            pass_id,
            started.elapsed(),
            result.gesture,
            result.confidence
        );

        if self.closed.load(Ordering::Acquire) {
            debug!("Pass #{} result suppressed: pipeline closed", pass_id);
            return;
        }

        let outcome = self.router.route(&result, self.state.threshold()).await;
        if outcome == RouteOutcome::Sent {
            info!(
                "Gesture detected: {} {} ({}%)",
                result.emoji,
                result.gesture.as_deref().unwrap_or_default(),
                result.confidence
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::classifier::testing::ScriptedClassifier;
    use crate::video::{PixelFormat, Resolution};
    use crate::webrtc::datachannel::testing::RecordingChannel;

    const THUMBS_UP: &str = r#"Here you go: {"gesture":"thumbs_up","confidence":85,"description":"thumb raised","emoji":"👍"}"#;

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame::from_vec(
            vec![96; 32 * 24 * 3],
            Resolution::new(32, 24),
            PixelFormat::Rgb24,
            sequence,
        )
    }

    fn config(stride: u64) -> AnalysisConfig {
        AnalysisConfig {
            interval_secs: 2.0,
            sample_stride: stride,
            ..Default::default()
        }
    }

    async fn wait_until_idle(pipeline: &AnalysisPipeline) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.in_flight() > 0 {
            assert!(Instant::now() < deadline, "pass never finished");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn test_stream_is_sampled_by_interval_and_stride() {
        let classifier = Arc::new(ScriptedClassifier::replying(THUMBS_UP));
        let pipeline = AnalysisPipeline::new(&config(10), classifier.clone());
        pipeline.enable();

        let start = Instant::now();
        for i in 0..100u64 {
            let now = start + Duration::from_millis(100 * i);
            pipeline.offer_frame_at(frame(i), now);
            wait_until_idle(&pipeline).await;
        }

        // 10 s of frames at a 2 s interval
        assert_eq!(classifier.calls(), 5);
    }

    #[tokio::test]
    async fn test_round_trip_emits_notice_and_animation() {
        let classifier = Arc::new(ScriptedClassifier::replying(THUMBS_UP));
        let pipeline = AnalysisPipeline::new(&config(1), classifier);
        let channel = RecordingChannel::new();
        pipeline.bind_channel(channel.clone());
        pipeline.enable();

        assert!(pipeline.offer_frame(frame(1)));
        wait_until_idle(&pipeline).await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("thumbs_up"));
        assert!(sent[0].contains("85%"));
        assert_eq!(sent[1], "GESTURE_ANIMATION:👍:thumbs_up");
    }

    #[tokio::test]
    async fn test_disabled_pipeline_ignores_frames() {
        let classifier = Arc::new(ScriptedClassifier::replying(THUMBS_UP));
        let pipeline = AnalysisPipeline::new(&config(1), classifier.clone());

        assert!(!pipeline.offer_frame(frame(1)));
        assert_eq!(classifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_releases_slot_and_stays_silent() {
        let classifier = Arc::new(ScriptedClassifier::failing());
        let pipeline = AnalysisPipeline::new(&config(1), classifier.clone());
        let channel = RecordingChannel::new();
        pipeline.bind_channel(channel.clone());
        pipeline.enable();

        assert!(pipeline.offer_frame(frame(1)));
        wait_until_idle(&pipeline).await;

        assert_eq!(classifier.calls(), 1);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_encode_failure_releases_slot() {
        let classifier = Arc::new(ScriptedClassifier::replying(THUMBS_UP));
        let pipeline = AnalysisPipeline::new(&config(1), classifier.clone());
        pipeline.enable();

        let corrupt = VideoFrame::from_vec(vec![0; 10], Resolution::new(32, 24), PixelFormat::Rgb24, 1);
        assert!(pipeline.offer_frame(corrupt));
        wait_until_idle(&pipeline).await;

        assert_eq!(classifier.calls(), 0);
        assert!(!pipeline.offer_frame(frame(2)), "interval not yet elapsed");
    }

    #[tokio::test]
    async fn test_classifier_timeout_releases_slot() {
        let classifier =
            Arc::new(ScriptedClassifier::replying(THUMBS_UP).with_delay(Duration::from_secs(60)));
        let cfg = AnalysisConfig {
            classify_timeout_secs: 0.05,
            ..config(1)
        };
        let pipeline = AnalysisPipeline::new(&cfg, classifier);
        let channel = RecordingChannel::new();
        pipeline.bind_channel(channel.clone());
        pipeline.enable();

        assert!(pipeline.offer_frame(frame(1)));
        assert_eq!(pipeline.in_flight(), 1);
        wait_until_idle(&pipeline).await;
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_suppresses_in_flight_result() {
        let classifier =
            Arc::new(ScriptedClassifier::replying(THUMBS_UP).with_delay(Duration::from_millis(50)));
        let pipeline = AnalysisPipeline::new(&config(1), classifier.clone());
        let channel = RecordingChannel::new();
        pipeline.bind_channel(channel.clone());
        pipeline.enable();

        assert!(pipeline.offer_frame(frame(1)));
        pipeline.shutdown();
        pipeline.shutdown();
        wait_until_idle(&pipeline).await;

        assert!(channel.sent().is_empty());
        assert!(!pipeline.is_bound());

        pipeline.enable();
        assert!(!pipeline.is_enabled());
        assert!(!pipeline.offer_frame(frame(2)));
    }

    #[tokio::test]
    async fn test_below_threshold_routes_nothing() {
        let classifier = Arc::new(ScriptedClassifier::replying(THUMBS_UP));
        let pipeline = AnalysisPipeline::new(&config(1), classifier);
        let channel = RecordingChannel::new();
        pipeline.bind_channel(channel.clone());
        assert_eq!(pipeline.set_threshold(86), 86);
        pipeline.enable();

        assert!(pipeline.offer_frame(frame(1)));
        wait_until_idle(&pipeline).await;
        assert!(channel.sent().is_empty());
    }
}
