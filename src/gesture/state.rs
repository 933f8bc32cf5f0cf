//! Per-pipeline analysis state
//!
//! Owned by exactly one [`AnalysisPipeline`](super::AnalysisPipeline). The
//! session command handler flips the enable flag and tunables; the sampler
//! and the background pass completion own the in-flight slot.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Lower bound for the sampling interval
pub const MIN_ANALYSIS_INTERVAL: Duration = Duration::from_secs(1);

/// Sampling bookkeeping guarded by one lock so a sampling decision is a
/// single atomic transition.
#[derive(Debug, Default)]
pub(crate) struct SampleWindow {
    pub(crate) last_sample: Option<Instant>,
    pub(crate) frame_counter: u64,
}

/// Analysis state shared between the frame path and background passes
#[derive(Debug)]
pub struct AnalysisState {
    enabled: AtomicBool,
    interval_ms: AtomicU64,
    threshold: AtomicU8,
    /// Maximum number of concurrent passes (worker pool size)
    max_in_flight: usize,
    in_flight: AtomicUsize,
    pub(crate) window: Mutex<SampleWindow>,
}

/// Point-in-time view for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSnapshot {
    pub enabled: bool,
    pub interval_secs: f64,
    pub confidence_threshold: u8,
    pub in_flight: usize,
    pub frames_seen: u64,
}

impl AnalysisState {
    /// Create a disabled state. `interval` and `threshold` are clamped.
    pub fn new(interval: Duration, threshold: i64, max_in_flight: usize) -> Self {
        let state = Self {
            enabled: AtomicBool::new(false),
            interval_ms: AtomicU64::new(0),
            threshold: AtomicU8::new(0),
            max_in_flight: max_in_flight.max(1),
            in_flight: AtomicUsize::new(0),
            window: Mutex::new(SampleWindow::default()),
        };
        state.set_interval(interval);
        state.set_threshold(threshold);
        state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    /// Set the sampling interval, clamped to at least one second.
    /// Returns the effective value.
    pub fn set_interval(&self, interval: Duration) -> Duration {
        let effective = interval.max(MIN_ANALYSIS_INTERVAL);
        self.interval_ms
            .store(effective.as_millis() as u64, Ordering::Release);
        effective
    }

    pub fn threshold(&self) -> u8 {
        self.threshold.load(Ordering::Acquire)
    }

    /// Set the confidence threshold, clamped to 0..=100.
    /// Returns the effective value.
    pub fn set_threshold(&self, threshold: i64) -> u8 {
        let effective = threshold.clamp(0, 100) as u8;
        self.threshold.store(effective, Ordering::Release);
        effective
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Number of passes currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// True while any background pass is executing
    pub fn is_in_flight(&self) -> bool {
        self.in_flight() > 0
    }

    /// Claim an in-flight slot. Only called by the sampler while it holds
    /// the window lock.
    pub(crate) fn try_claim_slot(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_in_flight).then_some(n + 1)
            })
            .is_ok()
    }

    /// Whether a slot is currently free
    pub(crate) fn has_free_slot(&self) -> bool {
        self.in_flight() < self.max_in_flight
    }

    pub(crate) fn release_slot(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        AnalysisSnapshot {
            enabled: self.is_enabled(),
            interval_secs: self.interval().as_secs_f64(),
            confidence_threshold: self.threshold(),
            in_flight: self.in_flight(),
            frames_seen: self.window.lock().frame_counter,
        }
    }
}
