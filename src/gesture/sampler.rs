//! Frame sampling decision
//!
//! A frame triggers an analysis pass only when analysis is enabled, a pass
//! slot is free, the sampling interval has elapsed since the last sample and
//! the frame counter lands on the stride. The whole decision, including
//! claiming the slot and recording the sample time, happens under the
//! sampling window lock.

use std::sync::Arc;
use std::time::Instant;

use super::state::AnalysisState;

/// Default frame stride: only every 10th eligible frame is considered
pub const DEFAULT_SAMPLE_STRIDE: u64 = 10;

/// Rate limiter in front of the analysis pipeline
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    stride: u64,
}

impl FrameSampler {
    pub fn new(stride: u64) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    /// Decide whether the frame arriving at `now` starts a pass.
    ///
    /// On `true` an in-flight slot has been claimed and the sample time
    /// recorded; the caller must release the slot when the pass ends
    /// (see [`InFlightGuard`]). The frame counter only advances while
    /// analysis is enabled and a slot is free.
    pub fn should_sample(&self, now: Instant, state: &AnalysisState) -> bool {
        if !state.is_enabled() {
            return false;
        }

        let mut window = state.window.lock();
        if !state.has_free_slot() {
            return false;
        }

        window.frame_counter += 1;

        let due = match window.last_sample {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= state.interval(),
        };
        if !due || window.frame_counter % self.stride != 0 {
            return false;
        }

        if !state.try_claim_slot() {
            return false;
        }
        window.last_sample = Some(now);
        true
    }

    /// [`should_sample`](Self::should_sample) returning a guard that
    /// releases the claimed slot when dropped.
    pub fn begin_pass(&self, now: Instant, state: &Arc<AnalysisState>) -> Option<InFlightGuard> {
        self.should_sample(now, state)
            .then(|| InFlightGuard::adopt(state.clone()))
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_STRIDE)
    }
}

/// Owns one claimed in-flight slot; releases it exactly once on drop,
/// whichever way the pass ends.
#[derive(Debug)]
pub struct InFlightGuard {
    state: Arc<AnalysisState>,
}

impl InFlightGuard {
    fn adopt(state: Arc<AnalysisState>) -> Self {
        Self { state }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.release_slot();
    }
}
