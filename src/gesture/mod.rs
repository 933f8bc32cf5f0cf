//! Gesture analysis
//!
//! Samples decoded frames off the media path, sends them to a vision
//! classifier and routes confident results back over the control channel.

pub mod classifier;
pub mod encoder;
pub mod pipeline;
pub mod router;
pub mod sampler;
pub mod state;

pub use classifier::{ClassificationResult, GestureClassifier};
pub use encoder::{EncodeProfile, EncodedImage, FrameEncoder};
pub use pipeline::AnalysisPipeline;
pub use router::{GestureResultRouter, RouteOutcome, ANIMATION_MARKER};
pub use sampler::{FrameSampler, InFlightGuard};
pub use state::{AnalysisSnapshot, AnalysisState};
