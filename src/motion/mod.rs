//! Pose landmarks in, lane and jump intents out.
//!
//! [`MotionProcessor`] owns the detector lifecycle and the send loop;
//! [`MotionAnalyzer`] holds the per-result signal processing and can be
//! driven directly, e.g. when replaying a recorded trace.

mod analyzer;
mod detector;
mod filter;
mod landmarks;
mod processor;
mod state;
mod tuning;

pub use analyzer::MotionAnalyzer;
pub use detector::{
    DetectorError, DetectorFactory, DetectorOptions, DetectorSettings, InitError,
    LandmarkDetector, DEFAULT_ASSET_SOURCES,
};
pub use filter::{frame_dt, smoothing_alpha, Ema};
pub use landmarks::{DetectionResult, Landmark, LandmarkSet, Point, PoseLandmark};
pub use processor::{MotionProcessor, ProcessorPhase};
pub use state::{Lane, MotionEvent, MotionSnapshot, PoseReading};
pub use tuning::MotionTuning;
