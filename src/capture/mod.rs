//! Camera acquisition: from "give me the camera" to a stream that is visibly
//! rendering into a sink.
//!
//! - Platform detection via [`PlatformProfile`]
//! - Constraint fallbacks via [`ConstraintProfile`]
//! - Host capabilities via [`CaptureBackend`], [`MediaStream`] and [`VideoSink`]
//! - The retrying state machine via [`AcquisitionManager`]

mod constraints;
mod device;
mod errors;
pub mod health;
mod manager;
mod platform;
mod session;
mod settings;

pub use constraints::{ConstraintProfile, ConstraintSet, FacingMode};
pub use device::{
    describe_tracks, CaptureBackend, DeviceError, MediaStream, PresentationStats, SinkError,
    TrackInfo, TrackReadyState, TrackSettings, VideoSink,
};
pub use errors::AcquireError;
pub use manager::AcquisitionManager;
pub use platform::{Platform, PlatformProfile};
pub use session::CaptureSession;
pub use settings::{AcquisitionSettings, FrameProgressHeuristic};
