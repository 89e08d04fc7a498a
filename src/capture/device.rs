//! Capture device, stream and sink capabilities.
//!
//! The acquisition manager only talks to the host through these traits. A
//! browser binding, a native camera stack or the in-memory simulator in
//! [`crate::sim`] can sit behind them.

use std::fmt;
use std::future::Future;

use super::constraints::{ConstraintSet, FacingMode};
use crate::frame::Resolution;

/// Failure kinds reported by a device request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera not readable (in use or hardware fault)")]
    NotReadable,

    #[error("camera blocked by an insecure context")]
    Security,

    #[error("camera request aborted")]
    Aborted,

    #[error("camera in invalid state")]
    InvalidState,

    #[error("constraints not satisfiable: {0}")]
    Overconstrained(String),

    #[error("no camera matches the request")]
    NotFound,

    #[error("camera request failed: {0}")]
    Other(String),
}

impl DeviceError {
    /// Terminal errors abort acquisition immediately; no constraint change can
    /// fix them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceError::PermissionDenied
                | DeviceError::NotReadable
                | DeviceError::Security
                | DeviceError::Aborted
                | DeviceError::InvalidState
        )
    }

    /// Short kind name for logs and error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceError::PermissionDenied => "permission-denied",
            DeviceError::NotReadable => "not-readable",
            DeviceError::Security => "security",
            DeviceError::Aborted => "aborted",
            DeviceError::InvalidState => "invalid-state",
            DeviceError::Overconstrained(_) => "overconstrained",
            DeviceError::NotFound => "not-found",
            DeviceError::Other(_) => "other",
        }
    }
}

/// Failure reported by a sink's `play`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("playback not allowed: {0}")]
    NotAllowed(String),

    #[error("playback aborted: {0}")]
    Aborted(String),

    #[error("sink has no stream attached")]
    NoSource,
}

/// Lifecycle of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackReadyState {
    Live,
    Ended,
}

/// Settings a track actually negotiated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSettings {
    pub resolution: Resolution,
    pub frame_rate: Option<f32>,
    pub facing: Option<FacingMode>,
}

/// Point-in-time view of one video track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub label: String,
    pub ready_state: TrackReadyState,
    pub enabled: bool,
    pub muted: bool,
    pub settings: Option<TrackSettings>,
}

impl TrackInfo {
    pub fn is_live(&self) -> bool {
        self.ready_state == TrackReadyState::Live
    }

    /// Live, enabled and actually delivering (not muted by the platform).
    pub fn is_delivering(&self) -> bool {
        self.is_live() && self.enabled && !self.muted
    }
}

impl fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' state={:?} enabled={} muted={}",
            self.label, self.ready_state, self.enabled, self.muted
        )?;
        if let Some(settings) = &self.settings {
            write!(f, " settings={}", settings.resolution)?;
            if let Some(fps) = settings.frame_rate {
                write!(f, "@{}fps", fps)?;
            }
            if let Some(facing) = settings.facing {
                write!(f, "/{:?}", facing)?;
            }
        }
        Ok(())
    }
}

/// Presentation statistics from a frame-presentation callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentationStats {
    pub presented_frames: u64,
    pub media_time: f64,
}

/// A granted capture stream. Clones refer to the same stream.
pub trait MediaStream: Clone + Send + Sync + 'static {
    fn id(&self) -> String;

    fn video_tracks(&self) -> Vec<TrackInfo>;

    /// Stop every track, releasing the hardware.
    fn stop(&self);

    fn is_live(&self) -> bool {
        self.video_tracks().iter().any(TrackInfo::is_live)
    }

    fn has_delivering_track(&self) -> bool {
        self.video_tracks().iter().any(TrackInfo::is_delivering)
    }
}

/// A renderable element a stream can be bound to.
///
/// Methods take `&self`; implementations use interior mutability so a sink
/// can be shared between the acquisition manager and the frame consumer.
pub trait VideoSink<S: MediaStream>: Send + Sync + 'static {
    /// Bind a stream, or detach with `None`.
    fn attach(&self, stream: Option<S>);

    /// Detach and drop any decoder state.
    fn reset(&self);

    /// Metadata (dimensions) has loaded for the attached stream.
    fn metadata_ready(&self) -> bool;

    fn dimensions(&self) -> (u32, u32);

    fn play(&self) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;

    /// Media clock in seconds.
    fn current_time(&self) -> f64;

    /// Decoded frame counter, where the host exposes one.
    fn decoded_frames(&self) -> Option<u64> {
        None
    }

    /// Frame-presentation callback statistics, where the host exposes them.
    fn presentation(&self) -> Option<PresentationStats> {
        None
    }
}

/// Host camera capability.
pub trait CaptureBackend: Send + Sync + 'static {
    type Stream: MediaStream;
    type Sink: VideoSink<Self::Stream>;

    /// False when the host has no capture API at all.
    fn is_supported(&self) -> bool;

    /// Whether the host document/app is in the foreground.
    fn is_foreground(&self) -> bool {
        true
    }

    /// Request a stream. `None` is the unconstrained best-effort request.
    fn request_stream(
        &self,
        constraints: Option<ConstraintSet>,
    ) -> impl Future<Output = Result<Self::Stream, DeviceError>> + Send;

    /// An off-screen sink for probing, if the host can create one.
    fn create_probe_sink(&self) -> Option<Self::Sink> {
        None
    }
}

/// One-line track summary for logs.
pub fn describe_tracks<S: MediaStream>(stream: &S) -> String {
    let tracks = stream.video_tracks();
    if tracks.is_empty() {
        return format!("stream {} has no video tracks", stream.id());
    }
    let parts: Vec<String> = tracks.iter().map(|t| t.to_string()).collect();
    format!("stream {} [{}]", stream.id(), parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(DeviceError::PermissionDenied.is_terminal());
        assert!(DeviceError::NotReadable.is_terminal());
        assert!(DeviceError::Security.is_terminal());
        assert!(DeviceError::Aborted.is_terminal());
        assert!(DeviceError::InvalidState.is_terminal());
        assert!(!DeviceError::Overconstrained("width".into()).is_terminal());
        assert!(!DeviceError::NotFound.is_terminal());
        assert!(!DeviceError::Other("glitch".into()).is_terminal());
    }

    #[test]
    fn test_track_display() {
        let track = TrackInfo {
            label: "FaceTime HD".to_string(),
            ready_state: TrackReadyState::Live,
            enabled: true,
            muted: false,
            settings: Some(TrackSettings {
                resolution: Resolution::MEDIUM,
                frame_rate: Some(30.0),
                facing: Some(FacingMode::User),
            }),
        };
        assert_eq!(
            format!("{}", track),
            "'FaceTime HD' state=Live enabled=true muted=false settings=640x480@30fps/User"
        );
        assert!(track.is_delivering());

        let muted = TrackInfo { muted: true, ..track };
        assert!(muted.is_live());
        assert!(!muted.is_delivering());
    }
}
