//! Acquisition error types.

use super::device::DeviceError;

/// Errors surfaced by [`AcquisitionManager`](super::AcquisitionManager).
///
/// `Clone` so one in-flight acquisition result can be handed to every caller
/// that joined it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AcquireError {
    #[error("camera capture API is not available on this host")]
    ApiMissing,

    #[error("camera permission was not granted within {timeout_ms}ms")]
    PermissionTimeout { timeout_ms: u64 },

    #[error("camera access arrived after the request timed out; the late stream was released")]
    LateStreamDiscarded,

    #[error("video playback failed: {0}")]
    PlayFailed(String),

    #[error("camera stream is not rendering frames: {0}")]
    NotRendering(String),

    #[error("camera device error: {0}")]
    Device(DeviceError),
}

impl AcquireError {
    /// Stable code for UI layers and telemetry.
    pub fn code(&self) -> &'static str {
        match self {
            AcquireError::ApiMissing => "CAMERA_API_MISSING",
            AcquireError::PermissionTimeout { .. } => "CAMERA_PERMISSION_TIMEOUT",
            AcquireError::LateStreamDiscarded => "CAMERA_LATE_STREAM_DISCARDED",
            AcquireError::PlayFailed(_) => "VIDEO_PLAY_FAILED",
            AcquireError::NotRendering(_) => "VIDEO_STREAM_NOT_RENDERING",
            AcquireError::Device(_) => "CAMERA_DEVICE_ERROR",
        }
    }

    /// Permanent capability errors; retrying without user action is pointless.
    pub fn is_permanent(&self) -> bool {
        match self {
            AcquireError::ApiMissing => true,
            AcquireError::Device(e) => e.is_terminal(),
            _ => false,
        }
    }

    /// Errors produced by the render-health probe.
    pub fn is_render_failure(&self) -> bool {
        matches!(
            self,
            AcquireError::PlayFailed(_) | AcquireError::NotRendering(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AcquireError::ApiMissing.code(), "CAMERA_API_MISSING");
        assert_eq!(
            AcquireError::PermissionTimeout { timeout_ms: 100 }.code(),
            "CAMERA_PERMISSION_TIMEOUT"
        );
        assert_eq!(
            AcquireError::LateStreamDiscarded.code(),
            "CAMERA_LATE_STREAM_DISCARDED"
        );
        assert_eq!(AcquireError::PlayFailed("x".into()).code(), "VIDEO_PLAY_FAILED");
        assert_eq!(
            AcquireError::NotRendering("x".into()).code(),
            "VIDEO_STREAM_NOT_RENDERING"
        );
        assert_eq!(
            AcquireError::Device(DeviceError::PermissionDenied).code(),
            "CAMERA_DEVICE_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let msg = format!("{}", AcquireError::PermissionTimeout { timeout_ms: 8000 });
        assert!(msg.contains("8000ms"));
        let msg = format!("{}", AcquireError::Device(DeviceError::NotReadable));
        assert!(msg.contains("not readable"));
    }

    #[test]
    fn test_classification() {
        assert!(AcquireError::ApiMissing.is_permanent());
        assert!(AcquireError::Device(DeviceError::Security).is_permanent());
        assert!(!AcquireError::Device(DeviceError::NotFound).is_permanent());
        assert!(!AcquireError::LateStreamDiscarded.is_permanent());
        assert!(AcquireError::NotRendering("frozen".into()).is_render_failure());
        assert!(!AcquireError::PermissionTimeout { timeout_ms: 1 }.is_render_failure());
    }
}
