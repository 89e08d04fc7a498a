//! Landmark-detector capability.
//!
//! The pose model itself is external. The processor only needs to know
//! whether it can be loaded, how to construct it from an asset location, how
//! to feed it frames, and where its results go.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::landmarks::DetectionResult;
use crate::frame::Frame;
use crate::retry::{Backoff, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_INIT_DEADLINE};

/// Asset mirrors tried in order when loading the model fails.
pub const DEFAULT_ASSET_SOURCES: &[&str] = &[
    "https://cdn.jsdelivr.net/npm/@mediapipe/pose",
    "https://unpkg.com/@mediapipe/pose",
];

/// Fixed model configuration passed to the detector on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOptions {
    /// 0 = lite, 1 = full, 2 = heavy
    pub model_complexity: u8,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            model_complexity: 0,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

/// `[detector]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Upper bound on frame submissions per second.
    pub send_rate_hz: f32,
    /// How long to wait for the detector capability to become available.
    pub availability_timeout_ms: u64,
    /// Overall budget for initialization including retries.
    pub init_deadline_secs: u64,
    pub init_backoff_base_ms: u64,
    pub init_backoff_max_ms: u64,
    pub asset_sources: Vec<String>,
    pub model_complexity: u8,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        let options = DetectorOptions::default();
        Self {
            send_rate_hz: 35.0,
            availability_timeout_ms: 10_000,
            init_deadline_secs: DEFAULT_INIT_DEADLINE.as_secs(),
            init_backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            init_backoff_max_ms: DEFAULT_BACKOFF_MAX.as_millis() as u64,
            asset_sources: DEFAULT_ASSET_SOURCES.iter().map(|s| s.to_string()).collect(),
            model_complexity: options.model_complexity,
            min_detection_confidence: options.min_detection_confidence,
            min_tracking_confidence: options.min_tracking_confidence,
        }
    }
}

impl DetectorSettings {
    /// Interval between send-loop ticks. Non-positive rates fall back to 35 Hz.
    pub fn send_interval(&self) -> Duration {
        let rate = if self.send_rate_hz > 0.0 {
            self.send_rate_hz
        } else {
            35.0
        };
        Duration::from_nanos((1e9 / f64::from(rate)).round() as u64)
    }

    pub fn availability_timeout(&self) -> Duration {
        Duration::from_millis(self.availability_timeout_ms)
    }

    pub fn init_deadline(&self) -> Duration {
        Duration::from_secs(self.init_deadline_secs)
    }

    /// Retry schedule built from the configured base and cap.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.init_backoff_base_ms),
            Duration::from_millis(self.init_backoff_max_ms),
        )
    }

    pub fn options(&self) -> DetectorOptions {
        DetectorOptions {
            model_complexity: self.model_complexity,
            min_detection_confidence: self.min_detection_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
        }
    }

    /// Asset source for the given (zero-based) init attempt, rotating through
    /// the mirrors. `None` lets the detector use its built-in location.
    pub fn asset_source(&self, attempt: u32) -> Option<&str> {
        if self.asset_sources.is_empty() {
            return None;
        }
        let index = attempt as usize % self.asset_sources.len();
        Some(self.asset_sources[index].as_str())
    }
}

/// Failure reported by the detector capability.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectorError {
    #[error("landmark detector is not available")]
    Unavailable,

    #[error("failed to load detector assets from {source_url}: {message}")]
    AssetLoad { source_url: String, message: String },

    #[error("detector rejected frame: {0}")]
    Submit(String),

    #[error("detector error: {0}")]
    Other(String),
}

/// Why [`MotionProcessor::init`](super::MotionProcessor::init) failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InitError {
    #[error("detector initialization task failed: {0}")]
    TaskFailed(String),

    #[error("detector initialization timed out after {deadline:?}: {last_error}")]
    DeadlineExceeded {
        deadline: Duration,
        last_error: String,
    },

    #[error("detector initialization cancelled")]
    Cancelled,
}

/// Something that can construct landmark detectors.
pub trait DetectorFactory: Send + Sync + 'static {
    type Detector: LandmarkDetector;

    /// Whether the capability has been loaded by the host yet.
    fn is_available(&self) -> bool;

    /// Construct and configure a detector, loading model assets from
    /// `asset_source` when given.
    fn create(
        &self,
        asset_source: Option<&str>,
        options: &DetectorOptions,
    ) -> impl Future<Output = Result<Self::Detector, DetectorError>> + Send;
}

/// A constructed pose detector.
///
/// Results for successive submissions must be delivered in submission order.
pub trait LandmarkDetector: Send + Sync + 'static {
    /// Register where results go. Replaces any previous registration.
    fn on_results(&self, sender: mpsc::UnboundedSender<DetectionResult>);

    /// Submit one frame. Resolves once the detector has accepted it; the
    /// result arrives later on the registered channel.
    fn submit(&self, frame: Frame) -> impl Future<Output = Result<(), DetectorError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_interval() {
        let settings = DetectorSettings::default();
        let interval = settings.send_interval();
        assert!(interval > Duration::from_millis(28) && interval < Duration::from_millis(29));

        let broken = DetectorSettings {
            send_rate_hz: 0.0,
            ..DetectorSettings::default()
        };
        assert_eq!(broken.send_interval(), interval);
    }

    #[test]
    fn test_asset_source_rotation() {
        let settings = DetectorSettings {
            asset_sources: vec!["a".into(), "b".into()],
            ..DetectorSettings::default()
        };
        assert_eq!(settings.asset_source(0), Some("a"));
        assert_eq!(settings.asset_source(1), Some("b"));
        assert_eq!(settings.asset_source(2), Some("a"));

        let none = DetectorSettings {
            asset_sources: Vec::new(),
            ..DetectorSettings::default()
        };
        assert_eq!(none.asset_source(3), None);
    }

    #[test]
    fn test_defaults_are_low_complexity() {
        let settings = DetectorSettings::default();
        assert_eq!(settings.options(), DetectorOptions::default());
        assert_eq!(settings.init_deadline(), Duration::from_secs(180));
        assert_eq!(settings.backoff(), Backoff::default());
    }

    #[test]
    fn test_partial_toml() {
        let settings: DetectorSettings =
            toml::from_str("send_rate_hz = 20.0\nasset_sources = [\"local\"]").unwrap();
        assert_eq!(settings.send_interval(), Duration::from_millis(50));
        assert_eq!(settings.asset_source(5), Some("local"));
        assert_eq!(settings.availability_timeout(), Duration::from_secs(10));
    }
}
