//! Tunables for acquisition and the render-health probe.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Signals accepted as proof that a sink is presenting frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameProgressHeuristic {
    /// The media clock advanced by more than the epsilon.
    MediaClock,
    /// The decoded-frame counter increased.
    DecodedFrames,
    /// The presentation callback reported a newer frame or media time.
    Presentation,
}

/// `[acquisition]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    pub permission_timeout_ms: u64,
    /// Overrides the platform's retry budget when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_retry_count: Option<u32>,
    pub metadata_timeout_ms: u64,
    pub live_track_timeout_ms: u64,
    pub play_timeout_ms: u64,
    pub frame_health_timeout_ms: u64,
    pub frame_poll_interval_ms: u64,
    /// Seconds of media-clock advance that count as progress.
    pub media_time_epsilon: f64,
    pub retry_cooldown_ms: u64,
    pub kick_duration_ms: u64,
    pub foreground_wait_ms: u64,
    pub probe_detached_sink: bool,
    pub frame_progress: Vec<FrameProgressHeuristic>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            permission_timeout_ms: 8000,
            render_retry_count: None,
            metadata_timeout_ms: 4000,
            live_track_timeout_ms: 1500,
            play_timeout_ms: 3000,
            frame_health_timeout_ms: 2500,
            frame_poll_interval_ms: 50,
            media_time_epsilon: 0.01,
            retry_cooldown_ms: 400,
            kick_duration_ms: 300,
            foreground_wait_ms: 5000,
            probe_detached_sink: true,
            frame_progress: vec![
                FrameProgressHeuristic::MediaClock,
                FrameProgressHeuristic::DecodedFrames,
                FrameProgressHeuristic::Presentation,
            ],
        }
    }
}

impl AcquisitionSettings {
    pub fn permission_timeout(&self) -> Duration {
        Duration::from_millis(self.permission_timeout_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn live_track_timeout(&self) -> Duration {
        Duration::from_millis(self.live_track_timeout_ms)
    }

    pub fn play_timeout(&self) -> Duration {
        Duration::from_millis(self.play_timeout_ms)
    }

    pub fn frame_health_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_health_timeout_ms)
    }

    pub fn frame_poll_interval(&self) -> Duration {
        Duration::from_millis(self.frame_poll_interval_ms.max(1))
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }

    pub fn kick_duration(&self) -> Duration {
        Duration::from_millis(self.kick_duration_ms)
    }

    pub fn foreground_wait(&self) -> Duration {
        Duration::from_millis(self.foreground_wait_ms)
    }

    pub fn accepts(&self, heuristic: FrameProgressHeuristic) -> bool {
        self.frame_progress.contains(&heuristic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AcquisitionSettings::default();
        assert_eq!(settings.permission_timeout(), Duration::from_secs(8));
        assert!(settings.render_retry_count.is_none());
        assert!(settings.accepts(FrameProgressHeuristic::MediaClock));
        assert!(settings.accepts(FrameProgressHeuristic::Presentation));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: AcquisitionSettings = toml::from_str(
            r#"
            permission_timeout_ms = 1000
            frame_progress = ["decoded-frames"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.permission_timeout_ms, 1000);
        assert_eq!(settings.play_timeout_ms, 3000);
        assert!(settings.accepts(FrameProgressHeuristic::DecodedFrames));
        assert!(!settings.accepts(FrameProgressHeuristic::MediaClock));
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let settings = AcquisitionSettings {
            frame_poll_interval_ms: 0,
            ..AcquisitionSettings::default()
        };
        assert_eq!(settings.frame_poll_interval(), Duration::from_millis(1));
    }
}
