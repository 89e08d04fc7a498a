//! Empirically tuned motion constants, exposed as configuration.
//!
//! Reference sizes and clamp ranges were tuned by hand against real players
//! at typical phone and laptop distances. They are kept configurable rather
//! than derived.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `[motion]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTuning {
    /// Landmarks below this confidence are ignored.
    pub min_confidence: f32,
    /// Time constant of the per-frame low-pass filters, in seconds.
    pub smoothing_time_constant_s: f32,
    /// Time constant of the vertical jump baseline, in seconds.
    pub baseline_time_constant_s: f32,

    pub reference_shoulder_width: f32,
    pub reference_torso_height: f32,
    pub scale_min: f32,
    pub scale_max: f32,

    pub lane_threshold: f32,
    pub lane_threshold_min: f32,
    pub lane_threshold_max: f32,
    /// Weight of the previous lane position in the asymmetric smoother.
    pub lane_previous_weight: f32,
    /// A side lane is released back to center once the offset falls below
    /// this fraction of the threshold.
    pub lane_release_ratio: f32,
    /// The neutral reference drifts only while the offset is inside this
    /// fraction of the threshold.
    pub recenter_zone_ratio: f32,
    /// Per-frame drift of the neutral reference toward the current position.
    pub recenter_rate: f32,

    /// Upward speed (normalized units per second) a jump frame must exceed.
    pub jump_velocity: f32,
    /// Upward displacement from baseline a jump frame must exceed.
    pub jump_displacement: f32,
    /// Head displacement that must corroborate a jump frame.
    pub jump_head_displacement: f32,
    /// Distance below the smoothed baseline the body must descend past to re-arm.
    pub jump_rearm_margin: f32,
    /// Largest relative torso-height change that still allows jump candidacy.
    pub torso_change_limit: f32,
    pub jump_streak_max: u8,
    pub jump_streak_trigger: u8,
    pub jump_cooldown_ms: u64,
    pub jump_duration_ms: u64,

    /// Fraction of the way `calibrate` moves the vertical baselines.
    pub calibration_nudge: f32,
}

impl Default for MotionTuning {
    fn default() -> Self {
        Self {
            min_confidence: 0.35,
            smoothing_time_constant_s: 0.08,
            baseline_time_constant_s: 0.6,
            reference_shoulder_width: 0.22,
            reference_torso_height: 0.25,
            scale_min: 0.35,
            scale_max: 1.6,
            lane_threshold: 0.12,
            lane_threshold_min: 0.05,
            lane_threshold_max: 0.22,
            lane_previous_weight: 0.55,
            lane_release_ratio: 0.6,
            recenter_zone_ratio: 0.6,
            recenter_rate: 0.02,
            jump_velocity: 0.9,
            jump_displacement: 0.045,
            jump_head_displacement: 0.035,
            jump_rearm_margin: 0.015,
            torso_change_limit: 0.25,
            jump_streak_max: 4,
            jump_streak_trigger: 2,
            jump_cooldown_ms: 800,
            jump_duration_ms: 450,
            calibration_nudge: 0.5,
        }
    }
}

impl MotionTuning {
    pub fn jump_cooldown(&self) -> Duration {
        Duration::from_millis(self.jump_cooldown_ms)
    }

    pub fn jump_duration(&self) -> Duration {
        Duration::from_millis(self.jump_duration_ms)
    }

    /// Distance scale from measured shoulder width (1.0 at the reference).
    pub fn shoulder_scale(&self, shoulder_width: f32) -> f32 {
        (shoulder_width / self.reference_shoulder_width).clamp(self.scale_min, self.scale_max)
    }

    /// Distance scale from measured torso height (1.0 at the reference).
    pub fn torso_scale(&self, torso_height: f32) -> f32 {
        (torso_height / self.reference_torso_height).clamp(self.scale_min, self.scale_max)
    }

    /// Lane threshold for a given shoulder scale.
    pub fn scaled_lane_threshold(&self, scale: f32) -> f32 {
        (self.lane_threshold * scale).clamp(self.lane_threshold_min, self.lane_threshold_max)
    }
}
