//! Capture constraint profiles.
//!
//! Each platform gets an ordered list of resolution/frame-rate preferences.
//! Retry attempts walk the list round-robin from a rotating offset so a
//! profile that failed first last time is not always tried first again.

use std::fmt;

use serde::Deserialize;

use super::platform::{Platform, PlatformProfile};
use crate::frame::Resolution;

/// Which camera to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Self-facing camera
    User,
    /// Rear camera
    Environment,
}

impl FacingMode {
    pub fn opposite(&self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

/// One capture preference set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintSet {
    pub resolution: Resolution,
    pub frame_rate: Option<f32>,
    pub facing: FacingMode,
}

impl ConstraintSet {
    pub fn new(resolution: Resolution, frame_rate: Option<f32>) -> Self {
        Self {
            resolution,
            frame_rate,
            facing: FacingMode::User,
        }
    }

    /// Small throwaway request on the opposite camera, used to unstick a
    /// wedged pipeline.
    pub fn kick(facing: FacingMode) -> Self {
        Self {
            resolution: Resolution::TINY,
            frame_rate: Some(15.0),
            facing: facing.opposite(),
        }
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame_rate {
            Some(fps) => write!(f, "{}@{}fps/{:?}", self.resolution, fps, self.facing),
            None => write!(f, "{}/{:?}", self.resolution, self.facing),
        }
    }
}

/// Ordered, never-empty list of constraint sets for a platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintProfile {
    sets: Vec<ConstraintSet>,
}

impl ConstraintProfile {
    /// Build the ordering for a platform.
    pub fn for_platform(profile: &PlatformProfile) -> Self {
        let sets = match (profile.platform, profile.is_tablet) {
            // iOS Safari negotiates 640x480 reliably; 720p tends to stall
            // after interruptions on older devices.
            (Platform::Ios, _) => vec![
                ConstraintSet::new(Resolution::MEDIUM, Some(30.0)),
                ConstraintSet::new(Resolution::HD, Some(30.0)),
                ConstraintSet::new(Resolution::LOW, None),
            ],
            (Platform::Android, false) | (Platform::Harmony, false) => vec![
                ConstraintSet::new(Resolution::MEDIUM, Some(30.0)),
                ConstraintSet::new(Resolution::LOW, Some(30.0)),
                ConstraintSet::new(Resolution::HD, None),
            ],
            (Platform::Android, true) | (Platform::Harmony, true) => vec![
                ConstraintSet::new(Resolution::HD, Some(30.0)),
                ConstraintSet::new(Resolution::MEDIUM, Some(30.0)),
                ConstraintSet::new(Resolution::LOW, None),
            ],
            (Platform::Desktop, _) | (Platform::Unknown, _) => vec![
                ConstraintSet::new(Resolution::HD, Some(30.0)),
                ConstraintSet::new(Resolution::MEDIUM, Some(30.0)),
            ],
        };
        Self { sets }
    }

    /// Build from explicit sets. An empty list falls back to one medium set.
    pub fn from_sets(sets: Vec<ConstraintSet>) -> Self {
        if sets.is_empty() {
            return Self {
                sets: vec![ConstraintSet::new(Resolution::MEDIUM, None)],
            };
        }
        Self { sets }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn sets(&self) -> &[ConstraintSet] {
        &self.sets
    }

    /// The full list starting at `attempt % len`, wrapping around.
    pub fn rotated(&self, attempt: u32) -> Vec<ConstraintSet> {
        let offset = attempt as usize % self.sets.len();
        self.sets[offset..]
            .iter()
            .chain(self.sets[..offset].iter())
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_never_empty() {
        for platform in [
            Platform::Ios,
            Platform::Android,
            Platform::Harmony,
            Platform::Desktop,
            Platform::Unknown,
        ] {
            for tablet in [false, true] {
                let profile = ConstraintProfile::for_platform(&PlatformProfile::new(platform, tablet));
                assert!(!profile.is_empty(), "{} tablet={}", platform, tablet);
            }
        }
        assert_eq!(ConstraintProfile::from_sets(Vec::new()).len(), 1);
    }

    #[test]
    fn test_rotation_round_robin() {
        let profile = ConstraintProfile::from_sets(vec![
            ConstraintSet::new(Resolution::HD, None),
            ConstraintSet::new(Resolution::MEDIUM, None),
            ConstraintSet::new(Resolution::LOW, None),
        ]);

        let first: Vec<_> = profile.rotated(0).iter().map(|c| c.resolution).collect();
        assert_eq!(first, vec![Resolution::HD, Resolution::MEDIUM, Resolution::LOW]);

        let second: Vec<_> = profile.rotated(1).iter().map(|c| c.resolution).collect();
        assert_eq!(second, vec![Resolution::MEDIUM, Resolution::LOW, Resolution::HD]);

        let wrapped: Vec<_> = profile.rotated(3).iter().map(|c| c.resolution).collect();
        assert_eq!(wrapped, first);
    }

    #[test]
    fn test_kick_uses_opposite_camera() {
        let kick = ConstraintSet::kick(FacingMode::User);
        assert_eq!(kick.facing, FacingMode::Environment);
        assert_eq!(kick.resolution, Resolution::TINY);
    }

    #[test]
    fn test_constraint_display() {
        let set = ConstraintSet::new(Resolution::MEDIUM, Some(30.0));
        assert_eq!(format!("{}", set), "640x480@30fps/User");
    }
}
