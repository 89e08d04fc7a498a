//! Public motion state published to consumers.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

/// Discrete horizontal position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Lane {
    Left,
    #[default]
    Center,
    Right,
}

impl Lane {
    pub fn as_i8(self) -> i8 {
        match self {
            Lane::Left => -1,
            Lane::Center => 0,
            Lane::Right => 1,
        }
    }

    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            -1 => Some(Lane::Left),
            0 => Some(Lane::Center),
            1 => Some(Lane::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

/// Push notification for game logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MotionEvent {
    Move { lane: Lane },
    Jump,
}

impl MotionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MotionEvent::Move { .. } => "move",
            MotionEvent::Jump => "jump",
        }
    }
}

/// Landmark-derived positions, normalized to [0, 1] with X mirrored for a
/// self-facing camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoseReading {
    pub nose_x: f32,
    pub nose_y: f32,
    pub face_x: f32,
    pub face_y: f32,
    pub face_width: f32,
    pub face_height: f32,
    pub shoulder_y: f32,
}

impl Default for PoseReading {
    fn default() -> Self {
        Self {
            nose_x: 0.5,
            nose_y: 0.5,
            face_x: 0.5,
            face_y: 0.5,
            face_width: 0.18,
            face_height: 0.24,
            shoulder_y: 0.5,
        }
    }
}

/// Snapshot of the processor's output, replaced whole on every tick so
/// readers never see a half-updated pair of raw and smoothed values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MotionSnapshot {
    pub lane: Lane,
    pub is_jumping: bool,
    pub raw: PoseReading,
    pub smoothed: PoseReading,
    pub missed_detections: u64,
    pub frames_processed: u64,
    pub last_landmarks_at: Option<Instant>,
}
