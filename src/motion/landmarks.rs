//! Pose landmarks as produced by the detector.

use serde::{Deserialize, Serialize};

/// Indices into the 33-point pose topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PoseLandmark {
    Nose = 0,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftHip = 23,
    RightHip = 24,
}

impl PoseLandmark {
    /// Number of points in a full pose result.
    pub const COUNT: usize = 33;

    /// The points the motion analyzer reads.
    pub const TRACKED: [PoseLandmark; 5] = [
        PoseLandmark::Nose,
        PoseLandmark::LeftShoulder,
        PoseLandmark::RightShoulder,
        PoseLandmark::LeftHip,
        PoseLandmark::RightHip,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A single normalized keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Normalized X (0.0 = left edge of the unmirrored image)
    pub x: f32,
    /// Normalized Y (0.0 = top)
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            visibility: Some(visibility),
            presence: None,
        }
    }

    /// visibility × presence when both are reported, otherwise whichever is.
    pub fn confidence(&self) -> f32 {
        match (self.visibility, self.presence) {
            (Some(v), Some(p)) => v * p,
            (Some(v), None) => v,
            (None, Some(p)) => p,
            (None, None) => 1.0,
        }
    }

    fn is_in_frame(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Simple 2D point in normalized image space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const CENTER: Point = Point { x: 0.5, y: 0.5 };

    pub fn midpoint(a: Point, b: Point) -> Point {
        Point {
            x: (a.x + b.x) * 0.5,
            y: (a.y + b.y) * 0.5,
        }
    }
}

/// One detector result: the full landmark list for a single person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// Build a full-size set with only the given points populated.
    pub fn from_tracked(tracked: &[(PoseLandmark, Landmark)]) -> Self {
        let mut points = vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                visibility: Some(0.0),
                presence: Some(0.0),
            };
            PoseLandmark::COUNT
        ];
        for (which, landmark) in tracked {
            points[which.index()] = *landmark;
        }
        Self { points }
    }

    pub fn get(&self, which: PoseLandmark) -> Option<&Landmark> {
        self.points.get(which.index())
    }

    /// Position of `which` if it clears `min_confidence`, clamped to [0, 1].
    pub fn confident(&self, which: PoseLandmark, min_confidence: f32) -> Option<Point> {
        let landmark = self.get(which)?;
        if !landmark.is_in_frame() || landmark.confidence() < min_confidence {
            return None;
        }
        Some(Point {
            x: landmark.x.clamp(0.0, 1.0),
            y: landmark.y.clamp(0.0, 1.0),
        })
    }
}

/// A detector callback payload. `None` means no person was found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub landmarks: Option<LandmarkSet>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self { landmarks: None }
    }

    pub fn with(landmarks: LandmarkSet) -> Self {
        Self {
            landmarks: Some(landmarks),
        }
    }
}
