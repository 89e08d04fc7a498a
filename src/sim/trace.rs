//! Recorded landmark traces.
//!
//! A trace is a JSON document of timestamped detector results:
//!
//! ```json
//! {
//!   "name": "step right",
//!   "frames": [
//!     { "t_ms": 0, "pose": { "nose": { "x": 0.5, "y": 0.4, "visibility": 0.98 } } },
//!     { "t_ms": 33 }
//!   ]
//! }
//! ```
//!
//! A frame without `pose` is a result where no person was found.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::motion::{
    DetectionResult, Landmark, LandmarkSet, MotionAnalyzer, MotionEvent, MotionSnapshot,
    MotionTuning, PoseLandmark,
};

/// Longest recording a trace may describe (24 hours).
pub const MAX_TRACE_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to read trace '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse trace '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("trace frames are not in time order at index {0}")]
    OutOfOrder(usize),

    #[error("trace frame {index} has timestamp {t_ms}ms, beyond the {max_ms}ms limit")]
    TooLong { index: usize, t_ms: u64, max_ms: u64 },
}

/// The tracked keypoints of one result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracePose {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nose: Option<Landmark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_shoulder: Option<Landmark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_shoulder: Option<Landmark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_hip: Option<Landmark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_hip: Option<Landmark>,
}

impl TracePose {
    pub fn to_landmarks(&self) -> LandmarkSet {
        let tracked: Vec<(PoseLandmark, Landmark)> = [
            (PoseLandmark::Nose, self.nose),
            (PoseLandmark::LeftShoulder, self.left_shoulder),
            (PoseLandmark::RightShoulder, self.right_shoulder),
            (PoseLandmark::LeftHip, self.left_hip),
            (PoseLandmark::RightHip, self.right_hip),
        ]
        .into_iter()
        .filter_map(|(which, landmark)| landmark.map(|l| (which, l)))
        .collect();
        LandmarkSet::from_tracked(&tracked)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    /// Milliseconds since the start of the recording.
    pub t_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<TracePose>,
}

impl TraceFrame {
    pub fn at(&self) -> Duration {
        Duration::from_millis(self.t_ms)
    }

    pub fn result(&self) -> DetectionResult {
        match &self.pose {
            Some(pose) => DetectionResult::with(pose.to_landmarks()),
            None => DetectionResult::empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub frames: Vec<TraceFrame>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let content = std::fs::read_to_string(path).map_err(|e| TraceError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let trace: Trace = serde_json::from_str(&content).map_err(|e| TraceError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        trace.validate()?;
        Ok(trace)
    }

    /// Timestamps must never go backwards or pass [`MAX_TRACE_MS`].
    pub fn validate(&self) -> Result<(), TraceError> {
        if let Some(index) = self
            .frames
            .windows(2)
            .position(|pair| pair[1].t_ms < pair[0].t_ms)
        {
            return Err(TraceError::OutOfOrder(index + 1));
        }
        match self.frames.iter().position(|f| f.t_ms > MAX_TRACE_MS) {
            Some(index) => Err(TraceError::TooLong {
                index,
                t_ms: self.frames[index].t_ms,
                max_ms: MAX_TRACE_MS,
            }),
            None => Ok(()),
        }
    }

    pub fn duration(&self) -> Duration {
        self.frames.last().map_or(Duration::ZERO, TraceFrame::at)
    }

    pub fn timed_results(&self) -> Vec<(Duration, DetectionResult)> {
        self.frames.iter().map(|f| (f.at(), f.result())).collect()
    }
}

/// An event and when, relative to the trace start, it fired.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimedEvent {
    pub t_ms: u64,
    pub event: MotionEvent,
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub events: Vec<TimedEvent>,
    pub final_state: MotionSnapshot,
}

/// Run the analyzer over a trace using its recorded timestamps.
pub fn replay(trace: &Trace, tuning: MotionTuning) -> ReplayReport {
    let mut analyzer = MotionAnalyzer::new(tuning);
    let start = Instant::now();
    let mut events = Vec::new();

    let mut last_at = start;
    for frame in &trace.frames {
        let now = match start.checked_add(frame.at()) {
            Some(now) if frame.t_ms <= MAX_TRACE_MS => now,
            _ => {
                log::warn!("Trace timestamp {}ms out of range, replay stopped", frame.t_ms);
                break;
            }
        };
        last_at = now;
        for event in analyzer.process(&frame.result(), now) {
            events.push(TimedEvent {
                t_ms: frame.t_ms,
                event,
            });
        }
    }
    if !trace.frames.is_empty() {
        if let Some(end) = last_at.checked_add(analyzer.tuning().jump_duration()) {
            analyzer.expire_jump(end);
        }
    }

    ReplayReport {
        events,
        final_state: analyzer.snapshot().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::Lane;

    fn nose_frame(t_ms: u64, x: f32) -> TraceFrame {
        TraceFrame {
            t_ms,
            pose: Some(TracePose {
                nose: Some(Landmark::new(x, 0.4, 0.95)),
                ..TracePose::default()
            }),
        }
    }

    #[test]
    fn test_parse_and_missing_pose() {
        let json = r#"{
            "frames": [
                { "t_ms": 0, "pose": { "nose": { "x": 0.5, "y": 0.4, "visibility": 0.9 } } },
                { "t_ms": 33 }
            ]
        }"#;
        let trace: Trace = serde_json::from_str(json).unwrap();
        assert_eq!(trace.frames.len(), 2);
        assert!(trace.frames[0].result().landmarks.is_some());
        assert_eq!(trace.frames[1].result(), DetectionResult::empty());
        assert_eq!(trace.duration(), Duration::from_millis(33));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let trace = Trace {
            name: None,
            frames: vec![nose_frame(0, 0.5), nose_frame(66, 0.5), nose_frame(33, 0.5)],
        };
        assert!(matches!(trace.validate(), Err(TraceError::OutOfOrder(2))));
    }

    #[test]
    fn test_absurd_timestamp_rejected() {
        let trace = Trace {
            name: None,
            frames: vec![nose_frame(0, 0.5), nose_frame(u64::MAX, 0.5)],
        };
        assert!(matches!(
            trace.validate(),
            Err(TraceError::TooLong { index: 1, .. })
        ));

        // Unvalidated traces replay up to the bad frame without panicking
        let report = replay(&trace, MotionTuning::default());
        assert_eq!(report.final_state.frames_processed, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let trace = Trace {
            name: Some("still".into()),
            frames: vec![nose_frame(0, 0.5), nose_frame(33, 0.5)],
        };
        std::fs::write(&path, serde_json::to_string(&trace).unwrap()).unwrap();

        let loaded = Trace::load(&path).unwrap();
        assert_eq!(loaded, trace);
        assert!(matches!(
            Trace::load(&dir.path().join("missing.json")),
            Err(TraceError::Io { .. })
        ));
    }

    #[test]
    fn test_replay_step_right_of_camera() {
        // Subject drifts toward image-right, which is their left when mirrored.
        let mut frames = Vec::new();
        for i in 0..30u64 {
            let x = if i < 5 { 0.5 } else { 0.75 };
            frames.push(nose_frame(i * 33, x));
        }
        let report = replay(&Trace { name: None, frames }, MotionTuning::default());
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].event, MotionEvent::Move { lane: Lane::Left });
        assert_eq!(report.final_state.lane, Lane::Left);
    }
}
