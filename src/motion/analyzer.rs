//! Landmark result handler: turns noisy keypoints into lane and jump intents.
//!
//! The analyzer is synchronous and clock-agnostic: every call carries the
//! arrival time of the result. The processor owns one behind a lock and feeds
//! it results in submission order.

use std::time::Instant;

use super::filter::{frame_dt, smoothing_alpha, Ema};
use super::landmarks::{DetectionResult, LandmarkSet, Point, PoseLandmark};
use super::state::{Lane, MotionEvent, MotionSnapshot, PoseReading};
use super::tuning::MotionTuning;

/// Box size assumed when fewer than two keypoints are confident.
const DEFAULT_BOX_WIDTH: f32 = 0.18;
const DEFAULT_BOX_HEIGHT: f32 = 0.24;
const MIN_BOX_EXTENT: f32 = 1e-3;

/// Confident tracked keypoints for one result.
#[derive(Debug, Clone, Copy)]
struct Keypoints {
    nose: Option<Point>,
    left_shoulder: Option<Point>,
    right_shoulder: Option<Point>,
    left_hip: Option<Point>,
    right_hip: Option<Point>,
}

impl Keypoints {
    fn extract(set: &LandmarkSet, min_confidence: f32) -> Self {
        Self {
            nose: set.confident(PoseLandmark::Nose, min_confidence),
            left_shoulder: set.confident(PoseLandmark::LeftShoulder, min_confidence),
            right_shoulder: set.confident(PoseLandmark::RightShoulder, min_confidence),
            left_hip: set.confident(PoseLandmark::LeftHip, min_confidence),
            right_hip: set.confident(PoseLandmark::RightHip, min_confidence),
        }
    }

    fn all(&self) -> impl Iterator<Item = Point> + '_ {
        [
            self.nose,
            self.left_shoulder,
            self.right_shoulder,
            self.left_hip,
            self.right_hip,
        ]
        .into_iter()
        .flatten()
    }

    fn is_empty(&self) -> bool {
        self.all().next().is_none()
    }

    fn shoulders(&self) -> Option<Point> {
        pair_center(self.left_shoulder, self.right_shoulder)
    }

    fn hips(&self) -> Option<Point> {
        pair_center(self.left_hip, self.right_hip)
    }

    fn shoulder_width(&self) -> Option<f32> {
        match (self.left_shoulder, self.right_shoulder) {
            (Some(l), Some(r)) => Some((l.x - r.x).abs()),
            _ => None,
        }
    }
}

fn pair_center(a: Option<Point>, b: Option<Point>) -> Option<Point> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Point::midpoint(a, b)),
        (Some(p), None) | (None, Some(p)) => Some(p),
        (None, None) => None,
    }
}

/// Center and size of the box around the confident keypoints.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BoundingBox {
    center: Point,
    width: f32,
    height: f32,
}

impl BoundingBox {
    fn around(points: &Keypoints, fallback_center: Point) -> Self {
        let mut count = 0;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (1.0f32, 1.0f32, 0.0f32, 0.0f32);
        for p in points.all() {
            count += 1;
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        if count == 0 {
            return Self {
                center: fallback_center,
                width: DEFAULT_BOX_WIDTH,
                height: DEFAULT_BOX_HEIGHT,
            };
        }

        let width = max_x - min_x;
        let height = max_y - min_y;
        Self {
            center: Point {
                x: (min_x + max_x) * 0.5,
                y: (min_y + max_y) * 0.5,
            },
            width: if count < 2 || width < MIN_BOX_EXTENT {
                DEFAULT_BOX_WIDTH
            } else {
                width
            },
            height: if count < 2 || height < MIN_BOX_EXTENT {
                DEFAULT_BOX_HEIGHT
            } else {
                height
            },
        }
    }
}

/// Smoothing accumulators for the cosmetic [`PoseReading`] mirror.
#[derive(Debug, Clone, Default)]
struct ReadingFilter {
    nose_x: Ema,
    nose_y: Ema,
    face_x: Ema,
    face_y: Ema,
    face_width: Ema,
    face_height: Ema,
    shoulder_y: Ema,
}

impl ReadingFilter {
    fn update(&mut self, raw: &PoseReading, alpha: f32) -> PoseReading {
        PoseReading {
            nose_x: self.nose_x.update(raw.nose_x, alpha),
            nose_y: self.nose_y.update(raw.nose_y, alpha),
            face_x: self.face_x.update(raw.face_x, alpha),
            face_y: self.face_y.update(raw.face_y, alpha),
            face_width: self.face_width.update(raw.face_width, alpha),
            face_height: self.face_height.update(raw.face_height, alpha),
            shoulder_y: self.shoulder_y.update(raw.shoulder_y, alpha),
        }
    }
}

/// Per-result lane and jump detector.
#[derive(Debug, Clone)]
pub struct MotionAnalyzer {
    tuning: MotionTuning,
    snapshot: MotionSnapshot,

    last_result_at: Option<Instant>,
    readings: ReadingFilter,

    lane_x: Option<f32>,
    neutral_x: f32,
    lane_offset: f32,
    lane_threshold: f32,
    shoulder_width: Ema,

    body_baseline_y: Ema,
    head_y: Ema,
    torso_height: Ema,
    jump_streak: u8,
    jump_armed: bool,
    last_jump_at: Option<Instant>,
    jump_until: Option<Instant>,

    last_body_y: Option<f32>,
    last_shoulder_y: Option<f32>,
}

impl MotionAnalyzer {
    pub fn new(tuning: MotionTuning) -> Self {
        let lane_threshold = tuning.lane_threshold;
        Self {
            tuning,
            snapshot: MotionSnapshot::default(),
            last_result_at: None,
            readings: ReadingFilter::default(),
            lane_x: None,
            neutral_x: 0.5,
            lane_offset: 0.0,
            lane_threshold,
            shoulder_width: Ema::new(),
            body_baseline_y: Ema::new(),
            head_y: Ema::new(),
            torso_height: Ema::new(),
            jump_streak: 0,
            jump_armed: true,
            last_jump_at: None,
            jump_until: None,
            last_body_y: None,
            last_shoulder_y: None,
        }
    }

    pub fn tuning(&self) -> &MotionTuning {
        &self.tuning
    }

    pub fn snapshot(&self) -> &MotionSnapshot {
        &self.snapshot
    }

    pub fn lane(&self) -> Lane {
        self.snapshot.lane
    }

    pub fn is_jumping(&self) -> bool {
        self.snapshot.is_jumping
    }

    /// Offset of the smoothed, mirrored body X from the neutral reference.
    pub fn lane_offset(&self) -> f32 {
        self.lane_offset
    }

    /// Lane threshold used on the most recent tick.
    pub fn lane_threshold(&self) -> f32 {
        self.lane_threshold
    }

    pub fn neutral_x(&self) -> f32 {
        self.neutral_x
    }

    pub fn is_jump_armed(&self) -> bool {
        self.jump_armed
    }

    pub fn jump_streak(&self) -> u8 {
        self.jump_streak
    }

    /// Back to the state of a fresh analyzer, keeping the tuning.
    pub fn reset(&mut self) {
        *self = Self::new(self.tuning.clone());
    }

    /// Forget landmark freshness so the next result uses the fallback dt.
    pub fn clear_freshness(&mut self) {
        self.last_result_at = None;
        self.snapshot.last_landmarks_at = None;
    }

    /// Clear `is_jumping` once its window has elapsed. Returns true when the
    /// flag was cleared.
    pub fn expire_jump(&mut self, now: Instant) -> bool {
        match self.jump_until {
            Some(until) if now >= until => {
                self.jump_until = None;
                self.snapshot.is_jumping = false;
                true
            }
            _ => false,
        }
    }

    /// Make the current stance the neutral lane position and pull the
    /// vertical baselines toward the current height.
    pub fn calibrate(&mut self) {
        if let Some(x) = self.lane_x {
            self.neutral_x = x;
            self.lane_offset = 0.0;
        }
        let nudge = self.tuning.calibration_nudge;
        if let Some(y) = self.last_body_y {
            self.body_baseline_y.nudge(y, nudge);
        }
        if let Some(y) = self.last_shoulder_y {
            self.readings.shoulder_y.nudge(y, nudge);
        }
        log::info!(
            "Motion calibrated: neutral x {:.3}, baseline y {:.3}",
            self.neutral_x,
            self.body_baseline_y.get_or(0.5)
        );
    }

    /// Handle one detector result that arrived at `now`.
    pub fn process(&mut self, result: &DetectionResult, now: Instant) -> Vec<MotionEvent> {
        self.expire_jump(now);

        let Some(set) = result.landmarks.as_ref() else {
            self.record_miss();
            return Vec::new();
        };

        let points = Keypoints::extract(set, self.tuning.min_confidence);
        if points.is_empty() {
            self.record_miss();
            return Vec::new();
        }

        let dt = frame_dt(self.last_result_at, now);
        self.last_result_at = Some(now);
        let alpha = smoothing_alpha(dt, self.tuning.smoothing_time_constant_s);
        let baseline_alpha = smoothing_alpha(dt, self.tuning.baseline_time_constant_s);

        let shoulders = points.shoulders();
        let hips = points.hips();
        let shoulder_center = shoulders.or(points.nose).unwrap_or(Point::CENTER);
        let hip_center = hips.or(points.nose).unwrap_or(Point::CENTER);
        let body = Point::midpoint(shoulder_center, hip_center);
        let bbox = BoundingBox::around(&points, body);

        if let Some(width) = points.shoulder_width() {
            self.shoulder_width.update(width, alpha);
        }
        let shoulder_scale = self
            .tuning
            .shoulder_scale(self.shoulder_width.get_or(self.tuning.reference_shoulder_width));

        let mut events = Vec::new();
        if let Some(lane) = self.update_lane(body.x, shoulder_scale) {
            events.push(MotionEvent::Move { lane });
        }

        let head_y = points.nose.map_or(shoulder_center.y, |n| n.y);
        let torso = match (shoulders, hips) {
            (Some(s), Some(h)) => Some((h.y - s.y).abs()),
            _ => None,
        };
        if self.update_jump(body.y, head_y, torso, dt.as_secs_f32(), alpha, baseline_alpha, now) {
            events.push(MotionEvent::Jump);
        }

        let nose = points.nose.unwrap_or(Point {
            x: body.x,
            y: head_y,
        });
        let raw = PoseReading {
            nose_x: mirror(nose.x),
            nose_y: nose.y,
            face_x: mirror(bbox.center.x),
            face_y: bbox.center.y.clamp(0.0, 1.0),
            face_width: bbox.width.clamp(0.0, 1.0),
            face_height: bbox.height.clamp(0.0, 1.0),
            shoulder_y: shoulder_center.y,
        };
        let smoothed = self.readings.update(&raw, alpha);

        self.last_body_y = Some(body.y);
        self.last_shoulder_y = Some(shoulder_center.y);

        self.snapshot.raw = raw;
        self.snapshot.smoothed = smoothed;
        self.snapshot.frames_processed += 1;
        self.snapshot.last_landmarks_at = Some(now);

        events
    }

    fn record_miss(&mut self) {
        self.snapshot.missed_detections += 1;
        self.jump_streak = 0;
        self.clear_freshness();
    }

    /// Returns the new lane when it changed.
    fn update_lane(&mut self, body_x: f32, scale: f32) -> Option<Lane> {
        let current = mirror(body_x);
        let weight = self.tuning.lane_previous_weight;
        let smoothed = match self.lane_x {
            Some(prev) => weight * prev + (1.0 - weight) * current,
            None => current,
        };
        self.lane_x = Some(smoothed);

        let threshold = self.tuning.scaled_lane_threshold(scale);
        let offset = smoothed - self.neutral_x;
        self.lane_threshold = threshold;
        self.lane_offset = offset;

        let previous = self.snapshot.lane;
        let release = threshold * self.tuning.lane_release_ratio;
        let lane = if offset > threshold {
            Lane::Right
        } else if offset < -threshold {
            Lane::Left
        } else {
            match previous {
                Lane::Right if offset >= release => Lane::Right,
                Lane::Left if offset <= -release => Lane::Left,
                _ => Lane::Center,
            }
        };

        if lane == Lane::Center && offset.abs() < threshold * self.tuning.recenter_zone_ratio {
            self.neutral_x += (smoothed - self.neutral_x) * self.tuning.recenter_rate;
        }

        if lane != previous {
            log::debug!(
                "Lane {} -> {} (offset {:.3}, threshold {:.3})",
                previous,
                lane,
                offset,
                threshold
            );
            self.snapshot.lane = lane;
            Some(lane)
        } else {
            None
        }
    }

    /// Returns true when a jump fired on this tick.
    #[allow(clippy::too_many_arguments)]
    fn update_jump(
        &mut self,
        body_y: f32,
        head_y: f32,
        torso: Option<f32>,
        dt_s: f32,
        alpha: f32,
        baseline_alpha: f32,
        now: Instant,
    ) -> bool {
        let tuning = &self.tuning;

        let torso_stable = match (torso, self.torso_height.get()) {
            (Some(current), Some(previous)) if previous > f32::EPSILON => {
                (current - previous).abs() / previous <= tuning.torso_change_limit
            }
            _ => true,
        };
        if let Some(current) = torso {
            self.torso_height.update(current, alpha);
        }
        let scale = tuning.torso_scale(self.torso_height.get_or(tuning.reference_torso_height));

        let baseline = self.body_baseline_y.get().unwrap_or(body_y);
        let displacement = baseline - body_y;
        let velocity = displacement / dt_s.max(f32::EPSILON);
        let head_displacement = self.head_y.get().map_or(0.0, |prev| prev - head_y);

        // y grows downward: re-arm once the body sits below baseline by the margin
        if !self.jump_armed && displacement < -tuning.jump_rearm_margin * scale {
            log::debug!("Jump detector re-armed (displacement {:.3})", displacement);
            self.jump_armed = true;
        }

        let candidate = torso_stable
            && velocity > tuning.jump_velocity * scale
            && displacement > tuning.jump_displacement * scale
            && head_displacement > tuning.jump_head_displacement * scale;
        self.jump_streak = if candidate {
            (self.jump_streak + 1).min(tuning.jump_streak_max)
        } else {
            self.jump_streak.saturating_sub(1)
        };

        let cooled_down = self
            .last_jump_at
            .map_or(true, |at| now.saturating_duration_since(at) >= tuning.jump_cooldown());
        let fired = self.jump_armed
            && self.jump_streak >= tuning.jump_streak_trigger
            && !self.snapshot.is_jumping
            && cooled_down;

        if fired {
            log::debug!(
                "Jump (velocity {:.2}, displacement {:.3}, head {:.3}, scale {:.2})",
                velocity,
                displacement,
                head_displacement,
                scale
            );
            self.snapshot.is_jumping = true;
            self.jump_until = Some(now + tuning.jump_duration());
            self.jump_armed = false;
            self.jump_streak = 0;
            self.last_jump_at = Some(now);
        }

        self.body_baseline_y.update(body_y, baseline_alpha);
        self.head_y.update(head_y, alpha);

        fired
    }
}

fn mirror(x: f32) -> f32 {
    (1.0 - x).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::landmarks::Landmark;
    use std::time::Duration;

    fn nose_only(x: f32, y: f32, confidence: f32) -> DetectionResult {
        DetectionResult::with(LandmarkSet::from_tracked(&[(
            PoseLandmark::Nose,
            Landmark::new(x, y, confidence),
        )]))
    }

    #[test]
    fn test_missing_landmarks_count_as_miss() {
        let mut analyzer = MotionAnalyzer::new(MotionTuning::default());
        let t0 = Instant::now();
        analyzer.process(&nose_only(0.5, 0.4, 0.9), t0);
        assert!(analyzer.snapshot().last_landmarks_at.is_some());

        let events = analyzer.process(&DetectionResult::empty(), t0 + Duration::from_millis(33));
        assert!(events.is_empty());
        assert_eq!(analyzer.snapshot().missed_detections, 1);
        assert!(analyzer.snapshot().last_landmarks_at.is_none());
        assert_eq!(analyzer.snapshot().frames_processed, 1);
    }

    #[test]
    fn test_raw_reading_is_mirrored() {
        let mut analyzer = MotionAnalyzer::new(MotionTuning::default());
        analyzer.process(&nose_only(0.3, 0.4, 0.9), Instant::now());
        let raw = analyzer.snapshot().raw;
        assert!((raw.nose_x - 0.7).abs() < 1e-6);
        assert!((raw.nose_y - 0.4).abs() < 1e-6);
        assert!((raw.face_width - DEFAULT_BOX_WIDTH).abs() < 1e-6);
        // First sample passes straight through the smoother
        assert_eq!(analyzer.snapshot().smoothed, raw);
    }

    #[test]
    fn test_body_center_falls_back_through_pairs() {
        let points = Keypoints {
            nose: Some(Point { x: 0.5, y: 0.2 }),
            left_shoulder: Some(Point { x: 0.4, y: 0.4 }),
            right_shoulder: None,
            left_hip: None,
            right_hip: None,
        };
        let shoulders = points.shoulders().unwrap();
        assert_eq!(shoulders, Point { x: 0.4, y: 0.4 });
        let hips = points.hips().or(points.nose).unwrap();
        assert_eq!(hips, Point { x: 0.5, y: 0.2 });
    }

    #[test]
    fn test_bounding_box_default_for_single_point() {
        let points = Keypoints {
            nose: Some(Point { x: 0.6, y: 0.3 }),
            left_shoulder: None,
            right_shoulder: None,
            left_hip: None,
            right_hip: None,
        };
        let bbox = BoundingBox::around(&points, Point::CENTER);
        assert_eq!(bbox.center, Point { x: 0.6, y: 0.3 });
        assert!((bbox.width - DEFAULT_BOX_WIDTH).abs() < 1e-6);
        assert!((bbox.height - DEFAULT_BOX_HEIGHT).abs() < 1e-6);
    }

    #[test]
    fn test_calibrate_recenters_neutral() {
        let mut analyzer = MotionAnalyzer::new(MotionTuning::default());
        let t0 = Instant::now();
        for i in 0..10 {
            analyzer.process(&nose_only(0.6, 0.4, 0.9), t0 + Duration::from_millis(33 * i));
        }
        assert!(analyzer.lane_offset().abs() > 0.05);
        analyzer.calibrate();
        assert!((analyzer.neutral_x() - 0.4).abs() < 0.01);
        assert_eq!(analyzer.lane_offset(), 0.0);
    }

    #[test]
    fn test_expire_jump_only_after_window() {
        let mut analyzer = MotionAnalyzer::new(MotionTuning::default());
        let t0 = Instant::now();
        analyzer.snapshot.is_jumping = true;
        analyzer.jump_until = Some(t0 + Duration::from_millis(450));
        assert!(!analyzer.expire_jump(t0 + Duration::from_millis(449)));
        assert!(analyzer.is_jumping());
        assert!(analyzer.expire_jump(t0 + Duration::from_millis(450)));
        assert!(!analyzer.is_jumping());
    }

    #[test]
    fn test_reset_keeps_tuning() {
        let tuning = MotionTuning {
            lane_threshold: 0.1,
            ..MotionTuning::default()
        };
        let mut analyzer = MotionAnalyzer::new(tuning.clone());
        analyzer.process(&nose_only(0.5, 0.4, 0.9), Instant::now());
        analyzer.reset();
        assert_eq!(analyzer.snapshot().frames_processed, 0);
        assert_eq!(analyzer.tuning(), &tuning);
    }
}
