//! Frame-rate independent smoothing.

use std::time::{Duration, Instant};

/// Shortest frame interval the filters will assume.
pub const MIN_DT: Duration = Duration::from_millis(16);

/// Longest frame interval the filters will assume.
pub const MAX_DT: Duration = Duration::from_millis(500);

/// Interval assumed after a gap or on the first frame.
pub const FALLBACK_DT: Duration = Duration::from_millis(33);

/// Gaps longer than this are treated as a discontinuity, not a slow frame.
const IMPLAUSIBLE_GAP: Duration = Duration::from_secs(2);

/// Elapsed time since `last`, clamped to [16ms, 500ms]; 33ms when there is no
/// previous frame or the gap is implausible.
pub fn frame_dt(last: Option<Instant>, now: Instant) -> Duration {
    let Some(last) = last else {
        return FALLBACK_DT;
    };
    match now.checked_duration_since(last) {
        Some(elapsed) if !elapsed.is_zero() && elapsed <= IMPLAUSIBLE_GAP => {
            elapsed.clamp(MIN_DT, MAX_DT)
        }
        _ => FALLBACK_DT,
    }
}

/// Exponential smoothing coefficient for a time constant: `1 - exp(-dt/tau)`.
pub fn smoothing_alpha(dt: Duration, time_constant_s: f32) -> f32 {
    if time_constant_s <= 0.0 {
        return 1.0;
    }
    1.0 - (-dt.as_secs_f32() / time_constant_s).exp()
}

/// Exponential moving average that passes its first sample through.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ema {
    value: Option<f32>,
}

impl Ema {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn seeded(value: f32) -> Self {
        Self { value: Some(value) }
    }

    pub fn update(&mut self, sample: f32, alpha: f32) -> f32 {
        let next = match self.value {
            Some(prev) => prev + alpha * (sample - prev),
            None => sample,
        };
        self.value = Some(next);
        next
    }

    /// Move part of the way toward `target` without counting as a sample.
    pub fn nudge(&mut self, target: f32, fraction: f32) {
        self.value = Some(match self.value {
            Some(prev) => prev + fraction * (target - prev),
            None => target,
        });
    }

    pub fn get(&self) -> Option<f32> {
        self.value
    }

    pub fn get_or(&self, fallback: f32) -> f32 {
        self.value.unwrap_or(fallback)
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}
