//! Dead-zone + exponential low-pass applied independently to each motion channel.

use crate::settings::FilterSettings;
use crate::types::{MotionSample, MOTION_CHANNELS};

/// Filter one channel.
///
/// Changes smaller than `threshold` keep the previous value exactly; anything
/// larger moves `previous` toward `raw` by `weight`.
#[inline]
pub fn filter_value(raw: f64, previous: f64, threshold: f64, weight: f64) -> f64 {
    if (raw - previous).abs() < threshold {
        return previous;
    }
    previous + (raw - previous) * weight
}

/// Per-channel motion filter. Holds only the tunables; the previous filtered
/// sample is supplied by the caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionFilter {
    pub threshold: f64,
    pub weight: f64,
}

impl MotionFilter {
    pub fn new(threshold: f64, weight: f64) -> Self {
        Self { threshold, weight }
    }

    pub fn from_settings(settings: &FilterSettings) -> Self {
        Self::new(settings.minimum_movement_threshold, settings.filter_weight)
    }

    /// Filter `raw` against `previous`. The output timestamp never goes
    /// backwards relative to `previous`.
    pub fn apply(&self, raw: &MotionSample, previous: &MotionSample) -> MotionSample {
        let r = raw.channels();
        let p = previous.channels();
        let mut out = [0.0; MOTION_CHANNELS];
        for i in 0..MOTION_CHANNELS {
            out[i] = filter_value(r[i], p[i], self.threshold, self.weight);
        }
        MotionSample::from_channels(out, raw.timestamp.max(previous.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_scenario_from_zero() {
        let filter = MotionFilter::new(0.01, 0.2);
        let mut raw = MotionSample::ZERO;
        raw.pitch = 0.5;
        raw.rotation_rate_x = 1.0;
        raw.user_acceleration_x = 0.2;
        raw.timestamp = 1.0;

        let out = filter.apply(&raw, &MotionSample::ZERO);
        assert_eq!(out.rotation_rate_x, 0.0 + (1.0 - 0.0) * 0.2);
        assert_eq!(out.pitch, 0.5 * 0.2);
        assert_eq!(out.user_acceleration_x, 0.2 * 0.2);
        // Untouched channels stay in the dead-zone
        assert_eq!(out.roll, 0.0);
        assert_eq!(out.timestamp, 1.0);
    }

    #[test]
    fn test_dead_zone_keeps_previous() {
        assert_eq!(filter_value(0.505, 0.5, 0.01, 0.2), 0.5);
        assert_eq!(filter_value(-0.3, -0.309, 0.01, 0.9), -0.309);
    }

    #[test]
    fn test_filtered_output_is_smaller_step() {
        let filter = MotionFilter::new(0.01, 0.2);
        let mut raw = MotionSample::ZERO;
        raw.rotation_rate_x = 1.0;
        raw.user_acceleration_x = 0.2;
        let out = filter.apply(&raw, &MotionSample::ZERO);
        assert!(out.rotation_rate_x.abs() < raw.rotation_rate_x.abs());
        assert!(out.user_acceleration_x.abs() < raw.user_acceleration_x.abs());
    }

    #[test]
    fn test_constant_input_reaches_fixed_point() {
        let (r, t, w) = (1.0_f64, 0.01_f64, 0.2_f64);
        // Steps needed for |r - p| to fall below t starting from p = 0
        let bound = ((t / r).ln() / (1.0 - w).ln()).ceil() as usize + 1;

        let mut p = 0.0;
        let mut steps = 0;
        while (r - p).abs() >= t {
            p = filter_value(r, p, t, w);
            steps += 1;
            assert!(steps <= bound, "did not converge within {} steps", bound);
        }
        let settled = p;
        for _ in 0..100 {
            p = filter_value(r, p, t, w);
            assert_eq!(p, settled);
        }
        assert_relative_eq!(settled, r, epsilon = t);
    }

    #[test]
    fn test_weight_one_tracks_input() {
        assert_eq!(filter_value(0.7, 0.1, 0.01, 1.0), 0.7);
    }

    #[test]
    fn test_timestamp_never_decreases() {
        let filter = MotionFilter::new(0.01, 0.2);
        let mut prev = MotionSample::ZERO;
        prev.timestamp = 10.0;
        let mut raw = MotionSample::ZERO;
        raw.timestamp = 9.5;
        assert_eq!(filter.apply(&raw, &prev).timestamp, 10.0);
    }

    #[test]
    fn test_deterministic_sequence() {
        let filter = MotionFilter::new(0.01, 0.2);
        let inputs: Vec<f64> = (0..50).map(|i| (i as f64 * 0.3).sin()).collect();
        let run = || {
            let mut prev = MotionSample::ZERO;
            let mut out = Vec::new();
            for (i, v) in inputs.iter().enumerate() {
                let mut raw = MotionSample::ZERO;
                raw.rotation_rate_y = *v;
                raw.timestamp = i as f64;
                prev = filter.apply(&raw, &prev);
                out.push(prev.rotation_rate_y.to_bits());
            }
            out
        };
        assert_eq!(run(), run());
    }

    proptest! {
        #[test]
        fn prop_dead_zone_returns_previous(
            p in -100.0f64..100.0,
            delta in -0.999f64..0.999,
            threshold in 0.001f64..10.0,
            weight in 0.01f64..1.0,
        ) {
            let r = p + delta * threshold;
            prop_assume!((r - p).abs() < threshold);
            prop_assert_eq!(filter_value(r, p, threshold, weight), p);
        }

        #[test]
        fn prop_output_between_previous_and_raw(
            p in -100.0f64..100.0,
            r in -100.0f64..100.0,
            weight in 0.01f64..1.0,
        ) {
            let out = filter_value(r, p, 0.0, weight);
            let (lo, hi) = if p < r { (p, r) } else { (r, p) };
            prop_assert!(out >= lo - 1e-9 && out <= hi + 1e-9);
        }
    }
}
