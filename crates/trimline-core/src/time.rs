#[must_use]
pub fn seconds_to_millis(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }

    (seconds * 1_000.0).round() as u64
}

#[must_use]
pub fn seconds_to_frame_index(seconds: f64, sample_rate: u32) -> usize {
    if !seconds.is_finite() || seconds <= 0.0 || sample_rate == 0 {
        return 0;
    }

    (seconds * f64::from(sample_rate)).round() as usize
}

#[must_use]
pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }

    frames as f64 / f64::from(sample_rate)
}

#[must_use]
pub fn seconds_to_pixels(seconds: f64, pixels_per_second: f64) -> f64 {
    if !seconds.is_finite() || pixels_per_second <= 0.0 {
        return 0.0;
    }

    (seconds * pixels_per_second).max(0.0)
}

/// Snaps `seconds` down onto a grid of `rate` steps per second.
#[must_use]
pub fn snap_to_grid(seconds: f64, rate: f64) -> f64 {
    if rate <= 0.0 || !seconds.is_finite() {
        return seconds;
    }

    (seconds * rate).floor() / rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_to_nearest() {
        assert_eq!(seconds_to_millis(12.345), 12_345);
        assert_eq!(seconds_to_millis(0.000_4), 0);
        assert_eq!(seconds_to_millis(0.000_6), 1);
    }

    #[test]
    fn negative_and_nan_seconds_clamp_to_zero() {
        assert_eq!(seconds_to_millis(-1.0), 0);
        assert_eq!(seconds_to_millis(f64::NAN), 0);
        assert_eq!(seconds_to_frame_index(-0.5, 48_000), 0);
    }

    #[test]
    fn frame_index_matches_sample_rate() {
        assert_eq!(seconds_to_frame_index(0.5, 48_000), 24_000);
        assert!((frames_to_seconds(24_000, 48_000) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn snapping_floors_to_frame_grid() {
        let snapped = snap_to_grid(1.01, 24.0);
        assert!((snapped - 1.0).abs() < 1e-9);
        assert!((snap_to_grid(3.0, 24.0) - 3.0).abs() < 1e-9);
    }
}
