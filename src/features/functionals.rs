//! Summary statistics applied to low-level descriptor contours.
//!
//! Every functional returns 0.0 for an empty contour so that the feature
//! vector keeps a fixed length for clips without voiced or unvoiced frames.

/// Arithmetic mean
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Standard deviation normalised by the absolute mean (coefficient of variation)
pub fn stddev_norm(values: &[f64]) -> f64 {
    let m = mean(values).abs();
    if m < 1e-12 {
        return 0.0;
    }
    stddev(values) / m
}

/// Percentile in [0, 100] with linear interpolation between order statistics
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Slopes between successive extrema of a contour
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlopeStats {
    pub rising_mean: f64,
    pub rising_std: f64,
    pub falling_mean: f64,
    pub falling_std: f64,
}

/// Rising and falling slopes (units per second) over contiguous segments.
///
/// Each segment is scanned for local extrema; a minimum followed by a maximum
/// contributes a rising slope, a maximum followed by a minimum a falling one.
/// Falling slopes are reported as positive magnitudes.
pub fn slopes(segments: &[Vec<f64>], frame_secs: f64) -> SlopeStats {
    let mut rising = Vec::new();
    let mut falling = Vec::new();

    for segment in segments {
        let extrema = extrema_indices(segment);
        for pair in extrema.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let dt = (b - a) as f64 * frame_secs;
            if dt <= 0.0 {
                continue;
            }
            let dv = segment[b] - segment[a];
            if dv > 0.0 {
                rising.push(dv / dt);
            } else if dv < 0.0 {
                falling.push(-dv / dt);
            }
        }
    }

    SlopeStats {
        rising_mean: mean(&rising),
        rising_std: stddev(&rising),
        falling_mean: mean(&falling),
        falling_std: stddev(&falling),
    }
}

/// Indices of the segment end points and every turning point in between
fn extrema_indices(segment: &[f64]) -> Vec<usize> {
    if segment.len() < 2 {
        return Vec::new();
    }

    let mut indices = vec![0];
    let mut direction = 0i8;
    for i in 1..segment.len() {
        let step = segment[i] - segment[i - 1];
        let dir = if step > 0.0 {
            1
        } else if step < 0.0 {
            -1
        } else {
            0
        };
        if dir != 0 {
            if direction != 0 && dir != direction {
                indices.push(i - 1);
            }
            direction = dir;
        }
    }
    let last = segment.len() - 1;
    if *indices.last().unwrap_or(&0) != last {
        indices.push(last);
    }
    indices
}

/// Lengths (in frames) of runs where `mask` equals `value`
pub fn run_lengths(mask: &[bool], value: bool) -> Vec<usize> {
    let mut runs = Vec::new();
    let mut current = 0;
    for &m in mask {
        if m == value {
            current += 1;
        } else if current > 0 {
            runs.push(current);
            current = 0;
        }
    }
    if current > 0 {
        runs.push(current);
    }
    runs
}

/// Split a contour into the contiguous segments selected by `mask`
pub fn masked_segments(values: &[f64], mask: &[bool]) -> Vec<Vec<f64>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for (&v, &m) in values.iter().zip(mask) {
        if m {
            current.push(v);
        } else if !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Count local maxima that rise above the contour mean
pub fn count_peaks(values: &[f64]) -> usize {
    if values.len() < 3 {
        return 0;
    }
    let threshold = mean(values);
    values
        .windows(3)
        .filter(|w| w[1] > w[0] && w[1] >= w[2] && w[1] > threshold)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stddev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&v) - 5.0).abs() < 1e-12);
        assert!((stddev(&v) - 2.0).abs() < 1e-12);
        assert!((stddev_norm(&v) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_empty_contours_are_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(stddev(&[]), 0.0);
        assert_eq!(stddev_norm(&[]), 0.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(slopes(&[], 0.01), SlopeStats::default());
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert!((percentile(&v, 50.0) - 3.0).abs() < 1e-12);
        assert!((percentile(&v, 20.0) - 1.8).abs() < 1e-12);
        assert!((percentile(&v, 100.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_slopes_triangle() {
        // Up 1 per frame for 4 frames, then down 2 per frame for 2 frames
        let segment = vec![0.0, 1.0, 2.0, 3.0, 4.0, 2.0, 0.0];
        let stats = slopes(&[segment], 0.01);
        assert!((stats.rising_mean - 100.0).abs() < 1e-9);
        assert!((stats.falling_mean - 200.0).abs() < 1e-9);
        assert_eq!(stats.rising_std, 0.0);
    }

    #[test]
    fn test_run_lengths_and_segments() {
        let mask = [true, true, false, true, false, false, true, true, true];
        assert_eq!(run_lengths(&mask, true), vec![2, 1, 3]);
        assert_eq!(run_lengths(&mask, false), vec![1, 2]);

        let values: Vec<f64> = (0..9).map(|i| i as f64).collect();
        let segments = masked_segments(&values, &mask);
        assert_eq!(segments, vec![vec![0.0, 1.0], vec![3.0], vec![6.0, 7.0, 8.0]]);
    }

    #[test]
    fn test_count_peaks() {
        let v = [0.0, 5.0, 0.0, 1.0, 0.5, 6.0, 0.0];
        // The small bump at index 3 stays below the mean
        assert_eq!(count_peaks(&v), 2);
    }
}
