/// Largest percentage move reported in either direction.
pub const TREND_CLIP_PCT: f64 = 100.0;

/// Up to `max_points` day-over-day percentage deltas from the tail of `series`.
///
/// Deltas are clipped to ±[`TREND_CLIP_PCT`]. A rise from zero counts as the
/// maximum increase; zero to zero is flat. Every consecutive pair yields a
/// point so gaps never shorten the window.
pub fn extract_trend(series: &[f64], max_points: usize) -> Vec<f64> {
    let deltas: Vec<f64> = series
        .windows(2)
        .map(|pair| pct_change(pair[0], pair[1]))
        .collect();
    let skip = deltas.len().saturating_sub(max_points);
    deltas.into_iter().skip(skip).collect()
}

/// Mean of the last `window` points of a trend, as a fraction (0.05 = +5%/day).
pub fn recent_growth(trend: &[f64], window: usize) -> f64 {
    let tail = &trend[trend.len().saturating_sub(window)..];
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().sum::<f64>() / tail.len() as f64 / 100.0
}

fn pct_change(prev: f64, current: f64) -> f64 {
    if prev <= 0.0 {
        return if current > 0.0 { TREND_CLIP_PCT } else { 0.0 };
    }
    let pct = (current - prev) / prev * 100.0;
    (pct.clamp(-TREND_CLIP_PCT, TREND_CLIP_PCT) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_trend_basic() {
        let t = extract_trend(&[100.0, 110.0, 99.0], 10);
        assert_eq!(t, vec![10.0, -10.0]);
    }

    #[test]
    fn test_extract_trend_keeps_tail() {
        let series: Vec<f64> = (1..=40).map(|v| v as f64).collect();
        let t = extract_trend(&series, 5);
        assert_eq!(t.len(), 5);
        // last delta is 39 -> 40
        assert!((t[4] - 2.56).abs() < 0.01);
    }

    #[test]
    fn test_extract_trend_clips_and_handles_zero() {
        let t = extract_trend(&[0.0, 0.0, 5.0, 50.0, 0.0], 10);
        assert_eq!(t, vec![0.0, 100.0, 100.0, -100.0]);
    }

    #[test]
    fn test_extract_trend_short_series() {
        assert!(extract_trend(&[], 5).is_empty());
        assert!(extract_trend(&[3.0], 5).is_empty());
    }

    #[test]
    fn test_recent_growth() {
        assert_eq!(recent_growth(&[], 7), 0.0);
        assert!((recent_growth(&[50.0, 10.0, -10.0], 2) - 0.0).abs() < f64::EPSILON);
        assert!((recent_growth(&[10.0, 10.0], 7) - 0.1).abs() < 1e-9);
    }
}
