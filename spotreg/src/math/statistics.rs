//! Order statistics over `f64` samples.

/// MAD (Median Absolute Deviation) to standard deviation conversion factor.
///
/// For a normal distribution, σ ≈ 1.4826 × MAD.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Percentile `q` (in `[0, 100]`) of ascending `sorted` values, linearly
/// interpolated between the two nearest ranks.
///
/// Returns NaN for an empty slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!((0.0..=100.0).contains(&q));
    debug_assert!(sorted.windows(2).all(|w| w[0] <= w[1]));

    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = q / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Median of `values` (mean of the two middle values for even lengths).
pub fn median(values: &[f64]) -> f64 {
    percentile_sorted(&sorted_copy(values), 50.0)
}

/// Median and interquartile range (75th minus 25th percentile) from a single sort.
pub fn median_and_iqr(values: &[f64]) -> (f64, f64) {
    let sorted = sorted_copy(values);
    let median = percentile_sorted(&sorted, 50.0);
    let iqr = percentile_sorted(&sorted, 75.0) - percentile_sorted(&sorted, 25.0);
    (median, iqr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[7.0]), 7.0);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(percentile_sorted(&sorted, 100.0), 5.0);
        assert_eq!(percentile_sorted(&sorted, 25.0), 2.0);
        assert!((percentile_sorted(&[0.0, 10.0], 30.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_iqr_matches_linear_interpolation() {
        // ranks for n = 8: q25 -> 1.75, q75 -> 5.25
        let values = [8.0, 1.0, 7.0, 2.0, 6.0, 3.0, 5.0, 4.0];
        let (median, iqr) = median_and_iqr(&values);
        assert_eq!(median, 4.5);
        assert!((iqr - (6.25 - 2.75)).abs() < 1e-12);
    }

    #[test]
    fn test_iqr_of_constant_is_zero() {
        let (median, iqr) = median_and_iqr(&[2.5; 10]);
        assert_eq!(median, 2.5);
        assert_eq!(iqr, 0.0);
    }
}
