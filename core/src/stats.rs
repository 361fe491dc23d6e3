//! Pure statistics over latency observations.
//!
//! None of these functions fail or mutate their input: degenerate input (empty slices,
//! zero dispersion, too few observations) yields `0.0` or an empty result, and sorting
//! always happens on a private copy.

use serde::{Deserialize, Serialize};

/// Tukey fence multiplier.
const FENCE: f64 = 1.5;

/// An observation lying outside the Tukey fences, with its position in the input.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct Outlier {
    pub index: usize,
    pub value: f64,
}

#[inline]
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Percentile over an already sorted slice, interpolating linearly between the
/// neighbouring ranks.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let Some(&first) = sorted.first() else {
        return 0.0;
    };
    if sorted.len() == 1 {
        return first;
    }
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let fraction = rank - lower as f64;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

/// # Percentile
///
/// Linear-interpolated percentile, `p` in `[0, 100]`. `percentile(v, 0)` is the minimum
/// and `percentile(v, 100)` the maximum. Empty input yields 0.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    finite_or_zero(percentile_sorted(&sorted(values), p))
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    finite_or_zero(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (divisor `n - 1`). Fewer than two observations yield 0.
pub fn variance(values: &[f64], mean: f64) -> f64 {
    let n = values.len();
    if n <= 1 {
        return 0.0;
    }
    let squares: f64 = values.iter().map(|&x| (x - mean).powi(2)).sum();
    finite_or_zero(squares / (n - 1) as f64)
}

pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    variance(values, mean).sqrt()
}

/// # Skewness
///
/// Adjusted Fisher-Pearson sample skewness:
/// `n / ((n-1)(n-2)) * sum(((x - mean) / sd)^3)`.
/// Needs at least three observations and a non-zero standard deviation.
pub fn skewness(values: &[f64], mean: f64, std_dev: f64) -> f64 {
    let n = values.len();
    if n < 3 || std_dev == 0.0 {
        return 0.0;
    }
    let n = n as f64;
    let cubes: f64 = values
        .iter()
        .map(|&x| ((x - mean) / std_dev).powi(3))
        .sum();
    finite_or_zero(n / ((n - 1.0) * (n - 2.0)) * cubes)
}

/// # Kurtosis
///
/// Sample excess kurtosis:
/// `n(n+1) / ((n-1)(n-2)(n-3)) * sum(((x - mean) / sd)^4) - 3(n-1)^2 / ((n-2)(n-3))`.
/// Needs at least four observations and a non-zero standard deviation.
pub fn kurtosis(values: &[f64], mean: f64, std_dev: f64) -> f64 {
    let n = values.len();
    if n < 4 || std_dev == 0.0 {
        return 0.0;
    }
    let n = n as f64;
    let quads: f64 = values
        .iter()
        .map(|&x| ((x - mean) / std_dev).powi(4))
        .sum();
    let scale = n * (n + 1.0) / ((n - 1.0) * (n - 2.0) * (n - 3.0));
    let correction = 3.0 * (n - 1.0).powi(2) / ((n - 2.0) * (n - 3.0));
    finite_or_zero(scale * quads - correction)
}

fn quartiles(sorted: &[f64]) -> (f64, f64) {
    (percentile_sorted(sorted, 25.0), percentile_sorted(sorted, 75.0))
}

/// Interquartile range; fewer than four observations yield 0.
pub fn iqr(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return 0.0;
    }
    let (q1, q3) = quartiles(&sorted(values));
    finite_or_zero(q3 - q1)
}

/// Median absolute deviation from the median.
pub fn mad(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let median = percentile(values, 50.0);
    let deviations: Vec<f64> = values.iter().map(|&x| (x - median).abs()).collect();
    percentile(&deviations, 50.0)
}

/// Coefficient of variation in percent. A zero mean yields 0.
pub fn coeff_var(mean: f64, std_dev: f64) -> f64 {
    if mean == 0.0 {
        return 0.0;
    }
    finite_or_zero(std_dev / mean.abs() * 100.0)
}

/// # Detect Outliers
///
/// Returns every observation outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]` together with its
/// index, in input order. Fewer than four observations never produce outliers.
pub fn detect_outliers(values: &[f64]) -> Vec<Outlier> {
    if values.len() < 4 {
        return Vec::new();
    }
    let (q1, q3) = quartiles(&sorted(values));
    let spread = q3 - q1;
    let (low, high) = (q1 - FENCE * spread, q3 + FENCE * spread);
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v < low || v > high)
        .map(|(index, &value)| Outlier { index, value })
        .collect()
}

/// # Jitter
///
/// Mean absolute difference between consecutive observations, in input order. Unlike
/// variance this depends on the order in which latencies were recorded.
pub fn jitter(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let total: f64 = values.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    finite_or_zero(total / (values.len() - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const EPSILON: f64 = 1e-9;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert!(approx(percentile(&values, 25.0), 3.25));
        assert!(approx(percentile(&values, 75.0), 7.75));
        assert!(approx(percentile(&values, 50.0), 5.5));
    }

    #[test]
    fn percentile_of_empty_and_single() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[42.0], 0.0), 42.0);
        assert_eq!(percentile(&[42.0], 99.0), 42.0);
    }

    #[test]
    fn percentile_does_not_reorder_input() {
        let values = vec![5.0, 1.0, 3.0];
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(values, vec![5.0, 1.0, 3.0]);
    }

    #[test]
    fn heavy_tail_is_interpolated_and_flagged() {
        let values = [10.0, 20.0, 20.0, 30.0, 1000.0];
        let p95 = percentile(&values, 95.0);
        // rank 3.8 between 30 and 1000
        assert!(approx(p95, 30.0 + 0.8 * 970.0));
        assert!(p95 > 30.0 && p95 < 1000.0);

        let outliers = detect_outliers(&values);
        assert_eq!(
            outliers,
            vec![Outlier {
                index: 4,
                value: 1000.0
            }]
        );
    }

    #[test]
    fn variance_uses_sample_divisor() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert!(approx(m, 5.0));
        assert!(approx(variance(&values, m), 32.0 / 7.0));
        assert_eq!(variance(&[3.0], 3.0), 0.0);
        assert_eq!(variance(&[], 0.0), 0.0);
    }

    #[test]
    fn skewness_and_kurtosis_sentinels() {
        assert_eq!(skewness(&[1.0, 2.0], 1.5, 0.7), 0.0);
        assert_eq!(skewness(&[1.0, 2.0, 3.0], 2.0, 0.0), 0.0);
        assert_eq!(kurtosis(&[1.0, 2.0, 3.0], 2.0, 1.0), 0.0);
        assert_eq!(kurtosis(&[4.0; 6], 4.0, 0.0), 0.0);
    }

    #[test]
    fn skewness_sign_follows_tail() {
        let right = [1.0, 1.0, 2.0, 2.0, 3.0, 10.0];
        let m = mean(&right);
        let sd = std_dev(&right, m);
        assert!(skewness(&right, m, sd) > 0.0);

        let left: Vec<f64> = right.iter().map(|x| -x).collect();
        let m = mean(&left);
        let sd = std_dev(&left, m);
        assert!(skewness(&left, m, sd) < 0.0);

        let symmetric = [1.0, 2.0, 3.0, 4.0, 5.0];
        let m = mean(&symmetric);
        assert!(approx(skewness(&symmetric, m, std_dev(&symmetric, m)), 0.0));
    }

    #[test]
    fn kurtosis_of_uniform_grid() {
        // excess kurtosis of 1..=5 with sample adjustment is -1.2
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let m = mean(&values);
        let k = kurtosis(&values, m, std_dev(&values, m));
        assert!(approx(k, -1.2), "kurtosis was {k}");
    }

    #[test]
    fn iqr_and_mad() {
        assert_eq!(iqr(&[1.0, 2.0, 3.0]), 0.0);
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert!(approx(iqr(&values), 4.5));
        // median 3, deviations [2, 1, 0, 1, 2] -> median 1
        assert!(approx(mad(&[1.0, 2.0, 3.0, 4.0, 5.0]), 1.0));
        assert_eq!(mad(&[]), 0.0);
    }

    #[test]
    fn coeff_var_guards_zero_mean() {
        assert_eq!(coeff_var(0.0, 3.0), 0.0);
        assert!(approx(coeff_var(10.0, 2.5), 25.0));
        assert!(approx(coeff_var(-10.0, 2.5), 25.0));
    }

    #[test]
    fn jitter_depends_on_order() {
        assert_eq!(jitter(&[5.0]), 0.0);
        assert!(approx(jitter(&[1.0, 2.0, 3.0, 4.0]), 1.0));
        assert!(approx(jitter(&[1.0, 4.0, 2.0, 3.0]), 2.0));
    }

    #[test]
    fn small_inputs_have_no_outliers() {
        assert!(detect_outliers(&[1.0, 2.0, 1000.0]).is_empty());
    }

    proptest! {
        #[test]
        fn percentile_bounds_are_min_and_max(values in prop::collection::vec(-1e6f64..1e6, 1..64)) {
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert_eq!(percentile(&values, 0.0), min);
            prop_assert_eq!(percentile(&values, 100.0), max);
        }

        #[test]
        fn percentile_is_monotonic(
            values in prop::collection::vec(-1e6f64..1e6, 1..64),
            a in 0.0f64..100.0,
            b in 0.0f64..100.0,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(percentile(&values, lo) <= percentile(&values, hi) + EPSILON);
        }

        #[test]
        fn variance_is_non_negative(values in prop::collection::vec(-1e3f64..1e3, 0..64)) {
            let m = mean(&values);
            prop_assert!(variance(&values, m) >= 0.0);
        }

        #[test]
        fn constant_input_has_zero_variance(value in -1e3f64..1e3, n in 1usize..32) {
            let values = vec![value; n];
            prop_assert_eq!(variance(&values, value), 0.0);
        }

        #[test]
        fn outliers_are_ordered_and_outside_fences(values in prop::collection::vec(0.0f64..1e4, 0..64)) {
            let outliers = detect_outliers(&values);
            prop_assert!(outliers.windows(2).all(|w| w[0].index < w[1].index));
            if !outliers.is_empty() {
                let q1 = percentile(&values, 25.0);
                let q3 = percentile(&values, 75.0);
                let spread = q3 - q1;
                for o in &outliers {
                    prop_assert_eq!(values[o.index], o.value);
                    prop_assert!(o.value < q1 - FENCE * spread || o.value > q3 + FENCE * spread);
                }
            }
        }
    }
}
