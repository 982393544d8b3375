//! Small numerical helpers shared across the extraction and fitting code.

pub mod ols;

pub use ols::solve_least_squares;

use std::f64::consts::TAU;

/// Wrap a phase angle into `[0, 2π)`.
pub fn wrap_phase(ph: f64) -> f64 {
    let w = ph.rem_euclid(TAU);
    // rem_euclid can return exactly TAU for inputs just below 0.
    if w >= TAU { w - TAU } else { w }
}

/// Mean of a slice; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation of a slice; 0.0 for fewer than 2 values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Median of a slice (copies and sorts); 0.0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v: Vec<f64> = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = v.len() / 2;
    if v.len() % 2 == 1 {
        v[mid]
    } else {
        (v[mid - 1] + v[mid]) / 2.0
    }
}

/// Residual sum of squares.
pub fn sum_sq(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_phase_stays_in_range() {
        for ph in [-10.0, -TAU, -0.1, 0.0, 0.3, TAU, 15.0] {
            let w = wrap_phase(ph);
            assert!((0.0..TAU).contains(&w), "{ph} wrapped to {w}");
        }
        assert!((wrap_phase(0.3) - 0.3).abs() < 1e-12);
        assert!((wrap_phase(0.3 + TAU) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
