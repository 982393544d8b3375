//! Nyquist frequency estimation.
//!
//! Three methods, selected once at configuration time:
//!
//! - `simple`: `nyquist_factor / (2 · Δt_min)`, the textbook estimate.
//! - `rigorous`: Koen (2006) eq. 5. The information limit of an irregular
//!   sampling pattern can lie far above the simple estimate; the pair-sum
//!   test finds the first multiple where aliasing sets in.
//! - `custom`: a caller-supplied value, used only if it exceeds the simple
//!   estimate (override-if-larger, never a hard override).

use crate::domain::types::{NyquistMethod, TimeSeries};
use crate::domain::PipelineConfig;

/// Cap on the rigorous pair-sum search.
const KOEN_N_MAX: usize = 64;

/// Effective upper frequency bound for periodograms and extraction.
pub fn nyquist_frequency(ts: &TimeSeries, cfg: &PipelineConfig) -> f64 {
    let simple = simple_nyquist(ts, cfg.nyquist_factor);
    match cfg.nyquist_method {
        NyquistMethod::Simple => simple,
        NyquistMethod::Rigorous => rigorous_nyquist(ts).max(simple),
        NyquistMethod::Custom => cfg.nyquist_value.max(simple),
    }
}

/// `nyquist_factor / (2 · Δt_min)`.
pub fn simple_nyquist(ts: &TimeSeries, factor: f64) -> f64 {
    factor / (2.0 * ts.t_step_min())
}

/// Koen (2006) eq. 5: find the smallest `n` for which the pair sum of
/// `sin(nπ/Δt_min · (t_j − t_i))` is non-zero, then `f = n / (2 · Δt_min)`.
fn rigorous_nyquist(ts: &TimeSeries) -> f64 {
    let time = ts.time();
    let dt_min = ts.t_step_min();
    for n in 1..=KOEN_N_MAX {
        if koen_pair_sum(n, time, dt_min) != 0.0 {
            return n as f64 / (2.0 * dt_min);
        }
    }
    // All tested multiples aliased exactly; fall back to the simple bound.
    1.0 / (2.0 * dt_min)
}

fn koen_pair_sum(n: usize, time: &[f64], dt_min: f64) -> f64 {
    let factor = n as f64 * std::f64::consts::PI / dt_min;
    let mut sum = 0.0;
    for i in 0..time.len() - 1 {
        for t_j in &time[i + 1..] {
            sum += (factor * (t_j - time[i])).sin();
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(time: Vec<f64>) -> TimeSeries {
        let n = time.len();
        TimeSeries::new(time, vec![0.0; n], vec![0.01; n]).unwrap()
    }

    #[test]
    fn simple_nyquist_uses_minimum_step() {
        let ts = series(vec![0.0, 0.5, 1.0, 1.2]);
        assert!((simple_nyquist(&ts, 1.0) - 1.0 / 0.4).abs() < 1e-12);
    }

    #[test]
    fn custom_never_falls_below_simple_estimate() {
        let ts = series((0..50).map(|i| i as f64 * 0.1).collect());
        let simple = simple_nyquist(&ts, 1.0);

        let mut cfg = PipelineConfig::default();
        cfg.nyquist_method = NyquistMethod::Custom;

        // A custom value below the simple estimate is ignored.
        cfg.nyquist_value = simple / 10.0;
        assert!((nyquist_frequency(&ts, &cfg) - simple).abs() < 1e-12);

        // A custom value above it is honored.
        cfg.nyquist_value = simple * 3.0;
        assert!((nyquist_frequency(&ts, &cfg) - simple * 3.0).abs() < 1e-12);
    }

    #[test]
    fn rigorous_is_at_least_the_simple_estimate() {
        let time: Vec<f64> = (0..40)
            .map(|i| i as f64 * 0.1 + if i % 3 == 0 { 0.013 } else { 0.0 })
            .collect();
        let ts = series(time);
        let mut cfg = PipelineConfig::default();
        cfg.nyquist_method = NyquistMethod::Rigorous;
        assert!(nyquist_frequency(&ts, &cfg) >= simple_nyquist(&ts, 1.0) - 1e-12);
    }
}
