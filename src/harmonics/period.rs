//! Orbital period estimation from an already-extracted sinusoid model.
//!
//! Candidate periods come from the strongest extracted frequencies and their
//! integer multiples (an eclipsing binary's dominant extracted frequency is
//! often a harmonic of the true orbital frequency, so longer periods must be
//! tried too). Each candidate is scored by three agreeing measures:
//!
//! - phase dispersion minimisation (Stellingwerf 1978 style, binned),
//! - the fitted sinusoid amplitude at the base frequency,
//! - how many extracted frequencies line up as harmonics and how complete
//!   that series is.
//!
//! The best candidate is densely refined by minimizing the phase dispersion
//! on a ±1% grid.

use crate::domain::types::{Model, TimeSeries};
use crate::domain::PipelineConfig;
use crate::spectrum::ampl_phase_at;

use super::MIN_HARMONICS;

/// Phase bins for the dispersion measure.
const PDM_BINS: usize = 10;

/// Strongest extracted frequencies considered as base candidates.
const MAX_BASE_CANDIDATES: usize = 5;

/// Period multiples tried per base frequency.
const MAX_MULTIPLE: usize = 4;

/// Relative half-width and step of the dense refinement grid.
const REFINE_SPAN: f64 = 0.01;
const REFINE_STEP: f64 = 1e-5;

/// Estimate the orbital period, or `None` when no candidate accumulates at
/// least [`MIN_HARMONICS`] matching extracted frequencies.
pub fn estimate_period(ts: &TimeSeries, model: &Model, cfg: &PipelineConfig) -> Option<f64> {
    if model.sinusoids.is_empty() {
        return None;
    }
    let f_res = cfg.f_resolution(ts);
    let f_tol = f_res / 2.0;
    let freqs: Vec<f64> = model.sinusoids.iter().map(|s| s.frequency).collect();

    // Strongest extracted frequencies first.
    let mut order: Vec<usize> = (0..model.sinusoids.len()).collect();
    order.sort_by(|&a, &b| {
        model.sinusoids[b]
            .amplitude
            .partial_cmp(&model.sinusoids[a].amplitude)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut candidates: Vec<f64> = Vec::new();
    for &i in order.iter().take(MAX_BASE_CANDIDATES) {
        let f = model.sinusoids[i].frequency;
        if !(f > 0.0) {
            continue;
        }
        for m in 1..=MAX_MULTIPLE {
            let p = m as f64 / f;
            // Need at least two full cycles in the baseline.
            if p > 0.0 && p <= ts.t_tot() / 2.0 {
                candidates.push(p);
            }
        }
    }
    if candidates.is_empty() {
        return None;
    }

    let mut best: Option<(f64, f64, usize)> = None;
    for &p in &candidates {
        let (count, completeness) = harmonic_series_match(&freqs, p, f_tol);
        if count < MIN_HARMONICS {
            continue;
        }
        let theta = phase_dispersion(ts.time(), ts.flux(), p, PDM_BINS);
        let (amp, _) = ampl_phase_at(ts.time(), ts.flux(), 1.0 / p);
        let score = (1.0 - theta).max(0.0) * amp * count as f64 * completeness;
        if !score.is_finite() {
            continue;
        }
        match best {
            Some((_, bs, _)) if bs >= score => {}
            _ => best = Some((p, score, count)),
        }
    }

    let (p_best, _, _) = best?;
    Some(refine_period(ts, p_best))
}

/// Count extracted frequencies matching harmonics of `1/p`, and the
/// completeness of that series up to its highest matched order.
pub fn harmonic_series_match(freqs: &[f64], p: f64, f_tol: f64) -> (usize, f64) {
    let mut matched_orders: Vec<u32> = Vec::new();
    for &f in freqs {
        let n = (f * p).round();
        if n >= 1.0 && (f - n / p).abs() < f_tol {
            let n = n as u32;
            if !matched_orders.contains(&n) {
                matched_orders.push(n);
            }
        }
    }
    let count = matched_orders.len();
    let max_order = matched_orders.iter().copied().max().unwrap_or(0);
    let completeness = if max_order > 0 {
        count as f64 / max_order as f64
    } else {
        0.0
    };
    (count, completeness)
}

/// Stellingwerf-style dispersion: pooled within-bin variance of the folded
/// curve over the total variance. Lower means a cleaner fold.
pub fn phase_dispersion(time: &[f64], flux: &[f64], p: f64, n_bins: usize) -> f64 {
    let n = flux.len();
    if n < 2 || !(p > 0.0) || n_bins == 0 {
        return 1.0;
    }
    let mean = flux.iter().sum::<f64>() / n as f64;
    let total_var: f64 = flux.iter().map(|y| (y - mean) * (y - mean)).sum::<f64>() / (n - 1) as f64;
    if total_var <= 0.0 {
        return 1.0;
    }

    let mut sums = vec![0.0; n_bins];
    let mut sq_sums = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];
    for (&t, &y) in time.iter().zip(flux.iter()) {
        let phase = (t / p).rem_euclid(1.0);
        let b = ((phase * n_bins as f64) as usize).min(n_bins - 1);
        sums[b] += y;
        sq_sums[b] += y * y;
        counts[b] += 1;
    }

    let mut pooled = 0.0;
    let mut dof = 0usize;
    for b in 0..n_bins {
        if counts[b] >= 2 {
            let c = counts[b] as f64;
            pooled += sq_sums[b] - sums[b] * sums[b] / c;
            dof += counts[b] - 1;
        }
    }
    if dof == 0 {
        return 1.0;
    }
    (pooled / dof as f64) / total_var
}

/// Dense refinement on `p ± 1%` at relative step `1e-5`, minimizing the
/// phase dispersion.
fn refine_period(ts: &TimeSeries, p: f64) -> f64 {
    let step = REFINE_STEP * p;
    let n_steps = (REFINE_SPAN / REFINE_STEP) as i64;
    let mut best_p = p;
    let mut best_theta = phase_dispersion(ts.time(), ts.flux(), p, PDM_BINS);
    for i in -n_steps..=n_steps {
        let trial = p + i as f64 * step;
        if !(trial > 0.0) {
            continue;
        }
        let theta = phase_dispersion(ts.time(), ts.flux(), trial, PDM_BINS);
        if theta < best_theta {
            best_theta = theta;
            best_p = trial;
        }
    }
    best_p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Sinusoid;
    use std::f64::consts::TAU;

    fn binary_like_series(p_orb: f64) -> TimeSeries {
        let f = 1.0 / p_orb;
        let time: Vec<f64> = (0..2000).map(|i| i as f64 * 0.05).collect();
        let flux: Vec<f64> = time
            .iter()
            .map(|&t| {
                2.0 * (TAU * f * t + 0.2).sin()
                    + 1.0 * (TAU * 2.0 * f * t + 1.5).sin()
                    + 0.4 * (TAU * 3.0 * f * t + 0.9).sin()
            })
            .collect();
        TimeSeries::new(time, flux, vec![0.01; 2000]).unwrap()
    }

    fn model_with(freqs: &[(f64, f64)]) -> Model {
        Model {
            offset: 0.0,
            sinusoids: freqs
                .iter()
                .map(|&(f, a)| Sinusoid::new(f, a, 0.0))
                .collect(),
        }
    }

    #[test]
    fn recovers_a_known_orbital_period() {
        let p_orb = 2.5;
        let ts = binary_like_series(p_orb);
        // Extraction would find the three harmonics, slightly off-grid.
        let model = model_with(&[(0.4001, 2.0), (0.7999, 1.0), (1.2002, 0.4)]);

        let p = estimate_period(&ts, &model, &PipelineConfig::default()).unwrap();
        assert!((p - p_orb).abs() / p_orb < 0.01, "p = {p}");
    }

    #[test]
    fn incommensurate_frequencies_never_share_a_series() {
        // 1.11 sits off every harmonic grid of 0.4 up to four period
        // multiples, so each candidate period matches a single frequency.
        let f_tol = 0.005;
        for m in 1..=4 {
            let p = m as f64 / 0.4;
            let (count, _) = harmonic_series_match(&[0.4, 1.11], p, f_tol);
            assert_eq!(count, 1, "period multiple {m}");
            let p = m as f64 / 1.11;
            let (count, _) = harmonic_series_match(&[0.4, 1.11], p, f_tol);
            assert!(count <= 1, "inverse period multiple {m}");
        }
    }

    #[test]
    fn phase_dispersion_is_low_at_the_true_period() {
        let ts = binary_like_series(2.5);
        let at_true = phase_dispersion(ts.time(), ts.flux(), 2.5, 10);
        let off = phase_dispersion(ts.time(), ts.flux(), 1.83, 10);
        assert!(at_true < 0.3, "theta = {at_true}");
        assert!(at_true < off);
    }

    #[test]
    fn harmonic_series_match_counts_distinct_orders() {
        let p = 2.5;
        let f_tol = 0.005;
        // Orders 1, 2 and 4 matched; two entries collapse onto order 1.
        let freqs = [0.4, 0.4001, 0.8, 1.6, 3.3];
        let (count, completeness) = harmonic_series_match(&freqs, p, f_tol);
        assert_eq!(count, 3);
        assert!((completeness - 3.0 / 4.0).abs() < 1e-12);
    }
}
