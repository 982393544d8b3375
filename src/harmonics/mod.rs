//! Harmonic coupling: lock sinusoids to integer multiples of the orbital
//! frequency.
//!
//! A sinusoid matches harmonic `n = round(f · p_orb)` when its frequency
//! lies within half a resolution unit of `n / p_orb`. Matches lose their
//! frequency freedom: the frequency becomes the exact multiple and only
//! amplitude and phase are re-fit. Multiple matches on the same order
//! collapse into one component.

pub mod period;

use std::collections::BTreeMap;

use crate::domain::types::{Model, Sinusoid, Termination, TimeSeries};
use crate::domain::PipelineConfig;
use crate::spectrum::{ampl_phase_at, nyquist_frequency};

pub use period::estimate_period;

/// Minimum matched harmonics for coupling to be meaningful.
pub const MIN_HARMONICS: usize = 2;

/// Free sinusoids matching a harmonic of `1/p_orb`, as `(index, order)`.
pub fn find_harmonics(model: &Model, p_orb: f64, f_tol: f64) -> Vec<(usize, u32)> {
    let mut out = Vec::new();
    if !(p_orb > 0.0) {
        return out;
    }
    for (i, s) in model.sinusoids.iter().enumerate() {
        if s.harmonic.is_some() {
            continue;
        }
        let n = (s.frequency * p_orb).round();
        if n >= 1.0 && (s.frequency - n / p_orb).abs() < f_tol {
            out.push((i, n as u32));
        }
    }
    out
}

/// Couple matching sinusoids to the orbital period in place.
///
/// Returns `Completed` on success. With fewer than [`MIN_HARMONICS`] matches
/// the model is left untouched and `InsufficientHarmonics` is returned.
pub fn couple_harmonics(
    ts: &TimeSeries,
    model: &mut Model,
    p_orb: f64,
    cfg: &PipelineConfig,
) -> Termination {
    let f_tol = cfg.f_resolution(ts) / 2.0;
    let matches = find_harmonics(model, p_orb, f_tol);

    let mut orders: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, n) in matches {
        orders.entry(n).or_default().push(i);
    }
    if orders.len() < MIN_HARMONICS {
        return Termination::InsufficientHarmonics;
    }

    // Remove every matched component, then add one exact-frequency sinusoid
    // per order, fit against the current residual.
    let mut removed: Vec<usize> = orders.values().flatten().copied().collect();
    removed.sort_unstable_by(|a, b| b.cmp(a));
    for j in &removed {
        model.sinusoids.remove(*j);
    }
    model.update_offset(ts);

    for &n in orders.keys() {
        let f = n as f64 / p_orb;
        let resid = model.residual(ts);
        let (a, ph) = ampl_phase_at(ts.time(), &resid, f);
        let mut s = Sinusoid::new(f, a.max(f64::MIN_POSITIVE), ph);
        s.harmonic = Some(n);
        model.sinusoids.push(s);
        model.update_offset(ts);
    }

    // The residual changed under the remaining free sinusoids; re-fit their
    // amplitude and phase at fixed frequency.
    refit_free_amp_phase(ts, model);
    model.update_offset(ts);
    Termination::Completed
}

/// Try adding missing harmonic orders below Nyquist, keeping each only when
/// the BIC improves.
pub fn extend_harmonics(ts: &TimeSeries, model: &mut Model, p_orb: f64, cfg: &PipelineConfig) {
    if !(p_orb > 0.0) {
        return;
    }
    let f_max = nyquist_frequency(ts, cfg);
    let n_max = (f_max * p_orb).floor() as u32;

    let mut bic_prev = model.bic(ts);
    for n in 1..=n_max {
        if model.sinusoids.iter().any(|s| s.harmonic == Some(n)) {
            continue;
        }
        let f = n as f64 / p_orb;
        let resid = model.residual(ts);
        let (a, ph) = ampl_phase_at(ts.time(), &resid, f);
        if !(a > 0.0) {
            continue;
        }
        let snapshot = model.clone();
        let mut s = Sinusoid::new(f, a, ph);
        s.harmonic = Some(n);
        model.sinusoids.push(s);
        model.update_offset(ts);

        let bic = model.bic(ts);
        if ((bic_prev - bic) * 100.0).round() / 100.0 > 0.0 {
            bic_prev = bic;
        } else {
            *model = snapshot;
        }
    }
}

fn refit_free_amp_phase(ts: &TimeSeries, model: &mut Model) {
    for j in 0..model.sinusoids.len() {
        if model.sinusoids[j].harmonic.is_some() {
            continue;
        }
        let mut resid = model.residual(ts);
        let s = &model.sinusoids[j];
        for (r, &t) in resid.iter_mut().zip(ts.time().iter()) {
            *r += s.eval(t);
        }
        let (a, ph) = ampl_phase_at(ts.time(), &resid, s.frequency);
        if a > 0.0 {
            model.sinusoids[j].amplitude = a;
            model.sinusoids[j].phase = ph;
        }
    }
}
