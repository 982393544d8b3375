//! Refinement and replacement of close-frequency sinusoid chains.
//!
//! Sinusoids closer than the frequency resolution interfere with each
//! other's linear fits. Two BIC-gated repairs run after each acceptance:
//!
//! - `refine_chain`: re-extract every member of a chain against the
//!   residual with that member removed, keeping the pass only while the
//!   BIC improves.
//! - `replace_chains`: try to collapse consecutive subsets of a chain
//!   (longest first) into a single freshly extracted sinusoid.
//!
//! Coupled harmonics are special: their frequency never moves and they are
//! never removed, only re-fit in amplitude and phase.

use crate::domain::types::{Model, TimeSeries};
use crate::spectrum::ampl_phase_at;

use super::{extract_local, merge_candidate, nearest_within, residual_excluding};

/// Passes of `refine_chain` before giving up on convergence.
const MAX_REFINE_PASSES: usize = 50;

/// Sweeps of `replace_chains`; each accepted merge restarts the sweep.
const MAX_REPLACE_SWEEPS: usize = 1_000;

fn improves(bic_before: f64, bic_after: f64) -> bool {
    ((bic_before - bic_after) * 100.0).round() / 100.0 > 0.0
}

/// Indices of all sinusoids linked to `idx` by the Rayleigh criterion:
/// the transitive closure of "closer than `f_res`" in frequency.
pub fn chain_containing(model: &Model, idx: usize, f_res: f64) -> Vec<usize> {
    for chain in all_chains(model, f_res) {
        if chain.contains(&idx) {
            return chain;
        }
    }
    vec![idx]
}

/// All chains, each sorted by frequency. Singletons are included.
pub fn all_chains(model: &Model, f_res: f64) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..model.sinusoids.len()).collect();
    order.sort_by(|&a, &b| {
        model.sinusoids[a]
            .frequency
            .partial_cmp(&model.sinusoids[b].frequency)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut chains: Vec<Vec<usize>> = Vec::new();
    for &i in &order {
        let f = model.sinusoids[i].frequency;
        match chains.last_mut() {
            Some(chain) => {
                let last = chain[chain.len() - 1];
                if (f - model.sinusoids[last].frequency).abs() < f_res {
                    chain.push(i);
                } else {
                    chains.push(vec![i]);
                }
            }
            None => chains.push(vec![i]),
        }
    }
    chains
}

/// Iteratively re-extract each member of `chain` against the residual with
/// that member excluded. Each full pass is kept only if the BIC improves;
/// the first non-improving pass is rolled back and ends the loop.
pub fn refine_chain(ts: &TimeSeries, model: &mut Model, chain: &[usize], df: f64, f_res: f64) {
    let mut bic_prev = model.bic(ts);
    for _ in 0..MAX_REFINE_PASSES {
        let snapshot = model.clone();
        for &j in chain {
            merge_candidate(ts, model, j, df, f_res);
        }
        model.update_offset(ts);
        let bic = model.bic(ts);
        if improves(bic_prev, bic) {
            bic_prev = bic;
        } else {
            *model = snapshot;
            break;
        }
    }
}

/// Try to collapse close-frequency chains. Consecutive subsets are tested
/// longest first; an accepted merge restarts the sweep because the index
/// space shifted.
pub fn replace_chains(ts: &TimeSeries, model: &mut Model, df: f64, f_res: f64) {
    let mut bic_prev = model.bic(ts);

    'sweep: for _ in 0..MAX_REPLACE_SWEEPS {
        let chains: Vec<Vec<usize>> = all_chains(model, f_res)
            .into_iter()
            .filter(|c| c.len() > 1)
            .collect();

        for chain in &chains {
            for len in (2..=chain.len()).rev() {
                for start in 0..=(chain.len() - len) {
                    let subset = &chain[start..start + len];
                    let snapshot = model.clone();
                    if try_replace(ts, model, subset, df, f_res) {
                        let bic = model.bic(ts);
                        if improves(bic_prev, bic) {
                            bic_prev = bic;
                            continue 'sweep;
                        }
                    }
                    *model = snapshot;
                }
            }
        }
        break;
    }
}

/// Replace `subset` with a single extraction, or with its harmonic members
/// re-fit when the subset contains harmonics. Returns false when the subset
/// admits no replacement; the caller judges the BIC and rolls back.
fn try_replace(
    ts: &TimeSeries,
    model: &mut Model,
    subset: &[usize],
    df: f64,
    f_res: f64,
) -> bool {
    let free: Vec<usize> = subset
        .iter()
        .copied()
        .filter(|&j| model.sinusoids[j].harmonic.is_none())
        .collect();
    let harm: Vec<usize> = subset
        .iter()
        .copied()
        .filter(|&j| model.sinusoids[j].harmonic.is_some())
        .collect();
    if free.is_empty() {
        return false;
    }

    if !harm.is_empty() {
        // Harmonics absorb the signal: drop the free members, re-fit the
        // harmonic amplitudes and phases.
        let mut removed = free.clone();
        removed.sort_unstable_by(|a, b| b.cmp(a));
        for j in &removed {
            model.sinusoids.remove(*j);
        }
        model.update_offset(ts);
        for &h in &harm {
            let shift = free.iter().filter(|&&j| j < h).count();
            let h = h - shift;
            let resid_ex = residual_excluding(ts, model, &[h]);
            let f = model.sinusoids[h].frequency;
            let (a, ph) = ampl_phase_at(ts.time(), &resid_ex, f);
            if a > 0.0 {
                model.sinusoids[h].amplitude = a;
                model.sinusoids[h].phase = ph;
            }
        }
        model.update_offset(ts);
        return true;
    }

    if free.len() < 2 {
        return false;
    }

    let f_lo = free
        .iter()
        .map(|&j| model.sinusoids[j].frequency)
        .fold(f64::INFINITY, f64::min)
        - f_res;
    let f_hi = free
        .iter()
        .map(|&j| model.sinusoids[j].frequency)
        .fold(f64::NEG_INFINITY, f64::max)
        + f_res;

    let resid_ex = residual_excluding(ts, model, subset);
    let (f, a, ph) = extract_local(ts.time(), &resid_ex, f_lo, f_hi, df);
    if !(a > 0.0 && f.is_finite()) {
        return false;
    }

    let mut removed = free.clone();
    removed.sort_unstable_by(|a, b| b.cmp(a));
    for j in &removed {
        model.sinusoids.remove(*j);
    }

    // The replacement may land within the resolution of a survivor outside
    // the subset; merge rather than break the distinct-frequency invariant.
    match nearest_within(model, f, f_res) {
        Some(j) => merge_candidate(ts, model, j, df, f_res),
        None => model
            .sinusoids
            .push(crate::domain::types::Sinusoid::new(f, a, ph)),
    }
    model.update_offset(ts);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Sinusoid;
    use std::f64::consts::TAU;

    fn sine_series(f: f64, a: f64, ph: f64) -> TimeSeries {
        let time: Vec<f64> = (0..800).map(|i| i as f64 * 0.1).collect();
        let flux: Vec<f64> = time.iter().map(|&t| a * (TAU * f * t + ph).sin()).collect();
        let err = vec![0.01; 800];
        TimeSeries::new(time, flux, err).unwrap()
    }

    #[test]
    fn chains_group_by_transitive_closeness() {
        let mut model = Model::default();
        model.sinusoids.push(Sinusoid::new(1.00, 1.0, 0.0));
        model.sinusoids.push(Sinusoid::new(2.50, 1.0, 0.0));
        model.sinusoids.push(Sinusoid::new(1.01, 1.0, 0.0));
        model.sinusoids.push(Sinusoid::new(1.02, 1.0, 0.0));

        let chains = all_chains(&model, 0.015);
        assert_eq!(chains.len(), 2);
        // 1.00 - 1.01 - 1.02 form one chain even though 1.00 and 1.02 are
        // farther apart than the resolution.
        let big: &Vec<usize> = chains.iter().find(|c| c.len() == 3).unwrap();
        assert!(big.contains(&0) && big.contains(&2) && big.contains(&3));

        assert_eq!(chain_containing(&model, 0, 0.015).len(), 3);
        assert_eq!(chain_containing(&model, 1, 0.015), vec![1]);
    }

    #[test]
    fn replace_collapses_a_split_peak() {
        // One true sinusoid modeled as two slightly offset components.
        let ts = sine_series(1.0, 3.0, 0.5);
        let mut model = Model::default();
        model.sinusoids.push(Sinusoid::new(0.995, 1.4, 0.4));
        model.sinusoids.push(Sinusoid::new(1.005, 1.4, 0.6));
        model.update_offset(&ts);
        let bic_before = model.bic(&ts);

        let f_res = 1.5 / ts.t_tot();
        replace_chains(&ts, &mut model, f_res, f_res);

        assert_eq!(model.n_sinusoids(), 1);
        assert!((model.sinusoids[0].frequency - 1.0).abs() < 0.005);
        assert!(model.bic(&ts) < bic_before);
    }

    #[test]
    fn refine_improves_or_preserves_bic() {
        let ts = sine_series(1.0, 3.0, 0.5);
        let mut model = Model::default();
        model.sinusoids.push(Sinusoid::new(0.999, 2.8, 0.45));
        model.update_offset(&ts);
        let bic_before = model.bic(&ts);

        let f_res = 1.5 / ts.t_tot();
        refine_chain(&ts, &mut model, &[0], f_res, f_res);
        assert!(model.bic(&ts) <= bic_before + 1e-9);
        assert!((model.sinusoids[0].frequency - 1.0).abs() < 0.002);
    }

    #[test]
    fn harmonics_survive_replacement() {
        let ts = sine_series(1.0, 3.0, 0.5);
        let mut model = Model::default();
        let mut h = Sinusoid::new(1.0, 2.0, 0.3);
        h.harmonic = Some(1);
        model.sinusoids.push(h);
        model.sinusoids.push(Sinusoid::new(1.008, 0.8, 1.2));
        model.update_offset(&ts);

        let f_res = 1.5 / ts.t_tot();
        replace_chains(&ts, &mut model, f_res, f_res);

        // The harmonic remains, at its exact frequency.
        assert!(model.sinusoids.iter().any(|s| s.harmonic == Some(1)));
        let h = model
            .sinusoids
            .iter()
            .find(|s| s.harmonic.is_some())
            .unwrap();
        assert!((h.frequency - 1.0).abs() < 1e-12);
    }
}
