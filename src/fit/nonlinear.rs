//! Levenberg-Marquardt minimization for sinusoid groups.
//!
//! The Jacobian is analytic. Damping follows Marquardt: the diagonal of
//! `JᵀJ` is scaled by `(1 + λ)`, so the step interpolates between
//! Gauss-Newton (λ → 0) and scaled gradient descent (λ large). The damped
//! normal equations are solved by Cholesky with an SVD fallback for
//! ill-conditioned groups.

use std::f64::consts::TAU;

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::domain::types::Sinusoid;
use crate::math::solve_least_squares;

/// Iteration budget per group; exceeding it is reported as non-convergence.
pub const MAX_LM_ITERATIONS: usize = 100;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 10.0;
const LAMBDA_MAX: f64 = 1e12;
const RSS_REL_TOL: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct LmOutcome {
    pub converged: bool,
    pub iterations: usize,
}

/// Fit the parameters of `sinusoids` against `target` (observations with the
/// offset and all other model components already removed).
///
/// Free sinusoids contribute `(frequency, amplitude, phase)`; members with a
/// harmonic number keep their frequency fixed and contribute only
/// `(amplitude, phase)`.
pub fn fit_sinusoid_group(time: &[f64], target: &[f64], sinusoids: &mut [Sinusoid]) -> LmOutcome {
    let layout: Vec<bool> = sinusoids.iter().map(|s| s.harmonic.is_none()).collect();
    let fixed_freqs: Vec<f64> = sinusoids.iter().map(|s| s.frequency).collect();

    let mut params = Vec::new();
    for s in sinusoids.iter() {
        if s.harmonic.is_none() {
            params.push(s.frequency);
        }
        params.push(s.amplitude);
        params.push(s.phase);
    }

    let unpack = |p: &[f64]| -> Vec<(f64, f64, f64)> {
        let mut out = Vec::with_capacity(layout.len());
        let mut k = 0;
        for (i, &free) in layout.iter().enumerate() {
            let f = if free {
                let v = p[k];
                k += 1;
                v
            } else {
                fixed_freqs[i]
            };
            let a = p[k];
            let ph = p[k + 1];
            k += 2;
            out.push((f, a, ph));
        }
        out
    };

    let residual_fn = |p: &[f64]| -> Option<Vec<f64>> {
        let comps = unpack(p);
        if comps.iter().any(|&(f, a, ph)| {
            !(f.is_finite() && a.is_finite() && ph.is_finite()) || f <= 0.0
        }) {
            return None;
        }
        let mut r = target.to_vec();
        for &(f, a, ph) in &comps {
            for (ri, &t) in r.iter_mut().zip(time.iter()) {
                *ri -= a * (TAU * f * t + ph).sin();
            }
        }
        Some(r)
    };

    let jacobian_fn = |p: &[f64]| -> DMatrix<f64> {
        let comps = unpack(p);
        let n = time.len();
        let mut j = DMatrix::<f64>::zeros(n, p.len());
        let mut col = 0;
        for (ci, &(f, a, ph)) in comps.iter().enumerate() {
            for (i, &t) in time.iter().enumerate() {
                let arg = TAU * f * t + ph;
                let sin = arg.sin();
                let cos = arg.cos();
                let mut c = col;
                if layout[ci] {
                    j[(i, c)] = a * TAU * t * cos;
                    c += 1;
                }
                j[(i, c)] = sin;
                j[(i, c + 1)] = a * cos;
            }
            col += if layout[ci] { 3 } else { 2 };
        }
        j
    };

    let (best, outcome) = lm_minimize(params, residual_fn, jacobian_fn);

    for (s, &(f, a, ph)) in sinusoids.iter_mut().zip(unpack(&best).iter()) {
        s.frequency = f;
        s.amplitude = a;
        s.phase = ph;
        s.normalize();
    }
    outcome
}

/// Fit a harmonic block sharing a single base frequency.
///
/// Each member's frequency is `harmonic · f_base`; the fit adjusts `f_base`
/// together with every member's amplitude and phase. The base-frequency
/// Jacobian column sums the chain-rule contribution of all members.
pub fn fit_harmonic_group(
    time: &[f64],
    target: &[f64],
    f_base: &mut f64,
    harmonics: &mut [Sinusoid],
) -> LmOutcome {
    let orders: Vec<f64> = harmonics
        .iter()
        .map(|s| s.harmonic.unwrap_or(1) as f64)
        .collect();

    let mut params = vec![*f_base];
    for s in harmonics.iter() {
        params.push(s.amplitude);
        params.push(s.phase);
    }

    let residual_fn = |p: &[f64]| -> Option<Vec<f64>> {
        let fb = p[0];
        if !(fb.is_finite() && fb > 0.0) || p.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let mut r = target.to_vec();
        for (k, &n_k) in orders.iter().enumerate() {
            let a = p[1 + 2 * k];
            let ph = p[2 + 2 * k];
            let f = n_k * fb;
            for (ri, &t) in r.iter_mut().zip(time.iter()) {
                *ri -= a * (TAU * f * t + ph).sin();
            }
        }
        Some(r)
    };

    let jacobian_fn = |p: &[f64]| -> DMatrix<f64> {
        let fb = p[0];
        let n = time.len();
        let mut j = DMatrix::<f64>::zeros(n, p.len());
        for (k, &n_k) in orders.iter().enumerate() {
            let a = p[1 + 2 * k];
            let ph = p[2 + 2 * k];
            let f = n_k * fb;
            for (i, &t) in time.iter().enumerate() {
                let arg = TAU * f * t + ph;
                let sin = arg.sin();
                let cos = arg.cos();
                j[(i, 0)] += a * TAU * n_k * t * cos;
                j[(i, 1 + 2 * k)] = sin;
                j[(i, 2 + 2 * k)] = a * cos;
            }
        }
        j
    };

    let (best, outcome) = lm_minimize(params, residual_fn, jacobian_fn);

    *f_base = best[0];
    for (k, s) in harmonics.iter_mut().enumerate() {
        s.frequency = orders[k] * best[0];
        s.amplitude = best[1 + 2 * k];
        s.phase = best[2 + 2 * k];
        s.normalize();
    }
    outcome
}

/// The LM driver, generic over the residual/Jacobian closures.
fn lm_minimize(
    params: Vec<f64>,
    residual_fn: impl Fn(&[f64]) -> Option<Vec<f64>>,
    jacobian_fn: impl Fn(&[f64]) -> DMatrix<f64>,
) -> (Vec<f64>, LmOutcome) {
    let Some(resid) = residual_fn(&params) else {
        return (
            params,
            LmOutcome {
                converged: false,
                iterations: 0,
            },
        );
    };

    let mut best = params;
    let mut resid = DVector::from_vec(resid);
    let mut rss = resid.norm_squared();
    let mut lambda = LAMBDA_INIT;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < MAX_LM_ITERATIONS {
        iterations += 1;

        let j = jacobian_fn(&best);
        let jtj = j.transpose() * &j;
        let jtr = j.transpose() * &resid;

        let mut damped = jtj.clone();
        for i in 0..damped.nrows() {
            damped[(i, i)] = jtj[(i, i)] * (1.0 + lambda) + 1e-30;
        }

        let step = match Cholesky::new(damped.clone()) {
            Some(ch) => Some(ch.solve(&jtr)),
            None => solve_least_squares(&damped, &jtr),
        };
        let Some(step) = step else {
            lambda *= LAMBDA_UP;
            if lambda > LAMBDA_MAX {
                break;
            }
            continue;
        };

        let trial: Vec<f64> = best
            .iter()
            .zip(step.iter())
            .map(|(p, d)| p + d)
            .collect();

        let trial_rss = residual_fn(&trial).map(|r| {
            let v = DVector::from_vec(r);
            (v.norm_squared(), v)
        });

        match trial_rss {
            Some((new_rss, new_resid)) if new_rss.is_finite() && new_rss < rss => {
                let rel_gain = (rss - new_rss) / rss.max(1e-300);
                best = trial;
                resid = new_resid;
                rss = new_rss;
                lambda = (lambda / LAMBDA_DOWN).max(1e-12);
                if rel_gain <= RSS_REL_TOL {
                    converged = true;
                    break;
                }
            }
            _ => {
                lambda *= LAMBDA_UP;
                if lambda > LAMBDA_MAX {
                    // Stuck: no damping level yields an improving step,
                    // which at a minimum is convergence.
                    converged = true;
                    break;
                }
            }
        }
    }

    (
        best,
        LmOutcome {
            converged,
            iterations,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * step).collect()
    }

    fn synth(time: &[f64], comps: &[(f64, f64, f64)]) -> Vec<f64> {
        time.iter()
            .map(|&t| {
                comps
                    .iter()
                    .map(|&(f, a, ph)| a * (TAU * f * t + ph).sin())
                    .sum()
            })
            .collect()
    }

    #[test]
    fn lm_recovers_perturbed_single_sinusoid() {
        let time = grid(500, 0.1);
        let target = synth(&time, &[(1.2, 3.0, 0.7)]);

        let mut group = vec![Sinusoid::new(1.198, 2.7, 0.55)];
        let out = fit_sinusoid_group(&time, &target, &mut group);

        assert!(out.converged);
        assert!((group[0].frequency - 1.2).abs() < 1e-6);
        assert!((group[0].amplitude - 3.0).abs() < 1e-6);
        assert!((group[0].phase - 0.7).abs() < 1e-6);
    }

    #[test]
    fn lm_refines_two_close_sinusoids_jointly() {
        let time = grid(1000, 0.1);
        let truth = [(1.00, 2.0, 0.3), (1.04, 1.5, 1.1)];
        let target = synth(&time, &truth);

        let mut group = vec![
            Sinusoid::new(1.001, 1.8, 0.25),
            Sinusoid::new(1.038, 1.7, 1.2),
        ];
        let out = fit_sinusoid_group(&time, &target, &mut group);
        assert!(out.converged);
        for (s, &(f, a, ph)) in group.iter().zip(truth.iter()) {
            assert!((s.frequency - f).abs() < 1e-5, "f = {}", s.frequency);
            assert!((s.amplitude - a).abs() < 1e-4, "a = {}", s.amplitude);
            assert!((s.phase - ph).abs() < 1e-3, "ph = {}", s.phase);
        }
    }

    #[test]
    fn fixed_frequency_members_keep_their_frequency() {
        let time = grid(400, 0.1);
        let target = synth(&time, &[(2.0, 1.0, 0.4)]);

        let mut h = Sinusoid::new(2.0, 0.8, 0.1);
        h.harmonic = Some(2);
        let mut group = vec![h];
        fit_sinusoid_group(&time, &target, &mut group);

        assert!((group[0].frequency - 2.0).abs() < 1e-15);
        assert!((group[0].amplitude - 1.0).abs() < 1e-8);
        assert!((group[0].phase - 0.4).abs() < 1e-8);
    }

    #[test]
    fn harmonic_group_adjusts_shared_base_frequency() {
        let time = grid(1000, 0.1);
        // True base 0.4: harmonics at 0.4 and 0.8.
        let target = synth(&time, &[(0.4, 2.0, 0.2), (0.8, 1.0, 1.5)]);

        let mut h1 = Sinusoid::new(0.3996, 1.9, 0.3);
        h1.harmonic = Some(1);
        let mut h2 = Sinusoid::new(0.7992, 1.1, 1.4);
        h2.harmonic = Some(2);
        let mut f_base = 0.3996;
        let mut group = vec![h1, h2];

        let out = fit_harmonic_group(&time, &target, &mut f_base, &mut group);
        assert!(out.converged);
        assert!((f_base - 0.4).abs() < 1e-6, "f_base = {f_base}");
        assert!((group[0].frequency - 0.4).abs() < 1e-6);
        assert!((group[1].frequency - 0.8).abs() < 1e-6);
        assert!((group[1].frequency - 2.0 * group[0].frequency).abs() < 1e-15);
    }
}
