//! Iterative prewhitening: greedily grow the sinusoid model until no further
//! candidate is statistically justified.
//!
//! The loop is an explicit state machine (`Scanning` → `Accepted` →
//! `Replacing` → back, or → `Done`), so every way out carries a first-class
//! [`Termination`] value instead of an implicit loop exit.

pub mod replace;
pub mod select;
pub mod stop;

use crate::domain::types::{FitWarning, Model, Sinusoid, Termination, TimeSeries};
use crate::domain::PipelineConfig;
use crate::fit;
use crate::spectrum::{amplitude_spectrum, ampl_phase_at, noise_at_freq, nyquist_frequency};

use select::FrequencySelector;
use stop::{Decision, StoppingEvaluator};

/// Lower periodogram bound factor: f0 = 0.01 / baseline.
const F_MIN_FACTOR: f64 = 0.01;

/// Safety valve against pathological non-terminating configurations.
const MAX_ITERATIONS: usize = 10_000;

/// Result of one extraction pass.
#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    pub model: Model,
    pub termination: Termination,
    pub warnings: Vec<FitWarning>,
}

enum LoopState {
    Scanning,
    Accepted { idx: usize },
    Replacing,
    Done(Termination),
}

/// Run one full prewhitening pass over the residual of `model`.
///
/// The model may already contain sinusoids (including coupled harmonics on
/// the post-harmonic pass); their frequencies are respected by the refine
/// and replace sub-steps.
pub fn extract_sinusoids(
    ts: &TimeSeries,
    cfg: &PipelineConfig,
    mut model: Model,
) -> ExtractOutcome {
    let f_res = cfg.f_resolution(ts);
    // Grid spacing equals the configured spectral resolution; candidate
    // peaks are refined on a 100x oversampled local grid afterwards.
    let df = f_res;
    let f0 = F_MIN_FACTOR / ts.t_tot();
    let f_max = nyquist_frequency(ts, cfg);

    let evaluator = StoppingEvaluator::new(cfg, ts);
    let mut selector = FrequencySelector::new(cfg.select_next);

    model.update_offset(ts);
    let mut bic_prev = model.bic(ts);
    let mut warnings: Vec<FitWarning> = Vec::new();
    let mut iterations = 0usize;
    let mut state = LoopState::Scanning;

    let termination = loop {
        state = match state {
            LoopState::Scanning => {
                iterations += 1;
                if iterations > MAX_ITERATIONS {
                    break Termination::SearchSpaceExhausted;
                }

                let resid = model.residual(ts);
                let spectrum = amplitude_spectrum(ts.time(), &resid, f0, f_max, df);
                if spectrum.is_empty() {
                    break if ts.n() < 2 || ts.t_tot() <= 0.0 {
                        Termination::InsufficientData
                    } else {
                        Termination::SearchSpaceExhausted
                    };
                }

                let Some(cand) = selector.select(&spectrum, cfg.window_width) else {
                    break Termination::SearchSpaceExhausted;
                };
                let (f_i, a_i, ph_i) = refine_peak(ts.time(), &resid, cand.frequency, df);
                if !(a_i > 0.0 && f_i.is_finite()) {
                    break Termination::SearchSpaceExhausted;
                }

                let snapshot = model.clone();

                // Tentatively add. A candidate within one resolution unit of
                // an existing sinusoid is merged (re-extracted in place), so
                // the distinct-frequency invariant holds unconditionally.
                let idx = match nearest_within(&model, f_i, f_res) {
                    Some(j) => {
                        merge_candidate(ts, &mut model, j, df, f_res);
                        j
                    }
                    None => {
                        model.sinusoids.push(Sinusoid::new(f_i, a_i, ph_i));
                        model.sinusoids.len() - 1
                    }
                };
                model.update_offset(ts);

                let bic_after = model.bic(ts);
                // Local noise comes from the residual with the candidate
                // modeled, not from the pre-add spectrum: the peak under
                // test must not inflate its own noise window.
                let resid_after = model.residual(ts);
                let noise = noise_at_freq(ts.time(), &resid_after, f_i, cfg.window_width, df);
                let (decision, _stats) = evaluator.judge(bic_prev, bic_after, a_i, noise);

                match decision {
                    Decision::Accept => {
                        bic_prev = bic_after;
                        LoopState::Accepted { idx }
                    }
                    Decision::Reject => {
                        model = snapshot;
                        if selector.can_switch() {
                            // Hybrid policy: retry once per rejection in
                            // SNR mode before giving up.
                            selector.switch_to_snr();
                            LoopState::Scanning
                        } else {
                            LoopState::Done(Termination::NoSignificantFrequencies)
                        }
                    }
                }
            }

            LoopState::Accepted { idx } => {
                if cfg.optimise_step {
                    let w = fit::optimise_model(ts, &mut model, cfg);
                    warnings.extend(w);
                } else {
                    // Cheaper alternative: re-extract only the chain of
                    // sinusoids within the Rayleigh criterion of the newest.
                    let chain = replace::chain_containing(&model, idx, f_res);
                    if chain.len() > 1 {
                        replace::refine_chain(ts, &mut model, &chain, df, f_res);
                    }
                }
                model.update_offset(ts);

                if cfg.replace_step {
                    LoopState::Replacing
                } else {
                    bic_prev = model.bic(ts);
                    LoopState::Scanning
                }
            }

            LoopState::Replacing => {
                replace::replace_chains(ts, &mut model, df, f_res);
                model.update_offset(ts);
                bic_prev = model.bic(ts);
                LoopState::Scanning
            }

            LoopState::Done(t) => break t,
        };
    };

    ExtractOutcome {
        model,
        termination,
        warnings,
    }
}

/// Refine a periodogram peak on a 100x oversampled local grid, then fit
/// amplitude and phase linearly at the refined frequency.
pub fn refine_peak(time: &[f64], values: &[f64], f_center: f64, df: f64) -> (f64, f64, f64) {
    let f_lo = (f_center - df).max(df / 10.0);
    let f_hi = f_center + df;
    let fine = amplitude_spectrum(time, values, f_lo, f_hi, df / 100.0);
    let f_best = match argmax(&fine.ampls) {
        Some(i) => fine.freqs[i],
        None => f_center,
    };
    let (a, ph) = ampl_phase_at(time, values, f_best);
    (f_best, a, ph)
}

/// Extract the strongest sinusoid within a fixed frequency interval.
pub fn extract_local(
    time: &[f64],
    values: &[f64],
    f_lo: f64,
    f_hi: f64,
    df: f64,
) -> (f64, f64, f64) {
    let step = df / 10.0;
    let coarse = amplitude_spectrum(time, values, f_lo.max(step / 10.0), f_hi, step);
    match argmax(&coarse.ampls) {
        Some(i) => refine_peak(time, values, coarse.freqs[i], step),
        None => {
            let f_mid = (f_lo + f_hi) / 2.0;
            let (a, ph) = ampl_phase_at(time, values, f_mid);
            (f_mid, a, ph)
        }
    }
}

/// Index of the sinusoid closest to `f` if within `f_res`, else `None`.
fn nearest_within(model: &Model, f: f64, f_res: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, s) in model.sinusoids.iter().enumerate() {
        let d = (s.frequency - f).abs();
        if d < f_res {
            match best {
                Some((_, bd)) if bd <= d => {}
                _ => best = Some((i, d)),
            }
        }
    }
    best.map(|(i, _)| i)
}

/// Re-extract sinusoid `j` against the residual with `j` excluded. Coupled
/// harmonics keep their exact frequency; only amplitude and phase move.
pub(crate) fn merge_candidate(ts: &TimeSeries, model: &mut Model, j: usize, df: f64, f_res: f64) {
    let resid_ex = residual_excluding(ts, model, &[j]);
    let s = &mut model.sinusoids[j];
    if s.harmonic.is_some() {
        let (a, ph) = ampl_phase_at(ts.time(), &resid_ex, s.frequency);
        if a > 0.0 {
            s.amplitude = a;
            s.phase = ph;
        }
    } else {
        let (f, a, ph) = extract_local(
            ts.time(),
            &resid_ex,
            s.frequency - f_res,
            s.frequency + f_res,
            df,
        );
        if a > 0.0 && f.is_finite() {
            s.frequency = f;
            s.amplitude = a;
            s.phase = ph;
        }
    }
}

/// Residual with the listed sinusoids added back in (i.e. excluded from the
/// model).
pub(crate) fn residual_excluding(ts: &TimeSeries, model: &Model, exclude: &[usize]) -> Vec<f64> {
    let mut r = model.residual(ts);
    for &j in exclude {
        let s = &model.sinusoids[j];
        for (ri, &t) in r.iter_mut().zip(ts.time().iter()) {
            *ri += s.eval(t);
        }
    }
    r
}

fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, bv)) if bv >= v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
