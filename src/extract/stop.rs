//! Stopping evaluator: accept or reject a tentatively added sinusoid.
//!
//! Two mutually exclusive criteria, resolved once at construction:
//!
//! - `bic`: accept iff the BIC improves by more than `bic_thr`
//!   (rounded to 2 decimals before comparison, so sub-centibel numerical
//!   jitter never flips a decision).
//! - `snr`: accept iff candidate amplitude over local periodogram noise
//!   exceeds the threshold. The `-1` sentinel selects the Baran & Koen
//!   (2021, eq. 6) adaptive threshold derived from the sample count, with
//!   a +0.25 bump when the sampling has gaps longer than 27 time units.

use crate::domain::config::{PipelineConfig, SNR_THR_AUTO};
use crate::domain::types::{StopCriterion, TimeSeries};

/// Sampling-gap length that bumps the adaptive SNR threshold.
const LONG_GAP: f64 = 27.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Supporting statistics behind a decision, for the caller to log or store.
#[derive(Debug, Clone, Copy)]
pub struct StopStats {
    /// BIC improvement (before − after); positive is better.
    pub d_bic: f64,
    /// Candidate amplitude over local noise (0 when noise is unknown).
    pub snr: f64,
    /// The threshold the deciding statistic was compared against.
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy)]
enum Criterion {
    Bic { thr: f64 },
    Snr { thr: f64 },
}

#[derive(Debug, Clone)]
pub struct StoppingEvaluator {
    criterion: Criterion,
}

impl StoppingEvaluator {
    /// Resolve the criterion and any adaptive threshold for this series.
    pub fn new(cfg: &PipelineConfig, ts: &TimeSeries) -> Self {
        let criterion = match cfg.stop_criterion {
            StopCriterion::Bic => Criterion::Bic { thr: cfg.bic_thr },
            StopCriterion::Snr => {
                let thr = if cfg.snr_thr == SNR_THR_AUTO {
                    adaptive_snr_threshold(ts)
                } else {
                    cfg.snr_thr
                };
                Criterion::Snr { thr }
            }
        };
        Self { criterion }
    }

    /// Judge a tentatively added candidate. Stateless; the decision and its
    /// statistics are the only outputs.
    pub fn judge(
        &self,
        bic_before: f64,
        bic_after: f64,
        candidate_ampl: f64,
        local_noise: f64,
    ) -> (Decision, StopStats) {
        let d_bic = bic_before - bic_after;
        let snr = if local_noise > 0.0 {
            candidate_ampl / local_noise
        } else {
            0.0
        };
        match self.criterion {
            Criterion::Bic { thr } => {
                let accept = round2(d_bic) > thr;
                (
                    decision(accept),
                    StopStats { d_bic, snr, threshold: thr },
                )
            }
            Criterion::Snr { thr } => {
                let accept = snr > thr;
                (
                    decision(accept),
                    StopStats { d_bic, snr, threshold: thr },
                )
            }
        }
    }
}

fn decision(accept: bool) -> Decision {
    if accept { Decision::Accept } else { Decision::Reject }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Baran & Koen (2021) eq. 6: `1.201 · √(1.05·ln(N) + 7.184)`, plus 0.25
/// for series with long gaps, rounded to two decimals.
pub fn adaptive_snr_threshold(ts: &TimeSeries) -> f64 {
    let n = ts.n() as f64;
    let mut thr = 1.201 * (1.05 * n.ln() + 7.184).sqrt();
    if ts.has_gap_longer_than(LONG_GAP) {
        thr += 0.25;
    }
    round2(thr)
}
