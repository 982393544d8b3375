//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during extraction and fitting
//! - handed to an external persistence layer as JSON
//! - reloaded later for inspection or staged reruns

use std::f64::consts::TAU;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::math::{mean, std_dev, wrap_phase};

/// How the next candidate frequency is picked from the periodogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SelectNext {
    /// Global maximum of the amplitude spectrum.
    Amp,
    /// Maximum of amplitude divided by the local noise spectrum.
    Snr,
    /// Start with `amp`; switch permanently to `snr` on the first rejection.
    Hybrid,
}

/// Statistical criterion deciding whether a candidate sinusoid is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StopCriterion {
    /// Bayesian Information Criterion improvement threshold.
    Bic,
    /// Signal-to-noise of the candidate amplitude against local noise.
    Snr,
}

/// How the upper frequency bound of the periodogram is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NyquistMethod {
    /// `nyquist_factor / (2 · Δt_min)`.
    Simple,
    /// Koen (2006) pair-sum estimate, aware of the actual sampling pattern.
    Rigorous,
    /// Caller-supplied value, used only if it exceeds the simple estimate.
    Custom,
}

/// An immutable, validated photometric time series.
///
/// Time is strictly increasing; flux is expected to be median-normalized
/// (the ingest layer takes care of that). `chunks` are disjoint contiguous
/// index ranges ("sectors") with independent normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    time: Vec<f64>,
    flux: Vec<f64>,
    flux_err: Vec<f64>,
    chunks: Vec<(usize, usize)>,
}

impl TimeSeries {
    /// Construct and validate a time series.
    ///
    /// Fails fast on fewer than 2 samples, mismatched column lengths or
    /// non-monotonic time. This is a precondition violation, distinct from
    /// the expected "insufficient data" termination of the extraction loop.
    pub fn new(time: Vec<f64>, flux: Vec<f64>, flux_err: Vec<f64>) -> Result<Self, AppError> {
        let n = time.len();
        let chunks = vec![(0, n)];
        Self::with_chunks(time, flux, flux_err, chunks)
    }

    /// Construct with explicit sector boundaries.
    pub fn with_chunks(
        time: Vec<f64>,
        flux: Vec<f64>,
        flux_err: Vec<f64>,
        chunks: Vec<(usize, usize)>,
    ) -> Result<Self, AppError> {
        let n = time.len();
        if n < 2 {
            return Err(AppError::invalid_input(format!(
                "Time series needs at least 2 samples, got {n}."
            )));
        }
        if flux.len() != n || flux_err.len() != n {
            return Err(AppError::invalid_input(format!(
                "Column length mismatch: time={n}, flux={}, flux_err={}.",
                flux.len(),
                flux_err.len()
            )));
        }
        if time.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AppError::invalid_input(
                "Time must be strictly increasing.",
            ));
        }
        if time.iter().chain(flux.iter()).any(|v| !v.is_finite()) {
            return Err(AppError::invalid_input("Non-finite time or flux value."));
        }
        if chunks.is_empty()
            || chunks.windows(2).any(|w| w[0].1 != w[1].0)
            || chunks[0].0 != 0
            || chunks[chunks.len() - 1].1 != n
            || chunks.iter().any(|&(a, b)| b <= a)
        {
            return Err(AppError::invalid_input(
                "Chunk indices must be disjoint, contiguous and cover all samples.",
            ));
        }
        Ok(Self {
            time,
            flux,
            flux_err,
            chunks,
        })
    }

    pub fn n(&self) -> usize {
        self.time.len()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn flux_err(&self) -> &[f64] {
        &self.flux_err
    }

    pub fn chunks(&self) -> &[(usize, usize)] {
        &self.chunks
    }

    /// Total time baseline `max(time) − min(time)`.
    pub fn t_tot(&self) -> f64 {
        self.time[self.time.len() - 1] - self.time[0]
    }

    /// Smallest time sampling interval.
    pub fn t_step_min(&self) -> f64 {
        self.time
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(f64::INFINITY, f64::min)
    }

    /// Whether any sampling gap exceeds `threshold` (same unit as time).
    pub fn has_gap_longer_than(&self, threshold: f64) -> bool {
        self.time.windows(2).any(|w| w[1] - w[0] > threshold)
    }
}

/// Formal parameter uncertainties (Montgomery & O'Donoghue 1999).
///
/// Derived from the residual scatter after an optimizer pass, never
/// independent state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SinusoidErrors {
    pub frequency: f64,
    pub amplitude: f64,
    pub phase: f64,
}

/// One sinusoidal component: `amplitude · sin(2π·frequency·t + phase)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sinusoid {
    pub frequency: f64,
    pub amplitude: f64,
    /// Phase in radians, wrapped to `[0, 2π)`.
    pub phase: f64,
    /// Harmonic number when this component is locked to the orbital period.
    pub harmonic: Option<u32>,
    /// Attached after each optimization pass.
    pub errors: Option<SinusoidErrors>,
}

impl Sinusoid {
    pub fn new(frequency: f64, amplitude: f64, phase: f64) -> Self {
        Self {
            frequency,
            amplitude,
            phase: wrap_phase(phase),
            harmonic: None,
            errors: None,
        }
    }

    /// Evaluate the sine wave at a single time sample.
    pub fn eval(&self, t: f64) -> f64 {
        self.amplitude * (TAU * self.frequency * t + self.phase).sin()
    }

    /// Fold a negative amplitude into the phase and re-wrap.
    pub fn normalize(&mut self) {
        if self.amplitude < 0.0 {
            self.amplitude = -self.amplitude;
            self.phase += std::f64::consts::PI;
        }
        self.phase = wrap_phase(self.phase);
    }
}

/// The sinusoid model: a constant offset plus an ordered set of sine waves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub offset: f64,
    pub sinusoids: Vec<Sinusoid>,
}

impl Model {
    pub fn n_sinusoids(&self) -> usize {
        self.sinusoids.len()
    }

    pub fn n_harmonics(&self) -> usize {
        self.sinusoids.iter().filter(|s| s.harmonic.is_some()).count()
    }

    /// Synthetic flux at the given time samples.
    pub fn predict(&self, time: &[f64]) -> Vec<f64> {
        let mut out = vec![self.offset; time.len()];
        for s in &self.sinusoids {
            for (y, &t) in out.iter_mut().zip(time.iter()) {
                *y += s.eval(t);
            }
        }
        out
    }

    /// Observed flux minus synthetic flux. Recomputed on every call; the
    /// residual changes whenever the model changes.
    pub fn residual(&self, ts: &TimeSeries) -> Vec<f64> {
        let model = self.predict(ts.time());
        ts.flux()
            .iter()
            .zip(model.iter())
            .map(|(f, m)| f - m)
            .collect()
    }

    /// Re-determine the constant offset from the current sinusoids.
    pub fn update_offset(&mut self, ts: &TimeSeries) {
        let saved = self.offset;
        self.offset = 0.0;
        let resid = self.residual(ts);
        self.offset = mean(&resid);
        if !self.offset.is_finite() {
            self.offset = saved;
        }
    }

    /// Number of free parameters for information criteria.
    ///
    /// Free-frequency sinusoids cost 3 each; harmonics cost 2 (amplitude and
    /// phase) plus a single shared base frequency; the offset costs 1.
    pub fn n_param(&self) -> usize {
        let n_harm = self.n_harmonics();
        let n_free = self.n_sinusoids() - n_harm;
        1 + 3 * n_free + 2 * n_harm + usize::from(n_harm > 0)
    }

    /// BIC of the residuals: `n·ln(SSE/n) + k·ln(n)`. Lower is better.
    pub fn bic(&self, ts: &TimeSeries) -> f64 {
        let resid = self.residual(ts);
        bic_of(&resid, self.n_param())
    }

    /// Standard deviation of the residuals (the model noise level).
    pub fn noise_level(&self, ts: &TimeSeries) -> f64 {
        std_dev(&self.residual(ts))
    }
}

/// BIC for a residual vector and a parameter count.
pub fn bic_of(resid: &[f64], n_param: usize) -> f64 {
    let n = resid.len();
    if n == 0 {
        return f64::INFINITY;
    }
    // Floor the per-point variance so a numerically perfect fit does not
    // produce -inf and break comparisons.
    let msq = (resid.iter().map(|r| r * r).sum::<f64>() / n as f64).max(1e-300);
    n as f64 * msq.ln() + n_param as f64 * (n as f64).ln()
}

/// Pipeline stage identifiers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    IterativePrewhitening,
    OptimiseSinusoid,
    CoupleHarmonics,
    IterativePrewhiteningH,
    OptimiseSinusoidH,
}

impl StageId {
    pub const ALL: [StageId; 5] = [
        StageId::IterativePrewhitening,
        StageId::OptimiseSinusoid,
        StageId::CoupleHarmonics,
        StageId::IterativePrewhiteningH,
        StageId::OptimiseSinusoidH,
    ];

    /// 1-based stage number (matches `stop_at_stage`).
    pub fn number(self) -> usize {
        match self {
            StageId::IterativePrewhitening => 1,
            StageId::OptimiseSinusoid => 2,
            StageId::CoupleHarmonics => 3,
            StageId::IterativePrewhiteningH => 4,
            StageId::OptimiseSinusoidH => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StageId::IterativePrewhitening | StageId::IterativePrewhiteningH => {
                "iterative_prewhitening"
            }
            StageId::OptimiseSinusoid => "optimise_sinusoid",
            StageId::CoupleHarmonics => "couple_harmonics",
            StageId::OptimiseSinusoidH => "optimise_sinusoid_h",
        }
    }
}

/// Why a stage (or the pipeline) stopped. These are expected outcomes, not
/// errors; each carries a machine-checkable variant plus a reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The stage ran to its natural end.
    Completed,
    /// The stopping evaluator rejected the next candidate.
    NoSignificantFrequencies,
    /// No candidate frequencies left below Nyquist.
    SearchSpaceExhausted,
    /// Fewer than 2 samples or zero time baseline.
    InsufficientData,
    /// Harmonic coupling found too few matching sinusoids.
    InsufficientHarmonics,
    /// The configured `stop_at_stage` boundary was reached.
    StageLimitReached,
}

impl Termination {
    pub fn reason(self) -> &'static str {
        match self {
            Termination::Completed => "stage completed",
            Termination::NoSignificantFrequencies => "no significant frequencies found",
            Termination::SearchSpaceExhausted => "frequency search space exhausted",
            Termination::InsufficientData => "insufficient data",
            Termination::InsufficientHarmonics => "insufficient harmonics found",
            Termination::StageLimitReached => "stage limit reached",
        }
    }

    /// Whether later stages should still run after this termination.
    pub fn halts_pipeline(self) -> bool {
        matches!(
            self,
            Termination::InsufficientData
                | Termination::InsufficientHarmonics
                | Termination::StageLimitReached
        )
    }
}

/// A non-fatal warning from the batched optimizer: one group failed to
/// converge within its iteration budget and kept its previous parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitWarning {
    pub group_index: usize,
    pub detail: String,
}

/// Statistics supporting a stage's termination decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStats {
    pub n_sinusoids: usize,
    pub n_harmonics: usize,
    pub n_param: usize,
    pub bic: f64,
    pub noise_level: f64,
    pub n_warnings: usize,
}

impl StageStats {
    pub fn from_model(model: &Model, ts: &TimeSeries, n_warnings: usize) -> Self {
        Self {
            n_sinusoids: model.n_sinusoids(),
            n_harmonics: model.n_harmonics(),
            n_param: model.n_param(),
            bic: model.bic(ts),
            noise_level: model.noise_level(ts),
            n_warnings,
        }
    }
}

/// Immutable record produced once per executed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageId,
    pub model: Model,
    /// Orbital period in effect after this stage (0 = none).
    pub p_orb: f64,
    pub termination: Termination,
    pub stats: StageStats,
    pub warnings: Vec<FitWarning>,
    pub created: DateTime<Utc>,
}
