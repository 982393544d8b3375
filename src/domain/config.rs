//! Pipeline configuration.
//!
//! A single immutable record of scalar knobs passed by reference into every
//! component. Method choices are closed enums dispatched once at pipeline
//! construction; validation happens here, never silently coerced later.

use serde::{Deserialize, Serialize};

use crate::domain::types::{NyquistMethod, SelectNext, StopCriterion, TimeSeries};
use crate::error::AppError;

/// Sentinel for `snr_thr` meaning "use the built-in adaptive threshold".
pub const SNR_THR_AUTO: f64 = -1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidate frequency selection policy.
    pub select_next: SelectNext,
    /// Stopping criterion for the extraction loop.
    pub stop_criterion: StopCriterion,
    /// Required BIC improvement for acceptance (must be > 0).
    pub bic_thr: f64,
    /// SNR acceptance threshold; -1 selects the adaptive built-in.
    pub snr_thr: f64,
    /// How the Nyquist frequency is computed.
    pub nyquist_method: NyquistMethod,
    /// Caller-supplied Nyquist value for `custom` (override-if-larger).
    pub nyquist_value: f64,
    /// Multiplier on the simple Nyquist estimate.
    pub nyquist_factor: f64,
    /// Frequency resolution factor: resolution = factor / time baseline.
    pub resolution_factor: f64,
    /// Width of the periodogram noise window (frequency units).
    pub window_width: f64,
    /// Run the grouped non-linear fit after every accepted sinusoid.
    pub optimise_step: bool,
    /// Attempt replacement of closely spaced sinusoids after every accept.
    pub replace_step: bool,
    /// Minimum sinusoids per non-linear fit group.
    pub min_group: usize,
    /// Maximum sinusoids per non-linear fit group.
    pub max_group: usize,
    /// Halt after this stage (0 = run all 5 stages).
    pub stop_at_stage: usize,
    /// Known orbital period (0 = estimate internally).
    pub p_orb: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            select_next: SelectNext::Hybrid,
            stop_criterion: StopCriterion::Bic,
            bic_thr: 2.0,
            snr_thr: SNR_THR_AUTO,
            nyquist_method: NyquistMethod::Simple,
            nyquist_value: 0.0,
            nyquist_factor: 1.0,
            resolution_factor: 1.5,
            window_width: 1.0,
            optimise_step: false,
            replace_step: true,
            min_group: 45,
            max_group: 50,
            stop_at_stage: 0,
            p_orb: 0.0,
        }
    }
}

impl PipelineConfig {
    /// Reject conflicting or out-of-range settings before any stage runs.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.bic_thr.is_finite() && self.bic_thr > 0.0) {
            return Err(AppError::config(format!(
                "bic_thr must be > 0, got {}.",
                self.bic_thr
            )));
        }
        if self.snr_thr != SNR_THR_AUTO && !(self.snr_thr.is_finite() && self.snr_thr >= 0.0) {
            return Err(AppError::config(format!(
                "snr_thr must be >= 0 or -1 (auto), got {}.",
                self.snr_thr
            )));
        }
        if !(self.resolution_factor.is_finite() && self.resolution_factor > 0.0) {
            return Err(AppError::config(format!(
                "resolution_factor must be > 0, got {}.",
                self.resolution_factor
            )));
        }
        if !(self.window_width.is_finite() && self.window_width > 0.0) {
            return Err(AppError::config(format!(
                "window_width must be > 0, got {}.",
                self.window_width
            )));
        }
        if !(self.nyquist_factor.is_finite() && self.nyquist_factor > 0.0) {
            return Err(AppError::config(format!(
                "nyquist_factor must be > 0, got {}.",
                self.nyquist_factor
            )));
        }
        if self.nyquist_method == NyquistMethod::Custom
            && !(self.nyquist_value.is_finite() && self.nyquist_value > 0.0)
        {
            return Err(AppError::config(
                "nyquist_method=custom requires nyquist_value > 0.",
            ));
        }
        if self.min_group == 0 || self.max_group == 0 {
            return Err(AppError::config("Group sizes must be positive."));
        }
        if self.min_group > self.max_group {
            return Err(AppError::config(format!(
                "min_group ({}) must not exceed max_group ({}).",
                self.min_group, self.max_group
            )));
        }
        if self.stop_at_stage > 5 {
            return Err(AppError::config(format!(
                "stop_at_stage must be in 0..=5, got {}.",
                self.stop_at_stage
            )));
        }
        if !(self.p_orb.is_finite() && self.p_orb >= 0.0) {
            return Err(AppError::config(format!(
                "p_orb must be >= 0 (0 = estimate), got {}.",
                self.p_orb
            )));
        }
        Ok(())
    }

    /// Achievable spectral resolution for a given time series.
    pub fn f_resolution(&self, ts: &TimeSeries) -> f64 {
        self.resolution_factor / ts.t_tot()
    }
}
