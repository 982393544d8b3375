//! Candidate frequency selection from the periodogram.
//!
//! Policy is decided once at pipeline construction. The `hybrid` policy is
//! stateful: it runs in amplitude mode until the stopping evaluator first
//! rejects a candidate, then switches permanently to signal-to-noise mode
//! and the loop retries, which lets low-amplitude signals in quiet spectral
//! regions survive.

use crate::domain::types::SelectNext;
use crate::spectrum::{noise_spectrum, Spectrum};

/// A selected candidate: the grid frequency and its spectrum amplitude.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub frequency: f64,
    pub amplitude: f64,
}

#[derive(Debug, Clone)]
pub struct FrequencySelector {
    mode: SelectNext,
    snr_phase: bool,
}

impl FrequencySelector {
    pub fn new(mode: SelectNext) -> Self {
        Self {
            mode,
            snr_phase: mode == SelectNext::Snr,
        }
    }

    /// Whether a rejection may still flip this selector to SNR mode.
    pub fn can_switch(&self) -> bool {
        self.mode == SelectNext::Hybrid && !self.snr_phase
    }

    /// Switch a hybrid selector to its SNR phase.
    pub fn switch_to_snr(&mut self) {
        debug_assert!(self.can_switch());
        self.snr_phase = true;
    }

    /// Pick the next candidate frequency, or `None` when nothing in the
    /// spectrum scores above zero (search space exhausted).
    ///
    /// Deterministic: on exact score ties the lowest frequency wins.
    pub fn select(&self, spectrum: &Spectrum, window_width: f64) -> Option<Candidate> {
        if spectrum.is_empty() {
            return None;
        }

        let scores: Vec<f64> = if self.snr_phase {
            let noise = noise_spectrum(spectrum, window_width);
            spectrum
                .ampls
                .iter()
                .zip(noise.iter())
                .map(|(&a, &n)| if n > 0.0 { a / n } else { 0.0 })
                .collect()
        } else {
            spectrum.ampls.clone()
        };

        let mut best: Option<(usize, f64)> = None;
        for (i, &score) in scores.iter().enumerate() {
            if !score.is_finite() || score <= 0.0 {
                continue;
            }
            // Strict comparison: the first (lowest-frequency) bin wins ties.
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some((i, score)),
            }
        }

        best.map(|(i, _)| Candidate {
            frequency: spectrum.freqs[i],
            amplitude: spectrum.ampls[i],
        })
    }
}
