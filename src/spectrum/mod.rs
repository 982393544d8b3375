//! Spectral estimation: Lomb-Scargle amplitude spectra, Nyquist estimates
//! and local noise levels for irregularly sampled time series.

pub mod nyquist;
pub mod periodogram;

pub use nyquist::nyquist_frequency;
pub use periodogram::{
    amplitude_spectrum, ampl_phase_at, noise_at, noise_at_freq, noise_spectrum, Spectrum,
};
