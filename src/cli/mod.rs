//! Command-line parsing for the prewhitening pipeline.
//!
//! Argument parsing and command dispatch stay separate from the analysis
//! code; `app` maps parsed arguments onto `PipelineConfig`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::types::{NyquistMethod, SelectNext, StopCriterion};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "pw", version, about = "Iterative sinusoid extraction for variable-star light curves")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline on a CSV light curve.
    Run(RunArgs),
    /// Run the pipeline on a seeded synthetic light curve.
    Demo(DemoArgs),
}

/// Pipeline options shared by all commands.
#[derive(Debug, Parser, Clone)]
pub struct PipelineArgs {
    /// Candidate selection policy.
    #[arg(long, value_enum, default_value_t = SelectNext::Hybrid)]
    pub select: SelectNext,

    /// Stopping criterion for candidate acceptance.
    #[arg(long, value_enum, default_value_t = StopCriterion::Bic)]
    pub stop: StopCriterion,

    /// Required BIC improvement for acceptance.
    #[arg(long, default_value_t = 2.0)]
    pub bic_thr: f64,

    /// SNR threshold; -1 selects the adaptive threshold.
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    pub snr_thr: f64,

    /// Nyquist estimation method.
    #[arg(long, value_enum, default_value_t = NyquistMethod::Simple)]
    pub nyquist: NyquistMethod,

    /// Custom Nyquist frequency (with --nyquist custom).
    #[arg(long, default_value_t = 0.0)]
    pub nyquist_value: f64,

    /// Multiplier on the simple Nyquist estimate.
    #[arg(long, default_value_t = 1.0)]
    pub nyquist_factor: f64,

    /// Frequency resolution factor (resolution = factor / baseline).
    #[arg(long, default_value_t = 1.5)]
    pub resolution_factor: f64,

    /// Width of the local noise window (frequency units).
    #[arg(long, default_value_t = 1.0)]
    pub window_width: f64,

    /// Run the grouped non-linear fit after every accepted sinusoid.
    #[arg(long)]
    pub optimise_step: bool,

    /// Disable the close-frequency replacement step.
    #[arg(long)]
    pub no_replace_step: bool,

    /// Minimum optimizer group size.
    #[arg(long, default_value_t = 45)]
    pub min_group: usize,

    /// Maximum optimizer group size.
    #[arg(long, default_value_t = 50)]
    pub max_group: usize,

    /// Stop after this stage (1-5; 0 runs all stages).
    #[arg(long, default_value_t = 0)]
    pub stop_at_stage: usize,

    /// Orbital period; 0 estimates it from the extracted sinusoids.
    #[arg(long, default_value_t = 0.0)]
    pub p_orb: f64,

    /// Export stage results to JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Options for running on a CSV file.
#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Input CSV light curve.
    #[arg(value_name = "CSV")]
    pub input: PathBuf,

    /// Time column name.
    #[arg(long, default_value = "time")]
    pub time_col: String,

    /// Flux column name.
    #[arg(long, default_value = "flux")]
    pub flux_col: String,

    /// Flux error column name (unit errors when omitted).
    #[arg(long)]
    pub flux_err_col: Option<String>,

    /// Quality flag column name; rows with non-zero flags are dropped.
    #[arg(long)]
    pub quality_col: Option<String>,

    /// Sampling gap (time units) that starts a new chunk; 0 disables.
    #[arg(long, default_value_t = 27.0)]
    pub gap_threshold: f64,

    /// Skip per-chunk median normalization.
    #[arg(long)]
    pub no_normalize: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Options for the synthetic demo.
#[derive(Debug, Parser)]
pub struct DemoArgs {
    /// Number of samples.
    #[arg(short = 'n', long, default_value_t = 2000)]
    pub samples: usize,

    /// Time baseline.
    #[arg(long, default_value_t = 100.0)]
    pub span: f64,

    /// Gaussian noise standard deviation.
    #[arg(long, default_value_t = 0.05)]
    pub noise: f64,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}
