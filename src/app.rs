//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that
//! parses CLI arguments, loads or generates a light curve, runs the pipeline
//! and prints or exports the results.

use clap::Parser;

use crate::cli::{Command, DemoArgs, PipelineArgs, RunArgs};
use crate::data::SampleConfig;
use crate::domain::types::TimeSeries;
use crate::domain::PipelineConfig;
use crate::error::AppError;
use crate::io::ingest::{ColumnMap, LoadOptions};

pub mod pipeline;

/// Entry point for the `pw` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Demo(args) => handle_demo(args),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let opts = LoadOptions {
        columns: ColumnMap {
            time: args.time_col.clone(),
            flux: args.flux_col.clone(),
            flux_err: args.flux_err_col.clone(),
            quality: args.quality_col.clone(),
        },
        gap_threshold: args.gap_threshold,
        normalize: !args.no_normalize,
    };
    let ts = crate::io::ingest::load_csv(&args.input, &opts)?;
    execute(&ts, &args.pipeline)
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let sample = SampleConfig {
        n: args.samples,
        span: args.span,
        noise_sigma: args.noise,
        seed: args.seed,
        ..SampleConfig::default()
    };
    let ts = crate::data::generate_sample(&sample)?;
    execute(&ts, &args.pipeline)
}

fn execute(ts: &TimeSeries, args: &PipelineArgs) -> Result<(), AppError> {
    let config = pipeline_config_from_args(args);
    let results = pipeline::run_pipeline(ts, &config)?;

    println!("{}", crate::report::format_run_summary(&results, &config));

    if let Some(path) = &args.export {
        crate::io::export::write_results_json(path, &results)?;
    }
    Ok(())
}

pub fn pipeline_config_from_args(args: &PipelineArgs) -> PipelineConfig {
    PipelineConfig {
        select_next: args.select,
        stop_criterion: args.stop,
        bic_thr: args.bic_thr,
        snr_thr: args.snr_thr,
        nyquist_method: args.nyquist,
        nyquist_value: args.nyquist_value,
        nyquist_factor: args.nyquist_factor,
        resolution_factor: args.resolution_factor,
        window_width: args.window_width,
        optimise_step: args.optimise_step,
        replace_step: !args.no_replace_step,
        min_group: args.min_group,
        max_group: args.max_group,
        stop_at_stage: args.stop_at_stage,
        p_orb: args.p_orb,
    }
}
