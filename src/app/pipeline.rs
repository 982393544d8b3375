//! The five-stage analysis pipeline.
//!
//! Pure sequencing: every stage consumes the model produced by the previous
//! one and appends an immutable [`StageResult`]. Expected terminations are
//! recorded, never raised; only precondition violations (invalid config)
//! return an error. Already-produced results are preserved when a stage
//! halts the pipeline or `stop_at_stage` cuts it short.

use chrono::Utc;

use crate::domain::types::{
    Model, StageId, StageResult, StageStats, Termination, TimeSeries,
};
use crate::domain::PipelineConfig;
use crate::error::AppError;
use crate::{extract, fit, harmonics};

/// Run the pipeline on a validated time series.
pub fn run_pipeline(ts: &TimeSeries, cfg: &PipelineConfig) -> Result<Vec<StageResult>, AppError> {
    cfg.validate()?;

    let mut results: Vec<StageResult> = Vec::new();
    let mut model = Model::default();
    let mut p_orb = cfg.p_orb;

    for stage in StageId::ALL {
        let (termination, warnings) = match stage {
            StageId::IterativePrewhitening | StageId::IterativePrewhiteningH => {
                let out = extract::extract_sinusoids(ts, cfg, std::mem::take(&mut model));
                model = out.model;
                (out.termination, out.warnings)
            }
            StageId::OptimiseSinusoid => {
                let warnings = fit::optimise_model(ts, &mut model, cfg);
                (Termination::Completed, warnings)
            }
            StageId::CoupleHarmonics => {
                if !(p_orb > 0.0) {
                    p_orb = harmonics::estimate_period(ts, &model, cfg).unwrap_or(0.0);
                }
                let termination = if p_orb > 0.0 {
                    let t = harmonics::couple_harmonics(ts, &mut model, p_orb, cfg);
                    if t == Termination::Completed {
                        harmonics::extend_harmonics(ts, &mut model, p_orb, cfg);
                    }
                    t
                } else {
                    Termination::InsufficientHarmonics
                };
                (termination, Vec::new())
            }
            StageId::OptimiseSinusoidH => {
                let (p, warnings) = fit::optimise_model_harmonic(ts, &mut model, cfg, p_orb);
                p_orb = p;
                (Termination::Completed, warnings)
            }
        };

        let stats = StageStats::from_model(&model, ts, warnings.len());
        results.push(StageResult {
            stage,
            model: model.clone(),
            p_orb,
            termination,
            stats,
            warnings,
            created: Utc::now(),
        });

        if termination.halts_pipeline() {
            break;
        }
        if cfg.stop_at_stage != 0 && stage.number() >= cfg.stop_at_stage && stage.number() < 5 {
            // Record the boundary on the stage we stopped after.
            if let Some(last) = results.last_mut() {
                last.termination = Termination::StageLimitReached;
            }
            break;
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn harmonic_series(p_orb: f64) -> TimeSeries {
        let f = 1.0 / p_orb;
        let time: Vec<f64> = (0..2000).map(|i| i as f64 * 0.05).collect();
        let flux: Vec<f64> = time
            .iter()
            .map(|&t| {
                2.0 * (TAU * f * t + 0.2).sin()
                    + 1.0 * (TAU * 2.0 * f * t + 1.5).sin()
                    + 0.4 * (TAU * 3.0 * f * t + 0.9).sin()
            })
            .collect();
        TimeSeries::new(time, flux, vec![0.01; 2000]).unwrap()
    }

    #[test]
    fn full_run_couples_harmonics_and_refines_the_period() {
        let ts = harmonic_series(2.5);
        let results = run_pipeline(&ts, &PipelineConfig::default()).unwrap();

        assert_eq!(results.len(), 5);
        let last = results.last().unwrap();
        assert_eq!(last.stage, StageId::OptimiseSinusoidH);
        assert_eq!(last.termination, Termination::Completed);
        assert!(last.model.n_harmonics() >= 2);
        assert!((last.p_orb - 2.5).abs() / 2.5 < 0.01, "p_orb = {}", last.p_orb);

        // Stage records carry their own model snapshots.
        assert!(results[0].model.n_sinusoids() >= 3);
        assert_eq!(results[2].stage, StageId::CoupleHarmonics);
    }

    #[test]
    fn stop_at_stage_marks_the_boundary() {
        let ts = harmonic_series(2.5);
        let cfg = PipelineConfig {
            stop_at_stage: 1,
            ..PipelineConfig::default()
        };
        let results = run_pipeline(&ts, &cfg).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].stage, StageId::IterativePrewhitening);
        assert_eq!(results[0].termination, Termination::StageLimitReached);
    }

    #[test]
    fn incommensurate_signal_halts_at_harmonic_coupling() {
        // Two frequencies with no common fundamental in range.
        let time: Vec<f64> = (0..3000).map(|i| i as f64 * 0.05).collect();
        let flux: Vec<f64> = time
            .iter()
            .map(|&t| 2.0 * (TAU * 0.4 * t).sin() + 1.0 * (TAU * 1.11 * t + 0.5).sin())
            .collect();
        let ts = TimeSeries::new(time, flux, vec![0.01; 3000]).unwrap();

        let results = run_pipeline(&ts, &PipelineConfig::default()).unwrap();
        assert_eq!(results.len(), 3);
        let last = results.last().unwrap();
        assert_eq!(last.termination, Termination::InsufficientHarmonics);
        assert_eq!(last.model.n_harmonics(), 0);
        assert_eq!(last.model.n_sinusoids(), 2);
    }

    #[test]
    fn supplied_period_skips_estimation() {
        let ts = harmonic_series(2.5);
        let cfg = PipelineConfig {
            p_orb: 2.5,
            stop_at_stage: 3,
            ..PipelineConfig::default()
        };
        let results = run_pipeline(&ts, &cfg).unwrap();
        let last = results.last().unwrap();
        assert_eq!(last.stage, StageId::CoupleHarmonics);
        assert!((last.p_orb - 2.5).abs() < 1e-12);
        assert!(last.model.n_harmonics() >= 2);
    }

    #[test]
    fn invalid_config_fails_fast() {
        let ts = harmonic_series(2.5);
        let cfg = PipelineConfig {
            bic_thr: -1.0,
            ..PipelineConfig::default()
        };
        assert!(run_pipeline(&ts, &cfg).is_err());
    }
}
