//! Formatted terminal output for pipeline runs.
//!
//! Formatting lives in one place so the extraction and fitting code stays
//! clean and output changes are localized.

use crate::domain::types::{Model, StageResult};
use crate::domain::PipelineConfig;

/// Format the run summary: configuration echo plus one row per stage.
pub fn format_run_summary(results: &[StageResult], cfg: &PipelineConfig) -> String {
    let mut out = String::new();

    out.push_str("=== pw - Iterative Sinusoid Extraction ===\n");
    out.push_str(&format!(
        "Select: {:?} | Stop: {:?} (bic_thr={:.2}, snr_thr={:.2}) | Nyquist: {:?}\n",
        cfg.select_next, cfg.stop_criterion, cfg.bic_thr, cfg.snr_thr, cfg.nyquist_method,
    ));
    if cfg.p_orb > 0.0 {
        out.push_str(&format!("Orbital period (supplied): {:.6}\n", cfg.p_orb));
    }

    out.push_str("\nStages:\n");
    out.push_str(&format!(
        "{:<3} {:<24} {:>6} {:>6} {:>12} {:>10} {:>5}  {}\n",
        "#", "stage", "n_sin", "n_hrm", "bic", "noise", "warn", "termination"
    ));
    for r in results {
        out.push_str(&format!(
            "{:<3} {:<24} {:>6} {:>6} {:>12.3} {:>10.5} {:>5}  {}\n",
            r.stage.number(),
            r.stage.name(),
            r.stats.n_sinusoids,
            r.stats.n_harmonics,
            r.stats.bic,
            r.stats.noise_level,
            r.stats.n_warnings,
            r.termination.reason(),
        ));
    }

    if let Some(last) = results.last() {
        if last.p_orb > 0.0 {
            out.push_str(&format!("\nOrbital period: {:.6}\n", last.p_orb));
        }
        out.push('\n');
        out.push_str(&format_sinusoids(&last.model));
    }

    out
}

/// Format the sinusoid table of a model, uncertainties included when
/// present.
pub fn format_sinusoids(model: &Model) -> String {
    let mut out = String::new();
    out.push_str(&format!("Offset: {:.6}\n", model.offset));
    out.push_str(&format!(
        "{:<4} {:>12} {:>10} {:>12} {:>10} {:>10} {:>10} {:>4}\n",
        "#", "frequency", "f_err", "amplitude", "a_err", "phase", "ph_err", "hrm"
    ));

    let mut order: Vec<usize> = (0..model.sinusoids.len()).collect();
    order.sort_by(|&a, &b| {
        model.sinusoids[a]
            .frequency
            .partial_cmp(&model.sinusoids[b].frequency)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (row, &i) in order.iter().enumerate() {
        let s = &model.sinusoids[i];
        let (fe, ae, pe) = match &s.errors {
            Some(e) => (
                format!("{:.2e}", e.frequency),
                format!("{:.2e}", e.amplitude),
                format!("{:.2e}", e.phase),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        let hrm = s
            .harmonic
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<4} {:>12.6} {:>10} {:>12.6} {:>10} {:>10.6} {:>10} {:>4}\n",
            row + 1,
            s.frequency,
            fe,
            s.amplitude,
            ae,
            s.phase,
            pe,
            hrm,
        ));
    }
    out
}
