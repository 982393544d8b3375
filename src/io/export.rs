//! Write stage results to JSON.
//!
//! The JSON file is the portable record of a run: one entry per executed
//! stage with the model snapshot, termination, statistics and timestamp.
//! The schema is defined by `domain::StageResult`.

use std::fs::File;
use std::path::Path;

use crate::domain::types::StageResult;
use crate::error::AppError;

/// Write stage results to a pretty-printed JSON file.
pub fn write_results_json(path: &Path, results: &[StageResult]) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| {
        AppError::invalid_input(format!(
            "Failed to create results JSON '{}': {e}",
            path.display()
        ))
    })?;
    serde_json::to_writer_pretty(file, results)
        .map_err(|e| AppError::invalid_input(format!("Failed to write results JSON: {e}")))?;
    Ok(())
}

/// Read stage results back from a JSON file.
pub fn read_results_json(path: &Path) -> Result<Vec<StageResult>, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::invalid_input(format!(
            "Failed to open results JSON '{}': {e}",
            path.display()
        ))
    })?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::invalid_input(format!("Invalid results JSON: {e}")))
}
