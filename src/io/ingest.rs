//! CSV light-curve ingestion.
//!
//! Columns are looked up by name so files from different reduction
//! pipelines load without preprocessing. Rows with a non-zero quality flag
//! are dropped when a quality column is mapped. After parsing, the series
//! is split into chunks at sampling gaps and each chunk is normalized by
//! its own median flux (detrends instrument offsets between sectors).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::domain::types::TimeSeries;
use crate::error::AppError;
use crate::math::median;

/// Column-name mapping for the input CSV.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub time: String,
    pub flux: String,
    /// Optional; defaults to unit errors when absent.
    pub flux_err: Option<String>,
    /// Optional; rows with a non-zero value in this column are dropped.
    pub quality: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            time: "time".to_string(),
            flux: "flux".to_string(),
            flux_err: Some("flux_err".to_string()),
            quality: None,
        }
    }
}

/// Ingestion options.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub columns: ColumnMap,
    /// Sampling gap (time units) that starts a new chunk; 0 disables
    /// splitting.
    pub gap_threshold: f64,
    /// Divide each chunk's flux by its median.
    pub normalize: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            columns: ColumnMap::default(),
            gap_threshold: 27.0,
            normalize: true,
        }
    }
}

/// Load a light curve from a CSV file.
pub fn load_csv(path: &Path, opts: &LoadOptions) -> Result<TimeSeries, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::invalid_input(format!("Failed to open '{}': {e}", path.display()))
    })?;
    read_rows(reader_from(file), opts).map_err(|e| {
        AppError::invalid_input(format!("{} (in '{}')", e.message(), path.display()))
    })
}

/// Parse CSV text into a validated, chunked, normalized time series.
pub fn parse_csv(text: &str, opts: &LoadOptions) -> Result<TimeSeries, AppError> {
    read_rows(reader_from(text.as_bytes()), opts)
}

fn reader_from<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(rdr)
}

fn read_rows<R: Read>(mut reader: csv::Reader<R>, opts: &LoadOptions) -> Result<TimeSeries, AppError> {
    let headers = reader
        .headers()
        .map_err(|e| AppError::invalid_input(format!("Failed to read CSV header: {e}")))?
        .clone();
    let col = |name: &str| -> Result<usize, AppError> {
        headers.iter().position(|h| h == name).ok_or_else(|| {
            AppError::invalid_input(format!("Column '{name}' not found in CSV header."))
        })
    };
    let c_time = col(&opts.columns.time)?;
    let c_flux = col(&opts.columns.flux)?;
    let c_err = opts.columns.flux_err.as_deref().map(col).transpose()?;
    let c_quality = opts.columns.quality.as_deref().map(col).transpose()?;

    let mut rows: Vec<(f64, f64, f64)> = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // The header occupies line 1.
        let line = idx + 2;
        let record = result
            .map_err(|e| AppError::invalid_input(format!("Line {line}: CSV parse error: {e}")))?;
        let field = |i: usize| -> Result<f64, AppError> {
            record
                .get(i)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| {
                    AppError::invalid_input(format!(
                        "Line {line}: cannot parse column {} as a number.",
                        i + 1
                    ))
                })
        };

        if let Some(cq) = c_quality {
            if field(cq)? != 0.0 {
                continue;
            }
        }
        let t = field(c_time)?;
        let f = field(c_flux)?;
        let e = match c_err {
            Some(ce) => field(ce)?,
            None => 1.0,
        };
        rows.push((t, f, e));
    }

    rows.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let time: Vec<f64> = rows.iter().map(|r| r.0).collect();
    let mut flux: Vec<f64> = rows.iter().map(|r| r.1).collect();
    let mut flux_err: Vec<f64> = rows.iter().map(|r| r.2).collect();

    let chunks = split_chunks(&time, opts.gap_threshold);
    if opts.normalize {
        normalize_chunks(&mut flux, &mut flux_err, &chunks)?;
    }

    TimeSeries::with_chunks(time, flux, flux_err, chunks)
}

/// Contiguous index ranges separated by sampling gaps larger than
/// `gap_threshold`.
pub fn split_chunks(time: &[f64], gap_threshold: f64) -> Vec<(usize, usize)> {
    let n = time.len();
    if n == 0 {
        return vec![(0, 0)];
    }
    if gap_threshold <= 0.0 {
        return vec![(0, n)];
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    for i in 1..n {
        if time[i] - time[i - 1] > gap_threshold {
            chunks.push((start, i));
            start = i;
        }
    }
    chunks.push((start, n));
    chunks
}

fn normalize_chunks(
    flux: &mut [f64],
    flux_err: &mut [f64],
    chunks: &[(usize, usize)],
) -> Result<(), AppError> {
    for &(a, b) in chunks {
        let med = median(&flux[a..b]);
        if !(med.is_finite() && med != 0.0) {
            return Err(AppError::invalid_input(
                "Chunk median flux is zero or non-finite; cannot normalize.",
            ));
        }
        for v in &mut flux[a..b] {
            *v /= med;
        }
        for v in &mut flux_err[a..b] {
            *v /= med.abs();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mapped_columns_and_filters_quality() {
        let csv = "\
bjd,sap_flux,sap_flux_err,quality
0.0,10.0,0.1,0
1.0,10.2,0.1,0
2.0,99.0,0.1,8
3.0,9.8,0.1,0
";
        let opts = LoadOptions {
            columns: ColumnMap {
                time: "bjd".into(),
                flux: "sap_flux".into(),
                flux_err: Some("sap_flux_err".into()),
                quality: Some("quality".into()),
            },
            gap_threshold: 0.0,
            normalize: false,
        };
        let ts = parse_csv(csv, &opts).unwrap();
        assert_eq!(ts.n(), 3);
        assert!(ts.flux().iter().all(|&f| f < 11.0));
    }

    #[test]
    fn quoted_fields_with_commas_are_parsed() {
        let csv = "time,\"flux, relative\",flux_err\n0.0,\"1.0\",0.1\n1.0,1.1,0.1\n";
        let opts = LoadOptions {
            columns: ColumnMap {
                flux: "flux, relative".into(),
                ..ColumnMap::default()
            },
            normalize: false,
            ..LoadOptions::default()
        };
        let ts = parse_csv(csv, &opts).unwrap();
        assert_eq!(ts.n(), 2);
        assert!((ts.flux()[1] - 1.1).abs() < 1e-12);
    }

    #[test]
    fn missing_column_is_an_input_error() {
        let csv = "time,flux\n0.0,1.0\n1.0,1.1\n";
        let opts = LoadOptions {
            columns: ColumnMap {
                quality: Some("quality".into()),
                ..ColumnMap::default()
            },
            ..LoadOptions::default()
        };
        let err = parse_csv(csv, &opts).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn chunks_split_at_long_gaps_and_normalize_per_chunk() {
        // Two sectors at different flux levels, separated by a 30-unit gap.
        let mut csv = String::from("time,flux,flux_err\n");
        for i in 0..10 {
            csv.push_str(&format!("{},100.0,1.0\n", i as f64));
        }
        for i in 0..10 {
            csv.push_str(&format!("{},200.0,1.0\n", 40.0 + i as f64));
        }
        let ts = parse_csv(&csv, &LoadOptions::default()).unwrap();
        assert_eq!(ts.chunks().len(), 2);
        // Both sectors normalize to 1.0.
        assert!(ts.flux().iter().all(|&f| (f - 1.0).abs() < 1e-12));
        // Errors scale with the same median.
        assert!((ts.flux_err()[0] - 0.01).abs() < 1e-12);
        assert!((ts.flux_err()[15] - 0.005).abs() < 1e-12);
    }

    #[test]
    fn rows_are_sorted_by_time() {
        let csv = "time,flux,flux_err\n2.0,1.0,0.1\n0.0,1.0,0.1\n1.0,1.0,0.1\n";
        let opts = LoadOptions {
            normalize: false,
            ..LoadOptions::default()
        };
        let ts = parse_csv(csv, &opts).unwrap();
        assert_eq!(ts.time(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn missing_error_column_defaults_to_unit_errors() {
        let csv = "time,flux\n0.0,1.0\n1.0,1.1\n";
        let opts = LoadOptions {
            columns: ColumnMap {
                flux_err: None,
                ..ColumnMap::default()
            },
            normalize: false,
            ..LoadOptions::default()
        };
        let ts = parse_csv(csv, &opts).unwrap();
        assert!(ts.flux_err().iter().all(|&e| (e - 1.0).abs() < 1e-12));
    }
}
