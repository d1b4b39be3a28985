//! Export evaluation results.
//!
//! Tables use the spreadsheet convention of the planning team: `;` as the
//! field separator and a decimal comma. One file is written per algorithm run
//! (`evaluation_results_class_{i}.csv`), one with every run concatenated
//! (`evaluation_results_full.csv`) and one per LSTM horizon
//! (`evaluation_results_lstm_{h}.csv`). A JSON summary of the classic sweep
//! sits next to them.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::{AtmMetrics, EvaluationResult};
use crate::eval::{EvaluationSweep, EvaluationTable, LstmEvaluation};
use crate::error::AppError;

const HEADER: [&str; 5] = ["atm", "mean_accuracy", "r2", "mean_absolute_error", "algorithm"];

/// Format a float with a decimal comma; non-finite values become empty cells.
pub fn decimal_comma(v: f64) -> String {
    if v.is_finite() {
        v.to_string().replace('.', ",")
    } else {
        String::new()
    }
}

fn row(m: &AtmMetrics, algorithm: &str) -> Vec<String> {
    vec![
        m.atm.clone(),
        decimal_comma(m.mean_accuracy),
        decimal_comma(m.r2),
        decimal_comma(m.mean_absolute_error),
        algorithm.to_string(),
    ]
}

fn create_dir(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::new(2, format!("Failed to create results directory '{}': {e}", dir.display())))
}

fn writer(path: &Path) -> Result<csv::Writer<File>, AppError> {
    csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))
}

fn write_err(path: &Path, e: impl std::fmt::Display) -> AppError {
    AppError::new(2, format!("Failed to write export CSV '{}': {e}", path.display()))
}

/// Write tables to one CSV; `horizon` adds the LSTM column.
pub fn write_tables_csv(
    path: &Path,
    tables: &[&EvaluationTable],
    horizon: Option<usize>,
) -> Result<usize, AppError> {
    let mut w = writer(path)?;

    let mut header: Vec<&str> = HEADER.to_vec();
    if horizon.is_some() {
        header.push("horizon");
    }
    w.write_record(&header).map_err(|e| write_err(path, e))?;

    let mut rows = 0;
    for table in tables {
        for m in &table.rows {
            let mut record = row(m, &table.algorithm);
            if let Some(h) = horizon {
                record.push(h.to_string());
            }
            w.write_record(&record).map_err(|e| write_err(path, e))?;
            rows += 1;
        }
    }
    w.flush().map_err(|e| write_err(path, e))?;
    Ok(rows)
}

#[derive(Serialize)]
struct SweepSummary<'a> {
    results: Vec<&'a EvaluationResult>,
    failures: Vec<FailureRecord<'a>>,
    halted: bool,
}

#[derive(Serialize)]
struct FailureRecord<'a> {
    index: usize,
    algorithm: &'a str,
    error: String,
}

/// Write every export of a classic sweep under `dir`. Returns the written paths.
pub fn export_classic_sweep(dir: &Path, sweep: &EvaluationSweep) -> Result<Vec<PathBuf>, AppError> {
    create_dir(dir)?;
    let mut written = Vec::new();

    for (result, table) in &sweep.results {
        let path = dir.join(format!("evaluation_results_class_{}.csv", result.run_index));
        write_tables_csv(&path, &[table], None)?;
        written.push(path);
    }

    let full = dir.join("evaluation_results_full.csv");
    let tables: Vec<&EvaluationTable> = sweep.results.iter().map(|(_, t)| t).collect();
    write_tables_csv(&full, &tables, None)?;
    written.push(full);

    let summary_path = dir.join("evaluation_summary.json");
    let summary = SweepSummary {
        results: sweep.results.iter().map(|(r, _)| r).collect(),
        failures: sweep
            .failures
            .iter()
            .map(|f| FailureRecord {
                index: f.index,
                algorithm: &f.name,
                error: f.error.to_string(),
            })
            .collect(),
        halted: sweep.halted,
    };
    let file = File::create(&summary_path).map_err(|e| {
        AppError::new(2, format!("Failed to create summary JSON '{}': {e}", summary_path.display()))
    })?;
    serde_json::to_writer_pretty(file, &summary)
        .map_err(|e| AppError::new(2, format!("Failed to write summary JSON: {e}")))?;
    written.push(summary_path);

    Ok(written)
}

/// Write one CSV per LSTM horizon under `dir`.
pub fn export_lstm_evaluations(dir: &Path, evaluations: &[LstmEvaluation]) -> Result<Vec<PathBuf>, AppError> {
    create_dir(dir)?;
    let mut written = Vec::new();
    for eval in evaluations {
        let path = dir.join(format!("evaluation_results_lstm_{}.csv", eval.horizon));
        write_tables_csv(&path, &[&eval.table], Some(eval.horizon))?;
        written.push(path);
    }
    Ok(written)
}
