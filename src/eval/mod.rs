//! Offline model evaluation.
//!
//! - `walk_forward`: expanding-window fold generation
//! - `timelag`: per-algorithm walk-forward runs and the classical sweep
//! - `lstm`: multi-horizon evaluation of the sequence model

pub mod lstm;
pub mod timelag;
pub mod walk_forward;

use serde::Serialize;

use crate::domain::{AtmMetrics, EvaluationResult};
use crate::math::{finite_mean, mean_absolute_error, mean_accuracy, r2_score};

pub use lstm::{evaluate_lstm, LstmEvaluation};
pub use timelag::{
    evaluate_classic_models, evaluate_models_timelag, AlgorithmFailure, EvaluationSweep,
    FailurePolicy, SweepConfig,
};
pub use walk_forward::{walk_forward_folds, Fold};

/// Per-ATM metrics of one algorithm run plus the ATMs it had to skip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationTable {
    pub algorithm: String,
    pub rows: Vec<AtmMetrics>,
    #[serde(skip)]
    pub skipped: Vec<(String, crate::error::ForecastError)>,
}

impl EvaluationTable {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            rows: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Average the per-ATM rows into one result record.
    pub fn summary(&self, run_index: usize) -> EvaluationResult {
        EvaluationResult {
            algorithm: self.algorithm.clone(),
            run_index,
            mean_accuracy: finite_mean(self.rows.iter().map(|r| r.mean_accuracy)),
            r2: finite_mean(self.rows.iter().map(|r| r.r2)),
            mean_absolute_error: finite_mean(self.rows.iter().map(|r| r.mean_absolute_error)),
            atms_evaluated: self.rows.len(),
            atms_skipped: self.skipped.len(),
        }
    }
}

pub(crate) fn atm_metrics(atm: &str, actual: &[f64], predicted: &[f64], folds: usize) -> AtmMetrics {
    AtmMetrics {
        atm: atm.to_string(),
        mean_accuracy: mean_accuracy(actual, predicted),
        r2: r2_score(actual, predicted),
        mean_absolute_error: mean_absolute_error(actual, predicted),
        predictions: actual.len(),
        folds,
    }
}
