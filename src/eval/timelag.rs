//! Walk-forward evaluation of the classical time-lag regressors.
//!
//! A run evaluates one registered algorithm over every ATM: each ATM gets
//! fresh models per fold, trained only on the windows preceding the fold's
//! test block. ATMs that cannot be evaluated are skipped and recorded; the
//! run itself fails only when no ATM could be evaluated at all.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{AtmMetrics, EvaluationResult, SupervisedWindow, WalkForwardConfig};
use crate::error::ForecastError;
use crate::eval::walk_forward::walk_forward_folds;
use crate::eval::{atm_metrics, EvaluationTable};
use crate::models::{ModelRegistry, RegisteredModel};

/// What a sweep does after an algorithm run fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    #[default]
    Continue,
    Halt,
}

#[derive(Debug, Clone, Default)]
pub struct SweepConfig {
    pub walk_forward: WalkForwardConfig,
    pub policy: FailurePolicy,
}

/// A failed algorithm run inside a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmFailure {
    pub index: usize,
    pub name: String,
    pub error: ForecastError,
}

/// Outcome of running every registered algorithm.
#[derive(Debug, Clone, Default)]
pub struct EvaluationSweep {
    /// Successful runs in registry order, each with its per-ATM table.
    pub results: Vec<(EvaluationResult, EvaluationTable)>,
    pub failures: Vec<AlgorithmFailure>,
    /// `true` when `FailurePolicy::Halt` stopped the sweep early.
    pub halted: bool,
}

/// Evaluate one algorithm over all ATM datasets.
pub fn evaluate_models_timelag(
    entry: &RegisteredModel,
    datasets: &BTreeMap<String, Vec<SupervisedWindow>>,
    config: &WalkForwardConfig,
) -> Result<EvaluationTable, ForecastError> {
    config.validate()?;
    if datasets.is_empty() {
        return Err(ForecastError::InvalidConfig("no ATM datasets to evaluate".to_string()));
    }

    let jobs: Vec<(&String, &Vec<SupervisedWindow>)> = datasets.iter().collect();
    let outcomes: Vec<(String, Result<AtmMetrics, ForecastError>)> = jobs
        .par_iter()
        .map(|(atm, windows)| ((*atm).clone(), evaluate_atm(entry, atm, windows, config)))
        .collect();

    let mut table = EvaluationTable::new(entry.name());
    for (atm, outcome) in outcomes {
        match outcome {
            Ok(row) => table.rows.push(row),
            Err(err) => {
                warn!(algorithm = entry.name(), atm = %atm, error = %err, "skipping ATM");
                table.skipped.push((atm, err));
            }
        }
    }

    if table.rows.is_empty() {
        let (_, first) = table.skipped.swap_remove(0);
        return Err(first);
    }
    Ok(table)
}

fn evaluate_atm(
    entry: &RegisteredModel,
    atm: &str,
    windows: &[SupervisedWindow],
    config: &WalkForwardConfig,
) -> Result<AtmMetrics, ForecastError> {
    let folds = walk_forward_folds(windows.len(), config);
    if folds.is_empty() {
        return Err(ForecastError::InsufficientData {
            atm: atm.to_string(),
            required: config.min_train_windows + 1,
            available: windows.len(),
        });
    }

    let mut actual = Vec::new();
    let mut predicted = Vec::new();
    for fold in &folds {
        let mut model = entry.build();
        model.train(&windows[fold.train.clone()])?;
        for window in &windows[fold.test.clone()] {
            let target = window.target.ok_or_else(|| {
                ForecastError::training(entry.name(), format!("held-out window of ATM {atm} has no target"))
            })?;
            predicted.push(model.predict(window)?);
            actual.push(target);
        }
    }

    Ok(atm_metrics(atm, &actual, &predicted, folds.len()))
}

/// Run every algorithm of `registry`.
///
/// Each successful run yields an `EvaluationResult` whose `run_index` is the
/// algorithm's registry index. A failed run is recorded; with
/// `FailurePolicy::Halt` the sweep stops there and keeps what it collected.
pub fn evaluate_classic_models(
    registry: &ModelRegistry,
    datasets: &BTreeMap<String, Vec<SupervisedWindow>>,
    config: &SweepConfig,
) -> EvaluationSweep {
    let mut sweep = EvaluationSweep::default();

    for (index, entry) in registry.entries().iter().enumerate() {
        info!(index, algorithm = entry.name(), atms = datasets.len(), "evaluating algorithm");
        match evaluate_models_timelag(entry, datasets, &config.walk_forward) {
            Ok(table) => {
                let result = table.summary(index);
                info!(
                    index,
                    algorithm = entry.name(),
                    mean_accuracy = result.mean_accuracy,
                    r2 = result.r2,
                    mae = result.mean_absolute_error,
                    "algorithm evaluated"
                );
                sweep.results.push((result, table));
            }
            Err(error) => {
                warn!(index, algorithm = entry.name(), error = %error, "algorithm run failed");
                sweep.failures.push(AlgorithmFailure {
                    index,
                    name: entry.name().to_string(),
                    error,
                });
                if config.policy == FailurePolicy::Halt {
                    sweep.halted = true;
                    break;
                }
            }
        }
    }

    sweep
}
