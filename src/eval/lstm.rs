//! Multi-horizon evaluation of the LSTM forecaster.
//!
//! For one horizon, every ATM's windows (built with that horizon) are split
//! chronologically: the first `train_fraction` for training, the rest held
//! out. Depending on `LstmScope` the network is trained per ATM or once on
//! the union of all training prefixes.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{AtmMetrics, LstmConfig, LstmScope, SupervisedWindow};
use crate::error::ForecastError;
use crate::eval::{atm_metrics, EvaluationTable};
use crate::models::lstm::LstmForecaster;
use crate::models::Forecaster;

/// One horizon's evaluation table.
#[derive(Debug, Clone)]
pub struct LstmEvaluation {
    pub horizon: usize,
    pub table: EvaluationTable,
}

fn split_point(n: usize, fraction: f64) -> usize {
    (n as f64 * fraction).floor() as usize
}

fn check_split(atm: &str, n: usize, train: usize) -> Result<(), ForecastError> {
    if train == 0 || train >= n {
        return Err(ForecastError::InsufficientData {
            atm: atm.to_string(),
            required: 2,
            available: n,
        });
    }
    Ok(())
}

fn score(
    model: &dyn Forecaster,
    atm: &str,
    held_out: &[SupervisedWindow],
) -> Result<AtmMetrics, ForecastError> {
    let mut actual = Vec::with_capacity(held_out.len());
    let mut predicted = Vec::with_capacity(held_out.len());
    for window in held_out {
        let target = window.target.ok_or_else(|| {
            ForecastError::training(model.name(), format!("held-out window of ATM {atm} has no target"))
        })?;
        predicted.push(model.predict(window)?);
        actual.push(target);
    }
    Ok(atm_metrics(atm, &actual, &predicted, 1))
}

fn evaluate_per_atm(
    atm: &str,
    windows: &[SupervisedWindow],
    config: &LstmConfig,
) -> Result<AtmMetrics, ForecastError> {
    let train = split_point(windows.len(), config.train_fraction);
    check_split(atm, windows.len(), train)?;

    let mut model = LstmForecaster::new(config.clone());
    model.train(&windows[..train])?;
    score(&model, atm, &windows[train..])
}

/// Evaluate the LSTM at `horizon` over all ATM datasets.
///
/// Every window in `datasets` must have been built for `horizon`. ATMs with
/// too few windows are skipped; the call fails only when no ATM could be
/// evaluated.
pub fn evaluate_lstm(
    datasets: &BTreeMap<String, Vec<SupervisedWindow>>,
    horizon: usize,
    config: &LstmConfig,
) -> Result<LstmEvaluation, ForecastError> {
    config.validate()?;
    if horizon == 0 {
        return Err(ForecastError::InvalidConfig("horizon must be >= 1".to_string()));
    }
    if datasets.is_empty() {
        return Err(ForecastError::InvalidConfig("no ATM datasets to evaluate".to_string()));
    }
    if let Some(w) = datasets.values().flatten().find(|w| w.horizon != horizon) {
        return Err(ForecastError::InvalidConfig(format!(
            "window of ATM {} at {} targets horizon {}, expected {horizon}",
            w.atm, w.start, w.horizon
        )));
    }
    info!(horizon, atms = datasets.len(), scope = ?config.scope, "evaluating LSTM");

    let outcomes: Vec<(String, Result<AtmMetrics, ForecastError>)> = match config.scope {
        LstmScope::PerAtm => {
            let jobs: Vec<(&String, &Vec<SupervisedWindow>)> = datasets.iter().collect();
            jobs.par_iter()
                .map(|(atm, windows)| ((*atm).clone(), evaluate_per_atm(atm, windows, config)))
                .collect()
        }
        LstmScope::Global => evaluate_global(datasets, config)?,
    };

    let mut table = EvaluationTable::new(LstmForecaster::NAME);
    for (atm, outcome) in outcomes {
        match outcome {
            Ok(row) => table.rows.push(row),
            Err(err) => {
                warn!(horizon, atm = %atm, error = %err, "skipping ATM");
                table.skipped.push((atm, err));
            }
        }
    }

    if table.rows.is_empty() {
        let (_, first) = table.skipped.swap_remove(0);
        return Err(first);
    }
    Ok(LstmEvaluation { horizon, table })
}

fn evaluate_global(
    datasets: &BTreeMap<String, Vec<SupervisedWindow>>,
    config: &LstmConfig,
) -> Result<Vec<(String, Result<AtmMetrics, ForecastError>)>, ForecastError> {
    let mut pooled = Vec::new();
    let mut held_out: Vec<(String, Result<&[SupervisedWindow], ForecastError>)> = Vec::new();

    for (atm, windows) in datasets {
        let train = split_point(windows.len(), config.train_fraction);
        match check_split(atm, windows.len(), train) {
            Ok(()) => {
                pooled.extend_from_slice(&windows[..train]);
                held_out.push((atm.clone(), Ok(&windows[train..])));
            }
            Err(err) => held_out.push((atm.clone(), Err(err))),
        }
    }

    if pooled.is_empty() {
        return Ok(held_out
            .into_iter()
            .filter_map(|(atm, r)| r.err().map(|err| (atm, Err(err))))
            .collect());
    }

    let mut model = LstmForecaster::new(config.clone());
    model.train(&pooled)?;

    Ok(held_out
        .into_iter()
        .map(|(atm, r)| {
            let outcome = r.and_then(|w| score(&model, &atm, w));
            (atm, outcome)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeatureSet, TimeSeriesPoint, WindowConfig};
    use crate::window::build_training_windows;
    use chrono::NaiveDate;

    fn points(n: usize, offset: f64) -> Vec<TimeSeriesPoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let date = start + chrono::Days::new(i as u64);
                let value = offset + 40.0 * ((i % 7) as f64 / 6.0);
                TimeSeriesPoint::from_date(date, value, false)
            })
            .collect()
    }

    fn datasets(horizon: usize) -> BTreeMap<String, Vec<SupervisedWindow>> {
        let cfg = WindowConfig::new(4, FeatureSet::value_only());
        let mut out = BTreeMap::new();
        for (atm, offset) in [("A", 100.0), ("B", 300.0)] {
            let windows = build_training_windows(atm, &points(60, offset), &cfg, horizon).unwrap();
            out.insert(atm.to_string(), windows);
        }
        out
    }

    fn fast_config(scope: LstmScope) -> LstmConfig {
        LstmConfig {
            hidden_size: 6,
            epochs: 10,
            batch_size: 8,
            scope,
            ..LstmConfig::default()
        }
    }

    #[test]
    fn per_atm_records_one_row_per_atm() {
        let eval = evaluate_lstm(&datasets(2), 2, &fast_config(LstmScope::PerAtm)).unwrap();
        assert_eq!(eval.horizon, 2);
        let atms: Vec<&str> = eval.table.rows.iter().map(|r| r.atm.as_str()).collect();
        assert_eq!(atms, vec!["A", "B"]);
        // 60 points, lag 4, horizon 2 -> 55 windows; 44 train, 11 held out.
        assert_eq!(eval.table.rows[0].predictions, 11);
    }

    #[test]
    fn global_scope_trains_once_and_scores_each_atm() {
        let eval = evaluate_lstm(&datasets(1), 1, &fast_config(LstmScope::Global)).unwrap();
        assert_eq!(eval.table.rows.len(), 2);
        assert!(eval.table.rows.iter().all(|r| r.mean_absolute_error.is_finite()));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let data = datasets(3);
        let a = evaluate_lstm(&data, 3, &fast_config(LstmScope::PerAtm)).unwrap();
        let b = evaluate_lstm(&data, 3, &fast_config(LstmScope::PerAtm)).unwrap();
        assert_eq!(a.table.rows, b.table.rows);
    }

    #[test]
    fn too_short_atms_are_skipped() {
        let mut data = datasets(1);
        data.insert("C".to_string(), data["A"][..1].to_vec());
        let eval = evaluate_lstm(&data, 1, &fast_config(LstmScope::PerAtm)).unwrap();
        assert_eq!(eval.table.rows.len(), 2);
        assert_eq!(eval.table.skipped[0].0, "C");

        let only_short = BTreeMap::from([("C".to_string(), data["A"][..1].to_vec())]);
        let err = evaluate_lstm(&only_short, 1, &fast_config(LstmScope::Global)).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { .. }));
    }

    #[test]
    fn windows_built_for_another_horizon_are_rejected() {
        let err = evaluate_lstm(&datasets(2), 3, &fast_config(LstmScope::PerAtm)).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidConfig(_)));

        let mut mixed = datasets(3);
        mixed.insert("C".to_string(), datasets(1)["A"].clone());
        let err = evaluate_lstm(&mixed, 3, &fast_config(LstmScope::Global)).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidConfig(_)));
    }
}
