//! The workflows behind each CLI command.
//!
//! history CSV -> supervised windows -> {classic sweep | LSTM horizons | predictor}
//!
//! Each `run_*` returns everything it computed so `app` only has to print and
//! tests can inspect results without parsing terminal output.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::data::{RawDataSource, SampleConfig, generate_history};
use crate::domain::{LSTM_HORIZONS, PipelineConfig, RawObservation};
use crate::error::{AppError, ForecastError};
use crate::eval::{
    EvaluationSweep, FailurePolicy, LstmEvaluation, SweepConfig, evaluate_classic_models, evaluate_lstm,
};
use crate::io::{
    CurrentStateData, HistoryData, RowError, export_classic_sweep, export_lstm_evaluations, load_current_state,
    load_history, write_history,
};
use crate::models::{ModelRegistry, RegisteredModel};
use crate::predictor::{AtmPredictor, DueReport, PredictorConfig, TrainingReport};
use crate::window::build_all_training_windows;

/// Outcome of `import-data` / `generate-sample`.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub source: String,
    pub path: PathBuf,
    pub atms: usize,
    pub rows_written: usize,
}

/// Fetch raw observations and write them as the normalized history CSV.
///
/// Rows are written sorted, so importing the same observations twice leaves
/// the file unchanged.
pub fn run_import(source: &dyn RawDataSource, out: &Path) -> Result<ImportSummary, AppError> {
    let description = source.describe();
    info!(source = %description, "fetching raw data");
    let observations = source.fetch()?;
    if observations.is_empty() {
        return Err(AppError::new(
            3,
            format!("Source {description} returned no observations."),
        ));
    }
    write_observations(description, &observations, out)
}

/// Generate a synthetic history and write it like an import.
pub fn run_generate_sample(config: &SampleConfig, out: &Path) -> Result<ImportSummary, AppError> {
    let observations = generate_history(config)?;
    write_observations(format!("sample(seed={})", config.seed), &observations, out)
}

fn write_observations(
    source: String,
    observations: &[RawObservation],
    out: &Path,
) -> Result<ImportSummary, AppError> {
    let atms = observations
        .iter()
        .map(|o| o.atm_code.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let rows_written = write_history(out, observations)?;
    info!(path = %out.display(), atms, rows = rows_written, "history written");

    Ok(ImportSummary {
        source,
        path: out.to_path_buf(),
        atms,
        rows_written,
    })
}

/// Outcome of `evaluate-classic-models`.
#[derive(Debug, Clone)]
pub struct ClassicRun {
    pub history: HistoryData,
    /// ATMs too short to build a single training window.
    pub windows_skipped: BTreeMap<String, ForecastError>,
    pub sweep: EvaluationSweep,
    pub exports: Vec<PathBuf>,
}

/// Walk-forward evaluation of every classical algorithm, then export.
pub fn run_classic(config: &PipelineConfig) -> Result<ClassicRun, AppError> {
    config.validate()?;
    let history = load_history_logged(&config.history_path)?;

    let sets = build_all_training_windows(&history.series, &config.window, 1)?;
    for (atm, err) in &sets.skipped {
        warn!(atm = %atm, error = %err, "ATM skipped");
    }
    if sets.windows.is_empty() {
        return Err(no_windows(&config.history_path, config.window.lag));
    }

    let registry = ModelRegistry::classic(&config.params);
    let sweep_config = SweepConfig {
        walk_forward: config.walk_forward.clone(),
        policy: if config.halt_on_failure {
            FailurePolicy::Halt
        } else {
            FailurePolicy::Continue
        },
    };
    let sweep = evaluate_classic_models(&registry, &sets.windows, &sweep_config);

    if sweep.results.is_empty() {
        if let Some(first) = sweep.failures.first() {
            return Err(AppError::new(
                first.error.exit_code(),
                format!("No algorithm could be evaluated; [{}] {}: {}", first.index, first.name, first.error),
            ));
        }
    }

    let exports = export_classic_sweep(&config.results_dir, &sweep)?;
    Ok(ClassicRun {
        history,
        windows_skipped: sets.skipped,
        sweep,
        exports,
    })
}

/// Outcome of `evaluate-deep-models`.
#[derive(Debug, Clone)]
pub struct DeepRun {
    pub history: HistoryData,
    pub evaluations: Vec<LstmEvaluation>,
    /// Horizons that produced no evaluation at all.
    pub failures: Vec<(usize, ForecastError)>,
    pub exports: Vec<PathBuf>,
}

/// LSTM evaluation for every horizon in `LSTM_HORIZONS`, then export.
pub fn run_deep(config: &PipelineConfig) -> Result<DeepRun, AppError> {
    config.validate()?;
    let history = load_history_logged(&config.history_path)?;

    let mut evaluations = Vec::new();
    let mut failures = Vec::new();
    for horizon in LSTM_HORIZONS {
        let sets = build_all_training_windows(&history.series, &config.window, horizon)?;
        let outcome = match sets.skipped.values().next() {
            Some(err) if sets.windows.is_empty() => Err(err.clone()),
            _ => evaluate_lstm(&sets.windows, horizon, &config.lstm),
        };

        match outcome {
            Ok(mut evaluation) => {
                evaluation.table.skipped.extend(sets.skipped);
                let summary = evaluation.table.summary(horizon);
                info!(
                    horizon,
                    accuracy = summary.mean_accuracy,
                    atms = summary.atms_evaluated,
                    "LSTM horizon evaluated"
                );
                evaluations.push(evaluation);
            }
            Err(err) => {
                warn!(horizon, error = %err, "LSTM horizon failed");
                failures.push((horizon, err));
            }
        }
    }

    if evaluations.is_empty() {
        if let Some((horizon, err)) = failures.first() {
            return Err(AppError::new(
                err.exit_code(),
                format!("No LSTM horizon could be evaluated; horizon {horizon}: {err}"),
            ));
        }
    }

    let exports = export_lstm_evaluations(&config.results_dir, &evaluations)?;
    Ok(DeepRun {
        history,
        evaluations,
        failures,
        exports,
    })
}

/// Outcome of `apply-models`.
#[derive(Debug, Clone)]
pub struct ApplyRun {
    pub history: HistoryData,
    pub current: CurrentStateData,
    pub training: TrainingReport,
    pub decisions: DueReport,
}

/// Train one model per ATM on the history, then decide every ATM in the
/// current-state file.
pub fn run_apply(config: &PipelineConfig, data_path: &Path) -> Result<ApplyRun, AppError> {
    config.validate()?;
    let history = load_history_logged(&config.history_path)?;

    // A bad current-state file fails before any model is trained.
    let current = load_current_state(data_path, &config.window)?;
    log_row_errors(&current.row_errors);
    for (atm, err) in &current.windows.skipped {
        warn!(atm = %atm, error = %err, "no current window");
    }

    let model = predictor_model(config);
    let model_name = model.name().to_string();
    let predictor_config = PredictorConfig {
        window: config.window.clone(),
        model,
        rule: config.rule.clone(),
    };
    let predictor = AtmPredictor::new(&history.series, predictor_config, false)?;
    let training = predictor.train_all();
    info!(
        trained = training.trained.len(),
        failed = training.failures.len(),
        model = %model_name,
        "predictor trained"
    );

    let decisions = predictor.decide_all(&current.windows.windows);
    info!(
        decided = decisions.decisions.len(),
        due = decisions.due_atms().count(),
        unknown = decisions.unknown.len(),
        "decisions made"
    );

    Ok(ApplyRun {
        history,
        current,
        training,
        decisions,
    })
}

fn predictor_model(config: &PipelineConfig) -> RegisteredModel {
    match config.algorithm.classic() {
        Some(algorithm) => RegisteredModel::classic(algorithm, &config.params),
        None => RegisteredModel::lstm(&config.lstm),
    }
}

fn load_history_logged(path: &Path) -> Result<HistoryData, AppError> {
    let history = load_history(path)?;
    log_row_errors(&history.row_errors);
    info!(
        path = %path.display(),
        atms = history.series.len(),
        points = history.series.total_points(),
        rows_skipped = history.row_errors.len(),
        "history loaded"
    );
    Ok(history)
}

fn log_row_errors(errors: &[RowError]) {
    for err in errors {
        warn!(line = err.line, atm = ?err.atm, "{}", err.message);
    }
}

fn no_windows(path: &Path, lag: usize) -> AppError {
    AppError::new(
        3,
        format!("No ATM in '{}' has more than {lag} observations.", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ClassicAlgorithm, FeatureSet, LstmConfig, ModelParams, PredictorModel, WalkForwardConfig,
        WindowConfig,
    };
    use crate::predictor::DecisionRule;
    use std::io::Write;

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            history_path: dir.join("history.csv"),
            results_dir: dir.join("results"),
            window: WindowConfig::new(7, FeatureSet::default()),
            walk_forward: WalkForwardConfig {
                max_folds: Some(3),
                ..WalkForwardConfig::default()
            },
            params: ModelParams {
                forest_trees: 5,
                ..ModelParams::default()
            },
            lstm: LstmConfig {
                hidden_size: 4,
                epochs: 3,
                ..LstmConfig::default()
            },
            algorithm: PredictorModel::Ridge,
            rule: DecisionRule::default(),
            halt_on_failure: false,
        }
    }

    fn sample(dir: &Path, atms: usize, days: usize) -> ImportSummary {
        let sample = SampleConfig {
            atms,
            days,
            ..SampleConfig::default()
        };
        run_generate_sample(&sample, &dir.join("history.csv")).unwrap()
    }

    #[test]
    fn generated_sample_is_a_valid_history() {
        let dir = tempfile::tempdir().unwrap();
        let summary = sample(dir.path(), 3, 60);
        assert_eq!(summary.atms, 3);
        assert_eq!(summary.rows_written, 180);

        let history = load_history(&summary.path).unwrap();
        assert_eq!(history.series.len(), 3);
        assert!(history.row_errors.is_empty());
    }

    #[test]
    fn classic_run_evaluates_every_algorithm_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path(), 2, 90);
        let cfg = config(dir.path());

        let run = run_classic(&cfg).unwrap();
        assert_eq!(run.sweep.results.len(), ClassicAlgorithm::ALL.len());
        assert!(run.sweep.failures.is_empty());
        assert!(cfg.results_dir.join("evaluation_results_full.csv").exists());
        assert!(cfg.results_dir.join("evaluation_results_class_4.csv").exists());
        assert!(run.exports.iter().any(|p| p.ends_with("evaluation_summary.json")));
    }

    #[test]
    fn classic_run_without_enough_history_fails() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path(), 2, 5);
        let err = run_classic(&config(dir.path())).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn deep_run_covers_all_horizons() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path(), 1, 60);
        let cfg = config(dir.path());

        let run = run_deep(&cfg).unwrap();
        let horizons: Vec<usize> = run.evaluations.iter().map(|e| e.horizon).collect();
        assert_eq!(horizons, LSTM_HORIZONS.collect::<Vec<_>>());
        assert!(cfg.results_dir.join("evaluation_results_lstm_6.csv").exists());
    }

    #[test]
    fn apply_reports_known_and_unknown_atms() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path(), 2, 60);
        let mut cfg = config(dir.path());
        cfg.window = WindowConfig::new(3, FeatureSet::value_only());

        let current = dir.path().join("current.csv");
        std::fs::File::create(&current)
            .unwrap()
            .write_all(b"atm_code,value\nATM001,100\nATM001,120\nATM001,90\nZZZ,1\nZZZ,2\nZZZ,3\n")
            .unwrap();

        let run = run_apply(&cfg, &current).unwrap();
        assert_eq!(run.training.trained.len(), 2);
        assert!(run.decisions.decisions.contains_key("ATM001"));
        assert_eq!(run.decisions.unknown, vec!["ZZZ".to_string()]);
    }

    fn write_current(dir: &Path) -> PathBuf {
        let current = dir.join("current.csv");
        std::fs::File::create(&current)
            .unwrap()
            .write_all(b"atm_code,value\nATM001,100\nATM001,120\nATM001,90\n")
            .unwrap();
        current
    }

    #[test]
    fn apply_can_use_the_lstm() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path(), 1, 40);
        let mut cfg = config(dir.path());
        cfg.window = WindowConfig::new(3, FeatureSet::value_only());
        cfg.algorithm = PredictorModel::Lstm;

        let run = run_apply(&cfg, &write_current(dir.path())).unwrap();
        assert_eq!(run.training.trained.len(), 1);
        assert!(run.decisions.decisions.contains_key("ATM001"));
        assert!(run.decisions.failures.is_empty());
    }

    #[test]
    fn apply_with_missing_current_state_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path(), 2, 60);
        let cfg = config(dir.path());

        let err = run_apply(&cfg, &dir.path().join("missing.csv")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
