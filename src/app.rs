//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - installs logging and reads `.env`
//! - parses CLI arguments into config structs
//! - runs the matching pipeline and prints its report

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{
    ApplyArgs, ClassicArgs, Command, DeepArgs, ImportArgs, ModelArgs, RuleArgs, RuleKind, SampleArgs,
    SourceKind, WindowArgs,
};
use crate::data::{CsvFileSource, HttpSource, RawDataSource, SampleConfig};
use crate::domain::{
    FeatureSet, LstmConfig, ModelParams, PipelineConfig, PredictorModel, WalkForwardConfig, WindowConfig,
};
use crate::error::AppError;
use crate::predictor::DecisionRule;

pub mod pipeline;

const HISTORY_FILE: &str = "history.csv";
const RESULTS_DIR: &str = "results";

/// Entry point for the `atmo` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = crate::cli::Cli::parse();
    let data_dir = cli.data_dir;

    match cli.command {
        Command::ImportData(args) => handle_import(&data_dir, &args),
        Command::EvaluateClassicModels(args) => {
            let config = classic_config_from_args(&data_dir, &args);
            let run = pipeline::run_classic(&config)?;
            println!("{}", crate::report::format_classic_run(&run));
            Ok(())
        }
        Command::EvaluateDeepModels(args) => {
            let config = deep_config_from_args(&data_dir, &args);
            let run = pipeline::run_deep(&config)?;
            println!("{}", crate::report::format_deep_run(&run));
            Ok(())
        }
        Command::ApplyModels(args) => {
            let config = apply_config_from_args(&data_dir, &args);
            let run = pipeline::run_apply(&config, &args.data)?;
            println!("{}", crate::report::format_apply_run(&run));
            Ok(())
        }
        Command::GenerateSample(args) => {
            let out = args.output.clone().unwrap_or_else(|| data_dir.join(HISTORY_FILE));
            let summary = pipeline::run_generate_sample(&sample_config_from_args(&args), &out)?;
            println!("{}", crate::report::format_import_summary(&summary));
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout carries only reports. `RUST_LOG` overrides
/// the default `info` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_import(data_dir: &Path, args: &ImportArgs) -> Result<(), AppError> {
    let source: Box<dyn RawDataSource> = match args.source {
        SourceKind::Csv => {
            let input = args
                .input
                .clone()
                .ok_or_else(|| AppError::new(2, "`--source csv` needs `--input <CSV>`."))?;
            Box::new(CsvFileSource::new(input))
        }
        SourceKind::Http => Box::new(HttpSource::from_env()?.since(args.since)),
    };

    let out = args.output.clone().unwrap_or_else(|| data_dir.join(HISTORY_FILE));
    let summary = pipeline::run_import(source.as_ref(), &out)?;
    println!("{}", crate::report::format_import_summary(&summary));
    Ok(())
}

fn history_path(data_dir: &Path, args: &WindowArgs) -> PathBuf {
    args.history.clone().unwrap_or_else(|| data_dir.join(HISTORY_FILE))
}

pub fn window_config_from_args(args: &WindowArgs) -> WindowConfig {
    let features = if args.features.is_empty() {
        FeatureSet::default()
    } else {
        FeatureSet::new(args.features.clone())
    };
    WindowConfig::new(args.lag, features)
}

pub fn model_params_from_args(args: &ModelArgs) -> ModelParams {
    ModelParams {
        ridge_alpha: args.ridge_alpha,
        huber_k: args.huber_k,
        huber_iters: args.huber_iters,
        tree_max_depth: args.tree_max_depth,
        tree_min_samples_split: args.tree_min_samples_split,
        forest_trees: args.forest_trees,
        seed: args.seed,
    }
}

pub fn decision_rule_from_args(args: &RuleArgs) -> DecisionRule {
    match args.rule {
        RuleKind::Threshold => DecisionRule::Threshold {
            min_load: args.min_load,
        },
        RuleKind::RecentMeanRatio => DecisionRule::RecentMeanRatio { ratio: args.ratio },
        RuleKind::CapacityFraction => DecisionRule::CapacityFraction {
            default_capacity: args.capacity,
            fraction: args.fraction,
            capacities: args.capacity_of.iter().cloned().collect::<BTreeMap<_, _>>(),
        },
    }
}

fn base_config(data_dir: &Path, window: &WindowArgs, results_dir: Option<&PathBuf>) -> PipelineConfig {
    PipelineConfig {
        history_path: history_path(data_dir, window),
        results_dir: results_dir.cloned().unwrap_or_else(|| data_dir.join(RESULTS_DIR)),
        window: window_config_from_args(window),
        walk_forward: WalkForwardConfig::default(),
        params: ModelParams::default(),
        lstm: LstmConfig::default(),
        algorithm: PredictorModel::Linear,
        rule: DecisionRule::default(),
        halt_on_failure: false,
    }
}

pub fn classic_config_from_args(data_dir: &Path, args: &ClassicArgs) -> PipelineConfig {
    PipelineConfig {
        walk_forward: WalkForwardConfig {
            initial_train_fraction: args.initial_train_fraction,
            min_train_windows: args.min_train_windows,
            test_size: args.test_size,
            max_folds: args.max_folds,
        },
        params: model_params_from_args(&args.model),
        halt_on_failure: args.halt_on_failure,
        ..base_config(data_dir, &args.window, args.results_dir.as_ref())
    }
}

pub fn deep_config_from_args(data_dir: &Path, args: &DeepArgs) -> PipelineConfig {
    PipelineConfig {
        lstm: LstmConfig {
            hidden_size: args.hidden_size,
            epochs: args.epochs,
            learning_rate: args.learning_rate,
            batch_size: args.batch_size,
            seed: args.seed,
            train_fraction: args.train_fraction,
            scope: args.scope,
        },
        ..base_config(data_dir, &args.window, args.results_dir.as_ref())
    }
}

pub fn apply_config_from_args(data_dir: &Path, args: &ApplyArgs) -> PipelineConfig {
    PipelineConfig {
        params: model_params_from_args(&args.model),
        lstm: LstmConfig {
            hidden_size: args.hidden_size,
            epochs: args.epochs,
            seed: args.model.seed,
            ..LstmConfig::default()
        },
        algorithm: args.algorithm,
        rule: decision_rule_from_args(&args.rule),
        ..base_config(data_dir, &args.window, None)
    }
}

pub fn sample_config_from_args(args: &SampleArgs) -> SampleConfig {
    SampleConfig {
        atms: args.atms,
        days: args.days,
        start: args.start,
        seed: args.seed,
        base_level: args.base_level,
        noise: args.noise,
        holiday_prob: args.holiday_prob,
        ..SampleConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::domain::Feature;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["atmo", "--data-dir", "/tmp/atmo"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn classic_args_become_pipeline_config() {
        let cli = parse(&["evaluate-classic-models", "--lag", "5", "--max-folds", "3", "--halt-on-failure"]);
        let Command::EvaluateClassicModels(args) = cli.command else {
            panic!("expected evaluate-classic-models");
        };
        let config = classic_config_from_args(&cli.data_dir, &args);
        assert_eq!(config.history_path, PathBuf::from("/tmp/atmo/history.csv"));
        assert_eq!(config.results_dir, PathBuf::from("/tmp/atmo/results"));
        assert_eq!(config.window.lag, 5);
        assert_eq!(config.window.features, FeatureSet::default());
        assert_eq!(config.walk_forward.max_folds, Some(3));
        assert!(config.halt_on_failure);
        config.validate().unwrap();
    }

    #[test]
    fn apply_args_select_rule_and_features() {
        let cli = parse(&[
            "apply-models",
            "--data",
            "now.csv",
            "--features",
            "value",
            "--algorithm",
            "forest",
            "--rule",
            "capacity-fraction",
            "--fraction",
            "0.5",
            "--capacity-of",
            "ATM002=400000",
        ]);
        let Command::ApplyModels(args) = cli.command else {
            panic!("expected apply-models");
        };
        let config = apply_config_from_args(&cli.data_dir, &args);
        assert_eq!(config.algorithm, PredictorModel::Forest);
        assert_eq!(config.window.features, FeatureSet::new(vec![Feature::Value]));
        match &config.rule {
            DecisionRule::CapacityFraction {
                fraction, capacities, ..
            } => {
                assert_eq!(*fraction, 0.5);
                assert_eq!(capacities.get("ATM002"), Some(&400000.0));
            }
            other => panic!("unexpected rule {other:?}"),
        }
    }

    #[test]
    fn apply_args_can_select_the_lstm() {
        let cli = parse(&["apply-models", "--data", "now.csv", "--model", "lstm", "--hidden-size", "8", "--seed", "7"]);
        let Command::ApplyModels(args) = cli.command else {
            panic!("expected apply-models");
        };
        let config = apply_config_from_args(&cli.data_dir, &args);
        assert_eq!(config.algorithm, PredictorModel::Lstm);
        assert_eq!(config.lstm.hidden_size, 8);
        assert_eq!(config.lstm.seed, 7);
        config.validate().unwrap();
    }

    #[test]
    fn csv_import_without_input_is_a_config_error() {
        let cli = parse(&["import-data"]);
        let Command::ImportData(args) = cli.command else {
            panic!("expected import-data");
        };
        assert_eq!(handle_import(&cli.data_dir, &args).unwrap_err().exit_code(), 2);
    }
}
