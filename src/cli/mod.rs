//! Command-line parsing for the ATM resupply forecaster.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline. `app` turns the `*Args` structs into plain config structs.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::{Feature, LstmScope, PredictorModel};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "atmo", version, about = "ATM cash resupply forecasting")]
pub struct Cli {
    /// Directory holding `history.csv` and the `results/` exports.
    #[arg(long, global = true, env = "ATMO_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch raw withdrawals and write the normalized history CSV.
    #[command(alias = "import_data")]
    ImportData(ImportArgs),
    /// Walk-forward evaluation of every classical regressor.
    #[command(alias = "evaluate_classic_models")]
    EvaluateClassicModels(ClassicArgs),
    /// Evaluate the LSTM at every forecast horizon.
    #[command(alias = "evaluate_deep_models")]
    EvaluateDeepModels(DeepArgs),
    /// Train per-ATM models and print which ATMs are due for resupply.
    #[command(alias = "apply_models")]
    ApplyModels(ApplyArgs),
    /// Write a synthetic history CSV (demos and tests).
    #[command(alias = "generate_sample")]
    GenerateSample(SampleArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Local CSV export (`--input`).
    Csv,
    /// JSON endpoint from `ATMO_SOURCE_URL`.
    Http,
}

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    #[arg(long, value_enum, default_value_t = SourceKind::Csv)]
    pub source: SourceKind,

    /// Raw CSV export (required for `--source csv`).
    #[arg(long, value_name = "CSV")]
    pub input: Option<PathBuf>,

    /// Only request observations on or after this date (http source).
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub since: Option<NaiveDate>,

    /// Output path [default: <data-dir>/history.csv].
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// History input and window shape, shared by the model commands.
#[derive(Debug, Args, Clone)]
pub struct WindowArgs {
    /// History CSV [default: <data-dir>/history.csv].
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Observations per window.
    #[arg(long, default_value_t = 7)]
    pub lag: usize,

    /// Features encoded for each window step, comma separated [default: all].
    #[arg(long, value_enum, value_delimiter = ',')]
    pub features: Vec<Feature>,
}

#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    #[arg(long, default_value_t = 1.0)]
    pub ridge_alpha: f64,

    #[arg(long, default_value_t = 1.35)]
    pub huber_k: f64,

    #[arg(long, default_value_t = 5)]
    pub huber_iters: usize,

    #[arg(long, default_value_t = 6)]
    pub tree_max_depth: usize,

    #[arg(long, default_value_t = 4)]
    pub tree_min_samples_split: usize,

    #[arg(long, default_value_t = 50)]
    pub forest_trees: usize,

    /// Seed for the forest's bootstrap samples.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct ClassicArgs {
    #[command(flatten)]
    pub window: WindowArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Fraction of each ATM's windows in the first training prefix.
    #[arg(long, default_value_t = 0.6)]
    pub initial_train_fraction: f64,

    #[arg(long, default_value_t = 14)]
    pub min_train_windows: usize,

    /// Held-out windows per walk-forward fold.
    #[arg(long, default_value_t = 7)]
    pub test_size: usize,

    #[arg(long)]
    pub max_folds: Option<usize>,

    /// Stop at the first algorithm that fails.
    #[arg(long)]
    pub halt_on_failure: bool,

    /// Export directory [default: <data-dir>/results].
    #[arg(long)]
    pub results_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct DeepArgs {
    #[command(flatten)]
    pub window: WindowArgs,

    #[arg(long, default_value_t = 16)]
    pub hidden_size: usize,

    #[arg(long, default_value_t = 60)]
    pub epochs: usize,

    #[arg(long, default_value_t = 0.01)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Chronological share of each ATM's windows used for training.
    #[arg(long, default_value_t = 0.8)]
    pub train_fraction: f64,

    #[arg(long, value_enum, default_value_t = LstmScope::PerAtm)]
    pub scope: LstmScope,

    /// Export directory [default: <data-dir>/results].
    #[arg(long)]
    pub results_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RuleKind {
    /// Due when the forecast reaches `--min-load`.
    Threshold,
    /// Due when the forecast reaches `--ratio` x the recent mean load.
    RecentMeanRatio,
    /// Due when the forecast reaches `--fraction` of the ATM's capacity.
    CapacityFraction,
}

#[derive(Debug, Args, Clone)]
pub struct RuleArgs {
    #[arg(long, value_enum, default_value_t = RuleKind::RecentMeanRatio)]
    pub rule: RuleKind,

    #[arg(long, default_value_t = 0.0)]
    pub min_load: f64,

    #[arg(long, default_value_t = 1.2)]
    pub ratio: f64,

    #[arg(long, default_value_t = 0.8)]
    pub fraction: f64,

    /// Capacity of ATMs without an explicit `--capacity-of`.
    #[arg(long, default_value_t = 1_000_000.0)]
    pub capacity: f64,

    /// Per-ATM capacity, e.g. `--capacity-of ATM001=500000` (repeatable).
    #[arg(long, value_name = "ATM=AMOUNT", value_parser = parse_capacity)]
    pub capacity_of: Vec<(String, f64)>,
}

#[derive(Debug, Args, Clone)]
pub struct ApplyArgs {
    /// Current-state CSV with the latest observations per ATM.
    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Algorithm trained for every ATM.
    #[arg(long, alias = "model", value_enum, default_value_t = PredictorModel::Linear)]
    pub algorithm: PredictorModel,

    #[command(flatten)]
    pub model: ModelArgs,

    /// LSTM hidden units (`--algorithm lstm`).
    #[arg(long, default_value_t = 16)]
    pub hidden_size: usize,

    /// LSTM training epochs (`--algorithm lstm`).
    #[arg(long, default_value_t = 60)]
    pub epochs: usize,

    #[command(flatten)]
    pub rule: RuleArgs,
}

#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    #[arg(long, default_value_t = 5)]
    pub atms: usize,

    #[arg(long, default_value_t = 365)]
    pub days: usize,

    #[arg(long, value_name = "YYYY-MM-DD", default_value = "2023-01-02")]
    pub start: NaiveDate,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Mean daily load of an average ATM.
    #[arg(long, default_value_t = 250_000.0)]
    pub base_level: f64,

    /// Standard deviation of the multiplicative log-noise.
    #[arg(long, default_value_t = 0.12)]
    pub noise: f64,

    #[arg(long, default_value_t = 0.03)]
    pub holiday_prob: f64,

    /// Output path [default: <data-dir>/history.csv].
    #[arg(long)]
    pub output: Option<PathBuf>,
}

fn parse_capacity(s: &str) -> Result<(String, f64), String> {
    let (atm, amount) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ATM=AMOUNT, got '{s}'"))?;
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|_| format!("invalid capacity '{amount}'"))?;
    let atm = atm.trim();
    if atm.is_empty() {
        return Err("empty ATM code".to_string());
    }
    Ok((atm.to_string(), amount))
}
