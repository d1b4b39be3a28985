//! Configuration structs understood by the pipeline.
//!
//! These are plain data derived from CLI flags (plus defaults); every struct
//! validates itself so malformed settings fail before any loop starts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{FeatureSet, PredictorModel};
use crate::error::ForecastError;
use crate::predictor::DecisionRule;

/// Window shape shared by the window builder, models and predictor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub lag: usize,
    pub features: FeatureSet,
}

impl WindowConfig {
    pub fn new(lag: usize, features: FeatureSet) -> Self {
        Self { lag, features }
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.lag == 0 {
            return Err(ForecastError::InvalidConfig("lag must be >= 1".to_string()));
        }
        if self.features.is_empty() {
            return Err(ForecastError::InvalidConfig(
                "at least one window feature is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lag: 7,
            features: FeatureSet::default(),
        }
    }
}

/// Expanding-window (walk-forward) split settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Fraction of an ATM's windows used for the first training prefix.
    pub initial_train_fraction: f64,
    /// Lower bound on the first training prefix.
    pub min_train_windows: usize,
    /// Held-out windows per fold; the boundary advances by this much.
    pub test_size: usize,
    /// Optional cap on the number of folds.
    pub max_folds: Option<usize>,
}

impl WalkForwardConfig {
    pub fn validate(&self) -> Result<(), ForecastError> {
        if !(self.initial_train_fraction.is_finite()
            && self.initial_train_fraction > 0.0
            && self.initial_train_fraction < 1.0)
        {
            return Err(ForecastError::InvalidConfig(
                "initial train fraction must be in (0, 1)".to_string(),
            ));
        }
        if self.min_train_windows == 0 {
            return Err(ForecastError::InvalidConfig(
                "min train windows must be >= 1".to_string(),
            ));
        }
        if self.test_size == 0 {
            return Err(ForecastError::InvalidConfig("test size must be >= 1".to_string()));
        }
        if self.max_folds == Some(0) {
            return Err(ForecastError::InvalidConfig("max folds must be >= 1".to_string()));
        }
        Ok(())
    }
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            initial_train_fraction: 0.6,
            min_train_windows: 14,
            test_size: 7,
            max_folds: None,
        }
    }
}

/// Hyperparameters of the classical regressors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// L2 penalty of the ridge regressor.
    pub ridge_alpha: f64,
    /// Huber tuning constant (larger = less downweighting).
    pub huber_k: f64,
    /// Number of IRLS reweight iterations.
    pub huber_iters: usize,
    pub tree_max_depth: usize,
    pub tree_min_samples_split: usize,
    pub forest_trees: usize,
    /// Seed for bootstrap sampling.
    pub seed: u64,
}

impl ModelParams {
    pub fn validate(&self) -> Result<(), ForecastError> {
        if !(self.ridge_alpha.is_finite() && self.ridge_alpha >= 0.0) {
            return Err(ForecastError::InvalidConfig("ridge alpha must be >= 0".to_string()));
        }
        if !(self.huber_k.is_finite() && self.huber_k > 0.0) {
            return Err(ForecastError::InvalidConfig("huber k must be > 0".to_string()));
        }
        if self.tree_min_samples_split < 2 {
            return Err(ForecastError::InvalidConfig(
                "tree min samples split must be >= 2".to_string(),
            ));
        }
        if self.forest_trees == 0 {
            return Err(ForecastError::InvalidConfig("forest needs at least one tree".to_string()));
        }
        Ok(())
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            ridge_alpha: 1.0,
            huber_k: 1.35,
            huber_iters: 5,
            tree_max_depth: 6,
            tree_min_samples_split: 4,
            forest_trees: 50,
            seed: 42,
        }
    }
}

/// Whether sequence models are fitted per ATM or once for all ATMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LstmScope {
    PerAtm,
    Global,
}

/// LSTM network and training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmConfig {
    pub hidden_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub seed: u64,
    /// Chronological fraction of each ATM's windows used for training.
    pub train_fraction: f64,
    pub scope: LstmScope,
}

impl LstmConfig {
    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.hidden_size == 0 {
            return Err(ForecastError::InvalidConfig("lstm hidden size must be >= 1".to_string()));
        }
        if self.epochs == 0 {
            return Err(ForecastError::InvalidConfig("lstm epochs must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ForecastError::InvalidConfig("lstm batch size must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ForecastError::InvalidConfig(
                "lstm learning rate must be > 0".to_string(),
            ));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(ForecastError::InvalidConfig(
                "lstm train fraction must be in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            hidden_size: 16,
            epochs: 60,
            learning_rate: 0.01,
            batch_size: 16,
            seed: 42,
            train_fraction: 0.8,
            scope: LstmScope::PerAtm,
        }
    }
}

/// Horizons evaluated by `evaluate-deep-models`.
pub const LSTM_HORIZONS: std::ops::RangeInclusive<usize> = 1..=6;

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Normalized history CSV (`atm_code,date,value[,holiday]`).
    pub history_path: PathBuf,
    /// Directory receiving evaluation exports.
    pub results_dir: PathBuf,
    pub window: WindowConfig,
    pub walk_forward: WalkForwardConfig,
    pub params: ModelParams,
    pub lstm: LstmConfig,
    /// Algorithm used by the predictor in `apply-models`.
    pub algorithm: PredictorModel,
    pub rule: DecisionRule,
    /// Stop a classic sweep at the first failing algorithm.
    pub halt_on_failure: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ForecastError> {
        self.window.validate()?;
        self.walk_forward.validate()?;
        self.params.validate()?;
        self.lstm.validate()?;
        self.rule.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        WindowConfig::default().validate().unwrap();
        WalkForwardConfig::default().validate().unwrap();
        ModelParams::default().validate().unwrap();
        LstmConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_lag_is_rejected() {
        let config = WindowConfig::new(0, FeatureSet::value_only());
        assert!(matches!(config.validate(), Err(ForecastError::InvalidConfig(_))));
    }

    #[test]
    fn walk_forward_fraction_bounds() {
        let config = WalkForwardConfig {
            initial_train_fraction: 1.0,
            ..WalkForwardConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
