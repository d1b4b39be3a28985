//! The forecaster contract and the registry of named algorithms.
//!
//! Every algorithm (classical regressor or LSTM) implements `Forecaster`, so
//! the evaluator and predictor only ever see `Box<dyn Forecaster>`.
//! Algorithms are enumerated through an explicit `ModelRegistry` passed in by
//! the caller; there is no process-wide list.

use std::fmt;
use std::sync::Arc;

use crate::domain::{ClassicAlgorithm, LstmConfig, ModelParams, SupervisedWindow};
use crate::error::ForecastError;
use crate::models::linear::{HuberRegressor, LinearRegressor, RidgeRegressor};
use crate::models::lstm::LstmForecaster;
use crate::models::tree::{DecisionTreeRegressor, RandomForestRegressor};

/// Outcome of a successful `train` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub windows: usize,
    /// In-sample mean squared error on the training windows.
    pub train_mse: f64,
}

/// A trainable, queryable load forecaster.
pub trait Forecaster: Send + Sync {
    fn name(&self) -> &str;

    /// Fit on windows that all carry a target.
    fn train(&mut self, windows: &[SupervisedWindow]) -> Result<TrainingSummary, ForecastError>;

    /// Forecast the load following `window`. The window's target is ignored.
    fn predict(&self, window: &SupervisedWindow) -> Result<f64, ForecastError>;

    fn is_trained(&self) -> bool;
}

type Constructor = dyn Fn() -> Box<dyn Forecaster> + Send + Sync;

/// A named algorithm and the constructor of fresh, untrained instances.
#[derive(Clone)]
pub struct RegisteredModel {
    name: String,
    constructor: Arc<Constructor>,
}

impl RegisteredModel {
    pub fn new(
        name: impl Into<String>,
        constructor: impl Fn() -> Box<dyn Forecaster> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            constructor: Arc::new(constructor),
        }
    }

    /// Registry entry for one of the built-in classical regressors.
    pub fn classic(algorithm: ClassicAlgorithm, params: &ModelParams) -> Self {
        let params = params.clone();
        Self::new(algorithm.display_name(), move || build_classic(algorithm, &params))
    }

    /// Registry entry for the LSTM sequence model.
    pub fn lstm(config: &LstmConfig) -> Self {
        let config = config.clone();
        Self::new("LSTM", move || Box::new(LstmForecaster::new(config.clone())))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A fresh untrained instance.
    pub fn build(&self) -> Box<dyn Forecaster> {
        (self.constructor)()
    }
}

impl fmt::Debug for RegisteredModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredModel").field("name", &self.name).finish()
    }
}

/// Ordered set of algorithms available to an evaluation sweep.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: Vec<RegisteredModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in classical regressors in `ClassicAlgorithm::ALL` order.
    pub fn classic(params: &ModelParams) -> Self {
        Self {
            entries: ClassicAlgorithm::ALL
                .iter()
                .map(|&a| RegisteredModel::classic(a, params))
                .collect(),
        }
    }

    pub fn register(&mut self, entry: RegisteredModel) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[RegisteredModel] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&RegisteredModel> {
        self.entries.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&RegisteredModel> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn build_classic(algorithm: ClassicAlgorithm, params: &ModelParams) -> Box<dyn Forecaster> {
    match algorithm {
        ClassicAlgorithm::Linear => Box::new(LinearRegressor::new()),
        ClassicAlgorithm::Ridge => Box::new(RidgeRegressor::new(params.ridge_alpha)),
        ClassicAlgorithm::Huber => Box::new(HuberRegressor::new(params.huber_k, params.huber_iters)),
        ClassicAlgorithm::Tree => Box::new(DecisionTreeRegressor::new(
            params.tree_max_depth,
            params.tree_min_samples_split,
        )),
        ClassicAlgorithm::Forest => Box::new(RandomForestRegressor::new(
            params.forest_trees,
            params.tree_max_depth,
            params.tree_min_samples_split,
            params.seed,
        )),
    }
}

/// Steps per window and features per step seen at training time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowShape {
    pub lag: usize,
    pub step_width: usize,
}

impl WindowShape {
    pub fn flat_width(self) -> usize {
        self.lag * self.step_width
    }

    /// Reject a window whose step count or any step width differs.
    pub fn check(self, window: &SupervisedWindow) -> Result<(), ForecastError> {
        if window.lag() != self.lag {
            return Err(ForecastError::DimensionMismatch {
                expected: self.lag,
                actual: window.lag(),
            });
        }
        if let Some(step) = window.steps.iter().find(|s| s.len() != self.step_width) {
            return Err(ForecastError::DimensionMismatch {
                expected: self.step_width,
                actual: step.len(),
            });
        }
        Ok(())
    }
}

/// Flattened features and targets of a training set.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub lag: usize,
    pub step_width: usize,
}

impl TrainingSet {
    pub fn shape(&self) -> WindowShape {
        WindowShape {
            lag: self.lag,
            step_width: self.step_width,
        }
    }
}

/// Validate training windows and flatten them.
///
/// Rejects empty sets, windows without a target, inconsistent shapes and
/// non-finite values.
pub fn training_set(model: &str, windows: &[SupervisedWindow]) -> Result<TrainingSet, ForecastError> {
    let first = windows
        .first()
        .ok_or_else(|| ForecastError::training(model, "no training windows"))?;
    let lag = first.lag();
    let step_width = first.step_width();
    if lag == 0 || step_width == 0 {
        return Err(ForecastError::training(model, "training windows have no features"));
    }

    let mut features = Vec::with_capacity(windows.len());
    let mut targets = Vec::with_capacity(windows.len());
    for w in windows {
        if w.lag() != lag || w.steps.iter().any(|s| s.len() != step_width) {
            return Err(ForecastError::training(
                model,
                format!("window of ATM {} at {} has an inconsistent shape", w.atm, w.start),
            ));
        }
        let target = w.target.ok_or_else(|| {
            ForecastError::training(model, format!("window of ATM {} at {} has no target", w.atm, w.start))
        })?;
        if !w.is_finite() {
            return Err(ForecastError::training(
                model,
                format!("window of ATM {} at {} contains non-finite values", w.atm, w.start),
            ));
        }
        features.push(w.flatten());
        targets.push(target);
    }

    Ok(TrainingSet {
        features,
        targets,
        lag,
        step_width,
    })
}

/// Flatten a prediction window after checking it has the trained shape.
pub fn prediction_row(window: &SupervisedWindow, shape: WindowShape) -> Result<Vec<f64>, ForecastError> {
    shape.check(window)?;
    Ok(window.flatten())
}
