//! Error types.
//!
//! - `ForecastError` is the typed taxonomy of the forecasting core (windows,
//!   models, evaluation, decisions).
//! - `AppError` is what the binary reports: a message plus a process exit code.

use thiserror::Error;

pub type ForecastResult<T> = Result<T, ForecastError>;

/// Failures raised by the forecasting core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("ATM {atm}: series has {available} points, at least {required} required")]
    InsufficientData {
        atm: String,
        required: usize,
        available: usize,
    },

    #[error("training {model} failed: {reason}")]
    Training { model: String, reason: String },

    #[error("model {model} has not been trained")]
    UntrainedModel { model: String },

    #[error("no trained model for ATM {atm}")]
    UnknownAtm { atm: String },

    #[error("window width mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ForecastError {
    pub fn training(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Training {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code used when this error reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            ForecastError::InvalidConfig(_) => 2,
            ForecastError::InsufficientData { .. } => 3,
            ForecastError::Training { .. }
            | ForecastError::UntrainedModel { .. }
            | ForecastError::DimensionMismatch { .. } => 4,
            ForecastError::UnknownAtm { .. } => 5,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<ForecastError> for AppError {
    fn from(err: ForecastError) -> Self {
        Self::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
