//! Resupply decisions from trained per-ATM models.

pub mod decision;
pub mod engine;

pub use decision::DecisionRule;
pub use engine::{AtmPredictor, DueReport, PredictorConfig, TrainingReport};
