//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observations and series (`TimeSeriesPoint`, `AtmSeries`, `RawObservation`)
//! - model inputs (`Feature`, `FeatureSet`, `SupervisedWindow`)
//! - evaluation outputs (`AtmMetrics`, `EvaluationResult`)
//! - run configuration (`WindowConfig`, `WalkForwardConfig`, `LstmConfig`, ...)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
