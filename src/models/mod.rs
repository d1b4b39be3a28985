//! Forecasting models.
//!
//! - `model`: the `Forecaster` contract and the algorithm registry
//! - `linear`: least-squares family (OLS, ridge, Huber IRLS)
//! - `tree`: regression tree and random forest
//! - `lstm`: recurrent sequence model

pub mod linear;
pub mod lstm;
pub mod model;
pub mod tree;

pub use model::*;
