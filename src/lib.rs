//! `atmo-load` library crate.
//!
//! Forecasts per-ATM cash withdrawals and decides which ATMs are due for
//! resupply. The binary (`atmo`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - modules are reusable from other front-ends
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod eval;
pub mod io;
pub mod math;
pub mod models;
pub mod predictor;
pub mod report;
pub mod window;
