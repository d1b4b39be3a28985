//! Numeric utilities: least squares, feature scaling and forecast metrics.

pub mod metrics;
pub mod ols;
pub mod scaling;

pub use metrics::*;
pub use ols::*;
pub use scaling::*;
