//! Where withdrawal history comes from.
//!
//! - upstream raw data sources (`source`)
//! - synthetic history for demos and tests (`sample`)

pub mod sample;
pub mod source;

pub use sample::*;
pub use source::*;
