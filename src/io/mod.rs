//! Input/output helpers.
//!
//! - normalized history CSV read/write (`history`)
//! - current-state CSV for decisions (`current_state`)
//! - evaluation exports (CSV/JSON) (`export`)

pub mod current_state;
pub mod export;
pub mod history;

pub use current_state::*;
pub use export::*;
pub use history::*;
