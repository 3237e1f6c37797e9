//! Progress reporting module
//!
//! Live progress for plan execution: units, entries and bytes.

mod reporter;

pub use reporter::*;
