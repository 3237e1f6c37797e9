//! Entry model and discovery
//!
//! Describes what was found at the source and walks source roots to find it.

mod entry;
mod scanner;

pub use entry::*;
pub use scanner::*;
