//! Configuration module for FileIngest
//!
//! CLI arguments and the validated source and sink settings built from them.

mod settings;

pub use settings::*;
