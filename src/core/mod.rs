//! Core ingest engine
//!
//! Balancing entries into work units, executing a unit against a
//! destination, and running a whole plan on a local pool.

mod copier;
mod dispatch;
mod scheduler;

pub use copier::*;
pub use dispatch::*;
pub use scheduler::*;
