//! # FileIngest - Balanced File Ingestion Between Storage Systems
//!
//! FileIngest moves whole files and directory trees from one storage system
//! to another. A job runs in three phases:
//!
//! - **Discovery**: walk the configured source roots one directory at a
//!   time, so empty directories are found too
//! - **Balancing**: partition the discovered entries into work units of
//!   similar byte size, each capped at a maximum entry count
//! - **Copy**: execute every unit independently against the destination
//!
//! Supported storage systems: local filesystem, HDFS through a gateway
//! mount, SFTP, FTP and S3-compatible object stores (`s3a`, `s3n`).
//!
//! ## Quick Start
//!
//! ```no_run
//! use fileingest::config::SinkConfig;
//! use fileingest::core::{balance, dispatch, CopyEngine, DispatchOptions};
//! use fileingest::fs::{Credentials, HostUri, Scanner};
//! use fileingest::storage::{ConnectOptions, DefaultConnector};
//!
//! let connector = DefaultConnector::new(ConnectOptions::default());
//! let scanner = Scanner::new(&connector, HostUri::local(), Credentials::None);
//! let scan = scanner.discover(&["/data/incoming".to_string()], true)?;
//! let units = balance(scan.into_entries(), 1000)?;
//!
//! let sink = SinkConfig {
//!     base_path: "/data/landing".to_string(),
//!     ..SinkConfig::default()
//! };
//! let engine = CopyEngine::new(sink, &connector);
//! let report = dispatch(&engine, &units, DispatchOptions::default())?;
//! report.summary().print_summary();
//! # Ok::<(), fileingest::IngestError>(())
//! ```
//!
//! ## Work Unit Files
//!
//! Units can be handed to other processes as unit files:
//!
//! ```no_run
//! use fileingest::wire::{read_unit_file, write_plan};
//! use std::path::Path;
//! # let units: Vec<fileingest::core::WorkUnit> = Vec::new();
//!
//! let files = write_plan(Path::new("plan"), &units)?;
//! let unit = read_unit_file(&files[0])?;
//! println!("{} entries, {} bytes", unit.len(), unit.total_bytes());
//! # Ok::<(), fileingest::IngestError>(())
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod progress;
pub mod storage;
pub mod wire;

// Re-export commonly used types
pub use config::{SinkConfig, SourceConfig};
pub use core::{balance, CopyEngine, UnitReport, WorkUnit};
pub use error::{IngestError, Result};
pub use fs::{Credentials, Entry, HostUri};
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
