//! Local unit dispatcher
//!
//! Runs every work unit of a plan on a rayon pool, one unit per task. Units
//! share nothing mutable: each task executes its own unit with its own
//! sessions, so one failing unit never affects the others. A failed unit may
//! be retried as a whole; with overwrite disabled a retry skips everything
//! the failed attempt already materialized.

use crate::core::{CopyEngine, UnitReport, WorkUnit};
use crate::error::{IngestError, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Pool and retry settings
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Worker threads (0 = one per CPU)
    pub threads: usize,
    /// Extra attempts for a failed unit
    pub retries: usize,
}

/// Final state of one unit
#[derive(Debug)]
pub struct UnitResult {
    /// Position of the unit in the plan
    pub index: usize,
    /// Attempts made, including the first
    pub attempts: usize,
    pub result: Result<UnitReport>,
}

/// Result of running a whole plan
#[derive(Debug)]
pub struct DispatchReport {
    /// One result per unit, in plan order
    pub units: Vec<UnitResult>,
    pub duration: Duration,
}

/// Serializable digest of a [`DispatchReport`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub units: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files_copied: u64,
    pub dirs_created: u64,
    pub skipped: u64,
    pub bytes_copied: u64,
    pub duration: Duration,
    /// Throughput in bytes/second
    pub throughput: f64,
    /// `(unit index, error)` for every failed unit
    pub failures: Vec<(usize, String)>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.units.iter().all(|u| u.result.is_ok())
    }

    pub fn summary(&self) -> DispatchSummary {
        let mut summary = DispatchSummary {
            units: self.units.len(),
            duration: self.duration,
            ..DispatchSummary::default()
        };
        for unit in &self.units {
            match &unit.result {
                Ok(report) => {
                    summary.succeeded += 1;
                    summary.files_copied += report.files_copied;
                    summary.dirs_created += report.dirs_created;
                    summary.skipped += report.skipped;
                    summary.bytes_copied += report.bytes_copied;
                }
                Err(e) => {
                    summary.failed += 1;
                    summary.failures.push((unit.index, e.to_string()));
                }
            }
        }
        summary.throughput = if self.duration.as_secs_f64() > 0.0 {
            summary.bytes_copied as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        };
        summary
    }
}

impl DispatchSummary {
    /// Print run summary
    pub fn print_summary(&self) {
        println!("Run Summary:");
        println!(
            "  Units:          {} ({} succeeded, {} failed)",
            self.units, self.succeeded, self.failed
        );
        println!("  Files copied:   {}", self.files_copied);
        println!("  Dirs created:   {}", self.dirs_created);
        println!("  Skipped:        {}", self.skipped);
        println!(
            "  Bytes copied:   {}",
            humansize::format_size(self.bytes_copied, humansize::BINARY)
        );
        println!("  Duration:       {:.2?}", self.duration);
        println!(
            "  Throughput:     {}/s",
            humansize::format_size(self.throughput as u64, humansize::BINARY)
        );

        if !self.failures.is_empty() {
            println!();
            println!("Failed units:");
            for (index, error) in &self.failures {
                println!("  #{}: {}", index, error);
            }
        }
    }
}

/// Execute every unit on a dedicated pool
///
/// Only pool construction errors are returned directly. Unit failures are
/// collected in the report.
pub fn dispatch(
    engine: &CopyEngine<'_>,
    units: &[WorkUnit],
    options: DispatchOptions,
) -> Result<DispatchReport> {
    let start_time = Instant::now();
    let threads = if options.threads == 0 {
        num_cpus::get()
    } else {
        options.threads
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("unit-worker-{}", i))
        .build()
        .map_err(|e| IngestError::config(format!("failed to build worker pool: {}", e)))?;

    tracing::info!("Dispatching {} units on {} threads", units.len(), threads);

    let results: Vec<UnitResult> = pool.install(|| {
        units
            .par_iter()
            .enumerate()
            .map(|(index, unit)| run_unit(engine, index, unit, options.retries))
            .collect()
    });

    Ok(DispatchReport {
        units: results,
        duration: start_time.elapsed(),
    })
}

fn run_unit(engine: &CopyEngine<'_>, index: usize, unit: &WorkUnit, retries: usize) -> UnitResult {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = engine.execute(unit);
        match &result {
            Ok(_) => tracing::debug!("Unit #{} done after {} attempt(s)", index, attempts),
            // Configuration problems do not go away on retry
            Err(e) if attempts <= retries && !e.is_configuration() => {
                tracing::warn!("Unit #{} failed (attempt {}), retrying: {}", index, attempts, e);
                continue;
            }
            Err(e) => tracing::error!("Unit #{} failed: {}", index, e),
        }
        if let Some(progress) = engine.progress() {
            progress.unit_done(result.is_ok());
        }
        return UnitResult {
            index,
            attempts,
            result,
        };
    }
}
