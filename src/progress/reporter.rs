//! Progress reporter implementation
//!
//! Uses indicatif for progress bars with:
//! - Work unit progress
//! - Entry count progress
//! - Byte transfer progress with throughput and ETA
//!
//! The reporter is shared between all unit workers, so every counter is
//! atomic and every method takes `&self`.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Progress reporter for ingest runs
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Work units finished
    units_bar: ProgressBar,
    /// Entries processed
    entries_bar: ProgressBar,
    /// Bytes copied
    bytes_bar: ProgressBar,
    /// Current status message
    status: ProgressBar,
    start_time: Instant,
    total_bytes: AtomicU64,
    total_entries: AtomicU64,
    total_units: AtomicU64,
    bytes_copied: AtomicU64,
    entries_done: AtomicU64,
    units_done: AtomicU64,
    units_failed: AtomicU64,
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter drawing to stderr
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let units_bar = multi.add(ProgressBar::new(0));
        units_bar.set_style(bar_style(
            "{prefix:.bold.dim} [{bar:40.yellow/white}] {pos}/{len} units",
        ));
        units_bar.set_prefix("Units  ");

        let entries_bar = multi.add(ProgressBar::new(0));
        entries_bar.set_style(bar_style(
            "{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} entries ({percent}%)",
        ));
        entries_bar.set_prefix("Entries");

        let bytes_bar = multi.add(ProgressBar::new(0));
        bytes_bar.set_style(bar_style(
            "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})",
        ));
        bytes_bar.set_prefix("Data   ");

        Self {
            multi,
            units_bar,
            entries_bar,
            bytes_bar,
            status,
            start_time: Instant::now(),
            total_bytes: AtomicU64::new(0),
            total_entries: AtomicU64::new(0),
            total_units: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            entries_done: AtomicU64::new(0),
            units_done: AtomicU64::new(0),
            units_failed: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode and JSON output)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Size the bars for a whole plan
    pub fn set_plan(&self, units: u64, entries: u64, bytes: u64) {
        self.total_units.store(units, Ordering::Relaxed);
        self.total_entries.store(entries, Ordering::Relaxed);
        self.total_bytes.store(bytes, Ordering::Relaxed);
        self.units_bar.set_length(units);
        self.entries_bar.set_length(entries);
        self.bytes_bar.set_length(bytes);
    }

    /// Record one processed entry and the bytes it moved
    pub fn entry_done(&self, bytes: u64) {
        self.entries_done.fetch_add(1, Ordering::Relaxed);
        self.entries_bar.inc(1);
        if bytes > 0 {
            self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
            self.bytes_bar.inc(bytes);
        }
    }

    /// Record a finished unit
    pub fn unit_done(&self, success: bool) {
        self.units_done.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.units_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.units_bar.inc(1);
    }

    /// Set current status message
    pub fn set_status(&self, msg: &str) {
        self.status.set_message(msg.to_string());
    }

    /// Show the entry currently being copied
    pub fn set_current_entry(&self, path: &str) {
        let display = match path.char_indices().rev().nth(56) {
            Some((idx, _)) if path.len() > 60 => format!("...{}", &path[idx..]),
            _ => path.to_string(),
        };
        self.status.set_message(display);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Current throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let bytes = self.bytes_copied.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            bytes as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.status.finish_with_message(format!("✓ {}", message));
        self.units_bar.finish();
        self.entries_bar.finish();
        self.bytes_bar.finish();
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        self.units_bar.abandon();
        self.entries_bar.abandon();
        self.bytes_bar.abandon();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Snapshot of all counters
    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            total_units: self.total_units.load(Ordering::Relaxed),
            units_done: self.units_done.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            total_entries: self.total_entries.load(Ordering::Relaxed),
            entries_done: self.entries_done.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            throughput: self.throughput(),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress summary
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub total_units: u64,
    pub units_done: u64,
    pub units_failed: u64,
    pub total_entries: u64,
    pub entries_done: u64,
    pub total_bytes: u64,
    pub bytes_copied: u64,
    pub elapsed: Duration,
    /// Throughput in bytes/second
    pub throughput: f64,
}

impl ProgressSummary {
    /// Byte completion percentage
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.bytes_copied as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter() {
        let reporter = ProgressReporter::disabled();
        reporter.set_plan(2, 10, 1000);

        reporter.entry_done(500);
        reporter.entry_done(0);
        reporter.unit_done(true);

        let summary = reporter.summary();
        assert_eq!(summary.bytes_copied, 500);
        assert_eq!(summary.entries_done, 2);
        assert_eq!(summary.units_done, 1);
        assert_eq!(summary.units_failed, 0);
        assert_eq!(summary.percentage(), 50.0);
        assert!(!reporter.is_enabled());
    }

    #[test]
    fn test_failed_units_counted() {
        let reporter = ProgressReporter::disabled();
        reporter.set_plan(3, 3, 0);
        reporter.unit_done(false);
        reporter.unit_done(true);

        let summary = reporter.summary();
        assert_eq!(summary.units_done, 2);
        assert_eq!(summary.units_failed, 1);
        assert_eq!(summary.percentage(), 0.0);
    }
}
