//! Balanced work units
//!
//! Partitions a flat entry list into work units of roughly equal byte size
//! with the longest-processing-time-first heuristic:
//! - Entries are assigned largest first
//! - Each goes to the unit with the smallest running total
//! - A unit that reaches the entry cap is frozen and takes no more entries

use crate::error::{IngestError, Result};
use crate::fs::{CredentialKind, Entry};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// An ordered batch of entries handed to one worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkUnit {
    entries: Vec<Entry>,
    total_bytes: u64,
}

impl WorkUnit {
    /// Create an empty unit
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a unit from entries, computing the byte total
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        let total_bytes = entries.iter().map(Entry::file_size).sum();
        Self {
            entries,
            total_bytes,
        }
    }

    pub(crate) fn push(&mut self, entry: Entry) {
        self.total_bytes += entry.file_size();
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    /// Sum of the sizes of all entries
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compare two units by byte total alone
    pub fn cmp_total(&self, other: &Self) -> Ordering {
        self.total_bytes.cmp(&other.total_bytes)
    }

    /// Credential variant shared by every entry; `None` for an empty unit
    pub fn credential_kind(&self) -> Result<CredentialKind> {
        let mut kinds = self.entries.iter().map(|e| e.credentials().kind());
        let Some(first) = kinds.next() else {
            return Ok(CredentialKind::None);
        };
        if kinds.any(|k| k != first) {
            return Err(IngestError::Codec(
                "work unit mixes entries with different credential variants".to_string(),
            ));
        }
        Ok(first)
    }
}

/// Partition entries into balanced work units
///
/// Produces `ceil(entries / max_entries_per_unit)` units, none holding more
/// than `max_entries_per_unit` entries. Zero entries yield zero units.
pub fn balance(mut entries: Vec<Entry>, max_entries_per_unit: usize) -> Result<Vec<WorkUnit>> {
    if max_entries_per_unit == 0 {
        return Err(IngestError::config("max entries per unit must be positive"));
    }
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    entries.sort_by(|a, b| b.cmp_size(a));
    let num_units = entries.len().div_ceil(max_entries_per_unit);

    let mut slots: Vec<WorkUnit> = (0..num_units).map(|_| WorkUnit::new()).collect();
    let mut open: BinaryHeap<Reverse<(u64, usize)>> =
        (0..num_units).map(|idx| Reverse((0, idx))).collect();
    let mut frozen = Vec::with_capacity(num_units);

    for entry in entries {
        // Capacity is num_units * max >= entry count, so a unit is always open
        let Some(Reverse((_, idx))) = open.pop() else {
            return Err(IngestError::config("no open work unit left during balancing"));
        };
        let unit = &mut slots[idx];
        unit.push(entry);
        if unit.len() >= max_entries_per_unit {
            frozen.push(idx);
        } else {
            open.push(Reverse((unit.total_bytes(), idx)));
        }
    }

    let mut leftover: Vec<usize> = open.into_iter().map(|Reverse((_, idx))| idx).collect();
    leftover.sort_unstable();

    let mut slots: Vec<Option<WorkUnit>> = slots.into_iter().map(Some).collect();
    let units: Vec<WorkUnit> = frozen
        .into_iter()
        .chain(leftover)
        .filter_map(|idx| slots[idx].take())
        .collect();

    tracing::debug!(
        "Balanced into {} units (max {} entries each)",
        units.len(),
        max_entries_per_unit
    );
    Ok(units)
}

/// Shape of a plan: how evenly bytes were spread
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanSummary {
    pub units: usize,
    pub entries: usize,
    pub total_bytes: u64,
    pub min_unit_bytes: u64,
    pub max_unit_bytes: u64,
    /// Largest unit over the mean unit size (1.0 is perfect)
    pub imbalance: f64,
}

impl PlanSummary {
    pub fn from_units(units: &[WorkUnit]) -> Self {
        if units.is_empty() {
            return Self::default();
        }
        let total_bytes: u64 = units.iter().map(WorkUnit::total_bytes).sum();
        let max_unit_bytes = units.iter().map(WorkUnit::total_bytes).max().unwrap_or(0);
        let min_unit_bytes = units.iter().map(WorkUnit::total_bytes).min().unwrap_or(0);
        let mean = total_bytes as f64 / units.len() as f64;

        Self {
            units: units.len(),
            entries: units.iter().map(WorkUnit::len).sum(),
            total_bytes,
            min_unit_bytes,
            max_unit_bytes,
            imbalance: if mean > 0.0 { max_unit_bytes as f64 / mean } else { 1.0 },
        }
    }

    /// Print plan summary
    pub fn print_summary(&self) {
        println!("Plan Summary:");
        println!("  Work units:  {}", self.units);
        println!(
            "  Entries:     {} ({})",
            self.entries,
            humansize::format_size(self.total_bytes, humansize::BINARY)
        );
        println!(
            "  Unit sizes:  {} .. {}",
            humansize::format_size(self.min_unit_bytes, humansize::BINARY),
            humansize::format_size(self.max_unit_bytes, humansize::BINARY)
        );
        println!("  Imbalance:   {:.3}", self.imbalance);
    }
}
