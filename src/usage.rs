//! Storage accounting and pressure classification.
//!
//! Accounting iterates every event and snapshot once, estimating each
//! record's cost as its JSON string length, and tallies totals per space.
//! The pressure classifier is a pure function from a report and an available
//! byte budget to a five-level recommendation; it reads nothing.

use crate::error::Error;
use crate::store::RecordStore;

/// Storage tally for one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceUsage {
    /// The space id.
    pub space_id: String,
    /// Events in the space.
    pub event_count: u64,
    /// Estimated bytes for the space's events and snapshots.
    pub estimated_bytes: u64,
}

/// Whole-store storage report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageReport {
    /// Total events across all spaces.
    pub total_events: u64,
    /// Total snapshots across all spaces.
    pub total_snapshots: u64,
    /// Estimated bytes for all events and snapshots.
    pub estimated_bytes: u64,
    /// Per-space tallies, ascending by space id.
    pub per_space: Vec<SpaceUsage>,
    /// Lexicographically smallest event timestamp seen.
    pub oldest_timestamp: Option<String>,
    /// Lexicographically largest event timestamp seen.
    pub newest_timestamp: Option<String>,
}

/// The five storage pressure levels, by rising severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    /// Usage is comfortably low.
    Normal,
    /// Compaction would be worthwhile.
    Compact,
    /// The caller should offer the user an export.
    ExportPrompt,
    /// Compaction and export are both overdue.
    Aggressive,
    /// Writes should be refused by the caller until space is reclaimed.
    Blocked,
}

/// Result of a pressure classification.
#[derive(Debug, Clone, PartialEq)]
pub struct StoragePressure {
    /// The classified level.
    pub level: PressureLevel,
    /// `estimated_bytes / available_bytes`, capped at 1.
    pub usage_ratio: f64,
    /// Level-specific guidance for the caller.
    pub recommendation: String,
}

/// Computes storage reports over the record store.
#[derive(Clone)]
pub struct StorageAccountant {
    store: RecordStore,
}

impl StorageAccountant {
    /// Create an accountant over the given store.
    pub fn new(store: RecordStore) -> Self {
        StorageAccountant { store }
    }

    /// Tally storage use: one pass over events, one over snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseError`] on a store fault.
    pub fn get_storage_usage(&self) -> Result<StorageReport, Error> {
        let mut report = StorageReport {
            total_events: 0,
            total_snapshots: 0,
            estimated_bytes: 0,
            per_space: Vec::new(),
            oldest_timestamp: None,
            newest_timestamp: None,
        };

        // Events arrive ordered by (space_id, sequence_number), so spaces
        // form contiguous runs and the per-space vec stays sorted.
        for event in self.store.all_events()? {
            let bytes = event.estimated_bytes();
            report.total_events += 1;
            report.estimated_bytes += bytes;

            if report
                .oldest_timestamp
                .as_deref()
                .is_none_or(|oldest| event.timestamp.as_str() < oldest)
            {
                report.oldest_timestamp = Some(event.timestamp.clone());
            }
            if report
                .newest_timestamp
                .as_deref()
                .is_none_or(|newest| event.timestamp.as_str() > newest)
            {
                report.newest_timestamp = Some(event.timestamp.clone());
            }

            tally(&mut report.per_space, &event.space_id, 1, bytes);
        }

        for snapshot in self.store.all_snapshots()? {
            let bytes = snapshot.estimated_bytes();
            report.total_snapshots += 1;
            report.estimated_bytes += bytes;
            tally(&mut report.per_space, &snapshot.space_id, 0, bytes);
        }

        report.per_space.sort_by(|a, b| a.space_id.cmp(&b.space_id));
        Ok(report)
    }
}

/// Add a record's cost to its space's tally, creating the entry on demand.
fn tally(per_space: &mut Vec<SpaceUsage>, space_id: &str, events: u64, bytes: u64) {
    match per_space.iter_mut().find(|usage| usage.space_id == space_id) {
        Some(usage) => {
            usage.event_count += events;
            usage.estimated_bytes += bytes;
        }
        None => per_space.push(SpaceUsage {
            space_id: space_id.to_string(),
            event_count: events,
            estimated_bytes: bytes,
        }),
    }
}

/// Classify storage pressure against an available byte budget.
///
/// Pure: the classification depends only on its arguments. The ratio is
/// `estimated_bytes / available_bytes` capped at 1, and 1 outright when no
/// bytes are available. Levels have inclusive lower bounds: `[0, 0.5)`
/// normal, `[0.5, 0.7)` compact, `[0.7, 0.8)` export prompt, `[0.8, 0.9)`
/// aggressive, `[0.9, 1.0]` blocked.
pub fn classify_pressure(report: &StorageReport, available_bytes: u64) -> StoragePressure {
    let usage_ratio = if available_bytes == 0 {
        1.0
    } else {
        (report.estimated_bytes as f64 / available_bytes as f64).min(1.0)
    };

    let (level, recommendation) = if usage_ratio < 0.5 {
        (PressureLevel::Normal, "storage is healthy; no action needed")
    } else if usage_ratio < 0.7 {
        (
            PressureLevel::Compact,
            "compact active spaces to cover more of the log with snapshots",
        )
    } else if usage_ratio < 0.8 {
        (
            PressureLevel::ExportPrompt,
            "offer the user an archive export of cold spaces",
        )
    } else if usage_ratio < 0.9 {
        (
            PressureLevel::Aggressive,
            "compact everything and export cold spaces now",
        )
    } else {
        (
            PressureLevel::Blocked,
            "refuse new writes until storage is reclaimed",
        )
    };

    StoragePressure {
        level,
        usage_ratio,
        recommendation: recommendation.to_string(),
    }
}
