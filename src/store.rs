//! Record store adapter for rblog.
//!
//! This module owns the three record tables (events, snapshots, metadata) and
//! their secondary indexes, and exposes the operation set the rest of the
//! crate reads and writes through: point gets by primary key, bounded range
//! scans in either direction, counts, uniqueness-checked single-record
//! inserts, and whole-table scans.
//!
//! The persistent key-value engine itself is an external collaborator; this
//! in-memory implementation provides the same indexable-record-store contract
//! behind `Arc<RwLock<...>>` so concurrent readers proceed while a writer
//! holds the exclusive lock for the single-record commit. Every operation
//! maps an underlying fault to `DatabaseError{operation, reason}` -- the
//! adapter never panics.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::Error;
use crate::types::{Event, EventType, Snapshot, SpaceInfo};

/// The three tables and their secondary indexes.
///
/// Index keys are tuples ordered so that `BTreeMap`/`BTreeSet` range scans
/// return rows in the index order the query engine relies on:
///
/// - `space_index`: `(space_id, sequence_number) -> event id`
/// - `type_index`: `(type, sequence_number, id)` (the id is the row pointer)
/// - `time_index`: `(timestamp, id)` -- lexicographic on the ISO-8601 string
/// - `snapshot_index`: `(space_id, event_sequence_number) -> snapshot id`
#[derive(Debug, Default)]
struct Tables {
    /// Events table, primary key `id`.
    events: HashMap<String, Event>,
    /// Compound `(space_id, sequence_number)` index over events.
    space_index: BTreeMap<(String, u64), String>,
    /// `(type, sequence_number, id)` index over events.
    type_index: BTreeSet<(EventType, u64, String)>,
    /// `(timestamp, id)` index over events.
    time_index: BTreeSet<(String, String)>,
    /// Snapshots table, primary key `id`.
    snapshots: HashMap<String, Snapshot>,
    /// Compound `(space_id, event_sequence_number)` index over snapshots.
    snapshot_index: BTreeMap<(String, u64), String>,
    /// Metadata table, primary key `key`. Reserved for the schema stamp and
    /// counters; never observable through the public facade.
    metadata: HashMap<String, String>,
}

/// Indexed record store shared by every component of the log.
///
/// Cloning produces a second handle onto the same tables -- the write
/// pipeline, query engine, verifier, and snapshot manager all hold clones.
/// Readers acquire the read lock for the duration of one operation, which
/// gives each query a point-in-time-consistent view of the rows it reads; a
/// query racing a write observes a prefix of the committed sequence.
#[derive(Clone, Debug)]
pub struct RecordStore {
    /// Database identifier, used for diagnostics only.
    name: String,
    /// The shared tables.
    inner: Arc<RwLock<Tables>>,
}

impl RecordStore {
    /// Create an empty store for the given database name.
    pub fn new(name: impl Into<String>) -> Self {
        RecordStore {
            name: name.into(),
            inner: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// The database identifier this store was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the read lock, surfacing poisoning as a `DatabaseError`.
    fn read(&self, operation: &str) -> Result<std::sync::RwLockReadGuard<'_, Tables>, Error> {
        self.inner
            .read()
            .map_err(|_| Error::database(operation, "record store lock poisoned"))
    }

    /// Acquire the write lock, surfacing poisoning as a `DatabaseError`.
    fn write(&self, operation: &str) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, Error> {
        self.inner
            .write()
            .map_err(|_| Error::database(operation, "record store lock poisoned"))
    }

    // ---- events ----

    /// Insert one event. The insert is the atomic commit point: the row and
    /// all index entries become visible together or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseError`] if an event with the same `id`
    /// already exists, or on an underlying fault.
    pub fn insert_event(&self, event: Event) -> Result<(), Error> {
        let mut tables = self.write("insert_event")?;

        if tables.events.contains_key(&event.id) {
            return Err(Error::database(
                "insert_event",
                format!("duplicate primary key: {}", event.id),
            ));
        }

        tables
            .space_index
            .insert((event.space_id.clone(), event.sequence_number), event.id.clone());
        tables
            .type_index
            .insert((event.event_type, event.sequence_number, event.id.clone()));
        tables
            .time_index
            .insert((event.timestamp.clone(), event.id.clone()));
        tables.events.insert(event.id.clone(), event);
        Ok(())
    }

    /// Point get by primary key.
    pub fn get_event(&self, id: &str) -> Result<Option<Event>, Error> {
        let tables = self.read("get_event")?;
        Ok(tables.events.get(id).cloned())
    }

    /// Whether an event with this `id` exists.
    pub fn contains_event(&self, id: &str) -> Result<bool, Error> {
        let tables = self.read("contains_event")?;
        Ok(tables.events.contains_key(id))
    }

    /// Total number of events across all spaces.
    pub fn event_count(&self) -> Result<u64, Error> {
        let tables = self.read("event_count")?;
        Ok(tables.events.len() as u64)
    }

    /// The event with the maximum `sequence_number` in a space, or `None` if
    /// the space has no events. This is the chain tail the write pipeline
    /// links new events to.
    pub fn latest_event_in_space(&self, space_id: &str) -> Result<Option<Event>, Error> {
        let tables = self.read("latest_event_in_space")?;
        let id = tables
            .space_index
            .range(space_range(space_id, 1, u64::MAX))
            .next_back()
            .map(|(_, id)| id.clone());
        Ok(id.and_then(|id| tables.events.get(&id).cloned()))
    }

    /// Range scan over the `(space_id, sequence_number)` index.
    ///
    /// Returns events with sequence numbers in `[min_seq, max_seq]`
    /// (inclusive bounds), ascending when `ascending` is true, else
    /// descending, at most `limit` rows when a limit is given.
    pub fn scan_space(
        &self,
        space_id: &str,
        min_seq: u64,
        max_seq: u64,
        ascending: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, Error> {
        let tables = self.read("scan_space")?;
        if min_seq > max_seq {
            return Ok(Vec::new());
        }

        let range = tables.space_index.range(space_range(space_id, min_seq, max_seq));
        let cap = limit.unwrap_or(usize::MAX);
        let ids: Vec<String> = if ascending {
            range.take(cap).map(|(_, id)| id.clone()).collect()
        } else {
            range.rev().take(cap).map(|(_, id)| id.clone()).collect()
        };

        Ok(ids
            .iter()
            .filter_map(|id| tables.events.get(id).cloned())
            .collect())
    }

    /// Count of events in one space.
    pub fn count_space(&self, space_id: &str) -> Result<u64, Error> {
        let tables = self.read("count_space")?;
        Ok(tables.space_index.range(space_range(space_id, 1, u64::MAX)).count() as u64)
    }

    /// All events with the given type, ascending `(sequence_number, id)`.
    pub fn events_by_type(&self, event_type: EventType) -> Result<Vec<Event>, Error> {
        let tables = self.read("events_by_type")?;
        Ok(tables
            .type_index
            .range(type_range(event_type))
            .filter_map(|(_, _, id)| tables.events.get(id).cloned())
            .collect())
    }

    /// Count of events with the given type.
    pub fn count_type(&self, event_type: EventType) -> Result<u64, Error> {
        let tables = self.read("count_type")?;
        Ok(tables.type_index.range(type_range(event_type)).count() as u64)
    }

    /// All events with `from <= timestamp < to` (lexicographic on the
    /// ISO-8601 string, the timestamp index order), in index order.
    pub fn events_in_time_range(&self, from: &str, to: &str) -> Result<Vec<Event>, Error> {
        let tables = self.read("events_in_time_range")?;
        Ok(tables
            .time_index
            .range(time_range(from, to))
            .filter_map(|(_, id)| tables.events.get(id).cloned())
            .collect())
    }

    /// Count of events with `from <= timestamp < to`.
    pub fn count_time_range(&self, from: &str, to: &str) -> Result<u64, Error> {
        let tables = self.read("count_time_range")?;
        Ok(tables.time_index.range(time_range(from, to)).count() as u64)
    }

    /// Distinct space ids, ascending.
    pub fn distinct_spaces(&self) -> Result<Vec<String>, Error> {
        let tables = self.read("distinct_spaces")?;
        let mut spaces = Vec::new();
        let mut last: Option<&str> = None;
        for (space_id, _) in tables.space_index.keys() {
            if last != Some(space_id.as_str()) {
                spaces.push(space_id.clone());
                last = Some(space_id.as_str());
            }
        }
        Ok(spaces)
    }

    /// Per-space summaries (count and latest sequence), ascending by space id.
    pub fn space_infos(&self) -> Result<Vec<SpaceInfo>, Error> {
        let tables = self.read("space_infos")?;
        let mut infos: Vec<SpaceInfo> = Vec::new();
        for ((space_id, seq), _) in tables.space_index.iter() {
            match infos.last_mut() {
                Some(info) if info.space_id == *space_id => {
                    info.event_count += 1;
                    info.latest_sequence_number = *seq;
                }
                _ => infos.push(SpaceInfo {
                    space_id: space_id.clone(),
                    event_count: 1,
                    latest_sequence_number: *seq,
                }),
            }
        }
        Ok(infos)
    }

    /// Total-iteration scan: every event, ordered by
    /// `(space_id, sequence_number)` for determinism.
    pub fn all_events(&self) -> Result<Vec<Event>, Error> {
        let tables = self.read("all_events")?;
        Ok(tables
            .space_index
            .values()
            .filter_map(|id| tables.events.get(id).cloned())
            .collect())
    }

    // ---- snapshots ----

    /// Insert one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseError`] if a snapshot with the same `id`, or
    /// one at the same `(space_id, event_sequence_number)` index position,
    /// already exists.
    pub fn insert_snapshot(&self, snapshot: Snapshot) -> Result<(), Error> {
        let mut tables = self.write("insert_snapshot")?;

        if tables.snapshots.contains_key(&snapshot.id) {
            return Err(Error::database(
                "insert_snapshot",
                format!("duplicate primary key: {}", snapshot.id),
            ));
        }
        let index_key = (snapshot.space_id.clone(), snapshot.event_sequence_number);
        if tables.snapshot_index.contains_key(&index_key) {
            return Err(Error::database(
                "insert_snapshot",
                format!(
                    "duplicate snapshot position: ({}, {})",
                    snapshot.space_id, snapshot.event_sequence_number
                ),
            ));
        }

        tables.snapshot_index.insert(index_key, snapshot.id.clone());
        tables.snapshots.insert(snapshot.id.clone(), snapshot);
        Ok(())
    }

    /// The snapshot with the largest `event_sequence_number` for a space.
    pub fn latest_snapshot(&self, space_id: &str) -> Result<Option<Snapshot>, Error> {
        let tables = self.read("latest_snapshot")?;
        let id = tables
            .snapshot_index
            .range(space_range(space_id, 0, u64::MAX))
            .next_back()
            .map(|(_, id)| id.clone());
        Ok(id.and_then(|id| tables.snapshots.get(&id).cloned()))
    }

    /// All snapshots for a space, ascending by `event_sequence_number`.
    pub fn snapshots_for_space(&self, space_id: &str) -> Result<Vec<Snapshot>, Error> {
        let tables = self.read("snapshots_for_space")?;
        Ok(tables
            .snapshot_index
            .range(space_range(space_id, 0, u64::MAX))
            .filter_map(|(_, id)| tables.snapshots.get(id).cloned())
            .collect())
    }

    /// Total-iteration scan over snapshots, ordered by
    /// `(space_id, event_sequence_number)`.
    pub fn all_snapshots(&self) -> Result<Vec<Snapshot>, Error> {
        let tables = self.read("all_snapshots")?;
        Ok(tables
            .snapshot_index
            .values()
            .filter_map(|id| tables.snapshots.get(id).cloned())
            .collect())
    }

    /// Number of snapshots across all spaces.
    pub fn snapshot_count(&self) -> Result<u64, Error> {
        let tables = self.read("snapshot_count")?;
        Ok(tables.snapshots.len() as u64)
    }

    // ---- metadata ----

    /// Store a metadata entry, replacing any previous value for the key.
    pub fn put_metadata(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut tables = self.write("put_metadata")?;
        tables.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Point get from the metadata table.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, Error> {
        let tables = self.read("get_metadata")?;
        Ok(tables.metadata.get(key).cloned())
    }
}

/// Inclusive `(space_id, seq)` range for one space.
fn space_range(
    space_id: &str,
    min_seq: u64,
    max_seq: u64,
) -> std::ops::RangeInclusive<(String, u64)> {
    (space_id.to_string(), min_seq)..=(space_id.to_string(), max_seq)
}

/// Full `(type, seq, id)` range for one event type.
fn type_range(
    event_type: EventType,
) -> std::ops::RangeInclusive<(EventType, u64, String)> {
    // '\u{10FFFF}' is the maximum code point; no real id sorts after
    // (type, u64::MAX, that).
    (event_type, 0, String::new())..=(event_type, u64::MAX, "\u{10FFFF}".to_string())
}

/// Half-open `[from, to)` range over the `(timestamp, id)` index.
fn time_range(from: &str, to: &str) -> std::ops::Range<(String, String)> {
    (from.to_string(), String::new())..(to.to_string(), String::new())
}
