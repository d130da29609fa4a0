//! Snapshot management and compaction.
//!
//! A snapshot is a checkpoint of reducer-derived state pinned to the sequence
//! number of the last event folded in. Snapshots are built incrementally:
//! each new snapshot starts from the previous one's state and folds only the
//! events committed since. They accumulate without bound and never cause
//! event deletion -- compaction here means "cover more of the log with a
//! checkpoint", nothing else.

use serde_json::Value;

use crate::canonical;
use crate::config::{IdGenerator, Reducer};
use crate::error::Error;
use crate::store::RecordStore;
use crate::types::Snapshot;

/// Result of a [`compact`](SnapshotManager::compact) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Id of the snapshot the compaction produced.
    pub snapshot_id: String,
    /// The space that was compacted.
    pub space_id: String,
    /// Events newly covered by the snapshot (since the prior one).
    pub events_compacted: u64,
    /// Summed JSON length of the newly covered events. Advisory only --
    /// no event is ever deleted.
    pub estimated_bytes_saved: u64,
}

/// Builds snapshots and answers the auto-snapshot question.
///
/// Cloning is cheap (shared store handle, shared callables); the write
/// pipeline clones one into each fire-and-forget auto-snapshot task.
#[derive(Clone)]
pub struct SnapshotManager {
    /// Record store handle.
    store: RecordStore,
    /// Caller-supplied reducer folding events into state.
    reducer: Reducer,
    /// Caller-supplied id generator.
    id_generator: IdGenerator,
}

impl SnapshotManager {
    /// Create a manager over the given store and capability objects.
    pub fn new(store: RecordStore, reducer: Reducer, id_generator: IdGenerator) -> Self {
        SnapshotManager {
            store,
            reducer,
            id_generator,
        }
    }

    /// Create a snapshot for a space.
    ///
    /// Starts from the latest existing snapshot (if any), folds every event
    /// committed since through the reducer, and stores the result pinned to
    /// the last folded event's sequence number and timestamp. Determinism:
    /// the snapshot's timestamp is the last event's, never a wall clock.
    ///
    /// # Errors
    ///
    /// - [`Error::SnapshotFailed`] with reason `"no events"` if the space has
    ///   no events at all.
    /// - [`Error::SnapshotFailed`] with reason `"already compacted"` if a
    ///   snapshot exists and no events follow it.
    /// - [`Error::DatabaseError`] on a store fault.
    pub fn create_snapshot(&self, space_id: &str) -> Result<Snapshot, Error> {
        let latest = self.store.latest_snapshot(space_id)?;
        let from_seq = latest
            .as_ref()
            .map(|snap| snap.event_sequence_number + 1)
            .unwrap_or(1);

        let new_events = self
            .store
            .scan_space(space_id, from_seq, u64::MAX, true, None)?;

        if new_events.is_empty() {
            let reason = if latest.is_none() {
                "no events"
            } else {
                "already compacted"
            };
            return Err(Error::SnapshotFailed {
                space_id: space_id.to_string(),
                reason: reason.to_string(),
            });
        }

        let mut state: Option<Value> = latest.map(|snap| snap.state);
        let mut last_seq = 0;
        let mut last_timestamp = String::new();
        for event in &new_events {
            state = Some((self.reducer)(state, event));
            last_seq = event.sequence_number;
            last_timestamp = event.timestamp.clone();
        }
        let state = state.ok_or_else(|| Error::SnapshotFailed {
            space_id: space_id.to_string(),
            reason: "no events".to_string(),
        })?;

        let snapshot = Snapshot {
            id: (self.id_generator)(),
            space_id: space_id.to_string(),
            event_sequence_number: last_seq,
            timestamp: last_timestamp,
            hash: canonical::hash_value(&state),
            state,
        };

        self.store.insert_snapshot(snapshot.clone())?;
        tracing::debug!(
            space_id,
            sequence = snapshot.event_sequence_number,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Number of events in a space not yet covered by any snapshot.
    ///
    /// Sequence numbers are the contiguous prefix `1..N`, so this is the
    /// space's event count minus the latest snapshot's pin.
    pub fn events_since_last_snapshot(&self, space_id: &str) -> Result<u64, Error> {
        let total = self.store.count_space(space_id)?;
        let covered = self
            .store
            .latest_snapshot(space_id)?
            .map(|snap| snap.event_sequence_number)
            .unwrap_or(0);
        Ok(total.saturating_sub(covered))
    }

    /// Whether the auto-snapshot threshold has been reached for a space.
    pub fn should_auto_snapshot(&self, space_id: &str, interval: u64) -> Result<bool, Error> {
        Ok(self.events_since_last_snapshot(space_id)? >= interval)
    }

    /// Compact a space: create a snapshot and report what it newly covers.
    ///
    /// The bytes-saved figure is the summed JSON length of the events the new
    /// snapshot covers beyond the prior one. It is advisory -- the log never
    /// deletes events; callers use it to judge what an external prune or
    /// export would reclaim.
    ///
    /// # Errors
    ///
    /// Propagates [`create_snapshot`](Self::create_snapshot)'s errors.
    pub fn compact(&self, space_id: &str) -> Result<CompactionReport, Error> {
        let prior_seq = self
            .store
            .latest_snapshot(space_id)?
            .map(|snap| snap.event_sequence_number)
            .unwrap_or(0);

        let snapshot = self.create_snapshot(space_id)?;

        let covered = self.store.scan_space(
            space_id,
            prior_seq + 1,
            snapshot.event_sequence_number,
            true,
            None,
        )?;
        let estimated_bytes_saved = covered.iter().map(|e| e.estimated_bytes()).sum();

        Ok(CompactionReport {
            snapshot_id: snapshot.id,
            space_id: space_id.to_string(),
            events_compacted: covered.len() as u64,
            estimated_bytes_saved,
        })
    }
}
