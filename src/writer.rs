//! Write pipeline: validation, per-space serialization, commit.
//!
//! Writes to the *same* space are linearized: the read-tail, hash
//! computation, and insert happen under a per-space mutex, so sequence
//! numbers and `previous_hash` links are assigned race-free. Writes to
//! different spaces proceed fully concurrently. The lock table is lazily
//! populated and garbage-collected once no writer holds or waits on an
//! entry; it is internal to the pipeline and never exposed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::broker::Broker;
use crate::canonical::EventHashInput;
use crate::chain;
use crate::config::IdGenerator;
use crate::error::Error;
use crate::snapshot::SnapshotManager;
use crate::store::RecordStore;
use crate::types::{Event, EventInput};

/// Lazily populated table of per-space write locks.
///
/// Each space id maps to an `Arc<tokio::sync::Mutex<()>>`. The tokio mutex
/// queues waiters in FIFO order, which gives writes to one space first-come
/// first-served ordering. An entry is removed once the only remaining
/// reference is the table's own (no holder, no waiter).
struct SpaceLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SpaceLocks {
    fn new() -> Self {
        SpaceLocks {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the lock for a space.
    fn handle(&self, space_id: &str) -> Result<Arc<AsyncMutex<()>>, Error> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| Error::database("space_lock", "lock table poisoned"))?;
        Ok(Arc::clone(
            table
                .entry(space_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        ))
    }

    /// Drop a space's entry if no operation holds or waits on it.
    ///
    /// Best-effort: a cancelled writer that never reaches this point leaves
    /// the entry behind, which is harmless -- the next writer reuses it.
    fn release(&self, space_id: &str) {
        if let Ok(mut table) = self.table.lock()
            && let Some(lock) = table.get(space_id)
            && Arc::strong_count(lock) == 1
        {
            table.remove(space_id);
        }
    }

    /// Number of live entries (test observability).
    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().map(|table| table.len()).unwrap_or(0)
    }
}

/// The write pipeline: validates inputs, serializes per space, commits.
///
/// Cloning is cheap; every clone shares the same lock table, store handle,
/// broker, and snapshot manager.
#[derive(Clone)]
pub struct WritePipeline {
    store: RecordStore,
    locks: Arc<SpaceLocks>,
    id_generator: IdGenerator,
    broker: Broker,
    snapshots: SnapshotManager,
    snapshot_interval: u64,
}

impl WritePipeline {
    /// Assemble a pipeline over the shared components.
    pub fn new(
        store: RecordStore,
        id_generator: IdGenerator,
        broker: Broker,
        snapshots: SnapshotManager,
        snapshot_interval: u64,
    ) -> Self {
        WritePipeline {
            store,
            locks: Arc::new(SpaceLocks::new()),
            id_generator,
            broker,
            snapshots,
            snapshot_interval,
        }
    }

    /// Validate, serialize per space, and commit one event.
    ///
    /// Validation runs before any I/O and never takes the space lock. Under
    /// the lock, the pipeline reads the chain tail, obtains an id from the
    /// injectable generator, computes the hash over the canonical hash-input
    /// record, and inserts -- the single-record insert is the atomic commit.
    /// The lock is released on every exit path, including errors and
    /// cancellation (the guard is RAII).
    ///
    /// After a successful commit, outside the lock, the event is published to
    /// live subscribers and the auto-snapshot threshold is checked; a due
    /// snapshot is triggered fire-and-forget and its outcome never affects
    /// the write result.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEvent`] if validation fails (the lock is never
    ///   acquired).
    /// - [`Error::DatabaseError`] if the store faults; the event is not
    ///   inserted.
    pub async fn write_event(&self, input: EventInput) -> Result<Event, Error> {
        validate_input(&input)?;

        let space_id = input.space_id.clone();
        let lock = self.locks.handle(&space_id)?;
        let result = {
            let _guard = Arc::clone(&lock).lock_owned().await;
            self.commit_under_lock(&input)
            // Guard drops here on success, error, and cancellation alike.
        };
        drop(lock);
        self.locks.release(&space_id);

        let event = result?;
        self.broker.publish(&event);
        self.maybe_auto_snapshot(&space_id);
        Ok(event)
    }

    /// The serialized section: read tail, link, hash, insert.
    fn commit_under_lock(&self, input: &EventInput) -> Result<Event, Error> {
        let tail = chain::read_tail(&self.store, &input.space_id)?;
        let id = (self.id_generator)();

        let hash = EventHashInput {
            id: &id,
            event_type: input.event_type,
            space_id: &input.space_id,
            timestamp: &input.timestamp,
            sequence_number: tail.next_sequence_number,
            previous_hash: tail.previous_hash.as_deref(),
            version: input.version,
            payload: &input.payload,
        }
        .digest();

        let event = Event {
            id,
            event_type: input.event_type,
            space_id: input.space_id.clone(),
            timestamp: input.timestamp.clone(),
            sequence_number: tail.next_sequence_number,
            hash,
            previous_hash: tail.previous_hash,
            version: input.version,
            payload: input.payload.clone(),
        };

        self.store.insert_event(event.clone())?;
        tracing::debug!(
            space_id = %event.space_id,
            sequence = event.sequence_number,
            "event committed"
        );
        Ok(event)
    }

    /// Fire-and-forget auto-snapshot check, run outside the space lock.
    fn maybe_auto_snapshot(&self, space_id: &str) {
        let due = match self
            .snapshots
            .should_auto_snapshot(space_id, self.snapshot_interval)
        {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(space_id, error = %e, "auto-snapshot check failed");
                return;
            }
        };
        if !due {
            return;
        }

        let snapshots = self.snapshots.clone();
        let space_id = space_id.to_string();
        tokio::spawn(async move {
            // Concurrent triggers can race to the same coverage; the loser's
            // "already compacted" (or duplicate-position) error is expected.
            if let Err(e) = snapshots.create_snapshot(&space_id) {
                tracing::warn!(space_id = %space_id, error = %e, "auto-snapshot failed");
            }
        });
    }
}

/// Synchronous input validation, run before any I/O.
///
/// The `type` field needs no check here: [`EventType`](crate::EventType) is a
/// closed enum, so only the eleven tags are representable. Untyped inputs
/// (serde, archive import) are checked at their own boundaries.
fn validate_input(input: &EventInput) -> Result<(), Error> {
    if input.space_id.trim().is_empty() {
        return Err(Error::invalid_event("spaceId", "must not be empty"));
    }
    if input.timestamp.is_empty() {
        return Err(Error::invalid_event("timestamp", "must not be empty"));
    }
    if let Err(e) = chrono::DateTime::parse_from_rfc3339(&input.timestamp) {
        return Err(Error::invalid_event(
            "timestamp",
            format!("not a valid ISO-8601 instant: {e}"),
        ));
    }
    if input.version < 1 {
        return Err(Error::invalid_event("version", "must be >= 1"));
    }
    Ok(())
}
