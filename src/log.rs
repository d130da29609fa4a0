//! The `EventLog` facade.
//!
//! One `EventLog` owns one record store and wires the components together:
//! the write pipeline, the query engine, the verifier, snapshots and
//! reconstruction, archiving, accounting, and the live broker. Every
//! operation of the public contract lives here as a thin async delegation;
//! the components do the work.

use bytes::Bytes;
use serde_json::Value;

use crate::archive::{Archiver, ImportReport};
use crate::broker::{self, Broker};
use crate::config::EventLogConfig;
use crate::error::Error;
use crate::reader::QueryEngine;
use crate::reconstruct::StateReconstructor;
use crate::snapshot::{CompactionReport, SnapshotManager};
use crate::source::{ReconstructedSource, SourceReconstructor};
use crate::store::RecordStore;
use crate::types::{
    Event, EventInput, EventType, PaginatedResult, QueryOptions, Snapshot, SpaceInfo,
    SubscriptionMessage,
};
use crate::usage::{StorageAccountant, StoragePressure, StorageReport, classify_pressure};
use crate::verify::{IntegrityReport, IntegrityVerifier};
use crate::writer::WritePipeline;

/// Metadata key carrying the schema stamp.
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// An embedded, tamper-evident, append-only event log.
///
/// Construction wires all components over one shared record store and stamps
/// the schema version into the metadata table. The instance is cheaply
/// cloneable and safe to share across tasks: writes serialize per space,
/// reads run concurrently.
#[derive(Clone)]
pub struct EventLog {
    store: RecordStore,
    pipeline: WritePipeline,
    queries: QueryEngine,
    verifier: IntegrityVerifier,
    snapshots: SnapshotManager,
    reconstructor: StateReconstructor,
    sources: SourceReconstructor,
    archiver: Archiver,
    accountant: StorageAccountant,
    broker: Broker,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").finish_non_exhaustive()
    }
}

impl EventLog {
    /// Open an event log with the given configuration over a fresh store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseError`] if the store faults while stamping
    /// the schema version.
    pub fn open(config: EventLogConfig) -> Result<EventLog, Error> {
        let store = RecordStore::new(config.database_name.clone());
        Self::open_with_store(config, store)
    }

    /// Open an event log over an existing store handle.
    ///
    /// A fresh store is stamped with the configured schema version; a store
    /// that already carries a stamp must match it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseError`] if the stored schema version differs
    /// from the configured one, or on a store fault.
    pub fn open_with_store(config: EventLogConfig, store: RecordStore) -> Result<EventLog, Error> {
        match store.get_metadata(SCHEMA_VERSION_KEY)? {
            None => store.put_metadata(SCHEMA_VERSION_KEY, &config.schema_version.to_string())?,
            Some(stamped) if stamped == config.schema_version.to_string() => {}
            Some(stamped) => {
                return Err(Error::database(
                    "open",
                    format!(
                        "schema version mismatch: store has {stamped}, config wants {}",
                        config.schema_version
                    ),
                ));
            }
        }

        let broker = Broker::new(config.broker_capacity);
        let snapshots = SnapshotManager::new(
            store.clone(),
            config.state_reducer.clone(),
            config.id_generator.clone(),
        );
        let pipeline = WritePipeline::new(
            store.clone(),
            config.id_generator.clone(),
            broker.clone(),
            snapshots.clone(),
            config.snapshot_interval,
        );

        tracing::debug!(database = %store.name(), "event log opened");
        Ok(EventLog {
            pipeline,
            queries: QueryEngine::new(store.clone(), config.max_events_per_query),
            verifier: IntegrityVerifier::new(store.clone()),
            reconstructor: StateReconstructor::new(store.clone(), config.state_reducer.clone()),
            sources: SourceReconstructor::new(store.clone()),
            archiver: Archiver::new(store.clone()),
            accountant: StorageAccountant::new(store.clone()),
            snapshots,
            broker,
            store,
        })
    }

    /// Open with the default configuration.
    pub fn with_defaults() -> Result<EventLog, Error> {
        Self::open(EventLogConfig::default())
    }

    // ---- writes ----

    /// Append one event. See [`WritePipeline::write_event`].
    pub async fn write_event(&self, input: EventInput) -> Result<Event, Error> {
        self.pipeline.write_event(input).await
    }

    // ---- queries ----

    /// Page through one space's events in sequence order.
    pub async fn query_by_space(
        &self,
        space_id: &str,
        opts: Option<QueryOptions>,
    ) -> Result<PaginatedResult<Event>, Error> {
        self.queries
            .query_by_space(space_id, &opts.unwrap_or_default())
    }

    /// Page through all events of one type.
    pub async fn query_by_type(
        &self,
        event_type: EventType,
        opts: Option<QueryOptions>,
    ) -> Result<PaginatedResult<Event>, Error> {
        self.queries
            .query_by_type(event_type, &opts.unwrap_or_default())
    }

    /// Page through events with `from <= timestamp < to`.
    pub async fn query_by_time(
        &self,
        from: &str,
        to: &str,
        opts: Option<QueryOptions>,
    ) -> Result<PaginatedResult<Event>, Error> {
        self.queries
            .query_by_time(from, to, &opts.unwrap_or_default())
    }

    // ---- derived state ----

    /// Reconstruct a space's reducer state, optionally as of an instant.
    pub async fn reconstruct_state(
        &self,
        space_id: &str,
        at_timestamp: Option<&str>,
    ) -> Result<Value, Error> {
        self.reconstructor.reconstruct_state(space_id, at_timestamp)
    }

    /// Reconstruct a space's source document from its diff stream.
    pub async fn reconstruct_source(
        &self,
        space_id: &str,
        at_timestamp: Option<&str>,
    ) -> Result<ReconstructedSource, Error> {
        self.sources.reconstruct_source(space_id, at_timestamp)
    }

    // ---- integrity ----

    /// Verify one space's chain, or every space when none is given.
    pub async fn verify_integrity(
        &self,
        space_id: Option<&str>,
    ) -> Result<IntegrityReport, Error> {
        self.verifier.verify(space_id)
    }

    // ---- snapshots ----

    /// Create a snapshot for a space.
    pub async fn create_snapshot(&self, space_id: &str) -> Result<Snapshot, Error> {
        self.snapshots.create_snapshot(space_id)
    }

    /// Compact a space (snapshot-only; never deletes events).
    pub async fn compact(&self, space_id: &str) -> Result<CompactionReport, Error> {
        self.snapshots.compact(space_id)
    }

    // ---- accounting ----

    /// Tally storage use across all spaces.
    pub async fn get_storage_usage(&self) -> Result<StorageReport, Error> {
        self.accountant.get_storage_usage()
    }

    /// Tally storage use and classify it against an available byte budget.
    pub async fn storage_pressure(&self, available_bytes: u64) -> Result<StoragePressure, Error> {
        Ok(classify_pressure(
            &self.accountant.get_storage_usage()?,
            available_bytes,
        ))
    }

    // ---- archives ----

    /// Export a space's events with `timestamp < before_date` as a
    /// `.rblogs` archive.
    pub async fn export_archive(&self, space_id: &str, before_date: &str) -> Result<Bytes, Error> {
        self.archiver.export_archive(space_id, before_date)
    }

    /// Import a `.rblogs` archive, skipping events that already exist.
    pub async fn import_archive(&self, bytes: &[u8]) -> Result<ImportReport, Error> {
        self.archiver.import_archive(bytes)
    }

    // ---- spaces & subscriptions ----

    /// Point get of one event by id.
    pub async fn get_event(&self, id: &str) -> Result<Option<Event>, Error> {
        self.store.get_event(id)
    }

    /// Number of events in one space.
    pub async fn event_count(&self, space_id: &str) -> Result<u64, Error> {
        self.store.count_space(space_id)
    }

    /// Summaries of every space, ascending by space id.
    pub async fn list_spaces(&self) -> Result<Vec<SpaceInfo>, Error> {
        self.store.space_infos()
    }

    /// Stream the full history of every space, then live events.
    pub fn subscribe_all(
        &self,
    ) -> impl futures_core::Stream<Item = Result<SubscriptionMessage, Error>> + use<> {
        broker::subscribe_all(self.store.clone(), &self.broker)
    }

    /// Stream one space from a sequence number, then live events.
    pub fn subscribe_space(
        &self,
        space_id: &str,
        from_sequence: u64,
    ) -> impl futures_core::Stream<Item = Result<SubscriptionMessage, Error>> + use<> {
        broker::subscribe_space(
            self.store.clone(),
            &self.broker,
            space_id.to_string(),
            from_sequence,
        )
    }
}
