//! Configuration for an [`EventLog`](crate::EventLog) instance.
//!
//! All options have defaults; a fresh `EventLogConfig::default()` is a fully
//! working configuration. The reducer and the id generator are borrowed
//! capability objects supplied by the caller: the log never inspects them, it
//! only calls them.

use std::sync::Arc;

use serde_json::Value;

use crate::types::{Event, MAX_QUERY_LIMIT};

/// Caller-supplied state reducer: folds one event into the running state.
///
/// The reducer must be deterministic and pure -- reconstruction and snapshot
/// creation both assume that replaying the same events over the same initial
/// state yields the same result. That obligation is the caller's.
pub type Reducer = Arc<dyn Fn(Option<Value>, &Event) -> Value + Send + Sync>;

/// Caller-supplied id generator for events and snapshots.
///
/// The default generates UUID v4 strings from a cryptographic RNG. Tests
/// substitute a deterministic counter to make hashes and archives
/// reproducible.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// The digest algorithm used for event and snapshot hashes.
///
/// SHA-256 is the only permitted value; the variant exists so the choice is
/// explicit in configuration rather than implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// SHA-256, emitted as 64 lowercase hex characters.
    #[default]
    Sha256,
}

/// Configuration for one [`EventLog`](crate::EventLog) instance.
#[derive(Clone)]
pub struct EventLogConfig {
    /// Record-store database identifier.
    pub database_name: String,
    /// Schema tag stamped into the metadata table on construction.
    pub schema_version: u32,
    /// Hard ceiling applied when clamping query limits.
    pub max_events_per_query: usize,
    /// Events per space between automatic snapshots.
    pub snapshot_interval: u64,
    /// Digest algorithm for event and snapshot hashes.
    pub hash_algorithm: HashAlgorithm,
    /// Buffer capacity of the live-subscription broadcast channel.
    pub broker_capacity: usize,
    /// Folds events into derived state. Default: last-write-wins on the
    /// event payload.
    pub state_reducer: Reducer,
    /// Generates ids for events and snapshots. Default: UUID v4.
    pub id_generator: IdGenerator,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        EventLogConfig {
            database_name: "event-log".to_string(),
            schema_version: 1,
            max_events_per_query: MAX_QUERY_LIMIT,
            snapshot_interval: 100,
            hash_algorithm: HashAlgorithm::default(),
            broker_capacity: 64,
            state_reducer: Arc::new(default_reducer),
            id_generator: Arc::new(default_id_generator),
        }
    }
}

impl std::fmt::Debug for EventLogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The two callables have no useful Debug form.
        f.debug_struct("EventLogConfig")
            .field("database_name", &self.database_name)
            .field("schema_version", &self.schema_version)
            .field("max_events_per_query", &self.max_events_per_query)
            .field("snapshot_interval", &self.snapshot_interval)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("broker_capacity", &self.broker_capacity)
            .finish_non_exhaustive()
    }
}

/// Default reducer: the latest event's payload wins wholesale.
fn default_reducer(_state: Option<Value>, event: &Event) -> Value {
    Value::Object(event.payload.clone())
}

/// Default id generator: UUID v4 (cryptographic RNG).
fn default_id_generator() -> String {
    uuid::Uuid::new_v4().to_string()
}
