//! rblog: an embedded, append-only event log with cryptographic integrity,
//! temporal queries, snapshot-based state reconstruction, and a portable
//! compressed archive format for tiered storage.

pub mod archive;
pub mod broker;
pub mod canonical;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod log;
pub mod reader;
pub mod reconstruct;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod types;
pub mod usage;
pub mod verify;
pub mod writer;

pub use archive::{Archiver, ImportIssue, ImportReport};
pub use broker::{Broker, subscribe_all, subscribe_space};
pub use config::{EventLogConfig, HashAlgorithm, IdGenerator, Reducer};
pub use error::Error;
pub use log::EventLog;
pub use reader::QueryEngine;
pub use snapshot::{CompactionReport, SnapshotManager};
pub use source::ReconstructedSource;
pub use store::RecordStore;
pub use types::{
    DEFAULT_QUERY_LIMIT, Event, EventInput, EventType, MAX_QUERY_LIMIT, Order, PaginatedResult,
    QueryOptions, Snapshot, SpaceInfo, SubscriptionMessage,
};
pub use usage::{
    PressureLevel, SpaceUsage, StoragePressure, StorageReport, classify_pressure,
};
pub use verify::{BrokenLink, IntegrityReport, IntegrityVerifier};
pub use writer::WritePipeline;
