//! Error types for rblog.
//!
//! This module defines the unified error enum used throughout the crate. All fallible
//! operations return `Result<T, Error>`. Nothing panics on the non-test path and
//! nothing is retried silently; every component bubbles errors upward verbatim.

/// Unified error type for all rblog operations.
///
/// Each variant represents a distinct failure mode:
///
/// - `IntegrityViolation` -> a hash chain or stored-hash mismatch was detected
///   (verifier, exporter, importer)
/// - `StorageFull` -> reserved for callers that wrap the log with a byte budget
/// - `InvalidQuery` -> bad cursor, malformed date, out-of-range timestamp
/// - `InvalidEvent` -> write-input validation failed, or diff reconstruction hit
///   a bad payload
/// - `SnapshotFailed` -> nothing to snapshot, or the space is already compacted
/// - `ImportFailed` -> archive framing, codec, or chain verification failure
/// - `DatabaseError` -> the underlying record store faulted
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A hash chain link or stored event hash does not match what the chain
    /// requires.
    #[error("integrity violation at event {event_id}: expected {expected}, actual {actual}")]
    IntegrityViolation {
        /// Id of the event where the chain first breaks.
        event_id: String,
        /// The hash the chain requires at this position.
        expected: String,
        /// The hash actually found.
        actual: String,
    },

    /// The store's byte budget is exhausted. The core never constructs this
    /// variant; it exists for callers that wrap [`EventLog`](crate::EventLog)
    /// with a capacity check.
    #[error("storage full: {used} of {max} bytes used")]
    StorageFull {
        /// Estimated bytes currently used.
        used: u64,
        /// The caller-imposed byte budget.
        max: u64,
    },

    /// A query argument is invalid (undecodable cursor, malformed timestamp,
    /// out-of-range bound).
    #[error("invalid query: {field}: {reason}")]
    InvalidQuery {
        /// Name of the offending argument.
        field: String,
        /// Human-readable description of what is wrong with it.
        reason: String,
    },

    /// A write input failed validation, or diff reconstruction encountered a
    /// payload that breaks the convention it relies on.
    #[error("invalid event: {field}: {reason}")]
    InvalidEvent {
        /// Name of the offending field.
        field: String,
        /// Human-readable description of what is wrong with it.
        reason: String,
    },

    /// A snapshot could not be created for the space.
    #[error("snapshot failed for space {space_id}: {reason}")]
    SnapshotFailed {
        /// The space a snapshot was requested for.
        space_id: String,
        /// Why no snapshot was produced.
        reason: String,
    },

    /// An archive could not be imported.
    #[error("import failed: {reason}")]
    ImportFailed {
        /// Why the import was rejected.
        reason: String,
        /// Id of the event implicated in the failure, when one is known.
        event_id: Option<String>,
    },

    /// The underlying record store faulted.
    #[error("database error during {operation}: {reason}")]
    DatabaseError {
        /// The store operation that faulted.
        operation: String,
        /// The underlying fault description.
        reason: String,
    },
}

impl Error {
    /// Shorthand for an [`Error::InvalidQuery`] with owned strings.
    pub(crate) fn invalid_query(field: &str, reason: impl Into<String>) -> Self {
        Error::InvalidQuery {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`Error::InvalidEvent`] with owned strings.
    pub(crate) fn invalid_event(field: &str, reason: impl Into<String>) -> Self {
        Error::InvalidEvent {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`Error::DatabaseError`] with owned strings.
    pub(crate) fn database(operation: &str, reason: impl Into<String>) -> Self {
        Error::DatabaseError {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`Error::ImportFailed`] without an implicated event.
    pub(crate) fn import(reason: impl Into<String>) -> Self {
        Error::ImportFailed {
            reason: reason.into(),
            event_id: None,
        }
    }
}
