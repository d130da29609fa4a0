//! Core domain types for rblog.
//!
//! This module defines the foundational data types that every other module depends on:
//! event inputs (caller-submitted), committed events (store-assigned sequence and hash
//! chain position), snapshots, the shared query/pagination contract, and the live
//! subscription message type.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default number of items returned by a query when no limit is given.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Hard ceiling on the number of items a single query page may carry.
///
/// Requested limits are clamped into `[1, MAX_QUERY_LIMIT]` silently; a limit
/// of 0 becomes 1 and anything above the ceiling becomes the ceiling.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// The fixed set of event type tags.
///
/// Every committed event carries exactly one of these eleven tags. The set is
/// closed: write validation and archive import both reject anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A space came into existence.
    SpaceCreated,
    /// A space's tracked source evolved (carries an AST diff by convention).
    SpaceEvolved,
    /// A space was forked from another space.
    SpaceForked,
    /// A space was marked deleted (the log itself never deletes).
    SpaceDeleted,
    /// Derived state changed.
    StateChanged,
    /// An action was invoked.
    ActionInvoked,
    /// An intent was submitted.
    IntentSubmitted,
    /// An intent was queued.
    IntentQueued,
    /// An intent was resolved.
    IntentResolved,
    /// Feedback supplied by a user.
    UserFeedback,
    /// An event emitted by the system itself.
    SystemEvent,
}

impl EventType {
    /// All eleven tags, in declaration order.
    pub const ALL: [EventType; 11] = [
        EventType::SpaceCreated,
        EventType::SpaceEvolved,
        EventType::SpaceForked,
        EventType::SpaceDeleted,
        EventType::StateChanged,
        EventType::ActionInvoked,
        EventType::IntentSubmitted,
        EventType::IntentQueued,
        EventType::IntentResolved,
        EventType::UserFeedback,
        EventType::SystemEvent,
    ];

    /// The wire form of the tag (snake_case, matching the serde encoding).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SpaceCreated => "space_created",
            EventType::SpaceEvolved => "space_evolved",
            EventType::SpaceForked => "space_forked",
            EventType::SpaceDeleted => "space_deleted",
            EventType::StateChanged => "state_changed",
            EventType::ActionInvoked => "action_invoked",
            EventType::IntentSubmitted => "intent_submitted",
            EventType::IntentQueued => "intent_queued",
            EventType::IntentResolved => "intent_resolved",
            EventType::UserFeedback => "user_feedback",
            EventType::SystemEvent => "system_event",
        }
    }

    /// Parse a wire-form tag. Returns `None` for anything outside the
    /// eleven-member set.
    pub fn parse(tag: &str) -> Option<EventType> {
        EventType::ALL.iter().copied().find(|t| t.as_str() == tag)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event the caller wants to append to a space.
///
/// The caller supplies the domain content; the write pipeline assigns `id`,
/// `sequence_number`, `previous_hash`, and `hash` at commit time.
///
/// # Fields
///
/// * `event_type` - One of the eleven enumerated tags.
/// * `space_id` - Target space. Must be non-empty after trimming.
/// * `timestamp` - Caller-supplied ISO-8601 instant. The log never reads a
///   wall clock; timestamps are the caller's responsibility.
/// * `version` - Caller's payload schema tag, `>= 1`.
/// * `payload` - Free-form JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInput {
    /// One of the eleven enumerated tags.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Target space. Must be non-empty after trimming.
    pub space_id: String,
    /// Caller-supplied ISO-8601 instant.
    pub timestamp: String,
    /// Caller's payload schema tag, `>= 1`.
    pub version: u32,
    /// Free-form JSON object.
    pub payload: Map<String, Value>,
}

/// A committed event with store-assigned chain position.
///
/// Once the write pipeline commits an event it is frozen: no field is ever
/// mutated and no event is ever removed short of wholesale database deletion.
///
/// Field declaration order is load-bearing: it is exactly the fixed archival
/// field order (`id, type, space_id, timestamp, sequence_number, hash,
/// previous_hash, version, payload`), so serializing a `Vec<Event>` with
/// serde_json produces an archive body byte-for-byte. The sorted-key canonical
/// form used for the event *hash* is a separate serializer in
/// [`canonical`](crate::canonical); the two must never be conflated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-wide unique id, from the injectable generator.
    pub id: String,
    /// One of the eleven enumerated tags.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The space this event belongs to.
    pub space_id: String,
    /// Caller-supplied ISO-8601 instant, carried verbatim.
    pub timestamp: String,
    /// Position within the space: `1, 2, ...` with no gaps.
    pub sequence_number: u64,
    /// Lowercase hex SHA-256 over the canonical hash input record.
    pub hash: String,
    /// The predecessor's `hash`, or `None` for the genesis event.
    pub previous_hash: Option<String>,
    /// Caller's payload schema tag.
    pub version: u32,
    /// Free-form JSON object.
    pub payload: Map<String, Value>,
}

impl Event {
    /// Estimated storage cost of this event in bytes (its JSON string length).
    pub fn estimated_bytes(&self) -> u64 {
        serde_json::to_string(self).map(|s| s.len() as u64).unwrap_or(0)
    }
}

/// A checkpoint of reducer-derived state, pinned to an event sequence number.
///
/// Snapshots are additive: a new snapshot for a space always covers a strictly
/// larger `event_sequence_number` than every prior snapshot for that space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Store-wide unique id, from the injectable generator.
    pub id: String,
    /// The space this snapshot covers.
    pub space_id: String,
    /// Sequence number of the last event folded into `state`.
    pub event_sequence_number: u64,
    /// Timestamp of that last folded event (never a wall clock).
    pub timestamp: String,
    /// Opaque state produced by the caller's reducer.
    pub state: Value,
    /// Lowercase hex SHA-256 of the canonical-serialized `state`.
    pub hash: String,
}

impl Snapshot {
    /// Estimated storage cost of this snapshot in bytes (its JSON string length).
    pub fn estimated_bytes(&self) -> u64 {
        serde_json::to_string(self).map(|s| s.len() as u64).unwrap_or(0)
    }
}

/// Traversal direction for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Ascending `(sequence_number, id)`, the default.
    #[default]
    Asc,
    /// Descending `(sequence_number, id)`.
    Desc,
}

/// Options shared by the three query operations.
///
/// All fields are optional; defaults are a limit of
/// [`DEFAULT_QUERY_LIMIT`], no cursor, ascending order.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Page size. Clamped silently into `[1, MAX_QUERY_LIMIT]`.
    pub limit: Option<usize>,
    /// Opaque resume token from a previous page's `next_cursor`.
    pub cursor: Option<String>,
    /// Traversal direction.
    pub order: Order,
}

/// One page of query results.
///
/// `next_cursor` is present exactly when more rows exist past this page;
/// passing it back in [`QueryOptions::cursor`] resumes where the page ended.
/// `total` counts all rows matching the query, not just this page.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedResult<T> {
    /// The rows of this page, at most the clamped limit.
    pub items: Vec<T>,
    /// Resume token for the next page, absent on the last page.
    pub next_cursor: Option<String>,
    /// Count of all rows matching the query.
    pub total: u64,
}

/// Summary of one space, as returned by
/// [`EventLog::list_spaces`](crate::EventLog::list_spaces).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceInfo {
    /// The space id.
    pub space_id: String,
    /// Number of events committed to the space.
    pub event_count: u64,
    /// Sequence number of the space's newest event.
    pub latest_sequence_number: u64,
}

/// Message yielded by subscription streams.
///
/// Subscribers first receive historical `Event` messages (catch-up), then a
/// single `CaughtUp` marker, then live `Event` messages as writes commit.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    /// A committed event, shared across all subscribers via `Arc`.
    Event(Arc<Event>),
    /// Catch-up is complete; everything after this marker is live.
    CaughtUp,
}
