//! Cursor-paginated query engine.
//!
//! Three read operations share one pagination contract: an optional clamped
//! limit, an opaque resume cursor, and a traversal order. Events are ordered
//! by `sequence_number` with lexicographic `id` as the tie-break (ties only
//! occur across spaces, for the type and time queries). Pagination requests
//! one row past the limit; the presence of that overflow row decides whether
//! a `next_cursor` is emitted.
//!
//! Queries never go through the write path; they read the store directly and
//! observe a point-in-time-consistent prefix of the committed sequence.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::store::RecordStore;
use crate::types::{DEFAULT_QUERY_LIMIT, Event, EventType, Order, PaginatedResult, QueryOptions};

/// The decoded form of the opaque pagination cursor.
///
/// Callers only ever see the base64 encoding; the shape is an implementation
/// detail and deliberately minimal: the `(sequence_number, id)` position of
/// the last row of the previous page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Cursor {
    /// Sequence number of the last row already delivered.
    sequence_number: u64,
    /// Id of that row, for tie-breaking at equal sequence numbers.
    id: String,
}

/// Encode a cursor pointing at the given event.
fn encode_cursor(event: &Event) -> String {
    let cursor = Cursor {
        sequence_number: event.sequence_number,
        id: event.id.clone(),
    };
    // An in-memory struct of two plain fields always serializes.
    let json = serde_json::to_vec(&cursor).unwrap_or_default();
    BASE64.encode(json)
}

/// Decode an opaque cursor.
///
/// # Errors
///
/// Returns [`Error::InvalidQuery`] with field `"cursor"` on any decode
/// failure -- bad base64, bad JSON, or missing fields.
fn decode_cursor(raw: &str) -> Result<Cursor, Error> {
    let bytes = BASE64
        .decode(raw)
        .map_err(|e| Error::invalid_query("cursor", format!("not valid base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::invalid_query("cursor", format!("not a valid cursor: {e}")))
}

/// Read-side engine over the record store.
///
/// Cloning is cheap; clones share the same store handle.
#[derive(Clone)]
pub struct QueryEngine {
    store: RecordStore,
    /// Hard ceiling on page sizes (from configuration).
    max_limit: usize,
}

impl QueryEngine {
    /// Create an engine with the given page-size ceiling.
    pub fn new(store: RecordStore, max_limit: usize) -> Self {
        QueryEngine {
            store,
            // A ceiling below 1 would make every clamp empty.
            max_limit: max_limit.max(1),
        }
    }

    /// Clamp a requested limit into `[1, max_limit]` silently.
    fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, self.max_limit)
    }

    /// Page through one space's events in sequence order.
    ///
    /// Scans the `(space_id, sequence_number)` index with bounds derived from
    /// the cursor: ascending resumes above the cursor's sequence, descending
    /// resumes below it. `total` is the count of events in the space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] for an undecodable cursor, or
    /// [`Error::DatabaseError`] on a store fault.
    pub fn query_by_space(
        &self,
        space_id: &str,
        opts: &QueryOptions,
    ) -> Result<PaginatedResult<Event>, Error> {
        let limit = self.clamp_limit(opts.limit);
        let cursor = opts.cursor.as_deref().map(decode_cursor).transpose()?;

        let (min_seq, max_seq) = match (opts.order, &cursor) {
            (Order::Asc, None) => (1, u64::MAX),
            (Order::Asc, Some(c)) => (c.sequence_number + 1, u64::MAX),
            (Order::Desc, None) => (1, u64::MAX),
            (Order::Desc, Some(c)) => (1, c.sequence_number.saturating_sub(1)),
        };

        // One row past the limit decides whether another page exists.
        let mut items = self.store.scan_space(
            space_id,
            min_seq,
            max_seq,
            opts.order == Order::Asc,
            Some(limit + 1),
        )?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(encode_cursor)
        } else {
            None
        };

        Ok(PaginatedResult {
            items,
            next_cursor,
            total: self.store.count_space(space_id)?,
        })
    }

    /// Page through all events of one type, across spaces.
    ///
    /// The type index yields rows in ascending `(sequence_number, id)` order;
    /// cursor and order are applied in memory after the fetch. `total` is the
    /// count of events with that type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] for an undecodable cursor, or
    /// [`Error::DatabaseError`] on a store fault.
    pub fn query_by_type(
        &self,
        event_type: EventType,
        opts: &QueryOptions,
    ) -> Result<PaginatedResult<Event>, Error> {
        let limit = self.clamp_limit(opts.limit);
        let cursor = opts.cursor.as_deref().map(decode_cursor).transpose()?;

        let events = self.store.events_by_type(event_type)?;
        let total = self.store.count_type(event_type)?;

        Ok(page_sorted(events, cursor, opts.order, limit, total))
    }

    /// Page through events with `from <= timestamp < to`.
    ///
    /// Both bounds must be ISO-8601 instants. The timestamp index yields the
    /// half-open range in lexicographic string order; rows are then ordered
    /// by `(sequence_number, id)` and the cursor applied in memory. `total`
    /// is the count of events in the range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] for a malformed bound or cursor, or
    /// [`Error::DatabaseError`] on a store fault.
    pub fn query_by_time(
        &self,
        from: &str,
        to: &str,
        opts: &QueryOptions,
    ) -> Result<PaginatedResult<Event>, Error> {
        if let Err(e) = chrono::DateTime::parse_from_rfc3339(from) {
            return Err(Error::invalid_query(
                "from",
                format!("not a valid ISO-8601 instant: {e}"),
            ));
        }
        if let Err(e) = chrono::DateTime::parse_from_rfc3339(to) {
            return Err(Error::invalid_query(
                "to",
                format!("not a valid ISO-8601 instant: {e}"),
            ));
        }

        let limit = self.clamp_limit(opts.limit);
        let cursor = opts.cursor.as_deref().map(decode_cursor).transpose()?;

        let mut events = self.store.events_in_time_range(from, to)?;
        // The time index orders by timestamp; pagination orders by position.
        events.sort_by(|a, b| {
            (a.sequence_number, a.id.as_str()).cmp(&(b.sequence_number, b.id.as_str()))
        });
        let total = self.store.count_time_range(from, to)?;

        Ok(page_sorted(events, cursor, opts.order, limit, total))
    }
}

/// Apply cursor, order, and the limit+1 overflow probe to rows already
/// sorted ascending by `(sequence_number, id)`.
fn page_sorted(
    events: Vec<Event>,
    cursor: Option<Cursor>,
    order: Order,
    limit: usize,
    total: u64,
) -> PaginatedResult<Event> {
    let past_cursor = |event: &Event| match (&cursor, order) {
        (None, _) => true,
        (Some(c), Order::Asc) => {
            (event.sequence_number, event.id.as_str()) > (c.sequence_number, c.id.as_str())
        }
        (Some(c), Order::Desc) => {
            (event.sequence_number, event.id.as_str()) < (c.sequence_number, c.id.as_str())
        }
    };

    let mut items: Vec<Event> = match order {
        Order::Asc => events.into_iter().filter(past_cursor).take(limit + 1).collect(),
        Order::Desc => events
            .into_iter()
            .rev()
            .filter(past_cursor)
            .take(limit + 1)
            .collect(),
    };

    let next_cursor = if items.len() > limit {
        items.truncate(limit);
        items.last().map(encode_cursor)
    } else {
        None
    };

    PaginatedResult {
        items,
        next_cursor,
        total,
    }
}
