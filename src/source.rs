//! Source reconstruction from AST diffs.
//!
//! Some spaces track a source document by convention: the genesis
//! `space_created` event carries the initial `source` string (and its hash),
//! and each `space_evolved` event carries an `ast_diff` -- a list of
//! path-based operations -- together with the expected hash of the document
//! after the diff applies. Reconstruction replays those diffs and verifies
//! every step's hash, so a corrupted or re-ordered diff stream is caught at
//! the exact step it diverges.
//!
//! Mutations are applied to a locally owned clone of the state, set-at-path
//! creating missing intermediate objects and delete-at-path ignoring absent
//! paths.

use serde_json::Value;

use crate::canonical;
use crate::error::Error;
use crate::store::RecordStore;
use crate::types::{Event, EventType};

/// A reconstructed source document with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedSource {
    /// The space the document belongs to.
    pub space_id: String,
    /// The document after all qualifying diffs applied.
    pub source: Value,
    /// Number of diff events applied on top of the genesis source.
    pub applied_events: u64,
    /// The temporal cutoff used, if any.
    pub as_of: Option<String>,
}

/// Replays diff streams into source documents.
#[derive(Clone)]
pub struct SourceReconstructor {
    store: RecordStore,
}

impl SourceReconstructor {
    /// Create a reconstructor over the given store.
    pub fn new(store: RecordStore) -> Self {
        SourceReconstructor { store }
    }

    /// Reconstruct a space's source document, optionally as of an instant.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidQuery`] with field `"atTimestamp"` for a malformed
    ///   cutoff, or `"spaceId"` if the space has no events.
    /// - [`Error::InvalidEvent`] if the genesis event does not carry a
    ///   source, a diff payload is malformed, or a step's hash does not
    ///   match (`field: "sourceHash"`, `reason: "step N: expected X, got Y"`).
    /// - [`Error::DatabaseError`] on a store fault.
    pub fn reconstruct_source(
        &self,
        space_id: &str,
        at_timestamp: Option<&str>,
    ) -> Result<ReconstructedSource, Error> {
        if let Some(at) = at_timestamp
            && let Err(e) = chrono::DateTime::parse_from_rfc3339(at)
        {
            return Err(Error::invalid_query(
                "atTimestamp",
                format!("not a valid ISO-8601 instant: {e}"),
            ));
        }

        let events = self.store.scan_space(space_id, 1, u64::MAX, true, None)?;
        let Some(genesis) = events.first() else {
            return Err(Error::invalid_query("spaceId", "space has no events"));
        };

        let mut state = initial_source(genesis)?;
        verify_step_hash(genesis, &state, 0)?;

        let mut applied_events = 0u64;
        for event in events.iter().skip(1) {
            if event.event_type != EventType::SpaceEvolved {
                continue;
            }
            if let Some(at) = at_timestamp
                && event.timestamp.as_str() > at
            {
                continue;
            }

            apply_diff(event, &mut state)?;
            applied_events += 1;
            verify_step_hash(event, &state, applied_events)?;
        }

        Ok(ReconstructedSource {
            space_id: space_id.to_string(),
            source: state,
            applied_events,
            as_of: at_timestamp.map(str::to_string),
        })
    }
}

/// Extract the genesis source: a JSON document if it parses, otherwise the
/// raw string wrapped as `{"source": <string>}`.
fn initial_source(genesis: &Event) -> Result<Value, Error> {
    if genesis.event_type != EventType::SpaceCreated {
        return Err(Error::invalid_event(
            "type",
            format!(
                "source reconstruction needs a space_created genesis, found {}",
                genesis.event_type
            ),
        ));
    }

    let raw = genesis
        .payload
        .get("source")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_event("source", "genesis event carries no source string"))?;

    Ok(serde_json::from_str(raw).unwrap_or_else(|_| {
        let mut wrapped = serde_json::Map::new();
        wrapped.insert("source".to_string(), Value::String(raw.to_string()));
        Value::Object(wrapped)
    }))
}

/// Apply one event's `ast_diff` operations to the state.
fn apply_diff(event: &Event, state: &mut Value) -> Result<(), Error> {
    let operations = event
        .payload
        .get("ast_diff")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::invalid_event("astDiff", "missing or non-array ast_diff"))?;

    for operation in operations {
        let path = operation
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_event("astDiff", "operation without a path"))?;
        let kind = operation
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_event("astDiff", "operation without a kind"))?;

        match kind {
            "add" | "modify" => {
                let after = operation.get("after").cloned().unwrap_or(Value::Null);
                set_at_path(state, path, after);
            }
            "remove" => remove_at_path(state, path),
            other => {
                return Err(Error::invalid_event(
                    "astDiff",
                    format!("unknown operation: {other}"),
                ));
            }
        }
    }
    Ok(())
}

/// Verify an event's declared `source_hash` against the current state.
///
/// Step 0 is the genesis document; a genesis without a hash is accepted
/// (the convention predates hashing in some streams), but every diff event
/// must declare one.
fn verify_step_hash(event: &Event, state: &Value, step: u64) -> Result<(), Error> {
    let declared = match event.payload.get("source_hash").and_then(Value::as_str) {
        Some(declared) => declared,
        None if step == 0 => return Ok(()),
        None => {
            return Err(Error::invalid_event(
                "sourceHash",
                format!("step {step}: missing source_hash"),
            ));
        }
    };

    let computed = canonical::hash_value(state);
    if computed != declared {
        return Err(Error::invalid_event(
            "sourceHash",
            format!("step {step}: expected {declared}, got {computed}"),
        ));
    }
    Ok(())
}

/// Set a value at a dot-separated path, creating missing intermediate
/// objects. A non-object in the way is replaced by an object.
fn set_at_path(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        // is_object() held above, so as_object_mut always succeeds.
        let Some(map) = current.as_object_mut() else {
            return;
        };

        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

/// Delete the value at a dot-separated path; silently a no-op when any
/// segment is absent.
fn remove_at_path(root: &mut Value, path: &str) {
    let mut current = root;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.remove(segment);
            return;
        }
        match map.get_mut(segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}
