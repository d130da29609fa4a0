//! Archive export and import.
//!
//! Export: chain-verify the selection, serialize it in the fixed archival
//! field order, compress, frame. Import: parse the frame, validate every
//! entry's shape, re-verify each space's chain, then insert with exact
//! duplicate detection by event id. Importing the same archive twice is
//! idempotent: the second run skips every event as a duplicate.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::Value;

use crate::chain;
use crate::codec;
use crate::error::Error;
use crate::store::RecordStore;
use crate::types::{Event, EventType};

/// One malformed archive entry, recorded without failing the import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportIssue {
    /// Id of the offending entry, or `"unknown"` if none could be extracted.
    pub event_id: String,
    /// What was wrong with it.
    pub reason: String,
}

/// Result of an archive import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Events actually inserted.
    pub imported_events: u64,
    /// Events skipped because an event with the same id already exists.
    pub skipped_duplicates: u64,
    /// Malformed entries that were not inserted.
    pub errors: Vec<ImportIssue>,
}

/// Exporter and importer over one record store.
#[derive(Clone)]
pub struct Archiver {
    store: RecordStore,
}

impl Archiver {
    /// Create an archiver over the given store.
    pub fn new(store: RecordStore) -> Self {
        Archiver { store }
    }

    /// Export a space's events with `timestamp < before_date` as an archive.
    ///
    /// The selection is ordered by sequence number and chain-verified before
    /// serialization; exporting a selection with a broken chain (including
    /// one broken *by* the timestamp filter) is refused.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidQuery`] with field `"beforeDate"` for a malformed
    ///   bound.
    /// - [`Error::IntegrityViolation`] if the selection's chain is broken.
    /// - [`Error::DatabaseError`] on a store fault.
    pub fn export_archive(&self, space_id: &str, before_date: &str) -> Result<Bytes, Error> {
        if let Err(e) = chrono::DateTime::parse_from_rfc3339(before_date) {
            return Err(Error::invalid_query(
                "beforeDate",
                format!("not a valid ISO-8601 instant: {e}"),
            ));
        }

        let events: Vec<Event> = self
            .store
            .scan_space(space_id, 1, u64::MAX, true, None)?
            .into_iter()
            .filter(|event| event.timestamp.as_str() < before_date)
            .collect();

        if let Some(index) = chain::verify_chain_links(&events) {
            return Err(broken_selection(&events, index));
        }

        let bytes = codec::encode_archive(&events)?;
        tracing::debug!(space_id, events = events.len(), "archive exported");
        Ok(bytes)
    }

    /// Import an archive, skipping events whose ids already exist.
    ///
    /// Validation is ordered, first failure wins: the structural checks of
    /// [`codec::parse_archive`], then JSON parsing, then the header/body
    /// count agreement, then per-entry shape validation (malformed entries
    /// are collected into the report, not fatal), then chain verification of
    /// every space in the archive (fatal).
    ///
    /// # Errors
    ///
    /// - [`Error::ImportFailed`] for framing, JSON, count, or chain
    ///   failures.
    /// - [`Error::DatabaseError`] on a store fault.
    pub fn import_archive(&self, bytes: &[u8]) -> Result<ImportReport, Error> {
        let parsed = codec::parse_archive(bytes)?;

        let body: Value = serde_json::from_slice(&parsed.body)
            .map_err(|e| Error::import(format!("body is not valid JSON: {e}")))?;
        let entries = body
            .as_array()
            .ok_or_else(|| Error::import("body is not a JSON array"))?;

        if entries.len() as u64 != parsed.declared_count as u64 {
            return Err(Error::import(format!(
                "Header declares {}, body has {}",
                parsed.declared_count,
                entries.len()
            )));
        }

        // Shape validation. Malformed entries are recorded, not inserted.
        let mut errors = Vec::new();
        let mut valid = Vec::new();
        for entry in entries {
            match validate_entry(entry) {
                Ok(event) => valid.push(event),
                Err(issue) => errors.push(issue),
            }
        }

        // Chain verification per space. Any break fails the whole import.
        let mut by_space: BTreeMap<String, Vec<Event>> = BTreeMap::new();
        for event in &valid {
            by_space
                .entry(event.space_id.clone())
                .or_default()
                .push(event.clone());
        }
        for (space_id, events) in by_space.iter_mut() {
            events.sort_by_key(|e| e.sequence_number);
            if let Some(index) = chain::verify_chain_links(events) {
                return Err(Error::ImportFailed {
                    reason: format!("broken chain in space {space_id}"),
                    event_id: Some(events[index].id.clone()),
                });
            }
        }

        // Insertion with exact duplicate detection by primary key.
        let mut imported_events = 0u64;
        let mut skipped_duplicates = 0u64;
        for events in by_space.into_values() {
            for event in events {
                if self.store.contains_event(&event.id)? {
                    skipped_duplicates += 1;
                    continue;
                }
                self.store.insert_event(event)?;
                imported_events += 1;
            }
        }

        tracing::debug!(
            imported_events,
            skipped_duplicates,
            malformed = errors.len(),
            "archive imported"
        );
        Ok(ImportReport {
            imported_events,
            skipped_duplicates,
            errors,
        })
    }
}

/// Build the export-side violation for a break at `index`.
fn broken_selection(events: &[Event], index: usize) -> Error {
    let expected = if index == 0 {
        "null".to_string()
    } else {
        events[index - 1].hash.clone()
    };
    Error::IntegrityViolation {
        event_id: events[index].id.clone(),
        expected,
        actual: events[index]
            .previous_hash
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Validate one archive entry's shape and kinds.
fn validate_entry(entry: &Value) -> Result<Event, ImportIssue> {
    let issue = |reason: String| ImportIssue {
        event_id: entry
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        reason,
    };

    let object = entry
        .as_object()
        .ok_or_else(|| issue("entry is not an object".to_string()))?;

    let string_field = |name: &str| -> Result<String, ImportIssue> {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| issue(format!("missing or non-string field: {name}")))
    };

    let id = string_field("id")?;
    let type_tag = string_field("type")?;
    let event_type = EventType::parse(&type_tag)
        .ok_or_else(|| issue(format!("unknown event type: {type_tag}")))?;
    let space_id = string_field("space_id")?;
    let timestamp = string_field("timestamp")?;
    let hash = string_field("hash")?;

    let sequence_number = object
        .get("sequence_number")
        .and_then(Value::as_u64)
        .filter(|&seq| seq >= 1)
        .ok_or_else(|| issue("missing or non-positive field: sequence_number".to_string()))?;

    let previous_hash = match object.get("previous_hash") {
        None | Some(Value::Null) => None,
        Some(Value::String(prev)) => Some(prev.clone()),
        Some(_) => {
            return Err(issue("previous_hash must be a string or null".to_string()));
        }
    };

    let version = object
        .get("version")
        .and_then(Value::as_u64)
        .filter(|&v| v >= 1)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| issue("missing or non-positive field: version".to_string()))?;

    let payload = object
        .get("payload")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| issue("missing or non-object field: payload".to_string()))?;

    Ok(Event {
        id,
        event_type,
        space_id,
        timestamp,
        sequence_number,
        hash,
        previous_hash,
        version,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::tests::hashed_chain;
    use serde_json::json;

    /// Helper: archiver over a store seeded with the given events.
    fn archiver_with(events: Vec<Event>) -> Archiver {
        let store = RecordStore::new("test");
        for event in events {
            store.insert_event(event).expect("insert");
        }
        Archiver::new(store)
    }

    const FAR_FUTURE: &str = "2099-01-01T00:00:00Z";

    #[test]
    fn export_rejects_malformed_before_date() {
        let archiver = archiver_with(Vec::new());
        match archiver.export_archive("s", "someday") {
            Err(Error::InvalidQuery { field, .. }) => assert_eq!(field, "beforeDate"),
            other => panic!("expected InvalidQuery, got {other:?}"),
        }
    }

    #[test]
    fn export_filters_strictly_before_the_date() {
        let archiver = archiver_with(hashed_chain("s", 5));
        // Events stamp :01..:05; the bound excludes :03 onward.
        let bytes = archiver
            .export_archive("s", "2026-02-14T00:00:03Z")
            .expect("export");
        let parsed = codec::parse_archive(&bytes).expect("parse");
        assert_eq!(parsed.declared_count, 2);
    }

    #[test]
    fn export_refuses_a_broken_selection() {
        let mut events = hashed_chain("s", 3);
        let prior_hash = events[0].hash.clone();
        events[1].previous_hash = Some("BROKEN".to_string());
        let broken_id = events[1].id.clone();
        let archiver = archiver_with(events);

        match archiver.export_archive("s", FAR_FUTURE) {
            Err(Error::IntegrityViolation {
                event_id,
                expected,
                actual,
            }) => {
                assert_eq!(event_id, broken_id);
                assert_eq!(expected, prior_hash);
                assert_eq!(actual, "BROKEN");
            }
            other => panic!("expected IntegrityViolation, got {other:?}"),
        }
    }

    #[test]
    fn export_refuses_a_selection_broken_by_the_filter() {
        // Event 2's timestamp is out of line, so filtering at :03 keeps
        // events 1 and 3 -- whose links no longer join up.
        let mut events = hashed_chain("s", 3);
        events[1].timestamp = "2026-02-14T00:00:59Z".to_string();
        let archiver = archiver_with(events);

        match archiver.export_archive("s", "2026-02-14T00:00:04Z") {
            Err(Error::IntegrityViolation { .. }) => {}
            other => panic!("expected IntegrityViolation, got {other:?}"),
        }
    }

    #[test]
    fn import_into_empty_store_inserts_everything() {
        let events = hashed_chain("s", 4);
        let bytes = archiver_with(events.clone())
            .export_archive("s", FAR_FUTURE)
            .expect("export");

        let target = Archiver::new(RecordStore::new("target"));
        let report = target.import_archive(&bytes).expect("import");

        assert_eq!(report.imported_events, 4);
        assert_eq!(report.skipped_duplicates, 0);
        assert!(report.errors.is_empty());
        assert_eq!(target.store.count_space("s").expect("count"), 4);
    }

    #[test]
    fn reimport_is_idempotent() {
        let events = hashed_chain("s", 3);
        let bytes = archiver_with(events)
            .export_archive("s", FAR_FUTURE)
            .expect("export");

        let target = Archiver::new(RecordStore::new("target"));
        target.import_archive(&bytes).expect("first import");
        let second = target.import_archive(&bytes).expect("second import");

        assert_eq!(second.imported_events, 0);
        assert_eq!(second.skipped_duplicates, 3);
        assert!(second.errors.is_empty());
    }

    #[test]
    fn export_import_reexport_is_byte_identical() {
        let events = hashed_chain("s", 20);
        let first = archiver_with(events)
            .export_archive("s", FAR_FUTURE)
            .expect("export");

        let target = Archiver::new(RecordStore::new("target"));
        target.import_archive(&first).expect("import");
        let second = target
            .export_archive("s", FAR_FUTURE)
            .expect("re-export");

        assert_eq!(first, second);
    }

    #[test]
    fn count_mismatch_names_both_numbers() {
        let events = hashed_chain("s", 2);
        let mut bytes = archiver_with(events)
            .export_archive("s", FAR_FUTURE)
            .expect("export")
            .to_vec();
        bytes[9] = 5;

        let target = Archiver::new(RecordStore::new("target"));
        match target.import_archive(&bytes) {
            Err(Error::ImportFailed { reason, .. }) => {
                assert_eq!(reason, "Header declares 5, body has 2");
            }
            other => panic!("expected ImportFailed, got {other:?}"),
        }
    }

    #[test]
    fn malformed_entries_are_recorded_not_fatal() {
        // Hand-build a body: one good event, one with a bad type, one with
        // no id at all.
        let good = hashed_chain("s", 1).remove(0);
        let body = json!([
            good,
            {
                "id": "evt-bad-type",
                "type": "space_renamed",
                "space_id": "s2",
                "timestamp": "2026-02-14T00:00:01Z",
                "sequence_number": 1,
                "hash": "00",
                "previous_hash": null,
                "version": 1,
                "payload": {}
            },
            {"type": "system_event"}
        ]);
        let bytes = frame(&body, 3);

        let target = Archiver::new(RecordStore::new("target"));
        let report = target.import_archive(&bytes).expect("import");

        assert_eq!(report.imported_events, 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].event_id, "evt-bad-type");
        assert!(report.errors[0].reason.contains("unknown event type"));
        assert_eq!(report.errors[1].event_id, "unknown");
    }

    #[test]
    fn broken_chain_fails_the_whole_import() {
        let mut events = hashed_chain("s", 3);
        events[2].previous_hash = Some("BROKEN".to_string());
        let broken_id = events[2].id.clone();
        let body = serde_json::to_value(&events).expect("body");
        let bytes = frame(&body, 3);

        let target = Archiver::new(RecordStore::new("target"));
        match target.import_archive(&bytes) {
            Err(Error::ImportFailed { reason, event_id }) => {
                assert!(reason.contains("broken chain"), "reason: {reason}");
                assert_eq!(event_id.as_deref(), Some(broken_id.as_str()));
            }
            other => panic!("expected ImportFailed, got {other:?}"),
        }
        // Nothing was inserted.
        assert_eq!(target.store.event_count().expect("count"), 0);
    }

    #[test]
    fn overlapping_archive_skips_known_events_and_inserts_the_rest() {
        // The target already holds the first two events of the chain; a
        // fuller archive of the same chain adds only the suffix.
        let target = archiver_with(hashed_chain("s", 2));
        let body = serde_json::to_value(hashed_chain("s", 4)).expect("body");
        let bytes = frame(&body, 4);

        let report = target.import_archive(&bytes).expect("import");
        assert_eq!(report.imported_events, 2);
        assert_eq!(report.skipped_duplicates, 2);
        assert_eq!(target.store.count_space("s").expect("count"), 4);
    }

    #[test]
    fn non_array_body_is_rejected() {
        let bytes = frame(&json!({"not": "an array"}), 0);
        let target = Archiver::new(RecordStore::new("target"));
        match target.import_archive(&bytes) {
            Err(Error::ImportFailed { reason, .. }) => {
                assert!(reason.contains("not a JSON array"), "reason: {reason}");
            }
            other => panic!("expected ImportFailed, got {other:?}"),
        }
    }

    #[test]
    fn import_covers_multiple_spaces() {
        let mut events = hashed_chain("a", 2);
        events.extend(hashed_chain("b", 3));
        let body = serde_json::to_value(&events).expect("body");
        let bytes = frame(&body, 5);

        let target = Archiver::new(RecordStore::new("target"));
        let report = target.import_archive(&bytes).expect("import");
        assert_eq!(report.imported_events, 5);
        assert_eq!(target.store.count_space("a").expect("count"), 2);
        assert_eq!(target.store.count_space("b").expect("count"), 3);
    }

    /// Helper: frame an arbitrary JSON body as an archive with the given
    /// declared count.
    fn frame(body: &Value, count: u32) -> Vec<u8> {
        use flate2::Compression;
        use flate2::write::DeflateEncoder;
        use std::io::Write;

        let body_bytes = serde_json::to_vec(body).expect("body bytes");
        let digest = crate::canonical::sha256_hex(&body_bytes);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body_bytes).expect("compress");
        let compressed = encoder.finish().expect("finish");

        let mut out = Vec::new();
        out.extend_from_slice(&codec::ARCHIVE_MAGIC);
        out.push(codec::FORMAT_VERSION);
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&compressed);
        out.extend_from_slice(digest.as_bytes());
        out
    }
}
