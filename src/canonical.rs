//! Canonical serialization and event hashing.
//!
//! This module is pure data transformation -- no store access, no async. It
//! produces the byte string an event hash is computed over: compact JSON whose
//! mapping keys are emitted in lexicographic Unicode code-point order at every
//! nesting depth, so two implementations agree bit-for-bit on hash inputs
//! regardless of their internal map representation.
//!
//! This sorted-key canonical form is used for *hashes only*. Archive bodies
//! use the fixed-field-order serialization of [`Event`] (see
//! [`codec`](crate::codec)); the two serializers coexist on purpose.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{Event, EventType};

/// Serialize a JSON-compatible value into its canonical byte form.
///
/// Rules, applied recursively:
///
/// - mappings: keys in lexicographic code-point order, `{"k1":V1,"k2":V2}`
///   with no whitespace
/// - sequences: positional order preserved verbatim
/// - scalars: standard JSON encoding (`serde_json`'s escaping and number
///   formatting)
///
/// # Arguments
///
/// * `value` - The value tree to serialize.
///
/// # Returns
///
/// The canonical JSON text.
pub fn canonical_serialize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Recursive worker for [`canonical_serialize`].
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Scalar encoding of the key string gives standard JSON escaping.
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            // Strings, numbers, booleans, and null already have exactly one
            // compact JSON encoding.
            match serde_json::to_string(scalar) {
                Ok(encoded) => out.push_str(&encoded),
                // Scalar serialization to an in-memory string cannot fail;
                // `null` keeps the output well-formed if it somehow does.
                Err(_) => out.push_str("null"),
            }
        }
    }
}

/// Lowercase hex SHA-256 of a byte slice (64 characters).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of a value's canonical serialization.
///
/// This is the digest used for snapshot state hashes and diff-reconstruction
/// step verification.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(canonical_serialize(value).as_bytes())
}

/// The record an event hash is computed over.
///
/// Built from an event's fields *excluding* `hash` (the standard
/// self-reference break) -- a separate record type rather than a mutation of
/// the event in place. The write pipeline constructs one before the event
/// exists; the verifier constructs one from a stored event to recompute its
/// digest.
#[derive(Debug)]
pub struct EventHashInput<'a> {
    /// Store-wide unique id.
    pub id: &'a str,
    /// Event type tag.
    pub event_type: EventType,
    /// Target space.
    pub space_id: &'a str,
    /// Caller-supplied ISO-8601 instant.
    pub timestamp: &'a str,
    /// Position within the space.
    pub sequence_number: u64,
    /// Predecessor hash, `None` for genesis (serialized as JSON `null`).
    pub previous_hash: Option<&'a str>,
    /// Caller's payload schema tag.
    pub version: u32,
    /// Free-form payload object.
    pub payload: &'a Map<String, Value>,
}

impl<'a> EventHashInput<'a> {
    /// Build the hash input record for a stored event.
    pub fn from_event(event: &'a Event) -> Self {
        EventHashInput {
            id: &event.id,
            event_type: event.event_type,
            space_id: &event.space_id,
            timestamp: &event.timestamp,
            sequence_number: event.sequence_number,
            previous_hash: event.previous_hash.as_deref(),
            version: event.version,
            payload: &event.payload,
        }
    }

    /// Compute the event digest: lowercase hex SHA-256 over the canonical
    /// serialization of this record.
    ///
    /// The canonical serializer sorts keys, so the insertion order below is
    /// irrelevant to the digest.
    pub fn digest(&self) -> String {
        let mut record = Map::new();
        record.insert("id".to_string(), Value::String(self.id.to_string()));
        record.insert(
            "type".to_string(),
            Value::String(self.event_type.as_str().to_string()),
        );
        record.insert(
            "space_id".to_string(),
            Value::String(self.space_id.to_string()),
        );
        record.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_string()),
        );
        record.insert(
            "sequence_number".to_string(),
            Value::Number(self.sequence_number.into()),
        );
        record.insert(
            "previous_hash".to_string(),
            match self.previous_hash {
                Some(hash) => Value::String(hash.to_string()),
                None => Value::Null,
            },
        );
        record.insert("version".to_string(), Value::Number(self.version.into()));
        record.insert("payload".to_string(), Value::Object(self.payload.clone()));

        hash_value(&Value::Object(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_encode_as_plain_json() {
        assert_eq!(canonical_serialize(&json!(null)), "null");
        assert_eq!(canonical_serialize(&json!(true)), "true");
        assert_eq!(canonical_serialize(&json!(false)), "false");
        assert_eq!(canonical_serialize(&json!(42)), "42");
        assert_eq!(canonical_serialize(&json!(-7)), "-7");
        assert_eq!(canonical_serialize(&json!("hi")), "\"hi\"");
    }

    #[test]
    fn object_keys_are_sorted() {
        let value = json!({"b": 1, "a": 2, "c": 3});
        assert_eq!(canonical_serialize(&value), "{\"a\":2,\"b\":1,\"c\":3}");
    }

    #[test]
    fn key_order_does_not_change_output() {
        let forward = json!({"alpha": 1, "beta": {"y": 2, "x": 3}});
        let reversed = json!({"beta": {"x": 3, "y": 2}, "alpha": 1});
        assert_eq!(
            canonical_serialize(&forward),
            canonical_serialize(&reversed)
        );
    }

    #[test]
    fn nested_objects_sort_at_every_depth() {
        let value = json!({"z": {"b": [{"d": 1, "c": 2}], "a": 0}});
        assert_eq!(
            canonical_serialize(&value),
            "{\"z\":{\"a\":0,\"b\":[{\"c\":2,\"d\":1}]}}"
        );
    }

    #[test]
    fn arrays_preserve_positional_order() {
        let value = json!([3, 1, 2, {"b": 1, "a": 2}]);
        assert_eq!(canonical_serialize(&value), "[3,1,2,{\"a\":2,\"b\":1}]");
    }

    #[test]
    fn numbers_keep_their_json_form() {
        assert_eq!(canonical_serialize(&json!(1.5)), "1.5");
        assert_eq!(canonical_serialize(&json!(0)), "0");
        assert_eq!(canonical_serialize(&json!(u64::MAX)), u64::MAX.to_string());
    }

    #[test]
    fn no_whitespace_is_emitted() {
        let value = json!({"k": [1, 2], "m": {"n": true}});
        let out = canonical_serialize(&value);
        assert!(!out.contains(' '), "unexpected whitespace in {out}");
        assert!(!out.contains('\n'), "unexpected newline in {out}");
    }

    #[test]
    fn strings_keep_json_escapes() {
        let value = json!({"s": "line\nbreak \"quoted\""});
        assert_eq!(
            canonical_serialize(&value),
            "{\"s\":\"line\\nbreak \\\"quoted\\\"\"}"
        );
    }

    #[test]
    fn sha256_hex_matches_known_vectors() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_hex_is_lowercase_and_64_chars() {
        let digest = sha256_hex(b"rblog");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, digest.to_lowercase());
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_value_hashes_the_canonical_form() {
        let forward = json!({"a": 1, "b": 2});
        let reversed = json!({"b": 2, "a": 1});
        assert_eq!(hash_value(&forward), hash_value(&reversed));
        assert_eq!(
            hash_value(&forward),
            sha256_hex(canonical_serialize(&forward).as_bytes())
        );
    }

    #[test]
    fn digest_excludes_the_hash_field() {
        let mut event = crate::types::tests::sample_event("s", 1);
        event.previous_hash = None;

        let before = EventHashInput::from_event(&event).digest();
        event.hash = "f".repeat(64);
        let after = EventHashInput::from_event(&event).digest();

        // The stored hash is not part of its own input.
        assert_eq!(before, after);
    }

    #[test]
    fn digest_covers_every_other_field() {
        let base = {
            let mut event = crate::types::tests::sample_event("s", 1);
            event.previous_hash = None;
            event
        };
        let base_digest = EventHashInput::from_event(&base).digest();

        let mut changed_id = base.clone();
        changed_id.id = "other".into();
        assert_ne!(EventHashInput::from_event(&changed_id).digest(), base_digest);

        let mut changed_seq = base.clone();
        changed_seq.sequence_number = 2;
        assert_ne!(
            EventHashInput::from_event(&changed_seq).digest(),
            base_digest
        );

        let mut changed_prev = base.clone();
        changed_prev.previous_hash = Some("e".repeat(64));
        assert_ne!(
            EventHashInput::from_event(&changed_prev).digest(),
            base_digest
        );

        let mut changed_payload = base.clone();
        changed_payload
            .payload
            .insert("extra".to_string(), json!(true));
        assert_ne!(
            EventHashInput::from_event(&changed_payload).digest(),
            base_digest
        );
    }

    #[test]
    fn digest_is_deterministic() {
        let event = crate::types::tests::sample_event("s", 4);
        let a = EventHashInput::from_event(&event).digest();
        let b = EventHashInput::from_event(&event).digest();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
