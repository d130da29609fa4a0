//! Binary codec for the `.rblogs` archive format.
//!
//! This module handles framing and compression for portable archives. It is
//! pure data transformation -- no store access, no async.
//!
//! Layout (total `10 + N + 64` bytes):
//!
//! | Offset | Size | Content                                            |
//! |-------:|------|----------------------------------------------------|
//! | 0      | 5    | Magic `RBLOG`                                      |
//! | 5      | 1    | Format version byte (`0x01`)                       |
//! | 6      | 4    | Event count, unsigned 32-bit big-endian            |
//! | 10     | N    | Deflate-compressed body (RFC 1951)                 |
//! | 10+N   | 64   | Lowercase hex ASCII SHA-256 of the *uncompressed* body |
//!
//! The uncompressed body is a JSON array of event records in the fixed
//! archival field order (`id, type, space_id, timestamp, sequence_number,
//! hash, previous_hash, version, payload` -- the declaration order of
//! [`Event`]). That fixed order is the byte-level round-trip guarantee; it is
//! distinct from the sorted-key canonical form used for event hashes.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::canonical;
use crate::error::Error;
use crate::types::Event;

/// Magic bytes identifying an rblog archive (ASCII "RBLOG").
pub const ARCHIVE_MAGIC: [u8; 5] = [0x52, 0x42, 0x4C, 0x4F, 0x47];

/// Current archive format version.
pub const FORMAT_VERSION: u8 = 0x01;

/// Size of the fixed header: magic + version + big-endian event count.
pub const HEADER_SIZE: usize = 10;

/// Size of the footer: the body digest as ASCII hex.
pub const FOOTER_SIZE: usize = 64;

/// A structurally valid archive, parsed down to its uncompressed body.
///
/// The header count and the body bytes are verified against each other by
/// the importer (the count check is a *semantic* validation step that runs
/// after JSON parsing); this type only guarantees framing, decompression,
/// and footer digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArchive {
    /// Event count declared in the header.
    pub declared_count: u32,
    /// The decompressed body bytes (a JSON array).
    pub body: Vec<u8>,
}

/// Encode the fixed 10-byte archive header.
///
/// The header is the 5-byte magic, the format version byte, and the event
/// count as an unsigned 32-bit big-endian integer.
///
/// # Arguments
///
/// * `event_count` - Number of event records the body will carry.
///
/// # Returns
///
/// A 10-byte array containing the encoded header.
pub fn encode_header(event_count: u32) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..5].copy_from_slice(&ARCHIVE_MAGIC);
    buf[5] = FORMAT_VERSION;
    buf[6..10].copy_from_slice(&event_count.to_be_bytes());
    buf
}

/// Decode and validate the fixed 10-byte archive header.
///
/// Checks that the magic matches `RBLOG` and that the version byte is
/// supported (currently only `0x01`).
///
/// # Arguments
///
/// * `buf` - Exactly 10 bytes containing the archive header.
///
/// # Returns
///
/// The declared event count on success.
///
/// # Errors
///
/// Returns [`Error::ImportFailed`] if the magic or version is wrong.
pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> Result<u32, Error> {
    if buf[0..5] != ARCHIVE_MAGIC {
        return Err(Error::import("bad magic bytes: expected RBLOG"));
    }
    let version = buf[5];
    if version != FORMAT_VERSION {
        return Err(Error::import(format!(
            "unsupported format version: {version:#04x}"
        )));
    }
    Ok(u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]))
}

/// Serialize events into a complete `.rblogs` archive.
///
/// The body is the serde serialization of the slice, which emits each
/// event's fields in the fixed archival order. The footer digest covers the
/// uncompressed body, so tampering with either the compressed stream or the
/// digest is detectable.
///
/// # Arguments
///
/// * `events` - The events to archive, already in their final order.
///
/// # Errors
///
/// Returns [`Error::DatabaseError`] if the event count exceeds the header's
/// 32-bit range or serialization fails.
pub fn encode_archive(events: &[Event]) -> Result<Bytes, Error> {
    let count = u32::try_from(events.len())
        .map_err(|_| Error::database("encode_archive", "event count exceeds u32 range"))?;

    let body = serde_json::to_vec(events)
        .map_err(|e| Error::database("encode_archive", format!("body serialization: {e}")))?;
    let digest = canonical::sha256_hex(&body);

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&body)
        .and_then(|_| encoder.finish())
        .map(|compressed| {
            let mut out = Vec::with_capacity(HEADER_SIZE + compressed.len() + FOOTER_SIZE);
            out.extend_from_slice(&encode_header(count));
            out.extend_from_slice(&compressed);
            out.extend_from_slice(digest.as_bytes());
            Bytes::from(out)
        })
        .map_err(|e| Error::database("encode_archive", format!("deflate: {e}")))
}

/// Parse and structurally validate an archive.
///
/// Validation order (first failure wins):
///
/// 1. length covers at least the header and footer
/// 2. magic bytes match
/// 3. version byte is supported
/// 4. the body decompresses
/// 5. the decompressed body's SHA-256 equals the footer digest
///
/// # Errors
///
/// Returns [`Error::ImportFailed`] describing the first violated step.
pub fn parse_archive(bytes: &[u8]) -> Result<ParsedArchive, Error> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(Error::import(format!(
            "archive too short: {} bytes, need at least {}",
            bytes.len(),
            HEADER_SIZE + FOOTER_SIZE
        )));
    }

    let header: &[u8; HEADER_SIZE] = bytes[..HEADER_SIZE]
        .try_into()
        .map_err(|_| Error::import("archive header is not 10 bytes"))?;
    let declared_count = decode_header(header)?;

    let compressed = &bytes[HEADER_SIZE..bytes.len() - FOOTER_SIZE];
    let mut body = Vec::new();
    DeflateDecoder::new(compressed)
        .read_to_end(&mut body)
        .map_err(|e| Error::import(format!("deflate decompression failed: {e}")))?;

    let footer = &bytes[bytes.len() - FOOTER_SIZE..];
    let expected_digest = std::str::from_utf8(footer)
        .map_err(|_| Error::import("footer is not ASCII hex"))?;
    let actual_digest = canonical::sha256_hex(&body);
    if actual_digest != expected_digest {
        return Err(Error::import(format!(
            "body digest mismatch: footer {expected_digest}, computed {actual_digest}"
        )));
    }

    Ok(ParsedArchive {
        declared_count,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::tests::hashed_chain;

    #[test]
    fn empty_archive_round_trips() {
        let bytes = encode_archive(&[]).expect("encode");
        assert_eq!(bytes.len(), HEADER_SIZE + FOOTER_SIZE + deflated_len(b"[]"));

        let parsed = parse_archive(&bytes).expect("parse");
        assert_eq!(parsed.declared_count, 0);
        assert_eq!(parsed.body, b"[]");
    }

    /// Length of the deflate stream for a given body, for size assertions.
    fn deflated_len(body: &[u8]) -> usize {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body).expect("write");
        encoder.finish().expect("finish").len()
    }

    #[test]
    fn archive_round_trips_events() {
        let events = hashed_chain("s", 4);
        let bytes = encode_archive(&events).expect("encode");

        let parsed = parse_archive(&bytes).expect("parse");
        assert_eq!(parsed.declared_count, 4);

        let decoded: Vec<Event> = serde_json::from_slice(&parsed.body).expect("body json");
        assert_eq!(decoded, events);
    }

    #[test]
    fn encoding_is_deterministic() {
        let events = hashed_chain("s", 3);
        let first = encode_archive(&events).expect("encode");
        let second = encode_archive(&events).expect("encode");
        assert_eq!(first, second);
    }

    #[test]
    fn reassembling_a_parsed_archive_is_byte_identical() {
        let events = hashed_chain("s", 5);
        let bytes = encode_archive(&events).expect("encode");

        let parsed = parse_archive(&bytes).expect("parse");
        let decoded: Vec<Event> = serde_json::from_slice(&parsed.body).expect("body json");
        let reassembled = encode_archive(&decoded).expect("re-encode");

        assert_eq!(bytes, reassembled);
    }

    #[test]
    fn header_carries_big_endian_count() {
        let events = hashed_chain("s", 3);
        let bytes = encode_archive(&events).expect("encode");

        assert_eq!(&bytes[0..5], b"RBLOG");
        assert_eq!(bytes[5], 0x01);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 3]);
    }

    #[test]
    fn truncated_archive_is_rejected() {
        match parse_archive(&[0x52, 0x42]) {
            Err(Error::ImportFailed { reason, .. }) => {
                assert!(reason.contains("too short"), "reason: {reason}");
            }
            other => panic!("expected ImportFailed, got {other:?}"),
        }
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = encode_archive(&[]).expect("encode").to_vec();
        bytes[0] = b'X';
        match parse_archive(&bytes) {
            Err(Error::ImportFailed { reason, .. }) => {
                assert!(reason.contains("magic"), "reason: {reason}");
            }
            other => panic!("expected ImportFailed, got {other:?}"),
        }
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = encode_archive(&[]).expect("encode").to_vec();
        bytes[5] = 0x02;
        match parse_archive(&bytes) {
            Err(Error::ImportFailed { reason, .. }) => {
                assert!(reason.contains("version"), "reason: {reason}");
            }
            other => panic!("expected ImportFailed, got {other:?}"),
        }
    }

    #[test]
    fn corrupted_compressed_body_is_rejected() {
        let events = hashed_chain("s", 2);
        let mut bytes = encode_archive(&events).expect("encode").to_vec();
        // Scramble the middle of the deflate stream.
        let mid = HEADER_SIZE + (bytes.len() - HEADER_SIZE - FOOTER_SIZE) / 2;
        bytes[mid] ^= 0xFF;

        match parse_archive(&bytes) {
            // Depending on where the flip lands, either decompression fails
            // or it succeeds with a different body; both are caught.
            Err(Error::ImportFailed { reason, .. }) => {
                assert!(
                    reason.contains("deflate") || reason.contains("digest"),
                    "reason: {reason}"
                );
            }
            other => panic!("expected ImportFailed, got {other:?}"),
        }
    }

    #[test]
    fn tampered_footer_is_rejected() {
        let events = hashed_chain("s", 2);
        let mut bytes = encode_archive(&events).expect("encode").to_vec();
        let footer_start = bytes.len() - FOOTER_SIZE;
        // Flip a hex digit in the footer to another valid hex digit.
        bytes[footer_start] = if bytes[footer_start] == b'0' { b'1' } else { b'0' };

        match parse_archive(&bytes) {
            Err(Error::ImportFailed { reason, .. }) => {
                assert!(reason.contains("digest"), "reason: {reason}");
            }
            other => panic!("expected ImportFailed, got {other:?}"),
        }
    }

    #[test]
    fn header_round_trips() {
        for count in [0u32, 1, 20, 0xDEAD_BEEF] {
            let header = encode_header(count);
            assert_eq!(decode_header(&header).expect("decode"), count);
        }
    }

    #[test]
    fn decode_header_rejects_bad_magic_and_version() {
        let mut bad_magic = encode_header(1);
        bad_magic[2] ^= 0xFF;
        assert!(matches!(
            decode_header(&bad_magic),
            Err(Error::ImportFailed { .. })
        ));

        let mut bad_version = encode_header(1);
        bad_version[5] = 0x09;
        assert!(matches!(
            decode_header(&bad_version),
            Err(Error::ImportFailed { .. })
        ));
    }

    #[test]
    fn declared_count_is_surfaced_not_enforced() {
        // The count/body agreement is the importer's semantic step; the
        // codec only surfaces what the header declares.
        let events = hashed_chain("s", 2);
        let mut bytes = encode_archive(&events).expect("encode").to_vec();
        bytes[9] = 7;

        let parsed = parse_archive(&bytes).expect("parse");
        assert_eq!(parsed.declared_count, 7);
    }
}
