//! Integrity verification: chunked chain walks with hash recomputation.
//!
//! The verifier walks a space's events in sequence order, checking two things
//! per event: that its `previous_hash` links to its predecessor, and that its
//! stored `hash` equals the recomputed digest of its canonical hash-input
//! record. The walk reads in chunks so a long chain never needs to be
//! resident all at once. The first violation stops the walk; in full-database
//! mode the first broken space stops the run.

use std::time::Instant;

use crate::canonical::EventHashInput;
use crate::error::Error;
use crate::store::RecordStore;
use crate::types::Event;

/// Number of events read per chunk during a chain walk.
const VERIFY_CHUNK_SIZE: usize = 500;

/// The sentinel used as `expected` when the genesis event wrongly carries a
/// `previous_hash`.
const GENESIS_EXPECTED: &str = "null (genesis)";

/// Where a chain first fails verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLink {
    /// Id of the event at the break.
    pub event_id: String,
    /// What the chain requires at this position: the prior event's hash,
    /// `"null (genesis)"` for a genesis violation, or the recomputed digest
    /// for a stored-hash mismatch.
    pub expected: String,
    /// What was actually found: the event's `previous_hash` (`"unknown"` if
    /// absent) or its stored `hash`.
    pub actual: String,
}

/// Result of an integrity verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Whether every checked event passed both checks.
    pub valid: bool,
    /// The single space verified, or `None` for a full-database run.
    pub space_id: Option<String>,
    /// Number of spaces the run covered (including a broken one).
    pub spaces_checked: u64,
    /// Total events in the covered spaces.
    pub total_events: u64,
    /// Events that passed verification before the run stopped.
    pub events_verified: u64,
    /// The first violation found, when `valid` is false.
    pub first_broken_link: Option<BrokenLink>,
    /// Wall-clock duration of the run in milliseconds.
    pub elapsed_ms: u64,
}

/// Chunked chain verifier over the record store.
#[derive(Clone)]
pub struct IntegrityVerifier {
    store: RecordStore,
}

impl IntegrityVerifier {
    /// Create a verifier over the given store.
    pub fn new(store: RecordStore) -> Self {
        IntegrityVerifier { store }
    }

    /// Verify one space, or the whole database when no space is given.
    ///
    /// Full-database mode enumerates distinct spaces in ascending order and
    /// verifies each; the first broken space ends the run immediately
    /// without processing further spaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseError`] on a store fault. A broken chain is
    /// *not* an error here -- it is reported through the `valid` flag and
    /// `first_broken_link`.
    pub fn verify(&self, space_id: Option<&str>) -> Result<IntegrityReport, Error> {
        let started = Instant::now();

        let spaces: Vec<String> = match space_id {
            Some(space) => vec![space.to_string()],
            None => self.store.distinct_spaces()?,
        };

        let mut total_events = 0u64;
        let mut events_verified = 0u64;
        let mut spaces_checked = 0u64;
        let mut first_broken_link = None;

        for space in &spaces {
            spaces_checked += 1;
            total_events += self.store.count_space(space)?;

            let outcome = self.walk_space(space, &mut events_verified)?;
            if let Some(broken) = outcome {
                first_broken_link = Some(broken);
                break;
            }
        }

        Ok(IntegrityReport {
            valid: first_broken_link.is_none(),
            space_id: space_id.map(str::to_string),
            spaces_checked,
            total_events,
            events_verified,
            first_broken_link,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Walk one space in chunks; returns the first violation, if any.
    fn walk_space(
        &self,
        space_id: &str,
        events_verified: &mut u64,
    ) -> Result<Option<BrokenLink>, Error> {
        let mut cursor = 1u64;
        let mut position = 0u64;
        let mut prior_hash: Option<String> = None;

        loop {
            let chunk = self.store.scan_space(
                space_id,
                cursor,
                u64::MAX,
                true,
                Some(VERIFY_CHUNK_SIZE),
            )?;
            let chunk_len = chunk.len();

            for event in chunk {
                if let Some(broken) = check_event(&event, position, prior_hash.as_deref()) {
                    return Ok(Some(broken));
                }
                *events_verified += 1;
                position += 1;
                cursor = event.sequence_number + 1;
                prior_hash = Some(event.hash);
            }

            if chunk_len < VERIFY_CHUNK_SIZE {
                return Ok(None);
            }
        }
    }
}

/// The two per-event checks: chain link, then stored-hash recomputation.
fn check_event(event: &Event, position: u64, prior_hash: Option<&str>) -> Option<BrokenLink> {
    // Link check first: a genesis event must carry no previous_hash, every
    // later event must point at its predecessor.
    if position == 0 {
        if let Some(actual) = &event.previous_hash {
            return Some(BrokenLink {
                event_id: event.id.clone(),
                expected: GENESIS_EXPECTED.to_string(),
                actual: actual.clone(),
            });
        }
    } else {
        let expected = prior_hash.unwrap_or("null");
        if event.previous_hash.as_deref() != Some(expected) {
            return Some(BrokenLink {
                event_id: event.id.clone(),
                expected: expected.to_string(),
                actual: event
                    .previous_hash
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }
    }

    // Stored-hash check: the event's digest must be recomputable.
    let recomputed = EventHashInput::from_event(event).digest();
    if recomputed != event.hash {
        return Some(BrokenLink {
            event_id: event.id.clone(),
            expected: recomputed,
            actual: event.hash.clone(),
        });
    }

    None
}
