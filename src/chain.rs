//! Chain linking for per-space hash chains.
//!
//! Two concerns live here: reading the tail of a space's chain (the inputs
//! the write pipeline needs to link the next event), and the pure link check
//! shared by the exporter and importer.

use crate::error::Error;
use crate::store::RecordStore;
use crate::types::Event;

/// The linking inputs for the next event appended to a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    /// The `hash` of the space's newest event, or `None` when the space is
    /// empty (the next event is genesis).
    pub previous_hash: Option<String>,
    /// The sequence number the next event receives. `1` for an empty space.
    pub next_sequence_number: u64,
}

/// Read the chain tail of a space.
///
/// Looks up the event with the maximum `sequence_number` via the
/// `(space_id, sequence_number)` index, descending, limit 1.
///
/// # Arguments
///
/// * `store` - The record store to read through.
/// * `space_id` - The space whose tail is wanted.
///
/// # Errors
///
/// Returns [`Error::DatabaseError`] on a store fault.
pub fn read_tail(store: &RecordStore, space_id: &str) -> Result<ChainTail, Error> {
    match store.latest_event_in_space(space_id)? {
        None => Ok(ChainTail {
            previous_hash: None,
            next_sequence_number: 1,
        }),
        Some(latest) => Ok(ChainTail {
            next_sequence_number: latest.sequence_number + 1,
            previous_hash: Some(latest.hash),
        }),
    }
}

/// Check the `previous_hash` links of an ordered single-space event sequence.
///
/// The first element must carry no `previous_hash`; every subsequent
/// element's `previous_hash` must equal its predecessor's `hash`. Stored
/// hashes are *not* recomputed here -- that is the integrity verifier's job.
///
/// # Arguments
///
/// * `events` - Events of one space, ordered by `sequence_number`.
///
/// # Returns
///
/// `None` if every link is intact (including for an empty slice), otherwise
/// `Some(index)` of the first element whose link is broken.
pub fn verify_chain_links(events: &[Event]) -> Option<usize> {
    for (i, event) in events.iter().enumerate() {
        match i {
            0 => {
                if event.previous_hash.is_some() {
                    return Some(0);
                }
            }
            _ => {
                let prior_hash = &events[i - 1].hash;
                if event.previous_hash.as_deref() != Some(prior_hash.as_str()) {
                    return Some(i);
                }
            }
        }
    }
    None
}
