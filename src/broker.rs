//! Broadcast broker for live event subscriptions.
//!
//! The `Broker` wraps a `tokio::broadcast` channel that carries `Arc<Event>`
//! messages. The write pipeline publishes each event after its insert
//! commits, and all active subscribers receive it. Using `Arc` ensures that
//! events are shared across subscribers without deep-cloning payloads.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::store::RecordStore;
use crate::types::{Event, SubscriptionMessage};

/// Broadcast broker for pushing committed events to live subscribers.
///
/// The `Broker` holds the sending half of a `tokio::broadcast` channel. Each
/// call to [`publish`](Broker::publish) wraps the event in `Arc` and sends it
/// to all active receivers. Subscribers obtain a receiver via
/// [`subscribe`](Broker::subscribe), or a catch-up-then-live stream via
/// [`subscribe_all`] / [`subscribe_space`].
#[derive(Clone)]
pub struct Broker {
    tx: broadcast::Sender<Arc<Event>>,
}

impl Broker {
    /// Create a new broker with the given broadcast channel capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events the broadcast channel buffers
    ///   before lagging subscribers are dropped. Must be greater than zero.
    pub fn new(capacity: usize) -> Self {
        // `broadcast::channel` returns (Sender, Receiver). The initial
        // receiver is discarded; subscribers obtain their own.
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish one committed event to all active subscribers.
    ///
    /// Publishing with no active subscribers is expected (startup, or no
    /// live consumers) and is logged at debug level only.
    pub fn publish(&self, event: &Event) {
        if self.tx.send(Arc::new(event.clone())).is_err() {
            tracing::debug!("broker publish: no active receivers");
        }
    }

    /// Create a raw broadcast receiver for live events.
    ///
    /// The receiver observes only events published after this call; catch-up
    /// is handled by the stream constructors below.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }
}

/// Number of events read per batch during the catch-up phase.
const CATCHUP_BATCH_SIZE: usize = 500;

/// Stream the full history of every space (catch-up), then a `CaughtUp`
/// marker, then live events as they commit.
///
/// The broadcast receiver is registered **before** any historical read
/// begins, so events committed during catch-up are not lost; they are
/// deduplicated against the per-space high-water marks the catch-up phase
/// recorded.
///
/// # Arguments
///
/// * `store` - Record store to replay history from.
/// * `broker` - The broker to attach to for live events.
///
/// # Returns
///
/// A stream of `Result<SubscriptionMessage, Error>`. The stream ends with
/// `Err(Error::InvalidQuery)` if the receiver lags behind the broadcast
/// buffer; the consumer should re-subscribe.
pub fn subscribe_all(
    store: RecordStore,
    broker: &Broker,
) -> impl futures_core::Stream<Item = Result<SubscriptionMessage, Error>> + use<> {
    let mut rx = broker.subscribe();

    stream! {
        // Catch-up: walk every space in chunks, recording high-water marks.
        let mut seen: HashMap<String, u64> = HashMap::new();
        let spaces = match store.distinct_spaces() {
            Ok(spaces) => spaces,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        for space_id in spaces {
            let mut cursor = 1u64;
            loop {
                let batch = match store.scan_space(
                    &space_id,
                    cursor,
                    u64::MAX,
                    true,
                    Some(CATCHUP_BATCH_SIZE),
                ) {
                    Ok(batch) => batch,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let batch_len = batch.len();

                for event in batch {
                    seen.insert(space_id.clone(), event.sequence_number);
                    cursor = event.sequence_number + 1;
                    yield Ok(SubscriptionMessage::Event(Arc::new(event)));
                }

                if batch_len < CATCHUP_BATCH_SIZE {
                    break;
                }
            }
        }

        yield Ok(SubscriptionMessage::CaughtUp);

        // Live phase: forward broadcast events not already replayed.
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(&high) = seen.get(&event.space_id)
                        && event.sequence_number <= high
                    {
                        continue;
                    }
                    yield Ok(SubscriptionMessage::Event(event));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    yield Err(Error::invalid_query(
                        "subscription",
                        "subscription lagged: re-subscribe from last checkpoint",
                    ));
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return;
                }
            }
        }
    }
}

/// Stream one space's history from a sequence number (catch-up), then a
/// `CaughtUp` marker, then live events for that space.
///
/// The broadcast receiver is registered **before** the historical read, so
/// events committed during catch-up are not lost; the catch-up high-water
/// mark deduplicates the overlap. A space with no events yields `CaughtUp`
/// immediately.
///
/// # Arguments
///
/// * `store` - Record store to replay history from.
/// * `broker` - The broker to attach to for live events.
/// * `space_id` - The space to follow.
/// * `from_sequence` - First sequence number to replay (1 replays the full
///   chain).
pub fn subscribe_space(
    store: RecordStore,
    broker: &Broker,
    space_id: String,
    from_sequence: u64,
) -> impl futures_core::Stream<Item = Result<SubscriptionMessage, Error>> + use<> {
    let mut rx = broker.subscribe();

    stream! {
        let mut cursor = from_sequence.max(1);
        let mut high_water: Option<u64> = None;

        loop {
            let batch = match store.scan_space(
                &space_id,
                cursor,
                u64::MAX,
                true,
                Some(CATCHUP_BATCH_SIZE),
            ) {
                Ok(batch) => batch,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let batch_len = batch.len();

            for event in batch {
                high_water = Some(event.sequence_number);
                cursor = event.sequence_number + 1;
                yield Ok(SubscriptionMessage::Event(Arc::new(event)));
            }

            if batch_len < CATCHUP_BATCH_SIZE {
                break;
            }
        }

        yield Ok(SubscriptionMessage::CaughtUp);

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.space_id != space_id {
                        continue;
                    }
                    if let Some(high) = high_water
                        && event.sequence_number <= high
                    {
                        continue;
                    }
                    yield Ok(SubscriptionMessage::Event(event));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    yield Err(Error::invalid_query(
                        "subscription",
                        "subscription lagged: re-subscribe from last checkpoint",
                    ));
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return;
                }
            }
        }
    }
}
