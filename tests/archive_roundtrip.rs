//! Integration tests for archive export and import.
//!
//! The round-trip law: exporting a space, importing the archive into an
//! empty store, and re-exporting produces byte-identical output; re-importing
//! the same archive is a no-op that counts every event as a duplicate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rblog::{EventInput, EventLog, EventLogConfig, EventType};
use serde_json::{Map, json};

const FAR_FUTURE: &str = "2099-01-01T00:00:00Z";

/// Helper: a log with a deterministic id generator.
fn deterministic_log(prefix: &str) -> EventLog {
    let counter = Arc::new(AtomicU64::new(0));
    let prefix = prefix.to_string();
    let config = EventLogConfig {
        id_generator: Arc::new(move || {
            format!("{prefix}-{:04}", counter.fetch_add(1, Ordering::SeqCst))
        }),
        ..EventLogConfig::default()
    };
    EventLog::open(config).expect("open should succeed")
}

/// Helper: write `n` events into space `"s"`.
async fn seed(log: &EventLog, n: u64) {
    for i in 0..n {
        let mut payload = Map::new();
        payload.insert("i".to_string(), json!(i));
        payload.insert("note".to_string(), json!(format!("event {i}")));
        log.write_event(EventInput {
            event_type: EventType::StateChanged,
            space_id: "s".to_string(),
            timestamp: format!("2026-02-14T00:00:{:02}Z", i % 60),
            version: 1,
            payload,
        })
        .await
        .expect("write should succeed");
    }
}

#[tokio::test]
async fn export_import_reexport_is_byte_identical() {
    let source = deterministic_log("src");
    seed(&source, 20).await;

    let first = source
        .export_archive("s", FAR_FUTURE)
        .await
        .expect("export");

    let target = deterministic_log("dst");
    let report = target.import_archive(&first).await.expect("import");
    assert_eq!(report.imported_events, 20);
    assert_eq!(report.skipped_duplicates, 0);
    assert!(report.errors.is_empty());

    let second = target
        .export_archive("s", FAR_FUTURE)
        .await
        .expect("re-export");
    assert_eq!(first, second, "round trip must be byte-identical");
}

#[tokio::test]
async fn second_import_skips_everything() {
    let source = deterministic_log("src");
    seed(&source, 20).await;
    let archive = source
        .export_archive("s", FAR_FUTURE)
        .await
        .expect("export");

    let target = deterministic_log("dst");
    target.import_archive(&archive).await.expect("first import");
    let second = target
        .import_archive(&archive)
        .await
        .expect("second import");

    assert_eq!(second.imported_events, 0);
    assert_eq!(second.skipped_duplicates, 20);
    assert!(second.errors.is_empty());
}

#[tokio::test]
async fn imported_chain_verifies_in_the_target_store() {
    let source = deterministic_log("src");
    seed(&source, 7).await;
    let archive = source
        .export_archive("s", FAR_FUTURE)
        .await
        .expect("export");

    let target = deterministic_log("dst");
    target.import_archive(&archive).await.expect("import");

    let report = target
        .verify_integrity(Some("s"))
        .await
        .expect("verify should succeed");
    assert!(report.valid);
    assert_eq!(report.total_events, 7);
}

#[tokio::test]
async fn before_date_filters_the_export() {
    let source = deterministic_log("src");
    seed(&source, 10).await;

    // Events stamp :00..:09; exporting before :05 keeps the first five.
    let archive = source
        .export_archive("s", "2026-02-14T00:00:05Z")
        .await
        .expect("export");

    let target = deterministic_log("dst");
    let report = target.import_archive(&archive).await.expect("import");
    assert_eq!(report.imported_events, 5);
    assert_eq!(target.event_count("s").await.expect("count"), 5);
}

#[tokio::test]
async fn malformed_before_date_is_rejected() {
    let source = deterministic_log("src");
    match source.export_archive("s", "eventually").await {
        Err(rblog::Error::InvalidQuery { field, .. }) => assert_eq!(field, "beforeDate"),
        other => panic!("expected InvalidQuery, got {other:?}"),
    }
}

#[tokio::test]
async fn tampered_archive_bytes_are_rejected() {
    let source = deterministic_log("src");
    seed(&source, 5).await;
    let archive = source
        .export_archive("s", FAR_FUTURE)
        .await
        .expect("export");

    let target = deterministic_log("dst");

    // Truncation.
    match target.import_archive(&archive[..8]).await {
        Err(rblog::Error::ImportFailed { .. }) => {}
        other => panic!("expected ImportFailed, got {other:?}"),
    }

    // Magic corruption.
    let mut bad_magic = archive.to_vec();
    bad_magic[0] = b'Z';
    match target.import_archive(&bad_magic).await {
        Err(rblog::Error::ImportFailed { .. }) => {}
        other => panic!("expected ImportFailed, got {other:?}"),
    }

    // Body corruption is caught by the footer digest.
    let mut bad_body = archive.to_vec();
    let mid = bad_body.len() / 2;
    bad_body[mid] ^= 0xFF;
    match target.import_archive(&bad_body).await {
        Err(rblog::Error::ImportFailed { .. }) => {}
        other => panic!("expected ImportFailed, got {other:?}"),
    }

    assert_eq!(target.event_count("s").await.expect("count"), 0);
}

#[tokio::test]
async fn import_merges_into_a_store_with_other_spaces() {
    let source = deterministic_log("src");
    seed(&source, 3).await;
    let archive = source
        .export_archive("s", FAR_FUTURE)
        .await
        .expect("export");

    let target = deterministic_log("dst");
    target
        .write_event(EventInput {
            event_type: EventType::SystemEvent,
            space_id: "local".to_string(),
            timestamp: "2026-02-14T00:00:00Z".to_string(),
            version: 1,
            payload: Map::new(),
        })
        .await
        .expect("write");

    let report = target.import_archive(&archive).await.expect("import");
    assert_eq!(report.imported_events, 3);
    assert_eq!(target.event_count("local").await.expect("count"), 1);
    assert_eq!(target.event_count("s").await.expect("count"), 3);

    let full = target.verify_integrity(None).await.expect("verify");
    assert!(full.valid);
    assert_eq!(full.spaces_checked, 2);
}
