//! Capture engine integration tests
//!
//! Drive encrypted exchanges through `on_exchange_observed` and check the
//! playlist files that come out.

mod helpers;

use helpers::*;
use ncm_common::config::CorrelationConfig;
use ncm_common::events::{CaptureEvent, FragmentSide, SaveOrigin};
use ncm_extract::db::SqliteCatalog;
use ncm_extract::models::ExchangeRoute;
use ncm_extract::services::PlaylistSink;
use ncm_extract::{CaptureEngine, CatalogLookup, EngineOutcome, Exchange, Track, TrackId};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::Level;

fn engine(dir: &TempDir) -> CaptureEngine {
    CaptureEngine::new(CorrelationConfig::default(), PlaylistSink::new(dir.path()))
}

fn saved(outcomes: &[EngineOutcome]) -> Option<&EngineOutcome> {
    outcomes.iter().find(|o| matches!(o, EngineOutcome::Saved { .. }))
}

#[tokio::test]
async fn test_shell_then_detail_restores_shell_order() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    engine.on_exchange_observed(playlist_request("1", at(0))).await;
    let outcomes = engine.on_exchange_observed(shell_response("1", &[10, 11, 12], at(50))).await;
    assert_eq!(outcomes, vec![EngineOutcome::Pending { playlist_id: Some("1".to_string()) }]);

    engine.on_exchange_observed(detail_request(&[10, 11, 12], at(100))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&[11, 12, 10], at(150))).await;
    match saved(&outcomes) {
        Some(EngineOutcome::Saved { playlist_id, track_count, unresolved, origin, .. }) => {
            assert_eq!(playlist_id, "1");
            assert_eq!(*track_count, 3);
            assert_eq!(*unresolved, 0);
            assert_eq!(*origin, SaveOrigin::Merged);
        }
        other => panic!("expected save, got {:?}", other),
    }

    let doc = read_playlist(dir.path(), "1");
    assert_eq!(track_ids_of(&doc), vec![10, 11, 12]);
    assert_eq!(doc["playlist"]["trackCount"], json!(3));
    assert_eq!(doc["playlist"]["name"], json!("Playlist 1"));
    assert_eq!(doc["playlist"]["tracks"][0]["ar"][0]["name"], json!("Artist 10"));

    let status = engine.status().await;
    assert_eq!(status.store.pending_shells, 0);
    assert_eq!(status.outstanding_requests, 0);
}

#[tokio::test]
async fn test_detail_before_shell() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let ids: Vec<TrackId> = (100..120).collect();

    engine.on_exchange_observed(detail_request(&ids, at(0))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&ids, at(10))).await;
    assert_eq!(outcomes, vec![EngineOutcome::Pending { playlist_id: None }]);

    engine.on_exchange_observed(playlist_request("77", at(20))).await;
    let outcomes = engine.on_exchange_observed(shell_response("77", &ids, at(30))).await;
    assert!(saved(&outcomes).is_some(), "{:?}", outcomes);
    assert_eq!(track_ids_of(&read_playlist(dir.path(), "77")), ids);
}

#[tokio::test]
async fn test_self_complete_shell_saved_immediately() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    engine.on_exchange_observed(playlist_request("5", at(0))).await;
    let outcomes = engine
        .on_exchange_observed(response(PLAYLIST_PATH, &complete_shell_doc("5", &[3, 1, 2]), at(10)))
        .await;
    assert!(matches!(
        saved(&outcomes),
        Some(EngineOutcome::Saved { origin: SaveOrigin::SelfComplete, track_count: 3, .. })
    ));

    let status = engine.status().await;
    assert_eq!(status.store.pending_shells, 0);
    assert_eq!(status.store.cached_track_lists, 0);
    assert_eq!(track_ids_of(&read_playlist(dir.path(), "5")), vec![3, 1, 2]);
}

#[tokio::test]
async fn test_corrupted_padding_dropped() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let mut events = engine.subscribe();

    // Flip the last ciphertext byte: the padding no longer decodes
    let mut exchange = shell_response("1", &[1, 2, 3], at(0));
    if let Some(last) = exchange.raw_body.last_mut() {
        *last ^= 0xff;
    }
    let outcomes = engine.on_exchange_observed(exchange).await;

    match outcomes.as_slice() {
        [EngineOutcome::Dropped { reason }] => assert!(!reason.is_empty()),
        other => panic!("expected drop, got {:?}", other),
    }
    match events.try_recv() {
        Ok(CaptureEvent::ExchangeDropped { path, .. }) => assert_eq!(path, PLAYLIST_PATH),
        other => panic!("expected ExchangeDropped event, got {:?}", other),
    }
    assert_eq!(engine.status().await.store.pending_shells, 0);
}

#[test]
fn test_bad_padding_reported_as_codec_error() {
    use ncm_extract::services::envelope_codec::{decode, CodecError};

    // 16 bytes ending in 0x11 (17) after decryption cannot be valid PKCS#7
    let mut block = [b' '; 16];
    block[15] = 0x11;
    let ciphertext = {
        use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
        let cipher = aes::Aes128::new(GenericArray::from_slice(b"e82ckenh8dichen8"));
        let mut out = block;
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut out));
        out
    };
    assert_eq!(decode(&ciphertext), Err(CodecError::BadPadding));
}

#[tokio::test]
async fn test_merge_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    let run = |offset: i64| {
        let engine = &engine;
        async move {
            engine.on_exchange_observed(shell_response("9", &[1, 2, 3, 4], at(offset))).await;
            engine.on_exchange_observed(detail_request(&[1, 2, 3, 4], at(offset + 1))).await;
            engine.on_exchange_observed(detail_response(&[4, 3, 2, 1], at(offset + 2))).await
        }
    };

    assert!(saved(&run(0).await).is_some());
    let first = std::fs::read(dir.path().join("playlist_9.json")).unwrap();
    assert!(saved(&run(1000).await).is_some());
    let second = std::fs::read(dir.path().join("playlist_9.json")).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unmatched_shell_expires_after_window() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let (logs, _guard) = LogCapture::install();
    let mut events = engine.subscribe();

    engine.on_exchange_observed(shell_response("3", &[1, 2, 3], at(0))).await;
    assert_eq!(engine.status().await.store.pending_ids, vec!["3".to_string()]);

    // Any later exchange drives the sweep, even one that is ignored
    let outcomes = engine
        .on_exchange_observed(Exchange::response("/eapi/batch", b"x".to_vec(), at(30_001)))
        .await;
    assert_eq!(
        outcomes,
        vec![
            EngineOutcome::Expired { side: FragmentSide::Shell, playlist_id: Some("3".to_string()) },
            EngineOutcome::Ignored,
        ]
    );
    assert!(engine.status().await.store.pending_ids.is_empty());

    match events.try_recv() {
        Ok(CaptureEvent::FragmentExpired { side, playlist_id, waited_ms, .. }) => {
            assert_eq!(side, FragmentSide::Shell);
            assert_eq!(playlist_id.as_deref(), Some("3"));
            assert_eq!(waited_ms, 30_001);
        }
        other => panic!("expected FragmentExpired, got {:?}", other),
    }
    logs.assert_logged(Level::INFO, "Fragment expired");
}

#[tokio::test]
async fn test_length_mismatch_never_associates() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let shell_ids: Vec<TrackId> = (1..=20).collect();
    let requested: Vec<TrackId> = (1..=17).collect();

    engine.on_exchange_observed(shell_response("4", &shell_ids, at(0))).await;
    engine.on_exchange_observed(detail_request(&requested, at(1))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&requested, at(2))).await;

    assert_eq!(outcomes, vec![EngineOutcome::Pending { playlist_id: None }]);
    assert!(!dir.path().join("playlist_4.json").exists());
}

#[tokio::test]
async fn test_transposed_request_still_matches() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let shell_ids: Vec<TrackId> = (1..=10).collect();
    let mut requested = shell_ids.clone();
    requested.swap(2, 6);

    engine.on_exchange_observed(shell_response("6", &shell_ids, at(0))).await;
    engine.on_exchange_observed(detail_request(&requested, at(1))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&requested, at(2))).await;

    assert!(saved(&outcomes).is_some(), "{:?}", outcomes);
    assert_eq!(track_ids_of(&read_playlist(dir.path(), "6")), shell_ids);
}

#[tokio::test]
async fn test_detail_without_request_uses_latest_compatible_shell() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    engine.on_exchange_observed(shell_response("20", &[1, 2, 3], at(0))).await;
    engine.on_exchange_observed(shell_response("21", &[4, 5, 6], at(10))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&[6, 4, 5], at(20))).await;

    assert!(matches!(
        saved(&outcomes),
        Some(EngineOutcome::Saved { playlist_id, .. }) if playlist_id == "21"
    ));
    assert_eq!(track_ids_of(&read_playlist(dir.path(), "21")), vec![4, 5, 6]);
}

#[tokio::test]
async fn test_missing_tracks_dropped_and_counted() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let (logs, _guard) = LogCapture::install();

    let shell_ids: Vec<TrackId> = (1..=10).collect();
    let delivered: Vec<TrackId> = (1..=9).collect();

    engine.on_exchange_observed(shell_response("8", &shell_ids, at(0))).await;
    engine.on_exchange_observed(detail_request(&shell_ids, at(1))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&delivered, at(2))).await;

    assert!(matches!(
        saved(&outcomes),
        Some(EngineOutcome::Saved { track_count: 9, unresolved: 1, .. })
    ));
    let doc = read_playlist(dir.path(), "8");
    assert_eq!(track_ids_of(&doc), delivered);
    assert_eq!(doc["playlist"]["trackCount"], json!(9));
    logs.assert_logged(Level::WARN, "Dropping unresolved tracks");
}

#[tokio::test]
async fn test_catalog_fills_gaps() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::in_memory().await.unwrap());
    catalog.record_tracks(&[track(10)]).await.unwrap();

    let engine = engine(&dir).with_catalog(catalog.clone(), Duration::from_secs(3));
    let shell_ids: Vec<TrackId> = (1..=10).collect();
    let delivered: Vec<TrackId> = (1..=9).collect();

    engine.on_exchange_observed(shell_response("12", &shell_ids, at(0))).await;
    engine.on_exchange_observed(detail_request(&shell_ids, at(1))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&delivered, at(2))).await;

    assert!(matches!(
        saved(&outcomes),
        Some(EngineOutcome::Saved { track_count: 10, unresolved: 0, .. })
    ));
    assert_eq!(track_ids_of(&read_playlist(dir.path(), "12")), shell_ids);

    // Saved tracks are fed back into the catalog
    assert_eq!(catalog.track_count().await.unwrap(), 10);
    assert_eq!(catalog.playlist_track_ids("12").await.unwrap(), shell_ids);
}

struct StalledCatalog;

#[async_trait::async_trait]
impl CatalogLookup for StalledCatalog {
    async fn lookup(&self, _ids: &[TrackId]) -> Option<HashMap<TrackId, Track>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        None
    }
}

#[tokio::test]
async fn test_catalog_timeout_treated_as_unresolved() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).with_catalog(Arc::new(StalledCatalog), Duration::from_millis(100));

    engine.on_exchange_observed(shell_response("13", &[1, 2, 3], at(0))).await;
    engine.on_exchange_observed(detail_request(&[1, 2, 3], at(1))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&[3, 1], at(2))).await;

    assert!(matches!(
        saved(&outcomes),
        Some(EngineOutcome::Saved { track_count: 2, unresolved: 1, .. })
    ));
    assert_eq!(track_ids_of(&read_playlist(dir.path(), "13")), vec![1, 3]);
}

#[tokio::test]
async fn test_target_ids_filter() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).with_target_ids(vec!["100".to_string()]);

    let outcomes = engine
        .on_exchange_observed(response(PLAYLIST_PATH, &complete_shell_doc("200", &[1]), at(0)))
        .await;
    assert_eq!(outcomes, vec![EngineOutcome::Skipped { playlist_id: "200".to_string() }]);
    assert!(!dir.path().join("playlist_200.json").exists());

    let outcomes = engine
        .on_exchange_observed(response(PLAYLIST_PATH, &complete_shell_doc("100", &[1]), at(10)))
        .await;
    assert!(saved(&outcomes).is_some());
}

#[tokio::test]
async fn test_hint_mismatch_uses_response_id() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let (logs, _guard) = LogCapture::install();

    assert_eq!(
        engine.on_exchange_observed(playlist_request("111", at(0))).await,
        vec![EngineOutcome::RequestRecorded { route: ExchangeRoute::PlaylistFetch }]
    );
    let outcomes = engine
        .on_exchange_observed(response(PLAYLIST_PATH, &complete_shell_doc("222", &[1]), at(5)))
        .await;

    assert!(matches!(
        saved(&outcomes),
        Some(EngineOutcome::Saved { playlist_id, .. }) if playlist_id == "222"
    ));
    let warning = logs
        .matching("Playlist id differs")
        .into_iter()
        .find(|r| r.level == Level::WARN)
        .expect("mismatch warning");
    assert_eq!(warning.field("requested"), Some("111"));
    assert_eq!(warning.field("received"), Some("222"));
}

#[tokio::test]
async fn test_persistence_failure_reported_and_retried() {
    let dir = TempDir::new().unwrap();
    // Output "directory" is a regular file, so every write fails
    let blocked = dir.path().join("blocked");
    std::fs::write(&blocked, b"").unwrap();
    let engine = CaptureEngine::new(CorrelationConfig::default(), PlaylistSink::new(&blocked));
    let mut events = engine.subscribe();

    let outcomes = engine
        .on_exchange_observed(response(PLAYLIST_PATH, &complete_shell_doc("30", &[1]), at(0)))
        .await;
    assert!(matches!(outcomes.as_slice(), [EngineOutcome::PersistFailed { playlist_id, .. }] if playlist_id == "30"));
    assert!(matches!(events.try_recv(), Ok(CaptureEvent::PersistenceFailed { .. })));

    // Engine keeps running; the next exchange for the id retries
    let outcomes = engine
        .on_exchange_observed(response(PLAYLIST_PATH, &complete_shell_doc("30", &[1]), at(10)))
        .await;
    assert!(matches!(outcomes.as_slice(), [EngineOutcome::PersistFailed { .. }]));
}

#[tokio::test]
async fn test_unclassified_response_ignored() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let outcomes = engine
        .on_exchange_observed(response(PLAYLIST_PATH, &json!({"code": 200, "data": []}), at(0)))
        .await;
    assert_eq!(outcomes, vec![EngineOutcome::Unclassified]);
}

#[tokio::test]
async fn test_saved_event_broadcast() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let mut events = engine.subscribe();

    engine
        .on_exchange_observed(response(PLAYLIST_PATH, &complete_shell_doc("40", &[1, 2]), at(0)))
        .await;

    match events.try_recv() {
        Ok(CaptureEvent::PlaylistSaved { playlist_id, name, track_count, origin, .. }) => {
            assert_eq!(playlist_id, "40");
            assert_eq!(name.as_deref(), Some("Playlist 40"));
            assert_eq!(track_count, 2);
            assert_eq!(origin, SaveOrigin::SelfComplete);
        }
        other => panic!("expected PlaylistSaved, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undecodable_request_does_not_shift_pairing() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let first: Vec<TrackId> = (1..=10).collect();
    let second: Vec<TrackId> = (21..=30).collect();

    engine.on_exchange_observed(shell_response("100", &first, at(0))).await;
    engine.on_exchange_observed(shell_response("200", &second, at(10))).await;

    let outcomes = engine
        .on_exchange_observed(Exchange::request(DETAIL_PATH, b"params=".to_vec(), at(20)))
        .await;
    assert!(matches!(outcomes.as_slice(), [EngineOutcome::Dropped { .. }]));
    engine.on_exchange_observed(detail_request(&first, at(30))).await;

    // Answers the undecodable request, so it carries no requested ids
    let outcomes = engine.on_exchange_observed(detail_response(&second, at(40))).await;
    assert!(
        matches!(
            saved(&outcomes),
            Some(EngineOutcome::Saved { playlist_id, track_count: 10, unresolved: 0, .. }) if playlist_id == "200"
        ),
        "{:?}",
        outcomes
    );
    assert_eq!(engine.status().await.store.pending_ids, vec!["100".to_string()]);

    let outcomes = engine.on_exchange_observed(detail_response(&first, at(50))).await;
    assert!(
        matches!(
            saved(&outcomes),
            Some(EngineOutcome::Saved { playlist_id, track_count: 10, .. }) if playlist_id == "100"
        ),
        "{:?}",
        outcomes
    );
    assert_eq!(track_ids_of(&read_playlist(dir.path(), "100")), first);
    assert_eq!(track_ids_of(&read_playlist(dir.path(), "200")), second);
}

#[tokio::test]
async fn test_disjoint_detail_never_overwrites_playlist() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let shell_ids: Vec<TrackId> = (1..=10).collect();
    let foreign: Vec<TrackId> = (61..=70).collect();

    engine.on_exchange_observed(shell_response("300", &shell_ids, at(0))).await;
    engine.on_exchange_observed(detail_request(&shell_ids, at(1))).await;
    let outcomes = engine.on_exchange_observed(detail_response(&foreign, at(2))).await;

    assert_eq!(outcomes, vec![EngineOutcome::Pending { playlist_id: None }]);
    assert!(!dir.path().join("playlist_300.json").exists());
    assert!(engine.status().await.store.pending_ids.contains(&"300".to_string()));
}

struct StalledRecorder;

#[async_trait::async_trait]
impl CatalogLookup for StalledRecorder {
    async fn lookup(&self, _ids: &[TrackId]) -> Option<HashMap<TrackId, Track>> {
        Some(HashMap::new())
    }

    async fn record_playlist(&self, _playlist: &ncm_extract::MergedPlaylist) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_stalled_catalog_update_does_not_block_save() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).with_catalog(Arc::new(StalledRecorder), Duration::from_millis(100));
    let (logs, _guard) = LogCapture::install();

    let outcomes = tokio::time::timeout(
        Duration::from_secs(5),
        engine.on_exchange_observed(response(PLAYLIST_PATH, &complete_shell_doc("50", &[1, 2]), at(0))),
    )
    .await
    .expect("catalog update should be bounded");

    assert!(saved(&outcomes).is_some(), "{:?}", outcomes);
    assert!(dir.path().join("playlist_50.json").exists());
    logs.assert_logged(Level::WARN, "Catalog update timed out");
}
