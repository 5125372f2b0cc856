//! End-to-end reconnect behavior: the backoff schedule as observed through
//! a document engine wired to a flaky remote service.

use std::sync::Arc;
use std::time::Duration;
use syncline_core::SyncEvent;
use syncline_engine::{DocumentSyncEngine, EngineConfig, ListenerState};
use syncline_store::MemoryDocumentStore;
use syncline_testkit::{InMemoryDocumentService, RecordingSink, TestDocument};

type Engine = DocumentSyncEngine<TestDocument>;

struct Fixture {
    engine: Arc<Engine>,
    remote: Arc<InMemoryDocumentService>,
    sink: Arc<RecordingSink>,
}

fn fixture() -> Fixture {
    let remote = Arc::new(InMemoryDocumentService::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let sink = Arc::new(RecordingSink::new());
    let engine = Arc::new(Engine::with_sink(
        EngineConfig::new("profile"),
        Arc::clone(&remote) as _,
        store as _,
        Arc::clone(&sink) as _,
    ));
    Fixture {
        engine,
        remote,
        sink,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Polls without advancing the paused clock, so no scheduled retry fires
/// while we wait.
async fn drain_ready_tasks() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn secs(delays: &[Duration]) -> Vec<u64> {
    delays.iter().map(Duration::as_secs).collect()
}

#[tokio::test(start_paused = true)]
async fn retry_delays_follow_the_fixed_schedule() {
    let f = fixture();
    f.remote.set_offline(true);

    f.engine.start_listening("u1").await.unwrap();

    // 2+4+8+16+32+60+60 = 182s covers seven consecutive failures.
    tokio::time::sleep(Duration::from_secs(200)).await;

    let delays = f.sink.retry_delays();
    assert!(delays.len() >= 7, "expected at least 7 retries, got {}", delays.len());
    assert_eq!(secs(&delays[..7]), vec![2, 4, 8, 16, 32, 60, 60]);
    assert!(f.engine.retry_count() >= 7);
    assert!(matches!(f.engine.listener_state(), ListenerState::Backoff(_)));
}

#[tokio::test(start_paused = true)]
async fn successful_attach_resets_the_schedule() {
    let f = fixture();
    f.remote.insert(TestDocument::new("u1", "Ada"));
    f.remote.set_offline(true);

    f.engine.start_listening("u1").await.unwrap();
    // Let a few failures accumulate.
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(f.engine.retry_count() >= 3);

    // Recovery: the next scheduled attempt succeeds and delivers the
    // document as the stream's first event.
    f.remote.set_offline(false);
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(f.engine.listener_state(), ListenerState::Attached);
    assert_eq!(f.engine.retry_count(), 0);

    // After the reset, a fresh outage starts the schedule over at 2s.
    f.sink.reset();
    f.remote.set_offline(true);
    f.remote.drop_streams();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let delays = f.sink.retry_delays();
    assert!(!delays.is_empty());
    assert_eq!(delays[0], Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn stream_termination_triggers_reconnect() {
    let f = fixture();
    f.remote.insert(TestDocument::new("u1", "Ada"));
    f.engine.start_listening("u1").await.unwrap();
    settle().await;
    assert_eq!(f.engine.listener_state(), ListenerState::Attached);
    assert_eq!(f.remote.stream_opens(), 1);

    // A severed connection is a failure, not a stop.
    f.remote.drop_streams();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(f.remote.stream_opens(), 2);
    assert_eq!(f.engine.listener_state(), ListenerState::Attached);
    assert!(f
        .sink
        .contains(|e| matches!(e, SyncEvent::ListenerFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_the_scheduled_retry() {
    let f = fixture();
    f.remote.set_offline(true);
    f.engine.start_listening("u1").await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(f.engine.retry_count() >= 1);
    let opens_before = f.remote.stream_opens();

    f.engine.stop_listening(false).await;
    assert_eq!(f.engine.listener_state(), ListenerState::Detached);
    assert_eq!(f.engine.retry_count(), 0);

    // Two minutes of simulated time, no further attach attempts.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(f.remote.stream_opens(), opens_before);
}

#[tokio::test(start_paused = true)]
async fn a_write_restarts_a_failed_listener() {
    let f = fixture();
    f.remote.insert(TestDocument::new("u1", "Ada"));
    f.remote.set_offline(true);

    f.engine.start_listening("u1").await.unwrap();
    drain_ready_tasks().await;
    assert!(matches!(f.engine.listener_state(), ListenerState::Backoff(_)));

    // The remote comes back; the successful read restarts the listener
    // immediately instead of waiting out the backoff delay.
    f.remote.set_offline(false);
    let doc = f.engine.fetch_document("u1").await;
    assert!(doc.is_ok());
    let _ = f
        .engine
        .document_with(syncline_engine::FetchPolicy::AlwaysFetch)
        .await;
    drain_ready_tasks().await;

    assert_eq!(f.engine.listener_state(), ListenerState::Attached);
}

#[tokio::test(start_paused = true)]
async fn restart_during_backoff_keeps_the_retry_count() {
    let f = fixture();
    f.remote.set_offline(true);
    f.engine.start_listening("u1").await.unwrap();

    tokio::time::sleep(Duration::from_secs(7)).await;
    let count_before = f.engine.retry_count();
    assert!(count_before >= 2);

    // Restarting while still offline fails again immediately; the count
    // continues from where it was rather than restarting at 1.
    f.engine.start_listening("u1").await.unwrap();
    drain_ready_tasks().await;
    assert_eq!(f.engine.retry_count(), count_before + 1);
}
