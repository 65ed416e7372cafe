//! Integration tests for the distribution loop
//!
//! These run the distributor against in-memory collaborators, with the
//! control surface mutating the shared state mid-cycle.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use common::{content_pool, private, state_with, FakeSource, FakeTransport, RecordingChannel, ADMIN};
use relaycast::control::ControlSurface;
use relaycast::models::SelectionMode;
use relaycast::scheduler::{DistributionConfig, Distributor};
use relaycast::storage::{SharedState, StateStore};

fn distributor(
    state: &SharedState,
    source: Arc<FakeSource>,
    transport: Arc<FakeTransport>,
) -> Distributor {
    Distributor::new(
        state.clone(),
        source,
        transport,
        DistributionConfig::default().without_delivery_delay(),
    )
}

// ============================================================================
// Concurrent reconfiguration
// ============================================================================

#[tokio::test]
async fn test_removal_during_delivery_is_honored() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.selection_mode = SelectionMode::Sequential;
        for id in [101, 202, 303] {
            s.destinations.insert(id, None);
        }
    })
    .await;

    let source = Arc::new(FakeSource::with_pool(content_pool(3)));
    let transport = Arc::new(FakeTransport::new());
    let (entered, release) = transport.hold(202);
    let distributor = Arc::new(distributor(&state, source, transport.clone()));

    let cycle = tokio::spawn({
        let distributor = Arc::clone(&distributor);
        async move { distributor.run_cycle().await }
    });

    entered.notified().await;

    // The loop is mid-delivery to 202; remove both 202 and 303
    let surface = ControlSurface::new(state.clone(), ADMIN);
    let channel = RecordingChannel::new();
    let reply = surface.handle(&private(ADMIN, "!rmgroup 202"), &channel).await;
    assert_eq!(reply.as_deref(), Some("Removed destination 202"));
    let reply = surface.handle(&private(ADMIN, "!rmgroup 303"), &channel).await;
    assert_eq!(reply.as_deref(), Some("Removed destination 303"));

    release.notify_one();
    let report = cycle.await.unwrap().unwrap();

    // The in-flight delivery completes, nothing reaches 303 afterwards
    assert_eq!(report.delivered, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(transport.delivered_to(), vec![101, 202]);

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.destinations.keys().copied().collect::<Vec<_>>(), vec![101]);
    assert_eq!(snapshot.activity_log.len(), 2);
    assert_eq!(snapshot.sequential_cursor, 2);

    // Both the removals and the deliveries reached the disk
    let reloaded = StateStore::new(dir.path().join("state.json"), ADMIN)
        .load()
        .unwrap()
        .state;
    assert_eq!(reloaded, snapshot);
}

#[tokio::test]
async fn test_mode_switch_during_delivery_keeps_cursor() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.selection_mode = SelectionMode::Sequential;
        s.sequential_cursor = 1;
        s.destinations.insert(101, None);
    })
    .await;

    let source = Arc::new(FakeSource::with_pool(content_pool(3)));
    let transport = Arc::new(FakeTransport::new());
    let (entered, release) = transport.hold(101);
    let distributor = Arc::new(distributor(&state, source, transport.clone()));

    let cycle = tokio::spawn({
        let distributor = Arc::clone(&distributor);
        async move { distributor.run_cycle().await }
    });
    entered.notified().await;

    let surface = ControlSurface::new(state.clone(), ADMIN);
    let channel = RecordingChannel::new();
    surface
        .handle(&private(ADMIN, "!setmode random"), &channel)
        .await;

    release.notify_one();
    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(transport.delivered_items(), vec![101]);

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.selection_mode, SelectionMode::Random);
    assert_eq!(snapshot.sequential_cursor, 1);
    assert_eq!(snapshot.activity_log.len(), 1);
}

#[tokio::test]
async fn test_cadence_change_applies_to_next_cycle() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.destinations.insert(101, None);
    })
    .await;

    let offset = Arc::new(AtomicI64::new(0));
    let start = Utc::now();
    let clock = {
        let offset = Arc::clone(&offset);
        move || start + ChronoDuration::minutes(offset.load(Ordering::SeqCst))
    };

    let source = Arc::new(FakeSource::with_pool(content_pool(2)));
    let transport = Arc::new(FakeTransport::new());
    let distributor = distributor(&state, source, transport.clone()).with_clock(clock);

    assert_eq!(distributor.run_cycle().await.unwrap().delivered, 1);

    let surface = ControlSurface::new(state.clone(), ADMIN);
    let channel = RecordingChannel::new();
    surface
        .handle(&private(ADMIN, "!setfreq 101 60"), &channel)
        .await;

    // 20 minutes later the old 15 minute cadence would admit, 60 does not
    offset.store(20, Ordering::SeqCst);
    let report = distributor.run_cycle().await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.skipped, 1);

    offset.store(61, Ordering::SeqCst);
    assert_eq!(distributor.run_cycle().await.unwrap().delivered, 1);
    assert_eq!(transport.delivered().len(), 2);
}

// ============================================================================
// Sequential selection
// ============================================================================

#[tokio::test]
async fn test_sequential_laps_cover_pool_evenly() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.selection_mode = SelectionMode::Sequential;
        s.destinations.insert(101, None);
        s.destinations.insert(202, None);
    })
    .await;

    let offset = Arc::new(AtomicI64::new(0));
    let start = Utc::now();
    let clock = {
        let offset = Arc::clone(&offset);
        move || start + ChronoDuration::minutes(offset.load(Ordering::SeqCst))
    };

    let source = Arc::new(FakeSource::with_pool(content_pool(3)));
    let transport = Arc::new(FakeTransport::new());
    let distributor = distributor(&state, source, transport.clone()).with_clock(clock);

    for cycle in 0..3 {
        offset.store(cycle * 16, Ordering::SeqCst);
        let report = distributor.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 2, "cycle {cycle}");
    }

    assert_eq!(
        transport.delivered_items(),
        vec![100, 101, 102, 100, 101, 102]
    );
    assert_eq!(state.read(|s| s.sequential_cursor).await, 0);
}

#[tokio::test]
async fn test_failed_delivery_does_not_consume_item() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.selection_mode = SelectionMode::Sequential;
        s.destinations.insert(101, None);
        s.destinations.insert(202, None);
    })
    .await;

    let source = Arc::new(FakeSource::with_pool(content_pool(3)));
    let transport = Arc::new(FakeTransport::new());
    transport.fail_for(101);
    let distributor = distributor(&state, source, transport.clone());

    let report = distributor.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(transport.delivered(), vec![(202, 100)]);

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.sequential_cursor, 1);
    assert!(snapshot.last_sent(101).is_none());
    assert!(snapshot.last_sent(202).is_some());
}

#[tokio::test]
async fn test_unwritable_store_does_not_abort_cycle() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        for id in [101, 202, 303] {
            s.destinations.insert(id, None);
        }
    })
    .await;
    let before = std::fs::read(dir.path().join("state.json")).unwrap();

    // Saving needs this path to be a file
    std::fs::create_dir(dir.path().join("state.json.tmp")).unwrap();

    let source = Arc::new(FakeSource::with_pool(content_pool(2)));
    let transport = Arc::new(FakeTransport::new());
    let distributor = distributor(&state, source, transport.clone());

    let report = distributor.run_cycle().await.unwrap();
    assert_eq!(transport.delivered_to(), vec![101, 202, 303]);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.unrecorded, 3);
    assert_eq!(report.failed, 0);

    // Memory still matches the document on disk
    assert!(state.snapshot().await.activity_log.is_empty());
    assert_eq!(std::fs::read(dir.path().join("state.json")).unwrap(), before);
}

#[tokio::test]
async fn test_daily_cap_limits_deliveries() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.destinations.insert(101, Some(1));
        s.daily_caps.insert(101, 2);
    })
    .await;

    let offset = Arc::new(AtomicI64::new(0));
    let start = Utc::now();
    let clock = {
        let offset = Arc::clone(&offset);
        move || start + ChronoDuration::minutes(offset.load(Ordering::SeqCst))
    };

    let source = Arc::new(FakeSource::with_pool(content_pool(1)));
    let transport = Arc::new(FakeTransport::new());
    let distributor = distributor(&state, source, transport.clone()).with_clock(clock);

    let mut delivered = 0;
    for minute in 0..5 {
        offset.store(minute * 2, Ordering::SeqCst);
        delivered += distributor.run_cycle().await.unwrap().delivered;
    }
    assert_eq!(delivered, 2);
    assert_eq!(transport.delivered().len(), 2);
}

// ============================================================================
// Loop timing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_empty_pool_backs_off_then_recovers() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.destinations.insert(101, None);
    })
    .await;

    let source = Arc::new(FakeSource::default());
    let transport = Arc::new(FakeTransport::new());
    let distributor = distributor(&state, source.clone(), transport.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { distributor.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls(), 1);
    assert!(transport.delivered().is_empty());

    source.set_pool(content_pool(2));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.calls(), 1, "still inside the empty-pool backoff");

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(source.calls(), 2);
    assert_eq!(transport.delivered_to(), vec![101]);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_uses_recovery_backoff() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.destinations.insert(101, None);
    })
    .await;

    let source = Arc::new(FakeSource::with_pool(content_pool(1)));
    source.set_failing(true);
    let transport = Arc::new(FakeTransport::new());
    let distributor = distributor(&state, source.clone(), transport.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { distributor.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls(), 1);

    source.set_failing(false);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.calls(), 2);
    assert_eq!(transport.delivered().len(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_cycle_sleep() {
    let dir = TempDir::new().unwrap();
    let state = state_with(&dir, |s| {
        s.destinations.insert(101, None);
    })
    .await;

    let source = Arc::new(FakeSource::with_pool(content_pool(1)));
    let transport = Arc::new(FakeTransport::new());
    let distributor = distributor(&state, source.clone(), transport);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { distributor.run(shutdown_rx).await });

    // First cycle done, now sleeping for the 15 minute global cadence
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.calls(), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop should stop promptly")
        .unwrap();
}
