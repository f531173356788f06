//! Contract Test: Refresh Scheduler
//!
//! Pull-style families are refreshed by a scheduler that finds due logs
//! itself, drives the dispatcher, and re-arms whatever happened.
//!
//! Constraints verified:
//! - Only enabled, cached logs of the scheduler's family, in managed guilds,
//!   past their refresh window are refreshed
//! - A permanent failure during a refresh disables the log
//! - A transient failure keeps the log with one more retry
//! - A panicking tick does not stop the loop
//! - `stop()` ends the loop deterministically
//! - A closed activation window suppresses ticks

mod common;

use chrono::{DateTime, Utc};
use clanfeed_core::config::SchedulerConfig;
use clanfeed_core::model::{LogId, LogType};
use clanfeed_core::scheduler::{ActivationWindow, Scheduler};
use clanfeed_core::traits::DeliveryError;
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn scheduler(h: &Harness, source: Arc<MockSnapshotSource>, tick: Duration) -> Scheduler {
    Scheduler::new(
        SchedulerConfig::new(LogType::LegendDigest)
            .with_refresh_window(Duration::from_secs(3600))
            .with_tick_interval(tick)
            .with_inter_item_delay(Duration::from_millis(1)),
        Arc::new(h.store.clone()),
        Arc::clone(&h.registry),
        Arc::clone(&h.dispatch),
        h.directory.clone(),
        source,
    )
    .unwrap()
}

struct Closed;

impl ActivationWindow for Closed {
    fn is_open(&self, _now: DateTime<Utc>) -> bool {
        false
    }
}

#[tokio::test]
async fn due_log_with_revoked_webhook_is_disabled() {
    let h = Harness::new(vec![legend_log("1", 1, "#AAA", 2)]).await;
    h.transport
        .script_send(Err(DeliveryError::unauthorized("Invalid Webhook Token")));
    let source = Arc::new(MockSnapshotSource::new(SnapshotMode::Snapshot));

    let report = scheduler(&h, source.clone(), Duration::from_secs(60))
        .tick()
        .await
        .unwrap();

    assert_eq!(report.due, 1);
    assert_eq!(report.dispatched, 1);
    assert_eq!(source.fetch_count(), 1);
    assert!(h.registry.get(&LogId::from("1")).is_none());
    assert!(!h.stored("1").await.is_enabled);
}

#[tokio::test]
async fn due_log_rate_limited_stays_cached() {
    let h = Harness::new(vec![legend_log("1", 1, "#AAA", 2)]).await;
    h.transport
        .script_send(Err(DeliveryError::rate_limited(None, "slow down")));
    let source = Arc::new(MockSnapshotSource::new(SnapshotMode::Snapshot));

    scheduler(&h, source, Duration::from_secs(60))
        .tick()
        .await
        .unwrap();

    let cached = h.registry.get(&LogId::from("1")).unwrap();
    assert_eq!(cached.config.retries, 1);
    assert!(h.stored("1").await.is_enabled);
}

#[tokio::test]
async fn only_due_logs_of_the_family_are_refreshed() {
    let mut disabled = legend_log("4", 1, "#DDD", 2);
    disabled.is_enabled = false;
    let h = Harness::new(vec![
        legend_log("1", 1, "#AAA", 2),
        legend_log("2", 1, "#BBB", 0),
        legend_log("3", 9, "#CCC", 2),
        disabled,
        log("5", 1, "#EEE", LogType::CapitalDigest),
    ])
    .await;
    let source = Arc::new(MockSnapshotSource::new(SnapshotMode::Snapshot));

    let report = scheduler(&h, source, Duration::from_secs(60))
        .tick()
        .await
        .unwrap();

    // "2" is fresh, "3" is in an unmanaged guild, "4" is disabled, "5" is another family
    assert_eq!(report.due, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(h.transport.send_count(), 1);
}

#[tokio::test]
async fn missing_snapshot_skips_the_log() {
    let h = Harness::new(vec![legend_log("1", 1, "#AAA", 2)]).await;
    let source = Arc::new(MockSnapshotSource::new(SnapshotMode::Missing));

    let report = scheduler(&h, source, Duration::from_secs(60))
        .tick()
        .await
        .unwrap();

    assert_eq!(report.no_snapshot, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.transport.send_count(), 0);
}

#[tokio::test]
async fn panicking_tick_does_not_stop_the_loop() {
    let h = Harness::new(vec![legend_log("1", 1, "#AAA", 2)]).await;
    let source = Arc::new(MockSnapshotSource::new(SnapshotMode::PanicOnce));

    let handle = Arc::new(scheduler(&h, source.clone(), Duration::from_secs(1))).start();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    handle.stop().await;

    assert!(source.fetch_count() >= 2, "loop re-armed after the panic");
    assert_eq!(h.transport.send_count(), 1);
}

#[tokio::test]
async fn stop_ends_the_loop() {
    let h = Harness::new(vec![legend_log("1", 1, "#AAA", 2)]).await;
    let source = Arc::new(MockSnapshotSource::new(SnapshotMode::Snapshot));

    let handle = Arc::new(scheduler(&h, source.clone(), Duration::from_secs(3600))).start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.log_type(), LogType::LegendDigest);

    tokio::time::timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("stop returns without waiting for the next tick");
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn closed_activation_window_suppresses_ticks() {
    let h = Harness::new(vec![legend_log("1", 1, "#AAA", 2)]).await;
    let source = Arc::new(MockSnapshotSource::new(SnapshotMode::Snapshot));

    let scheduler = scheduler(&h, source.clone(), Duration::from_secs(1)).with_window(Arc::new(Closed));
    let handle = Arc::new(scheduler).start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;

    assert_eq!(source.fetch_count(), 0);
    assert_eq!(h.transport.send_count(), 0);
}
