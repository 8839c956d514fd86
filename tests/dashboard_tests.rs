// Dashboard state tests: feed, tick on a manual clock, idle eviction, pipeline fan-out

mod common;

use common::{T0, aggregate, event, iso};
use scrapwatch::aggregator::Aggregator;
use scrapwatch::clock::{Clock, ManualClock, tick_label};
use scrapwatch::dashboard::{Dashboard, TickerConfig, spawn_feed, spawn_ticker};
use scrapwatch::history_cache::RollingHistoryCache;
use scrapwatch::models::Selection;
use scrapwatch::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn dashboard_at(now_ms: i64) -> (Arc<Dashboard>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now_ms));
    let dashboard = Arc::new(Dashboard::new(RollingHistoryCache::default(), clock.clone()));
    (dashboard, clock)
}

#[test]
fn tick_uses_clock_for_labels() {
    let (dashboard, clock) = dashboard_at(T0);
    dashboard.record(aggregate("A", 1, 2.0, 2.0, T0));
    let first = tick_label(clock.now());
    dashboard.tick();
    clock.advance(1000);
    dashboard.tick();
    let h = dashboard.history("A").unwrap();
    assert_eq!(h.labels, vec![first, tick_label(clock.now())]);
    assert_eq!(h.sum_series(1), Some(&[2.0, 2.0][..]));
}

#[test]
fn tick_only_consumes_updates_since_previous_tick() {
    let (dashboard, _clock) = dashboard_at(T0);
    dashboard.record(aggregate("A", 1, 2.0, 2.0, T0));
    dashboard.tick();
    dashboard.record(aggregate("A", 2, 6.0, 3.0, T0 + 500));
    dashboard.tick();
    let h = dashboard.history("A").unwrap();
    assert_eq!(h.sum_series(1), Some(&[2.0, 2.0][..]));
    assert_eq!(h.sum_series(2), Some(&[0.0, 6.0][..]));
    assert_eq!(h.avg_series(2), Some(&[0.0, 3.0][..]));
}

#[test]
fn groups_and_filters_reflect_latest() {
    let (dashboard, _clock) = dashboard_at(T0);
    dashboard.record(aggregate("B", 2, 4.0, 4.0, T0));
    dashboard.record(aggregate("A", 1, 1.0, 1.0, T0));
    dashboard.record(aggregate("A", 1, 3.0, 1.5, T0 + 1));
    assert_eq!(dashboard.latest().len(), 2);
    let groups = dashboard.groups(&Selection::all());
    assert_eq!(groups[0].machine_id, "A");
    assert_eq!(groups[0].total_sum, 3.0);
    let (machines, indices) = dashboard.filters();
    assert_eq!(machines, vec!["A", "B"]);
    assert_eq!(indices, vec![1, 2]);
}

#[test]
fn evict_idle_forgets_stale_entries_and_machines() {
    let (dashboard, clock) = dashboard_at(T0);
    dashboard.record(aggregate("A", 1, 1.0, 1.0, T0));
    clock.set(T0 + 50_000);
    dashboard.record(aggregate("B", 1, 1.0, 1.0, T0));
    dashboard.tick();
    clock.set(T0 + 70_000);
    let (entries, machines) = dashboard.evict_idle(60_000);
    assert_eq!((entries, machines), (1, 1));
    assert!(dashboard.history("A").is_none());
    assert!(dashboard.history("B").is_some());
    assert_eq!(dashboard.latest().len(), 1);
}

#[test]
fn evict_idle_keeps_live_keys_with_old_timestamps() {
    let now = T0 + 10 * 3_600_000;
    let (dashboard, clock) = dashboard_at(now);
    dashboard.record(aggregate("A", 1, 1.0, 1.0, now - 2 * 3_600_000));
    dashboard.tick();
    clock.advance(1_000);
    assert_eq!(dashboard.evict_idle(3_600_000), (0, 0));
    assert_eq!(dashboard.latest().len(), 1);
    assert!(dashboard.history("A").is_some());
}

#[test]
fn evicted_key_is_not_replayed_on_next_tick() {
    let (dashboard, clock) = dashboard_at(T0);
    dashboard.record(aggregate("A", 1, 1.0, 1.0, T0));
    clock.set(T0 + 70_000);
    dashboard.evict_idle(60_000);
    dashboard.tick();
    assert!(dashboard.history("A").is_none());
    assert!(dashboard.latest().is_empty());
}

#[tokio::test]
async fn feed_folds_pipeline_output_into_dashboard() {
    let (dashboard, _clock) = dashboard_at(T0);
    let (tx, _) = broadcast::channel(16);
    let pipeline = Pipeline::new(Arc::new(Aggregator::default()), tx);
    let feed = spawn_feed(dashboard.clone(), pipeline.subscribe());

    pipeline.process(&event("A", 1, 3.0, T0)).unwrap();
    pipeline.process(&event("A", 1, 2.0, T0 + 500)).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let latest = dashboard.latest();
        if latest.first().is_some_and(|r| r.sum == 5.0) {
            assert_eq!(latest[0].avg, 2.5);
            assert_eq!(latest[0].timestamp, iso(T0 + 500));
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "feed never caught up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    feed.abort();
}

#[tokio::test]
async fn pipeline_counts_and_broadcasts() {
    let (tx, mut rx) = broadcast::channel(16);
    let pipeline = Pipeline::new(Arc::new(Aggregator::default()), tx);
    pipeline.process(&event("A", 1, 1.0, T0)).unwrap();
    assert!(pipeline.process(&event("A", 0, 1.0, T0)).is_err());
    assert_eq!(pipeline.stats().ingested(), 1);
    assert_eq!(pipeline.stats().rejected(), 1);
    let first = rx.recv().await.unwrap();
    assert_eq!(first.machine_id, "A");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn pipeline_without_subscribers_still_ingests() {
    let (tx, _) = broadcast::channel(4);
    let pipeline = Pipeline::new(Arc::new(Aggregator::default()), tx);
    let out = pipeline.process(&event("A", 1, 4.0, T0)).unwrap();
    assert_eq!(out.result.sum, 4.0);
}

#[tokio::test(start_paused = true)]
async fn ticker_advances_history_on_its_own() {
    let (dashboard, _clock) = dashboard_at(T0);
    dashboard.record(aggregate("A", 1, 2.0, 2.0, T0));
    let ticker = spawn_ticker(
        dashboard.clone(),
        TickerConfig {
            tick_interval_ms: 1000,
            idle_key_ttl_ms: None,
        },
    );
    // First tick is immediate, then one per second.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    ticker.abort();
    let h = dashboard.history("A").unwrap();
    assert_eq!(h.len(), 3);
    assert!(h.is_aligned());
}
