//! Timer trigger, manual trigger, shutdown and on-demand fetches.

mod helpers;

use chrono::Utc;
use cptrack::collector::{BatchSettings, CycleReport, CycleRunner, CycleTrigger, StatsScheduler};
use cptrack::data::{MemorySnapshotStore, SnapshotStore, StaticRoster};
use cptrack::platforms::{Platform, PlatformSet};
use helpers::{ScriptedAdapter, cf_students, collector, payload, student};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const DAY: Duration = Duration::from_secs(24 * 3600);

fn runner(
    adapter: Arc<ScriptedAdapter>,
    store: Arc<MemorySnapshotStore>,
    roster: StaticRoster,
) -> CycleRunner {
    CycleRunner::new(
        collector(PlatformSet::new().with(adapter), store),
        Arc::new(roster),
        BatchSettings::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_on_demand_fetch_appends_and_latest_reflects_newest() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(
        ScriptedAdapter::succeeding(Platform::Codeforces, 0)
            .with_script(vec![Ok(payload(100, Some(1500))), Ok(payload(101, Some(1550)))]),
    );
    let runner = runner(
        cf,
        store.clone(),
        StaticRoster::new(vec![student(42, Some("tourist"), None, None)]),
    );

    let first = runner.fetch_student(42).await.unwrap().unwrap();
    let second = runner.fetch_student(42).await.unwrap().unwrap();
    assert_eq!(first.succeeded(), 1);
    assert_eq!(second.succeeded(), 1);

    let history = store.history(42, Platform::Codeforces, 30).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].rating, Some(1500));
    assert_eq!(history[1].rating, Some(1550));

    let latest = store.latest(42, Platform::Codeforces).await.unwrap().unwrap();
    assert_eq!(latest.rating, Some(1550));
    assert_eq!(latest.solved, 101);
}

#[tokio::test(start_paused = true)]
async fn test_on_demand_fetch_for_unknown_student() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(ScriptedAdapter::succeeding(Platform::Codeforces, 1));
    let runner = runner(cf.clone(), store.clone(), StaticRoster::new(cf_students(2)));

    assert!(runner.fetch_student(99).await.unwrap().is_none());
    assert_eq!(cf.call_count(), 0);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_full_cycle_is_recorded() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(ScriptedAdapter::succeeding(Platform::Codeforces, 1));
    let runner = runner(cf, store.clone(), StaticRoster::new(cf_students(3)));

    let report = runner
        .run_full_cycle(CycleTrigger::Manual, &CancellationToken::new())
        .await
        .unwrap();

    let cycles = store.cycles();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].trigger, CycleTrigger::Manual);
    assert_eq!(cycles[0].succeeded, 3);
    assert_eq!(
        store.last_cycle_finished().await.unwrap(),
        Some(report.finished_at)
    );
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_immediately_then_every_interval() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(ScriptedAdapter::succeeding(Platform::Codeforces, 1));
    let scheduler = StatsScheduler::new(
        runner(cf.clone(), store.clone(), StaticRoster::new(cf_students(2))),
        DAY,
        Duration::from_secs(30),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.cycles().len(), 1);
    assert_eq!(cf.call_count(), 2);

    tokio::time::sleep(DAY - Duration::from_secs(2)).await;
    assert_eq!(store.cycles().len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.cycles().len(), 2);
    assert!(
        store
            .cycles()
            .iter()
            .all(|c| c.trigger == CycleTrigger::Scheduled)
    );

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_resumes_cadence_from_last_recorded_cycle() {
    let store = Arc::new(MemorySnapshotStore::new());
    let three_hours_ago = Utc::now() - chrono::Duration::hours(3);
    store
        .record_cycle(&CycleReport {
            trigger: CycleTrigger::Scheduled,
            started_at: three_hours_ago,
            finished_at: three_hours_ago,
            students: 0,
            batch_sizes: Vec::new(),
            succeeded: 0,
            failed: 0,
            unsaved: 0,
            panicked: 0,
            cancelled: false,
        })
        .await
        .unwrap();

    let cf = Arc::new(ScriptedAdapter::succeeding(Platform::Codeforces, 1));
    let scheduler = StatsScheduler::new(
        runner(cf.clone(), store.clone(), StaticRoster::new(cf_students(1))),
        DAY,
        Duration::from_secs(30),
    );
    let trigger = scheduler.trigger_handle();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    // not due for another ~21 hours
    tokio::time::sleep(Duration::from_secs(20 * 3600)).await;
    assert_eq!(cf.call_count(), 0);

    // manual trigger runs a cycle right away
    trigger.notify_one();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(cf.call_count(), 1);
    assert_eq!(store.cycles().last().unwrap().trigger, CycleTrigger::Manual);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_during_running_cycle_keeps_timer_cadence() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(
        ScriptedAdapter::succeeding(Platform::Codeforces, 1).with_latency(Duration::from_secs(10)),
    );
    let scheduler = StatsScheduler::new(
        runner(cf.clone(), store.clone(), StaticRoster::new(cf_students(1))),
        DAY,
        Duration::from_secs(30),
    );
    let trigger = scheduler.trigger_handle();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    // first cycle starts at once and is still waiting on the adapter
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(store.cycles().is_empty());

    trigger.notify_one();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(cf.call_count(), 1);
    assert_eq!(store.cycles().len(), 1);

    tokio::time::sleep(DAY - Duration::from_secs(6)).await;
    let calls = cf.calls();
    assert_eq!(calls.len(), 2);
    // the next scheduled cycle is still due exactly one interval after the first
    assert_eq!(calls[1].started - calls[0].started, DAY);
    assert!(
        store
            .cycles()
            .iter()
            .all(|c| c.trigger == CycleTrigger::Scheduled)
    );

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_batch_and_skips_the_rest() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(
        ScriptedAdapter::succeeding(Platform::Codeforces, 1).with_latency(Duration::from_secs(10)),
    );
    let scheduler = StatsScheduler::new(
        runner(cf.clone(), store.clone(), StaticRoster::new(cf_students(15))),
        DAY,
        Duration::from_secs(60),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    // first batch of 10 completed, second batch never started
    assert_eq!(store.len(), 10);
    assert_eq!(cf.call_count(), 10);
    let cycles = store.cycles();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].cancelled);
    assert_eq!(cycles[0].batch_sizes, vec![10]);
}
