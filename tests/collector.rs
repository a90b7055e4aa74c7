//! Per-student collection: retries, fan-out across platforms, persistence.

mod helpers;

use cptrack::collector::{Collector, RetryPolicy};
use cptrack::data::models::FetchStatus;
use cptrack::data::{MemorySnapshotStore, SnapshotStore};
use cptrack::platforms::{Platform, PlatformError, PlatformSet};
use helpers::{FlakyStore, ScriptedAdapter, collector, payload, student};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_codeforces_only_student_touches_only_codeforces() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(ScriptedAdapter::succeeding(Platform::Codeforces, 0).with_script(vec![Ok(
        payload(250, Some(1500)),
    )]));
    let lc = Arc::new(ScriptedAdapter::succeeding(Platform::LeetCode, 10));
    let cc = Arc::new(ScriptedAdapter::succeeding(Platform::CodeChef, 10));
    let adapters = PlatformSet::new()
        .with(cf.clone())
        .with(lc.clone())
        .with(cc.clone());

    let report = collector(adapters, store.clone())
        .collect_student(&student(1, Some("tourist"), None, None))
        .await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(cf.calls_for("tourist"), 1);
    assert_eq!(lc.call_count(), 0);
    assert_eq!(cc.call_count(), 0);

    let snapshots = store.snapshots_for(1);
    assert_eq!(snapshots.len(), 1);
    let snap = &snapshots[0];
    assert_eq!(snap.platform, Platform::Codeforces);
    assert_eq!(snap.fetch_status, FetchStatus::Success);
    assert_eq!(snap.rating, Some(1500));
    assert_eq!(snap.solved, 250);
    assert_eq!(snap.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_leetcode_recovers_on_third_attempt() {
    let store = Arc::new(MemorySnapshotStore::new());
    let lc = Arc::new(ScriptedAdapter::succeeding(Platform::LeetCode, 42).with_script(vec![
        Err(PlatformError::Transport("timed out".into())),
        Err(PlatformError::Transport("HTTP 502 Bad Gateway".into())),
    ]));
    let start = Instant::now();

    let report = collector(PlatformSet::new().with(lc.clone()), store.clone())
        .collect_student(&student(2, None, Some("alice"), None))
        .await;

    assert_eq!(lc.call_count(), 3);
    // two retry delays, none after the success
    assert_eq!(start.elapsed(), Duration::from_secs(4));
    assert_eq!(report.succeeded(), 1);

    let latest = store.latest(2, Platform::LeetCode).await.unwrap().unwrap();
    assert!(latest.is_success());
    assert_eq!(latest.solved, 42);
    assert_eq!(latest.attempts, 3);
    assert_eq!(store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_store_failed_snapshot() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cc = Arc::new(ScriptedAdapter::failing(Platform::CodeChef));

    let report = collector(PlatformSet::new().with(cc.clone()), store.clone())
        .collect_student(&student(3, None, None, Some("chef")))
        .await;

    assert_eq!(cc.call_count(), 3);
    assert_eq!(report.failed(), 1);

    let snap = store.latest(3, Platform::CodeChef).await.unwrap().unwrap();
    assert_eq!(snap.fetch_status, FetchStatus::Failed);
    assert_eq!(snap.solved, 0);
    assert_eq!(snap.rating, None);
    assert_eq!(snap.attempts, 3);
    let message = snap.error_message.unwrap();
    assert!(message.contains("connection reset for chef"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn test_not_found_is_retried_by_default() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(ScriptedAdapter::not_found(Platform::Codeforces));

    collector(PlatformSet::new().with(cf.clone()), store.clone())
        .collect_student(&student(4, Some("ghost"), None, None))
        .await;

    assert_eq!(cf.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_costs_one_attempt_when_unresolvable_retries_disabled() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(ScriptedAdapter::not_found(Platform::Codeforces));
    let collector = Collector::new(
        PlatformSet::new().with(cf.clone()),
        store.clone(),
        RetryPolicy::default(),
    )
    .with_retry_unresolvable(false);
    let start = Instant::now();

    collector
        .collect_student(&student(5, Some("ghost"), None, None))
        .await;

    assert_eq!(cf.call_count(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    let snap = store.latest(5, Platform::Codeforces).await.unwrap().unwrap();
    assert_eq!(snap.attempts, 1);
    assert_eq!(snap.error_message.as_deref(), Some("user not found: ghost"));
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_platform_does_not_affect_others() {
    let store = Arc::new(MemorySnapshotStore::new());
    let adapters = PlatformSet::new()
        .with(Arc::new(ScriptedAdapter::failing(Platform::Codeforces)))
        .with(Arc::new(ScriptedAdapter::succeeding(Platform::LeetCode, 80)))
        .with(Arc::new(ScriptedAdapter::succeeding(Platform::CodeChef, 15)));

    let report = collector(adapters, store.clone())
        .collect_student(&student(6, Some("a"), Some("b"), Some("c")))
        .await;

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(store.snapshots_for(6).len(), 3);

    let lc = store.latest(6, Platform::LeetCode).await.unwrap().unwrap();
    assert!(lc.is_success());
    let cf = store.latest(6, Platform::Codeforces).await.unwrap().unwrap();
    assert!(!cf.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_platforms_for_one_student_run_concurrently() {
    let store = Arc::new(MemorySnapshotStore::new());
    let latency = Duration::from_secs(5);
    let adapters = PlatformSet::new()
        .with(Arc::new(
            ScriptedAdapter::succeeding(Platform::Codeforces, 1).with_latency(latency),
        ))
        .with(Arc::new(
            ScriptedAdapter::succeeding(Platform::LeetCode, 1).with_latency(latency),
        ))
        .with(Arc::new(
            ScriptedAdapter::succeeding(Platform::CodeChef, 1).with_latency(latency),
        ));
    let start = Instant::now();

    collector(adapters, store.clone())
        .collect_student(&student(7, Some("a"), Some("b"), Some("c")))
        .await;

    assert_eq!(start.elapsed(), latency);
    assert_eq!(store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_failure_does_not_delay_sibling_snapshot() {
    let store = Arc::new(MemorySnapshotStore::new());
    let adapters = PlatformSet::new()
        .with(Arc::new(
            ScriptedAdapter::failing(Platform::Codeforces).with_latency(Duration::from_secs(10)),
        ))
        .with(Arc::new(ScriptedAdapter::succeeding(Platform::LeetCode, 5)));
    let collector = collector(adapters, store.clone());

    let handle = tokio::spawn({
        let collector = collector.clone();
        async move {
            collector
                .collect_student(&student(8, Some("slow"), Some("fast"), None))
                .await
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(store.latest(8, Platform::LeetCode).await.unwrap().is_some());
    assert!(store.latest(8, Platform::Codeforces).await.unwrap().is_none());

    let report = handle.await.unwrap();
    assert_eq!(report.results.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_discards_only_that_outcome() {
    let memory = Arc::new(MemorySnapshotStore::new());
    let store = Arc::new(FlakyStore {
        inner: memory.clone(),
        reject: Platform::Codeforces,
    });
    let adapters = PlatformSet::new()
        .with(Arc::new(ScriptedAdapter::succeeding(Platform::Codeforces, 3)))
        .with(Arc::new(ScriptedAdapter::succeeding(Platform::LeetCode, 9)));

    let report = collector(adapters, store)
        .collect_student(&student(9, Some("a"), Some("b"), None))
        .await;

    assert_eq!(report.unsaved(), 1);
    assert!(report.get(Platform::Codeforces).unwrap().snapshot.is_none());
    assert!(report.get(Platform::LeetCode).unwrap().snapshot.is_some());

    let stored = memory.snapshots_for(9);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].platform, Platform::LeetCode);
}

#[tokio::test(start_paused = true)]
async fn test_student_without_handles_is_a_no_op() {
    let store = Arc::new(MemorySnapshotStore::new());
    let cf = Arc::new(ScriptedAdapter::succeeding(Platform::Codeforces, 1));

    let report = collector(PlatformSet::new().with(cf.clone()), store.clone())
        .collect_student(&student(10, None, Some("   "), None))
        .await;

    assert!(report.results.is_empty());
    assert_eq!(cf.call_count(), 0);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_handle_without_adapter_is_skipped() {
    let store = Arc::new(MemorySnapshotStore::new());
    let adapters =
        PlatformSet::new().with(Arc::new(ScriptedAdapter::succeeding(Platform::LeetCode, 4)));

    let report = collector(adapters, store.clone())
        .collect_student(&student(11, Some("cf_user"), Some("lc_user"), None))
        .await;

    assert_eq!(report.skipped, vec![Platform::Codeforces]);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(store.len(), 1);
}
