#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cptrack::collector::{Collector, CycleReport, RetryPolicy};
use cptrack::data::models::{FetchOutcome, StatsSnapshot, Student};
use cptrack::data::{MemorySnapshotStore, SnapshotStore};
use cptrack::platforms::{Platform, PlatformAdapter, PlatformError, PlatformSet, StatsPayload};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

type Fallback = Box<dyn Fn(&str) -> Result<StatsPayload, PlatformError> + Send + Sync>;

/// One recorded adapter call.
#[derive(Debug, Clone)]
pub struct Call {
    pub handle: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Adapter that replays queued results, then falls back to a fixed behaviour.
///
/// Records every call with its (paused-clock) start and end, and the peak
/// number of concurrent calls.
pub struct ScriptedAdapter {
    platform: Platform,
    script: Mutex<VecDeque<Result<StatsPayload, PlatformError>>>,
    fallback: Fallback,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedAdapter {
    fn new(platform: Platform, fallback: Fallback) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always succeeds with `solved` problems.
    pub fn succeeding(platform: Platform, solved: i32) -> Self {
        Self::new(platform, Box::new(move |_| Ok(payload(solved, None))))
    }

    /// Always fails with a transport error.
    pub fn failing(platform: Platform) -> Self {
        Self::new(
            platform,
            Box::new(|handle| Err(PlatformError::Transport(format!("connection reset for {handle}")))),
        )
    }

    /// Always reports the handle as unknown.
    pub fn not_found(platform: Platform) -> Self {
        Self::new(
            platform,
            Box::new(|handle| Err(PlatformError::NotFound(handle.to_string()))),
        )
    }

    pub fn with_fallback(
        platform: Platform,
        fallback: impl Fn(&str) -> Result<StatsPayload, PlatformError> + Send + Sync + 'static,
    ) -> Self {
        Self::new(platform, Box::new(fallback))
    }

    /// Results returned, in order, before the fallback applies.
    pub fn with_script(self, script: Vec<Result<StatsPayload, PlatformError>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, handle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.handle == handle)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch(&self, handle: &str) -> Result<StatsPayload, PlatformError> {
        let started = Instant::now();
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call {
            handle: handle.to_string(),
            started,
            finished: Instant::now(),
        });

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| (self.fallback)(handle))
    }

    async fn validate(&self, handle: &str) -> bool {
        (self.fallback)(handle).is_ok()
    }
}

/// Store that refuses appends for one platform and delegates everything else.
pub struct FlakyStore {
    pub inner: Arc<MemorySnapshotStore>,
    pub reject: Platform,
}

#[async_trait]
impl SnapshotStore for FlakyStore {
    async fn append(&self, student_id: i32, outcome: &FetchOutcome) -> anyhow::Result<StatsSnapshot> {
        if outcome.platform == self.reject {
            anyhow::bail!("connection to database lost");
        }
        self.inner.append(student_id, outcome).await
    }

    async fn latest(
        &self,
        student_id: i32,
        platform: Platform,
    ) -> anyhow::Result<Option<StatsSnapshot>> {
        self.inner.latest(student_id, platform).await
    }

    async fn history(
        &self,
        student_id: i32,
        platform: Platform,
        days: u32,
    ) -> anyhow::Result<Vec<StatsSnapshot>> {
        self.inner.history(student_id, platform, days).await
    }

    async fn record_cycle(&self, report: &CycleReport) -> anyhow::Result<()> {
        self.inner.record_cycle(report).await
    }

    async fn last_cycle_finished(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.inner.last_cycle_finished().await
    }
}

pub fn payload(solved: i32, rating: Option<i32>) -> StatsPayload {
    StatsPayload {
        rating,
        max_rating: rating,
        solved,
        ..Default::default()
    }
}

pub fn student(id: i32, cf: Option<&str>, lc: Option<&str>, cc: Option<&str>) -> Student {
    Student {
        id,
        name: Some(format!("Student {id}")),
        cf_handle: cf.map(str::to_string),
        lc_username: lc.map(str::to_string),
        cc_username: cc.map(str::to_string),
    }
}

/// Students `1..=n`, each with only a Codeforces handle `cf{id}`.
pub fn cf_students(n: i32) -> Vec<Student> {
    (1..=n)
        .map(|id| student(id, Some(&format!("cf{id}")), None, None))
        .collect()
}

pub fn collector(adapters: PlatformSet, store: Arc<dyn SnapshotStore>) -> Arc<Collector> {
    Arc::new(Collector::new(adapters, store, RetryPolicy::default()))
}
