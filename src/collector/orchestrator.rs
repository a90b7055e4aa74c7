//! Per-student fan-out across platforms.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{Instrument, debug, error, warn};

use crate::collector::retry::RetryPolicy;
use crate::data::models::{FetchOutcome, FetchStatus, StatsSnapshot, Student};
use crate::data::snapshots::SnapshotStore;
use crate::platforms::{Platform, PlatformAdapter, PlatformError, PlatformSet};

/// What happened for one platform of one student.
#[derive(Debug, Clone)]
pub struct PlatformResult {
    pub outcome: FetchOutcome,
    /// The stored row, or `None` if persisting the outcome failed.
    pub snapshot: Option<StatsSnapshot>,
}

impl PlatformResult {
    pub fn platform(&self) -> Platform {
        self.outcome.platform
    }
}

/// Result of collecting every platform for one student.
#[derive(Debug, Clone, Default)]
pub struct StudentReport {
    pub student_id: i32,
    pub results: Vec<PlatformResult>,
    /// Platforms with a handle but no registered adapter.
    pub skipped: Vec<Platform>,
}

impl StudentReport {
    pub fn get(&self, platform: Platform) -> Option<&PlatformResult> {
        self.results.iter().find(|r| r.platform() == platform)
    }

    pub fn succeeded(&self) -> usize {
        self.count_status(FetchStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.count_status(FetchStatus::Failed)
    }

    /// Outcomes that were computed but could not be stored.
    pub fn unsaved(&self) -> usize {
        self.results.iter().filter(|r| r.snapshot.is_none()).count()
    }

    fn count_status(&self, status: FetchStatus) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.status() == status)
            .count()
    }
}

/// Runs the retry-wrapped adapters for a student and appends one snapshot per platform.
pub struct Collector {
    adapters: PlatformSet,
    store: Arc<dyn SnapshotStore>,
    retry: RetryPolicy,
    /// Whether `NotFound` is retried like any other failure.
    retry_unresolvable: bool,
}

impl Collector {
    pub fn new(adapters: PlatformSet, store: Arc<dyn SnapshotStore>, retry: RetryPolicy) -> Self {
        Self {
            adapters,
            store,
            retry,
            retry_unresolvable: true,
        }
    }

    pub fn with_retry_unresolvable(mut self, retry_unresolvable: bool) -> Self {
        self.retry_unresolvable = retry_unresolvable;
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn adapters(&self) -> &PlatformSet {
        &self.adapters
    }

    /// Fetch every platform the student has a handle for, concurrently.
    ///
    /// Each outcome is persisted as soon as its platform finishes, so a slow
    /// platform never delays a sibling's snapshot.
    pub async fn collect_student(&self, student: &Student) -> StudentReport {
        let span = tracing::info_span!("collect_student", student_id = student.id);

        async {
            let mut report = StudentReport {
                student_id: student.id,
                ..Default::default()
            };

            let mut pending = Vec::new();
            for (platform, handle) in student.platforms() {
                match self.adapters.get(platform) {
                    Some(adapter) => {
                        pending.push(self.collect_platform(student.id, adapter.as_ref(), handle))
                    }
                    None => {
                        warn!(%platform, handle, "No adapter registered, skipping platform");
                        report.skipped.push(platform);
                    }
                }
            }

            if pending.is_empty() {
                debug!("No platforms to collect");
                return report;
            }

            report.results = join_all(pending).await;

            debug!(
                succeeded = report.succeeded(),
                failed = report.failed(),
                unsaved = report.unsaved(),
                "Student collected"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn collect_platform(
        &self,
        student_id: i32,
        adapter: &dyn PlatformAdapter,
        handle: &str,
    ) -> PlatformResult {
        let platform = adapter.platform();
        let retry_unresolvable = self.retry_unresolvable;

        let outcome = match self
            .retry
            .run_if(
                || adapter.fetch(handle),
                |e: &PlatformError| retry_unresolvable || !e.is_not_found(),
            )
            .await
        {
            Ok((payload, attempts)) => {
                debug!(%platform, handle, attempts, solved = payload.solved, "Fetched stats");
                FetchOutcome::success(platform, payload, attempts)
            }
            Err(exhausted) => {
                warn!(
                    %platform,
                    handle,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Fetch failed"
                );
                FetchOutcome::failure(platform, exhausted.last_error.to_string(), exhausted.attempts)
            }
        };

        let snapshot = match self.store.append(student_id, &outcome).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!(%platform, error = ?e, "Failed to store snapshot, discarding outcome");
                None
            }
        };

        PlatformResult { outcome, snapshot }
    }
}

/// One-line summary used by the CLI and cycle logs.
pub fn summarize(report: &StudentReport) -> String {
    let mut parts: Vec<String> = report
        .results
        .iter()
        .map(|r| match &r.outcome.result {
            Ok(payload) => match payload.rating {
                Some(rating) => format!("{}: {} solved, rating {rating}", r.platform(), payload.solved),
                None => format!("{}: {} solved", r.platform(), payload.solved),
            },
            Err(e) => format!("{}: failed ({e})", r.platform()),
        })
        .collect();
    parts.extend(report.skipped.iter().map(|p| format!("{p}: no adapter")));

    if parts.is_empty() {
        return "no registered handles".to_string();
    }
    parts.join("; ")
}
