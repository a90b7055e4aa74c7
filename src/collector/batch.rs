//! Full-roster cycles: fixed-size batches, bounded parallelism inside a batch.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::orchestrator::{Collector, StudentReport};
use crate::data::models::Student;
use crate::data::roster::RosterSource;
use crate::utils::fmt_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    /// Student orchestrations in flight at once within a batch.
    pub worker_limit: usize,
    /// Pause after each batch except the last.
    pub batch_delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            worker_limit: 5,
            batch_delay: Duration::from_secs(2),
        }
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleTrigger {
    Scheduled,
    Manual,
}

impl CycleTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleTrigger::Scheduled => "scheduled",
            CycleTrigger::Manual => "manual",
        }
    }
}

/// Summary of one full-roster cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub trigger: CycleTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Students with at least one handle.
    pub students: usize,
    /// Sizes of the batches that actually ran, in order.
    pub batch_sizes: Vec<usize>,
    pub succeeded: usize,
    pub failed: usize,
    pub unsaved: usize,
    /// Worker tasks that panicked; their students produced no report.
    pub panicked: usize,
    /// Stopped before every batch ran.
    pub cancelled: bool,
}

impl CycleReport {
    fn new(trigger: CycleTrigger) -> Self {
        let now = Utc::now();
        Self {
            trigger,
            started_at: now,
            finished_at: now,
            students: 0,
            batch_sizes: Vec::new(),
            succeeded: 0,
            failed: 0,
            unsaved: 0,
            panicked: 0,
            cancelled: false,
        }
    }

    fn absorb(&mut self, student: &StudentReport) {
        self.succeeded += student.succeeded();
        self.failed += student.failed();
        self.unsaved += student.unsaved();
    }
}

/// Split `students` into consecutive batches of at most `batch_size`.
pub fn partition(students: Vec<Student>, batch_size: usize) -> Vec<Vec<Student>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(students.len().div_ceil(batch_size));
    let mut iter = students.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}

/// Run one cycle over the roster as it stands now.
///
/// Batches run strictly in sequence. Cancellation is honoured between batches
/// only; a started batch always runs to completion. Fails only if the roster
/// cannot be loaded.
pub async fn run_cycle(
    collector: &Arc<Collector>,
    roster: &dyn RosterSource,
    settings: &BatchSettings,
    cancel: &CancellationToken,
    trigger: CycleTrigger,
) -> Result<CycleReport> {
    let mut report = CycleReport::new(trigger);
    let start = Instant::now();

    let students: Vec<Student> = roster
        .load_roster()
        .await?
        .into_iter()
        .filter(Student::has_any_handle)
        .collect();
    report.students = students.len();

    if students.is_empty() {
        info!("Roster has no students with handles, nothing to collect");
        report.finished_at = Utc::now();
        return Ok(report);
    }

    let batches = partition(students, settings.batch_size);
    let total_batches = batches.len();
    info!(
        students = report.students,
        batches = total_batches,
        batch_size = settings.batch_size,
        worker_limit = settings.worker_limit,
        "Starting collection cycle"
    );

    for (index, batch) in batches.into_iter().enumerate() {
        if cancel.is_cancelled() {
            info!(completed = index, remaining = total_batches - index, "Cycle cancelled");
            report.cancelled = true;
            break;
        }

        report.batch_sizes.push(batch.len());
        let batch_start = Instant::now();
        run_batch(collector, batch, settings.worker_limit, &mut report).await;
        debug!(
            batch = index + 1,
            of = total_batches,
            duration = fmt_duration(batch_start.elapsed()),
            "Batch finished"
        );

        let is_last = index + 1 == total_batches;
        if !is_last && !settings.batch_delay.is_zero() {
            tokio::select! {
                _ = time::sleep(settings.batch_delay) => {}
                _ = cancel.cancelled() => {
                    info!(completed = index + 1, remaining = total_batches - index - 1, "Cycle cancelled");
                    report.cancelled = true;
                    break;
                }
            }
        }
    }

    report.finished_at = Utc::now();
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        unsaved = report.unsaved,
        panicked = report.panicked,
        cancelled = report.cancelled,
        duration = fmt_duration(start.elapsed()),
        "Collection cycle finished"
    );
    Ok(report)
}

/// Collect one batch with at most `worker_limit` students in flight.
async fn run_batch(
    collector: &Arc<Collector>,
    batch: Vec<Student>,
    worker_limit: usize,
    report: &mut CycleReport,
) {
    let permits = Arc::new(Semaphore::new(worker_limit.max(1)));
    let mut workers = JoinSet::new();

    for student in batch {
        let permits = permits.clone();
        let collector = collector.clone();
        workers.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            collector.collect_student(&student).await
        });
    }

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(student_report) => report.absorb(&student_report),
            Err(e) if e.is_panic() => {
                error!(error = ?e, "Student worker panicked");
                report.panicked += 1;
            }
            Err(e) => {
                warn!(error = ?e, "Student worker was cancelled");
                report.panicked += 1;
            }
        }
    }
}
