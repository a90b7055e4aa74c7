use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::collector::batch::{BatchSettings, CycleReport, CycleTrigger, run_cycle};
use crate::collector::orchestrator::{Collector, StudentReport};
use crate::data::roster::RosterSource;
use crate::data::snapshots::SnapshotStore;
use crate::utils::fmt_duration;

/// When the next cycle is due, given the last recorded finish time.
///
/// Nothing recorded, or a finish older than `interval`, means now. A recent
/// finish keeps the remaining part of the interval.
pub fn next_due(last_finished: Option<DateTime<Utc>>, interval: Duration) -> Instant {
    let now = Instant::now();
    match last_finished {
        None => now,
        Some(ts) => {
            // A finish time in the future (clock skew) counts as just finished.
            let elapsed = (Utc::now() - ts).to_std().unwrap_or(Duration::ZERO);
            now + interval.saturating_sub(elapsed)
        }
    }
}

/// Everything needed to run a full cycle or a single-student fetch.
#[derive(Clone)]
pub struct CycleRunner {
    collector: Arc<Collector>,
    roster: Arc<dyn RosterSource>,
    batch: BatchSettings,
}

impl CycleRunner {
    pub fn new(collector: Arc<Collector>, roster: Arc<dyn RosterSource>, batch: BatchSettings) -> Self {
        Self {
            collector,
            roster,
            batch,
        }
    }

    fn store(&self) -> &Arc<dyn SnapshotStore> {
        self.collector.store()
    }

    /// Run one full-roster cycle and record it.
    ///
    /// A failure to record the cycle is logged, not returned; the snapshots
    /// themselves are already stored by then.
    #[tracing::instrument(skip_all, fields(trigger = trigger.as_str()))]
    pub async fn run_full_cycle(
        &self,
        trigger: CycleTrigger,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let report = run_cycle(
            &self.collector,
            self.roster.as_ref(),
            &self.batch,
            cancel,
            trigger,
        )
        .await
        .context("Collection cycle aborted")?;

        if let Err(e) = self.store().record_cycle(&report).await {
            error!(error = ?e, "Failed to record collection cycle");
        }
        Ok(report)
    }

    /// Collect one student right now, outside any cycle.
    ///
    /// Returns `Ok(None)` if the roster has no such student.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_student(&self, student_id: i32) -> Result<Option<StudentReport>> {
        let Some(student) = self.roster.find_student(student_id).await? else {
            warn!("Student not found");
            return Ok(None);
        };
        Ok(Some(self.collector.collect_student(&student).await))
    }

    pub async fn last_cycle_finished(&self) -> Result<Option<DateTime<Utc>>> {
        self.store().last_cycle_finished().await
    }
}

/// Fires a full collection cycle on a fixed interval.
pub struct StatsScheduler {
    runner: CycleRunner,
    interval: Duration,
    shutdown_timeout: Duration,
    trigger: Arc<Notify>,
}

impl StatsScheduler {
    pub fn new(runner: CycleRunner, interval: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            runner,
            interval,
            shutdown_timeout,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Handle that starts a full cycle immediately when notified.
    pub fn trigger_handle(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    /// Runs the scheduler's main loop until a shutdown signal arrives.
    ///
    /// On shutdown the running cycle is told to stop after its current batch,
    /// and is given `shutdown_timeout` to get there before it is abandoned.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval = fmt_duration(self.interval), "Stats scheduler started");

        let last_finished = match self.runner.last_cycle_finished().await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(error = ?e, "Failed to load last cycle time, running immediately");
                None
            }
        };
        if let Some(ts) = last_finished {
            info!(last_cycle = %ts, "Loaded last recorded cycle");
        }

        let mut next_run = next_due(last_finished, self.interval);
        let mut manual = false;
        let mut current_work: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;

        loop {
            let cycle_running = current_work
                .as_ref()
                .is_some_and(|(handle, _)| !handle.is_finished());
            let wake_at = if manual { Instant::now() } else { next_run };

            tokio::select! {
                _ = self.trigger.notified() => {
                    // The timer keeps its due time either way.
                    if cycle_running {
                        warn!("Collection cycle already running, ignoring manual trigger");
                    } else {
                        info!("Collection cycle triggered manually");
                        manual = true;
                    }
                    continue;
                }
                _ = time::sleep_until(wake_at) => {
                    // Skip this firing if the previous cycle is still running.
                    if let Some((ref handle, _)) = current_work
                        && !handle.is_finished()
                    {
                        warn!("Previous collection cycle still running, skipping");
                        if !std::mem::take(&mut manual) {
                            next_run = Instant::now() + self.interval;
                        }
                        continue;
                    }

                    let trigger = if manual { CycleTrigger::Manual } else { CycleTrigger::Scheduled };
                    manual = false;

                    let cancel_token = CancellationToken::new();
                    let work_handle = tokio::spawn({
                        let runner = self.runner.clone();
                        let cancel_token = cancel_token.clone();
                        async move {
                            if let Err(e) = runner.run_full_cycle(trigger, &cancel_token).await {
                                error!(error = ?e, "Collection cycle failed");
                            }
                        }
                    });

                    current_work = Some((work_handle, cancel_token));
                    next_run = Instant::now() + self.interval;
                }
                _ = shutdown_rx.recv() => {
                    info!("Stats scheduler received shutdown signal");

                    if let Some((handle, cancel_token)) = current_work.take() {
                        cancel_token.cancel();

                        if time::timeout(self.shutdown_timeout, handle).await.is_err() {
                            warn!(
                                timeout = fmt_duration(self.shutdown_timeout),
                                "Collection cycle did not finish in time, abandoning"
                            );
                        } else {
                            trace!("Collection cycle completed gracefully");
                        }
                    }

                    info!("Stats scheduler exiting gracefully");
                    break;
                }
            }
        }
    }
}
