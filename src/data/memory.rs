//! In-process snapshot store.
//!
//! Used when running against a roster file instead of PostgreSQL, and by tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::collector::CycleReport;
use crate::data::models::{FetchOutcome, StatsSnapshot};
use crate::data::snapshots::{SnapshotStore, history_cutoff};
use crate::platforms::Platform;

/// Snapshots sharded by (student, platform); ids come from one atomic sequence.
#[derive(Default)]
pub struct MemorySnapshotStore {
    series: DashMap<(i32, Platform), Vec<StatsSnapshot>>,
    cycles: Mutex<Vec<CycleReport>>,
    next_id: AtomicI64,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append with an explicit capture time.
    pub fn append_at(
        &self,
        student_id: i32,
        outcome: &FetchOutcome,
        captured_at: DateTime<Utc>,
    ) -> StatsSnapshot {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = StatsSnapshot::from_outcome(id, student_id, captured_at, outcome);
        self.series
            .entry((student_id, outcome.platform))
            .or_default()
            .push(snapshot.clone());
        snapshot
    }

    /// Every stored snapshot, in insertion order.
    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        let mut all: Vec<StatsSnapshot> = self
            .series
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Snapshots for one student, in insertion order.
    pub fn snapshots_for(&self, student_id: i32) -> Vec<StatsSnapshot> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.student_id == student_id)
            .collect()
    }

    pub fn cycles(&self) -> Vec<CycleReport> {
        self.cycles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.series.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn append(&self, student_id: i32, outcome: &FetchOutcome) -> Result<StatsSnapshot> {
        Ok(self.append_at(student_id, outcome, Utc::now()))
    }

    async fn latest(&self, student_id: i32, platform: Platform) -> Result<Option<StatsSnapshot>> {
        Ok(self.series.get(&(student_id, platform)).and_then(|series| {
            series
                .iter()
                .max_by_key(|s| (s.captured_at, s.id))
                .cloned()
        }))
    }

    async fn history(
        &self,
        student_id: i32,
        platform: Platform,
        days: u32,
    ) -> Result<Vec<StatsSnapshot>> {
        let cutoff = history_cutoff(days);
        let mut window: Vec<StatsSnapshot> = self
            .series
            .get(&(student_id, platform))
            .map(|series| {
                series
                    .iter()
                    .filter(|s| cutoff.is_none_or(|cutoff| s.captured_at >= cutoff))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        window.sort_by_key(|s| (s.captured_at, s.id));
        Ok(window)
    }

    async fn record_cycle(&self, report: &CycleReport) -> Result<()> {
        self.cycles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(())
    }

    async fn last_cycle_finished(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .cycles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.finished_at)
            .max())
    }
}
