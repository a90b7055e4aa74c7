//! Append-only snapshot persistence.
//!
//! The collection pipeline only ever appends; reads (`latest`, `history`) are
//! for whoever renders the data and for tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::collector::CycleReport;
use crate::data::models::{FetchOutcome, SnapshotRow, StatsSnapshot};
use crate::platforms::Platform;

const SNAPSHOT_COLUMNS: &str = "id, student_id, platform, captured_at, fetch_status, rating, max_rating, solved, \
     easy, medium, hard, rank_title, global_rank, error_message, attempts";

/// Oldest capture time included in a `days`-wide history window ending now.
///
/// `None` when the window reaches past the representable range, meaning no lower bound.
pub fn history_cutoff(days: u32) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(i64::from(days))
        .and_then(|span| Utc::now().checked_sub_signed(span))
}

/// Persistence boundary for the collection pipeline.
///
/// Implementations must tolerate concurrent `append` calls from independent
/// workers, and an appended row must be visible to reads once `append` returns.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist one outcome as a new snapshot row.
    async fn append(&self, student_id: i32, outcome: &FetchOutcome) -> Result<StatsSnapshot>;

    /// The snapshot with the greatest capture time, if any.
    async fn latest(&self, student_id: i32, platform: Platform) -> Result<Option<StatsSnapshot>>;

    /// Snapshots from the last `days` days, oldest first.
    async fn history(
        &self,
        student_id: i32,
        platform: Platform,
        days: u32,
    ) -> Result<Vec<StatsSnapshot>>;

    /// Record a finished full-roster cycle.
    async fn record_cycle(&self, report: &CycleReport) -> Result<()>;

    /// Finish time of the most recent recorded cycle.
    async fn last_cycle_finished(&self) -> Result<Option<DateTime<Utc>>>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn append(&self, student_id: i32, outcome: &FetchOutcome) -> Result<StatsSnapshot> {
        // Build with placeholder id/timestamp, then take the real ones from RETURNING.
        let draft = StatsSnapshot::from_outcome(0, student_id, Utc::now(), outcome);

        let (id, captured_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO stats_snapshots (
                student_id, platform, fetch_status, rating, max_rating, solved,
                easy, medium, hard, rank_title, global_rank, error_message, attempts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, captured_at
            "#,
        )
        .bind(draft.student_id)
        .bind(draft.platform.tag())
        .bind(draft.fetch_status.as_str())
        .bind(draft.rating)
        .bind(draft.max_rating)
        .bind(draft.solved)
        .bind(draft.easy)
        .bind(draft.medium)
        .bind(draft.hard)
        .bind(draft.rank_title.as_deref())
        .bind(draft.global_rank)
        .bind(draft.error_message.as_deref())
        .bind(draft.attempts)
        .fetch_one(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to insert {} snapshot for student {student_id}",
                outcome.platform
            )
        })?;

        Ok(StatsSnapshot {
            id,
            captured_at,
            ..draft
        })
    }

    async fn latest(&self, student_id: i32, platform: Platform) -> Result<Option<StatsSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM stats_snapshots \
             WHERE student_id = $1 AND platform = $2 \
             ORDER BY captured_at DESC, id DESC LIMIT 1"
        ))
        .bind(student_id)
        .bind(platform.tag())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StatsSnapshot::try_from).transpose()
    }

    async fn history(
        &self,
        student_id: i32,
        platform: Platform,
        days: u32,
    ) -> Result<Vec<StatsSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM stats_snapshots \
             WHERE student_id = $1 AND platform = $2 \
               AND ($3::timestamptz IS NULL OR captured_at >= $3) \
             ORDER BY captured_at ASC, id ASC"
        ))
        .bind(student_id)
        .bind(platform.tag())
        .bind(history_cutoff(days))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StatsSnapshot::try_from).collect()
    }

    async fn record_cycle(&self, report: &CycleReport) -> Result<()> {
        let batch_sizes: Vec<i32> = report
            .batch_sizes
            .iter()
            .map(|&n| i32::try_from(n).unwrap_or(i32::MAX))
            .collect();

        sqlx::query(
            r#"
            INSERT INTO fetch_cycles (
                trigger, started_at, finished_at, students, batch_sizes,
                succeeded, failed, unsaved, panicked, cancelled
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(report.trigger.as_str())
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(i32::try_from(report.students).unwrap_or(i32::MAX))
        .bind(&batch_sizes)
        .bind(i32::try_from(report.succeeded).unwrap_or(i32::MAX))
        .bind(i32::try_from(report.failed).unwrap_or(i32::MAX))
        .bind(i32::try_from(report.unsaved).unwrap_or(i32::MAX))
        .bind(i32::try_from(report.panicked).unwrap_or(i32::MAX))
        .bind(report.cancelled)
        .execute(&self.pool)
        .await
        .context("Failed to record fetch cycle")?;
        Ok(())
    }

    async fn last_cycle_finished(&self) -> Result<Option<DateTime<Utc>>> {
        let finished: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(finished_at) FROM fetch_cycles")
                .fetch_one(&self.pool)
                .await?;
        Ok(finished)
    }
}
