//! `sqlx` row models and in-memory pipeline types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::platforms::{Platform, StatsPayload};

/// A roster entry. Owned by the registration side; the collector only reads it.
#[derive(sqlx::FromRow, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: i32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cf_handle: Option<String>,
    #[serde(default)]
    pub lc_username: Option<String>,
    #[serde(default)]
    pub cc_username: Option<String>,
}

impl Student {
    /// The registered handle for `platform`, ignoring blank values.
    pub fn handle(&self, platform: Platform) -> Option<&str> {
        let raw = match platform {
            Platform::Codeforces => self.cf_handle.as_deref(),
            Platform::LeetCode => self.lc_username.as_deref(),
            Platform::CodeChef => self.cc_username.as_deref(),
        };
        raw.map(str::trim).filter(|h| !h.is_empty())
    }

    /// Platforms this student has a handle for, in fixed order.
    pub fn platforms(&self) -> impl Iterator<Item = (Platform, &str)> + '_ {
        Platform::ALL
            .into_iter()
            .filter_map(|p| self.handle(p).map(|h| (p, h)))
    }

    pub fn has_any_handle(&self) -> bool {
        self.platforms().next().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failed,
}

impl FetchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(FetchStatus::Success),
            "failed" => Some(FetchStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one (student, platform) fetch after retries, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub platform: Platform,
    pub result: Result<StatsPayload, String>,
    /// Attempts spent reaching this outcome.
    pub attempts: u32,
}

impl FetchOutcome {
    pub fn success(platform: Platform, payload: StatsPayload, attempts: u32) -> Self {
        Self {
            platform,
            result: Ok(payload),
            attempts,
        }
    }

    pub fn failure(platform: Platform, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            platform,
            result: Err(error.into()),
            attempts,
        }
    }

    pub fn status(&self) -> FetchStatus {
        match self.result {
            Ok(_) => FetchStatus::Success,
            Err(_) => FetchStatus::Failed,
        }
    }
}

/// An immutable, timestamped observation of one student on one platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub id: i64,
    pub student_id: i32,
    pub platform: Platform,
    pub captured_at: DateTime<Utc>,
    pub fetch_status: FetchStatus,
    pub rating: Option<i32>,
    pub max_rating: Option<i32>,
    pub solved: i32,
    pub easy: Option<i32>,
    pub medium: Option<i32>,
    pub hard: Option<i32>,
    pub rank_title: Option<String>,
    pub global_rank: Option<i64>,
    pub error_message: Option<String>,
    pub attempts: i32,
}

impl StatsSnapshot {
    /// Build the row for `outcome`. Failed outcomes zero `solved` and leave
    /// every other payload field empty.
    pub fn from_outcome(
        id: i64,
        student_id: i32,
        captured_at: DateTime<Utc>,
        outcome: &FetchOutcome,
    ) -> Self {
        let attempts = i32::try_from(outcome.attempts).unwrap_or(i32::MAX);
        let base = Self {
            id,
            student_id,
            platform: outcome.platform,
            captured_at,
            fetch_status: outcome.status(),
            rating: None,
            max_rating: None,
            solved: 0,
            easy: None,
            medium: None,
            hard: None,
            rank_title: None,
            global_rank: None,
            error_message: None,
            attempts,
        };

        match &outcome.result {
            Ok(payload) => Self {
                rating: payload.rating,
                max_rating: payload.max_rating,
                solved: payload.solved,
                easy: payload.breakdown.map(|b| b.easy),
                medium: payload.breakdown.map(|b| b.medium),
                hard: payload.breakdown.map(|b| b.hard),
                rank_title: payload.rank_title.clone(),
                global_rank: payload.global_rank,
                ..base
            },
            Err(message) => Self {
                error_message: Some(message.clone()),
                ..base
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.fetch_status == FetchStatus::Success
    }
}

/// Raw `stats_snapshots` row as read by `sqlx`.
#[derive(sqlx::FromRow, Debug)]
pub struct SnapshotRow {
    pub id: i64,
    pub student_id: i32,
    pub platform: String,
    pub captured_at: DateTime<Utc>,
    pub fetch_status: String,
    pub rating: Option<i32>,
    pub max_rating: Option<i32>,
    pub solved: i32,
    pub easy: Option<i32>,
    pub medium: Option<i32>,
    pub hard: Option<i32>,
    pub rank_title: Option<String>,
    pub global_rank: Option<i64>,
    pub error_message: Option<String>,
    pub attempts: i32,
}

impl TryFrom<SnapshotRow> for StatsSnapshot {
    type Error = anyhow::Error;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        let platform = Platform::from_tag(&row.platform)
            .ok_or_else(|| anyhow::anyhow!("Unknown platform tag in snapshot {}: {}", row.id, row.platform))?;
        let fetch_status = FetchStatus::parse(&row.fetch_status).ok_or_else(|| {
            anyhow::anyhow!("Unknown fetch status in snapshot {}: {}", row.id, row.fetch_status)
        })?;
        Ok(Self {
            id: row.id,
            student_id: row.student_id,
            platform,
            captured_at: row.captured_at,
            fetch_status,
            rating: row.rating,
            max_rating: row.max_rating,
            solved: row.solved,
            easy: row.easy,
            medium: row.medium,
            hard: row.hard,
            rank_title: row.rank_title,
            global_rank: row.global_rank,
            error_message: row.error_message,
            attempts: row.attempts,
        })
    }
}
