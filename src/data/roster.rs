//! Roster suppliers.
//!
//! Students are registered elsewhere; the collector only needs a point-in-time
//! list of ids and handles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::path::Path;

use crate::data::models::Student;

#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Every student, ordered by id.
    async fn load_roster(&self) -> Result<Vec<Student>>;

    async fn find_student(&self, student_id: i32) -> Result<Option<Student>>;
}

const STUDENT_SELECT: &str = "SELECT id, name, cf_handle, lc_username, cc_username FROM students";

/// Reads the `students` table.
#[derive(Clone)]
pub struct PgRoster {
    pool: PgPool,
}

impl PgRoster {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RosterSource for PgRoster {
    async fn load_roster(&self) -> Result<Vec<Student>> {
        sqlx::query_as::<_, Student>(&format!("{STUDENT_SELECT} ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load student roster")
    }

    async fn find_student(&self, student_id: i32) -> Result<Option<Student>> {
        sqlx::query_as::<_, Student>(&format!("{STUDENT_SELECT} WHERE id = $1"))
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to look up student {student_id}"))
    }
}

/// A fixed roster, typically loaded from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    students: Vec<Student>,
}

impl StaticRoster {
    pub fn new(mut students: Vec<Student>) -> Self {
        students.sort_by_key(|s| s.id);
        Self { students }
    }

    /// Parse a JSON array of students.
    pub fn from_json(json: &str) -> Result<Self> {
        let students: Vec<Student> =
            serde_json::from_str(json).context("Roster must be a JSON array of students")?;
        Ok(Self::new(students))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read roster file {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

#[async_trait]
impl RosterSource for StaticRoster {
    async fn load_roster(&self) -> Result<Vec<Student>> {
        Ok(self.students.clone())
    }

    async fn find_student(&self, student_id: i32) -> Result<Option<Student>> {
        Ok(self.students.iter().find(|s| s.id == student_id).cloned())
    }
}
