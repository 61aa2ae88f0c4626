//! SQLite implementation of the StatusLedger.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::warn;

use super::{parse_datetime, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Job, JobId, LedgerEntry, SchedulerState, Task, TaskState, UnitId,
};
use crate::domain::ports::StatusLedger;

#[derive(Clone)]
pub struct SqliteStatusLedger {
    pool: SqlitePool,
}

impl SqliteStatusLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn not_found(unit: &UnitId) -> DomainError {
        DomainError::UnitNotFound(unit.key())
    }
}

#[async_trait]
impl StatusLedger for SqliteStatusLedger {
    async fn register(&self, tasks: &[Task]) -> DomainResult<usize> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for task in tasks {
            let known: Option<(i64,)> =
                sqlx::query_as("SELECT array_index FROM task_entries WHERE unit_id = ?")
                    .bind(task.unit_id.key())
                    .fetch_optional(&mut *tx)
                    .await?;
            if known.is_some() {
                continue;
            }

            // Indices already handed out stay with their units; a unit added
            // to a grown cohort takes the next free index instead.
            let requested = i64::from(task.array_index);
            let (taken,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM task_entries WHERE array_index = ?")
                    .bind(requested)
                    .fetch_one(&mut *tx)
                    .await?;
            let array_index = if taken > 0 {
                let (next,): (i64,) =
                    sqlx::query_as("SELECT COALESCE(MAX(array_index), 0) + 1 FROM task_entries")
                        .fetch_one(&mut *tx)
                        .await?;
                warn!(
                    unit_id = %task.unit_id,
                    requested,
                    assigned = next,
                    "Array index already taken, appending unit"
                );
                next
            } else {
                requested
            };

            let result = sqlx::query(
                r#"INSERT INTO task_entries
                   (unit_id, subject, session, array_index, attempt, state, created_at, updated_at)
                   VALUES (?, ?, ?, ?, 0, ?, ?, ?)
                   ON CONFLICT(unit_id) DO NOTHING"#,
            )
            .bind(task.unit_id.key())
            .bind(&task.unit_id.subject)
            .bind(&task.unit_id.session)
            .bind(array_index)
            .bind(TaskState::NotSubmitted.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get(&self, unit: &UnitId) -> DomainResult<Option<LedgerEntry>> {
        let row: Option<LedgerRow> = sqlx::query_as("SELECT * FROM task_entries WHERE unit_id = ?")
            .bind(unit.key())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(
        &self,
        unit: &UnitId,
        state: TaskState,
        job_id: Option<&JobId>,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE task_entries SET state = ?, job_id = COALESCE(?, job_id), updated_at = ?
               WHERE unit_id = ?"#,
        )
        .bind(state.as_str())
        .bind(job_id.map(JobId::as_str))
        .bind(Utc::now().to_rfc3339())
        .bind(unit.key())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(unit));
        }
        Ok(())
    }

    async fn record_submission(
        &self,
        unit: &UnitId,
        attempt: u32,
        job_id: &JobId,
        base_commit: &str,
        branch_name: &str,
    ) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();
        let row: Option<(i64,)> = sqlx::query_as(
            r#"UPDATE task_entries
               SET attempt = attempt + 1, state = ?, job_id = ?, job_submitted_at = ?,
                   last_polled_state = NULL, base_commit = ?, branch_name = ?, updated_at = ?
               WHERE unit_id = ? AND attempt + 1 = ?
               RETURNING attempt"#,
        )
        .bind(TaskState::Submitted.as_str())
        .bind(job_id.as_str())
        .bind(&now)
        .bind(base_commit)
        .bind(branch_name)
        .bind(&now)
        .bind(unit.key())
        .bind(i64::from(attempt))
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            return Ok(());
        }
        match self.get(unit).await? {
            None => Err(Self::not_found(unit)),
            Some(entry) => Err(DomainError::ValidationFailed(format!(
                "{unit} is at attempt {}, cannot record attempt {attempt}",
                entry.attempt
            ))),
        }
    }

    async fn record_poll(
        &self,
        unit: &UnitId,
        polled: SchedulerState,
        state: TaskState,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE task_entries SET last_polled_state = ?, state = ?, updated_at = ?
               WHERE unit_id = ?"#,
        )
        .bind(polled.as_str())
        .bind(state.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(unit.key())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(unit));
        }
        Ok(())
    }

    async fn select(&self, state: TaskState) -> DomainResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> =
            sqlx::query_as("SELECT * FROM task_entries WHERE state = ? ORDER BY array_index")
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list(&self) -> DomainResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as("SELECT * FROM task_entries ORDER BY array_index")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn increment_attempt(&self, unit: &UnitId) -> DomainResult<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"UPDATE task_entries SET attempt = attempt + 1, updated_at = ?
               WHERE unit_id = ? RETURNING attempt"#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(unit.key())
        .fetch_optional(&self.pool)
        .await?;

        let (attempt,) = row.ok_or_else(|| Self::not_found(unit))?;
        u32::try_from(attempt).map_err(|e| DomainError::SerializationError(e.to_string()))
    }

    async fn counts(&self) -> DomainResult<HashMap<TaskState, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM task_entries GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = HashMap::new();
        for (state, count) in rows {
            if let Some(state) = TaskState::from_str(&state) {
                counts.insert(state, count as u64);
            }
        }
        Ok(counts)
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    unit_id: String,
    subject: String,
    session: Option<String>,
    array_index: i64,
    branch_name: Option<String>,
    attempt: i64,
    state: String,
    job_id: Option<String>,
    job_submitted_at: Option<String>,
    last_polled_state: Option<String>,
    base_commit: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DomainError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let unit_id = UnitId::new(row.subject, row.session)?;
        if unit_id.key() != row.unit_id {
            return Err(DomainError::SerializationError(format!(
                "Ledger key {} does not match unit {}",
                row.unit_id, unit_id
            )));
        }

        let array_index = u32::try_from(row.array_index)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;
        let attempt =
            u32::try_from(row.attempt).map_err(|e| DomainError::SerializationError(e.to_string()))?;
        let state = TaskState::from_str(&row.state).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid task state: {}", row.state))
        })?;

        let job = match row.job_id {
            Some(id) => Some(Job {
                id: JobId::new(id)?,
                array_index,
                submitted_at: parse_optional_datetime(row.job_submitted_at)?
                    .unwrap_or_else(Utc::now),
                last_polled_state: row
                    .last_polled_state
                    .as_deref()
                    .and_then(SchedulerState::from_str),
            }),
            None => None,
        };

        Ok(LedgerEntry {
            unit_id,
            array_index,
            branch_name: row.branch_name,
            attempt,
            state,
            job,
            base_commit: row.base_commit,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
