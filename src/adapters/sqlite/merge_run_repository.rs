//! SQLite implementation of the MergeCheckpointStore.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BranchPartition, MergePlan, MergeRun, MergeRunState};
use crate::domain::ports::MergeCheckpointStore;

#[derive(Clone)]
pub struct SqliteMergeRunRepository {
    pool: SqlitePool,
}

impl SqliteMergeRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MergeCheckpointStore for SqliteMergeRunRepository {
    async fn load_open_run(&self) -> DomainResult<Option<MergeRun>> {
        let row: Option<MergeRunRow> = sqlx::query_as(
            "SELECT * FROM merge_runs WHERE state != ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(MergeRunState::Complete.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn save_run(&self, run: &MergeRun) -> DomainResult<()> {
        let plan = serde_json::to_string(&run.plan)?;
        let partition = serde_json::to_string(&run.partition)?;
        sqlx::query(
            r#"INSERT INTO merge_runs (id, reference_commit, plan, branch_partition, state, next_batch, last_error, started_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   reference_commit = excluded.reference_commit,
                   plan = excluded.plan,
                   branch_partition = excluded.branch_partition,
                   state = excluded.state,
                   next_batch = excluded.next_batch,
                   last_error = excluded.last_error,
                   updated_at = excluded.updated_at"#,
        )
        .bind(run.id.to_string())
        .bind(&run.reference_commit)
        .bind(plan)
        .bind(partition)
        .bind(run.state.as_str())
        .bind(run.next_batch as i64)
        .bind(&run.last_error)
        .bind(run.started_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MergeRunRow {
    id: String,
    reference_commit: String,
    plan: String,
    branch_partition: String,
    state: String,
    next_batch: i64,
    last_error: Option<String>,
    started_at: String,
    updated_at: String,
}

impl TryFrom<MergeRunRow> for MergeRun {
    type Error = DomainError;

    fn try_from(row: MergeRunRow) -> Result<Self, Self::Error> {
        let plan: MergePlan = serde_json::from_str(&row.plan)?;
        let partition: BranchPartition = serde_json::from_str(&row.branch_partition)?;
        let state = MergeRunState::from_str(&row.state).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid merge run state: {}", row.state))
        })?;
        let next_batch = usize::try_from(row.next_batch)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(MergeRun {
            id: parse_uuid(&row.id)?,
            reference_commit: row.reference_commit,
            plan,
            partition,
            state,
            next_batch,
            last_error: row.last_error,
            started_at: parse_datetime(&row.started_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
