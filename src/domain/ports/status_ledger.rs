//! Status ledger port.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{JobId, LedgerEntry, SchedulerState, Task, TaskState, UnitId};

/// Durable per-task record keyed by unit id.
///
/// Every mutating call is atomic for its entry and durable once it returns.
/// Callers serialize access; there is no internal locking.
#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// Insert entries for tasks not yet present. Returns the number inserted.
    async fn register(&self, tasks: &[Task]) -> DomainResult<usize>;

    async fn get(&self, unit: &UnitId) -> DomainResult<Option<LedgerEntry>>;

    /// Set a new state, optionally rebinding the latest job id.
    async fn update(
        &self,
        unit: &UnitId,
        state: TaskState,
        job_id: Option<&JobId>,
    ) -> DomainResult<()>;

    /// Advance the entry to `attempt` and bind the freshly submitted job to
    /// it in one atomic update.
    ///
    /// Fails with `ValidationFailed` when the stored counter is not
    /// `attempt - 1`, leaving the entry untouched.
    async fn record_submission(
        &self,
        unit: &UnitId,
        attempt: u32,
        job_id: &JobId,
        base_commit: &str,
        branch_name: &str,
    ) -> DomainResult<()>;

    /// Store the scheduler fact seen by a polling pass together with the
    /// classified state.
    async fn record_poll(
        &self,
        unit: &UnitId,
        polled: SchedulerState,
        state: TaskState,
    ) -> DomainResult<()>;

    /// Entries in `state`, ordered by array index.
    async fn select(&self, state: TaskState) -> DomainResult<Vec<LedgerEntry>>;

    /// All entries, ordered by array index.
    async fn list(&self) -> DomainResult<Vec<LedgerEntry>>;

    /// Bump the attempt counter on its own and return the new attempt number.
    async fn increment_attempt(&self, unit: &UnitId) -> DomainResult<u32>;

    async fn counts(&self) -> DomainResult<HashMap<TaskState, u64>>;
}
