//! Submission and resubmission of cohort tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{branch_name, JobId, LedgerEntry, Task, TaskState, UnitId};
use crate::domain::ports::{ResultStore, SchedulerAdapter, StatusLedger};
use crate::services::retry::RetryPolicy;
use crate::services::task_registry::TaskRegistry;

/// One task handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTask {
    pub unit_id: UnitId,
    pub job_id: JobId,
    pub attempt: u32,
    pub branch_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReport {
    /// Default-branch tip recorded as the reference for these jobs.
    pub base_commit: Option<String>,
    pub submitted: Vec<SubmittedTask>,
    /// Scheduler failures that reached the attempt cap.
    pub exhausted: Vec<UnitId>,
}

pub struct SubmissionService {
    ledger: Arc<dyn StatusLedger>,
    scheduler: Arc<dyn SchedulerAdapter>,
    store: Arc<dyn ResultStore>,
    retry: RetryPolicy,
    branch_prefix: String,
    max_attempts: u32,
}

impl SubmissionService {
    pub fn new(
        ledger: Arc<dyn StatusLedger>,
        scheduler: Arc<dyn SchedulerAdapter>,
        store: Arc<dyn ResultStore>,
        retry: RetryPolicy,
        branch_prefix: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            store,
            retry,
            branch_prefix: branch_prefix.into(),
            max_attempts,
        }
    }

    /// Insert a ledger entry for every registry task not yet known.
    pub async fn register(&self, registry: &TaskRegistry) -> DomainResult<usize> {
        let inserted = self.ledger.register(registry.enumerate()).await?;
        info!(inserted, total = registry.len(), "Registered cohort");
        Ok(inserted)
    }

    /// Submit up to `limit` never-submitted tasks in array-index order.
    #[instrument(skip(self))]
    pub async fn submit_pending(&self, limit: Option<usize>) -> DomainResult<SubmissionReport> {
        let mut pending = self.ledger.select(TaskState::NotSubmitted).await?;
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        self.submit_entries(pending).await
    }

    /// Resubmit scheduler failures below the attempt cap.
    ///
    /// Silent job failures are left for the operator.
    #[instrument(skip(self))]
    pub async fn resubmit_failed(&self) -> DomainResult<SubmissionReport> {
        let failed = self.ledger.select(TaskState::FailedScheduler).await?;
        let (eligible, exhausted): (Vec<_>, Vec<_>) = failed
            .into_iter()
            .partition(|e| e.attempt < self.max_attempts);

        for entry in &exhausted {
            warn!(unit_id = %entry.unit_id, attempts = entry.attempt, "Attempt cap reached");
        }

        let mut report = self.submit_entries(eligible).await?;
        report.exhausted = exhausted.into_iter().map(|e| e.unit_id).collect();
        Ok(report)
    }

    /// Operator resubmission of specific units.
    ///
    /// Accepts any unit that is neither in flight nor succeeded.
    #[instrument(skip(self, units), fields(count = units.len()))]
    pub async fn resubmit(&self, units: &[UnitId]) -> DomainResult<SubmissionReport> {
        let mut entries = Vec::with_capacity(units.len());
        for unit in units {
            let entry = self
                .ledger
                .get(unit)
                .await?
                .ok_or_else(|| DomainError::UnitNotFound(unit.key()))?;
            if !entry.state.is_resubmittable() {
                return Err(DomainError::ValidationFailed(format!(
                    "{} is {} and cannot be resubmitted",
                    unit, entry.state
                )));
            }
            entries.push(entry);
        }
        self.submit_entries(entries).await
    }

    async fn submit_entries(&self, entries: Vec<LedgerEntry>) -> DomainResult<SubmissionReport> {
        if entries.is_empty() {
            return Ok(SubmissionReport::default());
        }

        self.retry
            .execute("store refresh", || self.store.prepare())
            .await?;
        let base_commit = self
            .retry
            .execute("default tip", || self.store.default_tip())
            .await?;

        // One array job per attempt number so every job knows its own attempt.
        let mut by_attempt: BTreeMap<u32, Vec<LedgerEntry>> = BTreeMap::new();
        for entry in entries {
            by_attempt.entry(entry.attempt + 1).or_default().push(entry);
        }

        let mut report = SubmissionReport {
            base_commit: Some(base_commit.clone()),
            ..SubmissionReport::default()
        };

        for (attempt, group) in by_attempt {
            let tasks: Vec<Task> = group
                .iter()
                .map(|e| Task::new(e.unit_id.clone(), e.array_index))
                .collect();
            let jobs = self.scheduler.submit(&tasks, attempt).await?;

            for entry in group {
                let job_id = jobs.get(&entry.unit_id).cloned().ok_or_else(|| {
                    DomainError::Scheduler(format!("No job id returned for {}", entry.unit_id))
                })?;
                let branch = branch_name(&self.branch_prefix, &entry.unit_id, &job_id, attempt);
                self.ledger
                    .record_submission(&entry.unit_id, attempt, &job_id, &base_commit, &branch)
                    .await?;

                report.submitted.push(SubmittedTask {
                    unit_id: entry.unit_id,
                    job_id,
                    attempt,
                    branch_name: branch,
                });
            }
        }

        info!(
            submitted = report.submitted.len(),
            base_commit = %base_commit,
            scheduler = self.scheduler.name(),
            "Submitted tasks"
        );
        Ok(report)
    }
}
