//! Outcome classifier.
//!
//! A scheduler-reported success is necessary but not sufficient: a task is
//! only done when its result branch carries a new commit. [`classify`] is
//! the pure decision table; [`OutcomeClassifier::poll_pass`] gathers the
//! facts for every non-terminal ledger entry and persists each transition.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    BranchFact, BranchRelation, JobId, LedgerEntry, SchedulerState, TaskState, UnitId,
};
use crate::domain::ports::{ResultStore, SchedulerAdapter, StatusLedger};
use crate::services::reports::StatusSummary;
use crate::services::retry::RetryPolicy;

/// Largest number of job ids sent to the scheduler in one status query.
const POLL_CHUNK: usize = 500;

/// Facts about one task at polling time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationInput<'a> {
    pub scheduler_state: SchedulerState,
    pub branch_exists: bool,
    pub branch_tip: Option<&'a str>,
    /// Default-branch tip recorded before the task's job was submitted.
    pub reference_commit: &'a str,
}

impl<'a> ClassificationInput<'a> {
    pub fn new(
        scheduler_state: SchedulerState,
        branch: &'a BranchFact,
        reference_commit: &'a str,
    ) -> Self {
        Self {
            scheduler_state,
            branch_exists: branch.exists,
            branch_tip: branch.tip.as_deref(),
            reference_commit,
        }
    }

    fn relation(&self) -> BranchRelation {
        match (self.branch_exists, self.branch_tip) {
            (false, _) => BranchRelation::Missing,
            (true, Some(tip)) if tip != self.reference_commit => BranchRelation::Ahead,
            (true, _) => BranchRelation::AtReference,
        }
    }
}

/// Combine the scheduler fact and the branch fact into one task state.
///
/// | scheduler | branch                | state              |
/// |-----------|-----------------------|--------------------|
/// | PENDING / RUNNING | any           | RUNNING            |
/// | COMPLETED | missing or at ref     | FAILED_NO_RESULT   |
/// | COMPLETED | ahead of ref          | SUCCEEDED          |
/// | FAILED    | any                   | FAILED_SCHEDULER   |
/// | UNKNOWN   | missing               | UNKNOWN            |
/// | UNKNOWN   | at ref                | FAILED_NO_RESULT   |
/// | UNKNOWN   | ahead of ref          | SUCCEEDED          |
pub fn classify(input: &ClassificationInput<'_>) -> TaskState {
    match (input.scheduler_state, input.relation()) {
        (SchedulerState::Pending | SchedulerState::Running, _) => TaskState::Running,
        (SchedulerState::Failed, _) => TaskState::FailedScheduler,
        (SchedulerState::Completed | SchedulerState::Unknown, BranchRelation::Ahead) => {
            TaskState::Succeeded
        }
        (SchedulerState::Completed | SchedulerState::Unknown, BranchRelation::AtReference)
        | (SchedulerState::Completed, BranchRelation::Missing) => TaskState::FailedNoResult,
        (SchedulerState::Unknown, BranchRelation::Missing) => TaskState::Unknown,
    }
}

/// One state change recorded by a polling pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub unit_id: UnitId,
    pub job_id: JobId,
    pub branch_name: Option<String>,
    pub scheduler_state: SchedulerState,
    pub from: TaskState,
    pub to: TaskState,
}

/// Outcome of one polling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    pub polled: usize,
    pub transitions: Vec<Transition>,
    /// Pollable entries skipped because no job is bound to them.
    pub skipped: Vec<UnitId>,
    pub summary: StatusSummary,
}

impl PollReport {
    pub fn newly(&self, state: TaskState) -> impl Iterator<Item = &Transition> {
        self.transitions.iter().filter(move |t| t.to == state)
    }
}

pub struct OutcomeClassifier {
    ledger: Arc<dyn StatusLedger>,
    scheduler: Arc<dyn SchedulerAdapter>,
    store: Arc<dyn ResultStore>,
    retry: RetryPolicy,
    branch_prefix: String,
}

impl OutcomeClassifier {
    pub fn new(
        ledger: Arc<dyn StatusLedger>,
        scheduler: Arc<dyn SchedulerAdapter>,
        store: Arc<dyn ResultStore>,
        retry: RetryPolicy,
        branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            store,
            retry,
            branch_prefix: branch_prefix.into(),
        }
    }

    /// Poll every SUBMITTED, RUNNING or UNKNOWN entry and persist its new
    /// state. Terminal entries are never looked at.
    ///
    /// Each entry is written as soon as it is classified, so an interrupted
    /// pass leaves every entry either at its old or at its new state.
    #[instrument(skip(self), fields(scheduler = self.scheduler.name()))]
    pub async fn poll_pass(&self) -> DomainResult<PollReport> {
        let mut report = PollReport::default();

        let mut pollable: Vec<(LedgerEntry, JobId)> = Vec::new();
        for entry in self.ledger.list().await? {
            if !entry.state.is_pollable() {
                continue;
            }
            match entry.job.as_ref().map(|j| j.id.clone()) {
                Some(id) => pollable.push((entry, id)),
                None => {
                    warn!(unit_id = %entry.unit_id, state = %entry.state, "Pollable entry has no job bound");
                    report.skipped.push(entry.unit_id);
                }
            }
        }

        if pollable.is_empty() {
            report.summary = StatusSummary::from_counts(&self.ledger.counts().await?);
            return Ok(report);
        }

        self.retry.execute("store refresh", || self.store.prepare()).await?;
        let current_tip = self
            .retry
            .execute("default tip", || self.store.default_tip())
            .await?;

        let job_ids: Vec<JobId> = pollable.iter().map(|(_, id)| id.clone()).collect();
        let mut states: HashMap<JobId, SchedulerState> = HashMap::new();
        for chunk in job_ids.chunks(POLL_CHUNK) {
            let polled = self
                .retry
                .execute("scheduler poll", || self.scheduler.poll(chunk))
                .await?;
            states.extend(polled);
        }

        for (entry, job_id) in pollable {
            let scheduler_state = states
                .get(&job_id)
                .copied()
                .unwrap_or(SchedulerState::Unknown);
            let branch = entry
                .branch_name
                .clone()
                .or_else(|| entry.expected_branch(&self.branch_prefix));

            let fact = match (&branch, scheduler_state) {
                (Some(name), SchedulerState::Completed | SchedulerState::Unknown) => {
                    self.retry
                        .execute("branch lookup", || self.store.branch_fact(name))
                        .await?
                }
                (Some(name), _) => BranchFact::missing(name.as_str()),
                (None, _) => BranchFact::missing(""),
            };

            let reference = entry.base_commit.as_deref().unwrap_or(&current_tip);
            let next = classify(&ClassificationInput::new(scheduler_state, &fact, reference));

            self.ledger
                .record_poll(&entry.unit_id, scheduler_state, next)
                .await?;
            report.polled += 1;

            if next != entry.state {
                debug!(unit_id = %entry.unit_id, job_id = %job_id, from = %entry.state, to = %next, "Task state changed");
                report.transitions.push(Transition {
                    unit_id: entry.unit_id,
                    job_id,
                    branch_name: branch,
                    scheduler_state,
                    from: entry.state,
                    to: next,
                });
            }
        }

        report.summary = StatusSummary::from_counts(&self.ledger.counts().await?);
        info!(
            polled = report.polled,
            transitions = report.transitions.len(),
            succeeded = report.summary.count(TaskState::Succeeded),
            failed_no_result = report.summary.count(TaskState::FailedNoResult),
            failed_scheduler = report.summary.count(TaskState::FailedScheduler),
            "Polling pass finished"
        );
        Ok(report)
    }
}
