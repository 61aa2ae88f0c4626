//! Status ledger entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::branch::branch_name;
use crate::domain::models::job::Job;
use crate::domain::models::task::{Task, TaskState, UnitId};

/// Durable per-task record; the source of truth for resubmission decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub unit_id: UnitId,
    pub array_index: u32,
    /// Branch of the latest attempt. `None` until first submission.
    pub branch_name: Option<String>,
    /// Number of submissions made so far.
    pub attempt: u32,
    pub state: TaskState,
    /// Latest job bound to this task.
    pub job: Option<Job>,
    /// Default-branch tip recorded right before the latest submission.
    pub base_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(task: &Task) -> Self {
        let now = Utc::now();
        Self {
            unit_id: task.unit_id.clone(),
            array_index: task.array_index,
            branch_name: None,
            attempt: 0,
            state: TaskState::NotSubmitted,
            job: None,
            base_commit: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recompute the branch name from the stored job id and attempt.
    pub fn expected_branch(&self, prefix: &str) -> Option<String> {
        self.job
            .as_ref()
            .map(|job| branch_name(prefix, &self.unit_id, &job.id, self.attempt))
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
