//! Merge plan and merge run models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default number of branches folded into one merge commit.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// One ordered, size-bounded group of branches merged in a single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeBatch {
    /// 1-based position in the plan.
    pub index: usize,
    pub branches: Vec<String>,
}

impl MergeBatch {
    pub fn message(&self, batch_count: usize) -> String {
        format!(
            "Merge result branches, batch {}/{} ({} branches)",
            self.index,
            batch_count,
            self.branches.len()
        )
    }
}

/// The full batch plan, computed before any mutation starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    pub chunk_size: usize,
    pub batches: Vec<MergeBatch>,
}

impl MergePlan {
    /// Sort branches by name and split them into chunks of `chunk_size`.
    ///
    /// A `chunk_size` of zero is treated as one.
    pub fn new(mut branches: Vec<String>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        branches.sort();
        branches.dedup();

        let batches = branches
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| MergeBatch {
                index: i + 1,
                branches: chunk.to_vec(),
            })
            .collect();

        Self {
            chunk_size,
            batches,
        }
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.iter().map(|b| b.branches.len()).collect()
    }

    pub fn branch_count(&self) -> usize {
        self.batches.iter().map(|b| b.branches.len()).sum()
    }

    /// Branches in the batches before `next_batch`.
    pub fn merged_before(&self, next_batch: usize) -> Vec<String> {
        let kept = next_batch.saturating_sub(1).min(self.batches.len());
        self.batches[..kept]
            .iter()
            .flat_map(|b| b.branches.iter().cloned())
            .collect()
    }

    /// Keep the batches before `next_batch` and re-chunk `remaining` after
    /// them with the same chunk size.
    pub fn with_tail(&self, next_batch: usize, remaining: Vec<String>) -> Self {
        let kept = next_batch.saturating_sub(1).min(self.batches.len());
        let tail = MergePlan::new(remaining, self.chunk_size);

        let mut batches = self.batches[..kept].to_vec();
        batches.extend(tail.batches.into_iter().map(|mut batch| {
            batch.index += kept;
            batch
        }));

        Self {
            chunk_size: tail.chunk_size,
            batches,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Candidate branches split by what they contain and whether they may merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchPartition {
    /// Latest-attempt branches of succeeded units with new content.
    pub has_results: Vec<String>,
    /// Branches whose tip equals the reference commit.
    pub no_results: Vec<String>,
    /// Branches of superseded attempts.
    pub orphaned: Vec<String>,
    /// Latest-attempt branches with content whose unit is not yet succeeded.
    pub deferred: Vec<String>,
    /// Branches whose tip is already part of the reference history.
    pub already_merged: Vec<String>,
}

/// Stages of one merge engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeRunState {
    Started,
    Enumerating,
    Merging,
    ConflictAbort,
    Pushed,
    Verifying,
    Complete,
    Incomplete,
}

impl MergeRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Enumerating => "ENUMERATING",
            Self::Merging => "MERGING",
            Self::ConflictAbort => "CONFLICT_ABORT",
            Self::Pushed => "PUSHED",
            Self::Verifying => "VERIFYING",
            Self::Complete => "COMPLETE",
            Self::Incomplete => "INCOMPLETE",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(Self::Started),
            "ENUMERATING" => Some(Self::Enumerating),
            "MERGING" => Some(Self::Merging),
            "CONFLICT_ABORT" => Some(Self::ConflictAbort),
            "PUSHED" => Some(Self::Pushed),
            "VERIFYING" => Some(Self::Verifying),
            "COMPLETE" => Some(Self::Complete),
            "INCOMPLETE" => Some(Self::Incomplete),
            _ => None,
        }
    }

    /// Whether every batch of the plan is already merged and pushed.
    pub fn merges_done(&self) -> bool {
        matches!(
            self,
            Self::Pushed | Self::Verifying | Self::Incomplete | Self::Complete
        )
    }
}

impl fmt::Display for MergeRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted checkpoint of a merge engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRun {
    pub id: Uuid,
    pub reference_commit: String,
    pub plan: MergePlan,
    /// Partition the plan was built from.
    pub partition: BranchPartition,
    pub state: MergeRunState,
    /// 1-based index of the next batch to merge.
    pub next_batch: usize,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MergeRun {
    pub fn new(reference_commit: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference_commit: reference_commit.into(),
            plan: MergePlan::default(),
            partition: BranchPartition::default(),
            state: MergeRunState::Started,
            next_batch: 1,
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, state: MergeRunState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Batches not merged yet, in plan order.
    pub fn remaining_batches(&self) -> &[MergeBatch] {
        let start = self.next_batch.saturating_sub(1).min(self.plan.batches.len());
        &self.plan.batches[start..]
    }
}

/// Result of asking the store to merge one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Committed { commit: String },
    Conflict { paths: Vec<String>, branches: Vec<String> },
}

/// What a push transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    /// History plus any locally present content.
    WithData,
    /// History only.
    HistoryOnly,
}

/// Summary of a finished merge run, written to the reports directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub run_id: Uuid,
    pub state: MergeRunState,
    pub reference_commit: String,
    pub batch_count: usize,
    pub batch_sizes: Vec<usize>,
    pub merged_branches: usize,
    pub final_commit: Option<String>,
    pub partition: BranchPartition,
    pub missing_content: Vec<String>,
    pub finished_at: DateTime<Utc>,
}
