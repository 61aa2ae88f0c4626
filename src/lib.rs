//! fanin - job lifecycle tracker and batched result merge for cohort fan-out
//!
//! One scheduler job per cohort unit pushes its outputs to a per-job branch
//! of a shared git-annex repository. fanin records every task in a durable
//! status ledger, classifies finished jobs by combining the scheduler's
//! verdict with the state of the job's result branch, and folds the result
//! branches back into one history in bounded, checkpointed batches that are
//! verified against the durable content store before they count as done.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, ports and errors
//! - **Service Layer** (`services`): registry, classifier, submission and merge engine
//! - **Adapters** (`adapters`): SQLite ledger, git-annex store, SLURM shim, push lock
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, LedgerEntry, MergePlan, MergeReport, MergeRunState, SchedulerState, Task, TaskState,
    UnitId,
};
pub use services::{MergeEngine, OutcomeClassifier, SubmissionService, TaskRegistry};
