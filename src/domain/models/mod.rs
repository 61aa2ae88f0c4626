pub mod branch;
pub mod config;
pub mod job;
pub mod ledger;
pub mod merge;
pub mod task;

pub use branch::{
    branch_name, parse_branch_name, validate_branch_name, BranchFact, BranchRelation,
    ParsedBranch,
};
pub use config::{
    CohortConfig, Config, DatabaseConfig, LoggingConfig, MergeConfig, RetryConfig,
    SchedulerConfig, StoreConfig,
};
pub use job::{Job, JobId, SchedulerState};
pub use ledger::LedgerEntry;
pub use merge::{
    BranchPartition, MergeBatch, MergeOutcome, MergePlan, MergeReport, MergeRun, MergeRunState,
    PushMode,
};
pub use task::{FailureClass, Task, TaskState, UnitId};
