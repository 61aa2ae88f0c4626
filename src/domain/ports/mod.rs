//! Port trait definitions.
//!
//! Services depend only on these traits; `adapters` provides the
//! SQLite, git-annex and SLURM implementations.

pub mod merge_checkpoint;
pub mod result_store;
pub mod scheduler;
pub mod status_ledger;

pub use merge_checkpoint::MergeCheckpointStore;
pub use result_store::ResultStore;
pub use scheduler::SchedulerAdapter;
pub use status_ledger::StatusLedger;
