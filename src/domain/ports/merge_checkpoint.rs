//! Merge checkpoint port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::MergeRun;

/// Persists merge engine progress so an aborted run resumes where it stopped.
#[async_trait]
pub trait MergeCheckpointStore: Send + Sync {
    /// The most recent run that has not reached `COMPLETE`, if any.
    async fn load_open_run(&self) -> DomainResult<Option<MergeRun>>;

    /// Insert or overwrite the checkpoint for `run`.
    async fn save_run(&self, run: &MergeRun) -> DomainResult<()>;
}
