//! Branch and content store port.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BranchFact, MergeOutcome, PushMode};

/// Versioned output history plus its content store.
///
/// Branch names passed in are plain result branch names; implementations
/// resolve them against wherever job pushes land.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Make the working copy current with the shared remote.
    async fn prepare(&self) -> DomainResult<()>;

    /// Current tip of the canonical output history.
    async fn default_tip(&self) -> DomainResult<String>;

    /// Names of all result branches starting with `prefix`.
    async fn list_branches(&self, prefix: &str) -> DomainResult<Vec<String>>;

    async fn branch_exists(&self, name: &str) -> DomainResult<bool>;

    /// Tip commit of a branch, `None` when it does not exist.
    async fn tip(&self, name: &str) -> DomainResult<Option<String>>;

    /// Whether `commit` is reachable from `descendant`.
    async fn is_ancestor(&self, commit: &str, descendant: &str) -> DomainResult<bool>;

    /// Existence and tip in one call.
    async fn branch_fact(&self, name: &str) -> DomainResult<BranchFact> {
        Ok(match self.tip(name).await? {
            Some(tip) => BranchFact::at(name, tip),
            None => BranchFact::missing(name),
        })
    }

    /// Merge all `branches` into the local default branch in one commit.
    ///
    /// A conflict leaves the working copy at its pre-merge state.
    async fn merge(&self, branches: &[String], message: &str) -> DomainResult<MergeOutcome>;

    async fn push(&self, mode: PushMode) -> DomainResult<()>;

    /// Refresh which content the durable store actually holds.
    async fn refresh_content_locations(&self) -> DomainResult<()>;

    /// Content keys referenced by the merged history but absent from the
    /// durable store.
    async fn find_missing_content(&self) -> DomainResult<BTreeSet<String>>;

    /// Mark the working copy as no longer a valid content source.
    async fn retire_source(&self) -> DomainResult<()>;
}
