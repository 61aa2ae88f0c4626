//! Result branch naming and facts.
//!
//! Every job attempt writes to its own branch named
//! `{prefix}-{job_id}-a{attempt}-{unit}`. The job id makes the name unique
//! across attempts, so a stale branch from a failed attempt can never
//! collide with the branch of a fresh one, and the name can be recomputed
//! from nothing but the stored job id and attempt number.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::job::JobId;
use crate::domain::models::task::UnitId;

pub const DEFAULT_BRANCH_PREFIX: &str = "job";

/// Build the result branch name for one task attempt.
pub fn branch_name(prefix: &str, unit: &UnitId, job_id: &JobId, attempt: u32) -> String {
    format!("{prefix}-{job_id}-a{attempt}-{unit}")
}

/// Components recovered from a result branch name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBranch {
    pub job_id: JobId,
    pub attempt: u32,
    pub unit: UnitId,
}

/// Parse a name produced by [`branch_name`]. Returns `None` for branches
/// that do not follow the scheme (e.g. `main`, `git-annex`).
pub fn parse_branch_name(prefix: &str, name: &str) -> Option<ParsedBranch> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
    let (job, rest) = rest.split_once('-')?;
    let rest = rest.strip_prefix('a')?;
    let (attempt, unit) = rest.split_once('-')?;
    if attempt.is_empty() || !attempt.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some(ParsedBranch {
        job_id: JobId::new(job).ok()?,
        attempt: attempt.parse().ok()?,
        unit: UnitId::parse(unit).ok()?,
    })
}

/// Validates a git branch name to prevent command injection.
///
/// Rejects names that could be interpreted as git flags or otherwise subvert
/// git command execution. Follows `git check-ref-format` rules.
pub fn validate_branch_name(name: &str) -> DomainResult<()> {
    if name.is_empty() {
        return Err(DomainError::ValidationFailed(
            "Branch name cannot be empty".to_string(),
        ));
    }
    if name.starts_with('-') {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{}': must not start with '-'",
            name
        )));
    }
    if name.contains("..") {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{}': must not contain '..'",
            name
        )));
    }
    for ch in name.chars() {
        if ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return Err(DomainError::ValidationFailed(format!(
                "Invalid branch name '{}': contains disallowed character '{}'",
                name, ch
            )));
        }
    }
    if name.ends_with(".lock") {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{}': must not end with '.lock'",
            name
        )));
    }
    Ok(())
}

/// What the content store knows about one result branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFact {
    pub name: String,
    pub exists: bool,
    pub tip: Option<String>,
}

impl BranchFact {
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exists: false,
            tip: None,
        }
    }

    pub fn at(name: impl Into<String>, tip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exists: true,
            tip: Some(tip.into()),
        }
    }

    /// The three-way distinction between a missing branch, a branch at the
    /// reference commit (silent no-op) and a genuine result.
    pub fn relation_to(&self, reference_commit: &str) -> BranchRelation {
        match (self.exists, self.tip.as_deref()) {
            (false, _) => BranchRelation::Missing,
            (true, Some(tip)) if tip != reference_commit => BranchRelation::Ahead,
            (true, _) => BranchRelation::AtReference,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchRelation {
    Missing,
    AtReference,
    Ahead,
}
