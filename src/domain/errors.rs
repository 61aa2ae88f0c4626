//! Domain errors for the fanin tracker and merge engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Join identifiers for display, one per comma.
fn format_list(items: &[String]) -> String {
    items.join(", ")
}

/// Domain-level errors that can occur while tracking jobs or merging results.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Scheduler or network hiccup. The only kind that is retried.
    #[error("Transient infrastructure failure: {0}")]
    TransientInfra(String),

    /// Authentication or permission failure. Never retried.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error(
        "Merge conflict in batch {batch_index}/{batch_count}: paths [{}] from branches [{}]",
        format_list(.paths),
        format_list(.branches)
    )]
    MergeConflict {
        batch_index: usize,
        batch_count: usize,
        branches: Vec<String>,
        paths: Vec<String>,
    },

    #[error("Merge incomplete: {} content key(s) missing from the durable store: {}", .missing.len(), format_list(.missing))]
    ContentIncomplete { missing: Vec<String> },

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Duplicate unit in cohort: {0}")]
    DuplicateUnit(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Result store error: {0}")]
    Store(String),

    #[error("Push lock {path} is held by {holder} until {expires_at}")]
    LockHeld {
        path: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether the operation that produced this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientInfra(_))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
