//! Task domain model.
//!
//! A task is one cohort member (a subject, or a subject/session pair)
//! processed by an independent scheduler job.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};

const SUBJECT_PREFIX: &str = "sub-";
const SESSION_PREFIX: &str = "ses-";
const SESSION_SEPARATOR: &str = "_ses-";

/// Identity of one unit of cohort work.
///
/// Renders as `sub-01` or `sub-01_ses-A`, which is also the ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub subject: String,
    pub session: Option<String>,
}

impl UnitId {
    pub fn new(subject: impl Into<String>, session: Option<String>) -> DomainResult<Self> {
        let subject = subject.into();
        validate_entity(&subject, SUBJECT_PREFIX)?;
        if let Some(ref session) = session {
            validate_entity(session, SESSION_PREFIX)?;
        }
        Ok(Self { subject, session })
    }

    pub fn subject(subject: impl Into<String>) -> DomainResult<Self> {
        Self::new(subject, None)
    }

    /// Parse the rendered form back into a unit id.
    pub fn parse(s: &str) -> DomainResult<Self> {
        match s.find(SESSION_SEPARATOR) {
            Some(idx) => Self::new(&s[..idx], Some(s[idx + 1..].to_string())),
            None => Self::new(s, None),
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.session {
            Some(ref session) => write!(f, "{}_{}", self.subject, session),
            None => f.write_str(&self.subject),
        }
    }
}

fn validate_entity(value: &str, prefix: &str) -> DomainResult<()> {
    let label = value.strip_prefix(prefix).ok_or_else(|| {
        DomainError::ValidationFailed(format!("'{value}' must start with '{prefix}'"))
    })?;
    if label.is_empty() {
        return Err(DomainError::ValidationFailed(format!(
            "'{value}' has an empty label"
        )));
    }
    // Labels end up inside git ref names and the unit key separator.
    if let Some(ch) = label
        .chars()
        .find(|c| !c.is_ascii_alphanumeric())
    {
        return Err(DomainError::ValidationFailed(format!(
            "'{value}' contains disallowed character '{ch}'"
        )));
    }
    Ok(())
}

/// Authoritative per-task state held in the status ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Registered but never submitted
    #[default]
    NotSubmitted,
    /// Handed to the scheduler, not yet polled
    Submitted,
    /// Queued or executing on the scheduler
    Running,
    /// Scheduler reported success and the branch carries new content
    Succeeded,
    /// Job finished without committing anything new
    FailedNoResult,
    /// Scheduler reported a failure
    FailedScheduler,
    /// Scheduler has no record and no result branch exists
    Unknown,
}

impl TaskState {
    pub const ALL: [TaskState; 7] = [
        Self::NotSubmitted,
        Self::Submitted,
        Self::Running,
        Self::Succeeded,
        Self::FailedNoResult,
        Self::FailedScheduler,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "NOT_SUBMITTED",
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::FailedNoResult => "FAILED_NO_RESULT",
            Self::FailedScheduler => "FAILED_SCHEDULER",
            Self::Unknown => "UNKNOWN",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "NOT_SUBMITTED" => Some(Self::NotSubmitted),
            "SUBMITTED" => Some(Self::Submitted),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED_NO_RESULT" => Some(Self::FailedNoResult),
            "FAILED_SCHEDULER" => Some(Self::FailedScheduler),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Terminal states are never re-polled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FailedNoResult | Self::FailedScheduler
        )
    }

    /// States a polling pass must look at.
    pub fn is_pollable(&self) -> bool {
        matches!(self, Self::Submitted | Self::Running | Self::Unknown)
    }

    /// Whether an operator may hand this task to the scheduler again.
    pub fn is_resubmittable(&self) -> bool {
        matches!(
            self,
            Self::NotSubmitted | Self::FailedNoResult | Self::FailedScheduler | Self::Unknown
        )
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::FailedNoResult => Some(FailureClass::SilentJobFailure),
            Self::FailedScheduler => Some(FailureClass::SchedulerFailure),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failed task is triaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Clean exit without committed output; needs an operator decision.
    SilentJobFailure,
    /// Infrastructure failure; eligible for automatic resubmission.
    SchedulerFailure,
}

/// One unit of cohort work as enumerated by the task registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub unit_id: UnitId,
    /// 1-based position in the enumerated cohort; the scheduler array index.
    pub array_index: u32,
}

impl Task {
    pub fn new(unit_id: UnitId, array_index: u32) -> Self {
        Self {
            unit_id,
            array_index,
        }
    }
}
