//! Application services: registry, classifier, submission, merge engine.

pub mod merge_engine;
pub mod outcome_classifier;
pub mod reports;
pub mod retry;
pub mod submission_service;
pub mod task_registry;

pub use merge_engine::{MergeEngine, MergePreview};
pub use outcome_classifier::{classify, ClassificationInput, OutcomeClassifier, PollReport, Transition};
pub use reports::{ReportWriter, StateCount, StatusSummary};
pub use retry::RetryPolicy;
pub use submission_service::{SubmissionReport, SubmissionService, SubmittedTask};
pub use task_registry::TaskRegistry;
