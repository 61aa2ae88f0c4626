//! Scheduler adapters.

pub mod slurm;

use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::SchedulerConfig;
use crate::domain::ports::SchedulerAdapter;

pub use slurm::SlurmScheduler;

/// Build the adapter named by `scheduler.kind`.
pub fn from_config(config: &SchedulerConfig) -> DomainResult<Arc<dyn SchedulerAdapter>> {
    match config.kind.to_lowercase().as_str() {
        "slurm" => Ok(Arc::new(SlurmScheduler::new(config))),
        other => Err(DomainError::ValidationFailed(format!(
            "Unsupported scheduler kind: {other}"
        ))),
    }
}
