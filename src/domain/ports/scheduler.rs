//! Scheduler adapter port.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{JobId, SchedulerState, Task, UnitId};

/// Contract of an HPC scheduler shim.
///
/// Implementations translate scheduler wire output into structured facts.
/// A job the scheduler has no record of must be reported as
/// [`SchedulerState::Unknown`], never omitted and never as completed.
#[async_trait]
pub trait SchedulerAdapter: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Submit one array job covering `tasks`, all at the same `attempt`;
    /// returns the job id of each unit.
    ///
    /// The attempt is handed to the job so it can name its result branch.
    async fn submit(&self, tasks: &[Task], attempt: u32) -> DomainResult<HashMap<UnitId, JobId>>;

    /// Query the current state of each job.
    async fn poll(&self, job_ids: &[JobId]) -> DomainResult<HashMap<JobId, SchedulerState>>;
}
