//! SLURM scheduler shim.
//!
//! Submission goes through `sbatch --parsable --array=...`, status through
//! `sacct`. Each array element is addressed as `<array_job_id>_<index>`.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::adapters::command::run_checked;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{JobId, SchedulerConfig, SchedulerState, Task, UnitId};
use crate::domain::ports::SchedulerAdapter;

/// Environment variable carrying the attempt number into the job script.
pub const ATTEMPT_ENV: &str = "FANIN_ATTEMPT";

pub struct SlurmScheduler {
    script_path: String,
    extra_args: Vec<String>,
}

impl SlurmScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            script_path: config.script_path.clone(),
            extra_args: config.extra_args.clone(),
        }
    }
}

#[async_trait]
impl SchedulerAdapter for SlurmScheduler {
    fn name(&self) -> &str {
        "slurm"
    }

    async fn submit(&self, tasks: &[Task], attempt: u32) -> DomainResult<HashMap<UnitId, JobId>> {
        if tasks.is_empty() {
            return Ok(HashMap::new());
        }

        let indices: Vec<u32> = tasks.iter().map(|t| t.array_index).collect();
        let array = format!("--array={}", format_array_spec(&indices));
        let export = format!("--export=ALL,{ATTEMPT_ENV}={attempt}");
        let mut args = vec!["--parsable", array.as_str(), export.as_str()];
        args.extend(self.extra_args.iter().map(String::as_str));
        args.push(&self.script_path);

        let out = run_checked("sbatch", &args, None, DomainError::Scheduler).await?;
        let array_id = parse_sbatch_output(&out.stdout)?;
        tracing::info!(array_id = %array_id, tasks = tasks.len(), "Submitted array job");

        tasks
            .iter()
            .map(|t| {
                JobId::new(format!("{array_id}_{}", t.array_index))
                    .map(|id| (t.unit_id.clone(), id))
            })
            .collect()
    }

    async fn poll(&self, job_ids: &[JobId]) -> DomainResult<HashMap<JobId, SchedulerState>> {
        if job_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let list = job_ids
            .iter()
            .map(JobId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let out = run_checked(
            "sacct",
            &["-n", "-P", "-X", "--format=JobID,State", "-j", &list],
            None,
            DomainError::Scheduler,
        )
        .await?;

        let reported = parse_sacct_output(&out.stdout);
        Ok(job_ids
            .iter()
            .map(|id| {
                let state = reported
                    .get(id.as_str())
                    .copied()
                    .unwrap_or(SchedulerState::Unknown);
                (id.clone(), state)
            })
            .collect())
    }
}

/// Compress sorted array indices into SLURM range syntax, e.g. `1-3,7`.
pub fn format_array_spec(indices: &[u32]) -> String {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        parts.push(if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        });
    }
    parts.join(",")
}

/// `sbatch --parsable` prints `<job_id>` or `<job_id>;<cluster>`.
pub fn parse_sbatch_output(stdout: &str) -> DomainResult<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty());
    let id = line
        .and_then(|l| l.split(';').next())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .ok_or_else(|| {
            DomainError::Scheduler(format!("Unexpected sbatch output: {}", stdout.trim()))
        })?;
    Ok(id.to_string())
}

/// Parse `sacct -n -P --format=JobID,State` output into per-element states.
///
/// Pending array elements may be folded into one line such as
/// `4821_[3-5,9%2]|PENDING`; those are expanded.
pub fn parse_sacct_output(stdout: &str) -> HashMap<String, SchedulerState> {
    let mut states = HashMap::new();
    for line in stdout.lines() {
        let mut fields = line.trim().split('|');
        let (Some(id), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        let state = map_slurm_state(state);
        for element in expand_job_id(id.trim()) {
            states.insert(element, state);
        }
    }
    states
}

fn expand_job_id(id: &str) -> Vec<String> {
    let Some((base, rest)) = id.split_once("_[") else {
        return vec![id.to_string()];
    };
    let body = rest.trim_end_matches(']');
    let body = body.split('%').next().unwrap_or(body);

    let mut ids = Vec::new();
    for part in body.split(',') {
        match part.split_once('-') {
            Some((a, b)) => {
                if let (Ok(a), Ok(b)) = (a.parse::<u32>(), b.parse::<u32>()) {
                    ids.extend((a..=b).map(|i| format!("{base}_{i}")));
                }
            }
            None => {
                if let Ok(i) = part.parse::<u32>() {
                    ids.push(format!("{base}_{i}"));
                }
            }
        }
    }
    ids
}

/// Map a SLURM job state (e.g. `CANCELLED by 1000`) onto a scheduler fact.
pub fn map_slurm_state(raw: &str) -> SchedulerState {
    let state = raw.split_whitespace().next().unwrap_or_default();
    match state.trim_end_matches('+') {
        "PENDING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "RESIZING" | "SUSPENDED" => {
            SchedulerState::Pending
        }
        "RUNNING" | "COMPLETING" | "CONFIGURING" | "STAGE_OUT" | "SIGNALING" => {
            SchedulerState::Running
        }
        "COMPLETED" => SchedulerState::Completed,
        "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "PREEMPTED"
        | "BOOT_FAIL" | "DEADLINE" | "REVOKED" => SchedulerState::Failed,
        _ => SchedulerState::Unknown,
    }
}
