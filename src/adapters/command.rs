//! External process execution shared by the git and scheduler adapters.

use std::path::Path;

use tokio::process::Command;

use crate::domain::errors::{DomainError, DomainResult};

/// Captured result of one external command.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Run `program` with `args` and capture its output regardless of exit status.
pub async fn run_raw(program: &str, args: &[&str], cwd: Option<&Path>) -> DomainResult<ProcessOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|e| {
        DomainError::Store(format!("Failed to run {program}: {e}"))
    })?;

    Ok(ProcessOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command that must succeed; a failure is turned into an error by
/// [`classify_failure`] with `fallback` building the non-retryable case.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    fallback: fn(String) -> DomainError,
) -> DomainResult<ProcessOutput> {
    let output = run_raw(program, args, cwd).await?;
    if output.success {
        return Ok(output);
    }
    Err(classify_failure(program, args, &output.stderr, fallback))
}

const TRANSIENT_MARKERS: &[&str] = &[
    "could not resolve host",
    "timed out",
    "connection refused",
    "connection reset",
    "unable to access",
    "early eof",
    "temporary failure",
    "unable to contact slurm controller",
    "resource temporarily unavailable",
];

const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "403",
    "access denied",
    "invalid account",
];

/// Map a failed command's stderr onto the error taxonomy.
pub fn classify_failure(
    program: &str,
    args: &[&str],
    stderr: &str,
    fallback: fn(String) -> DomainError,
) -> DomainError {
    let detail = format!(
        "{} {} failed: {}",
        program,
        args.first().copied().unwrap_or_default(),
        stderr.trim()
    );
    let lower = stderr.to_lowercase();

    // Permission markers win: "unable to access ... 403" must not be retried.
    if PERMISSION_MARKERS.iter().any(|m| lower.contains(m)) {
        DomainError::PermissionDenied(detail)
    } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        DomainError::TransientInfra(detail)
    } else {
        fallback(detail)
    }
}
