//! `fanin submit`: hand never-submitted tasks to the scheduler.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::services::{SubmissionReport, SubmittedTask};

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Submit at most this many tasks
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SubmitOutput {
    pub base_commit: Option<String>,
    pub submitted: Vec<SubmittedTask>,
    pub exhausted: Vec<String>,
}

impl From<SubmissionReport> for SubmitOutput {
    fn from(report: SubmissionReport) -> Self {
        Self {
            base_commit: report.base_commit,
            submitted: report.submitted,
            exhausted: report.exhausted.iter().map(ToString::to_string).collect(),
        }
    }
}

impl CommandOutput for SubmitOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if self.submitted.is_empty() {
            lines.push("Nothing to submit.".to_string());
        } else {
            let mut table = list_table(&["unit", "job", "attempt", "branch"]);
            for task in &self.submitted {
                table.add_row(vec![
                    task.unit_id.to_string(),
                    task.job_id.to_string(),
                    task.attempt.to_string(),
                    task.branch_name.clone(),
                ]);
            }
            lines.push(format!("Submitted {} task(s):", self.submitted.len()));
            lines.push(table.to_string());
            if let Some(ref base) = self.base_commit {
                lines.push(format!("Reference commit: {base}"));
            }
        }
        if !self.exhausted.is_empty() {
            lines.push(format!(
                "{} unit(s) reached the attempt cap: {}",
                self.exhausted.len(),
                self.exhausted.join(", ")
            ));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: SubmitArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let report = ctx
        .submission_service()
        .submit_pending(args.count)
        .await
        .context("Failed to submit pending tasks")?;
    output(&SubmitOutput::from(report), json_mode);
    Ok(())
}
