//! `fanin poll`: one classification pass over in-flight tasks.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, summary_table, CommandOutput};
use crate::domain::models::TaskState;
use crate::services::{PollReport, StatusSummary, Transition};

#[derive(Debug, Serialize)]
pub struct PollOutput {
    pub polled: usize,
    pub transitions: Vec<Transition>,
    pub skipped: Vec<String>,
    pub summary: StatusSummary,
}

impl From<PollReport> for PollOutput {
    fn from(report: PollReport) -> Self {
        Self {
            polled: report.polled,
            transitions: report.transitions,
            skipped: report.skipped.iter().map(ToString::to_string).collect(),
            summary: report.summary,
        }
    }
}

impl CommandOutput for PollOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Polled {} task(s), {} changed state.",
            self.polled,
            self.transitions.len()
        )];

        if !self.transitions.is_empty() {
            let mut table = list_table(&["unit", "job", "scheduler", "from", "to"]);
            for t in &self.transitions {
                let to = match t.to {
                    TaskState::Succeeded => console::style(t.to.as_str()).green(),
                    TaskState::FailedNoResult | TaskState::FailedScheduler => {
                        console::style(t.to.as_str()).red()
                    }
                    _ => console::style(t.to.as_str()),
                };
                table.add_row(vec![
                    t.unit_id.to_string(),
                    t.job_id.to_string(),
                    t.scheduler_state.to_string(),
                    t.from.to_string(),
                    to.to_string(),
                ]);
            }
            lines.push(table.to_string());
        }

        if !self.skipped.is_empty() {
            lines.push(format!(
                "Skipped {} entr(ies) without a job: {}",
                self.skipped.len(),
                self.skipped.join(", ")
            ));
        }
        lines.push(summary_table(&self.summary));
        lines.join("\n")
    }
}

pub async fn execute(ctx: &AppContext, json_mode: bool) -> Result<()> {
    let report = ctx
        .classifier()
        .poll_pass()
        .await
        .context("Polling pass failed")?;
    output(&PollOutput::from(report), json_mode);
    Ok(())
}
