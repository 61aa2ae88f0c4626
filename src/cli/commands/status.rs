//! `fanin status`: ledger counts and entries.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, summary_table, truncate, CommandOutput};
use crate::domain::models::{LedgerEntry, TaskState};
use crate::services::StatusSummary;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// List entries in this state, e.g. FAILED_NO_RESULT
    #[arg(short, long)]
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub summary: StatusSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<LedgerEntry>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![summary_table(&self.summary)];
        let Some(state) = self.state else {
            return lines.join("\n");
        };

        if self.entries.is_empty() {
            lines.push(format!("\nNo tasks in {state}."));
            return lines.join("\n");
        }

        let mut table = list_table(&["unit", "index", "attempt", "job", "branch", "updated"]);
        for e in &self.entries {
            table.add_row(vec![
                e.unit_id.to_string(),
                e.array_index.to_string(),
                e.attempt.to_string(),
                e.job.as_ref().map(|j| j.id.to_string()).unwrap_or_default(),
                truncate(e.branch_name.as_deref().unwrap_or("-"), 48),
                e.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            ]);
        }
        lines.push(format!("\n{} task(s) in {state}:", self.entries.len()));
        lines.push(table.to_string());
        lines.join("\n")
    }
}

pub async fn execute(args: StatusArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let state = args
        .state
        .as_deref()
        .map(|s| TaskState::from_str(s).ok_or_else(|| anyhow!("Unknown task state: {s}")))
        .transpose()?;

    let counts = ctx.ledger.counts().await.context("Failed to count ledger entries")?;
    let entries = match state {
        Some(state) => ctx
            .ledger
            .select(state)
            .await
            .context("Failed to list ledger entries")?,
        None => Vec::new(),
    };

    output(
        &StatusOutput {
            summary: StatusSummary::from_counts(&counts),
            state,
            entries,
        },
        json_mode,
    );
    Ok(())
}
