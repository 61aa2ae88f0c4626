//! `fanin plan`: dry run of the merge engine.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, name_list, output, CommandOutput};
use crate::services::MergePreview;

/// Names shown per category in human output.
const LIST_LIMIT: usize = 20;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct PlanOutput(pub MergePreview);

impl CommandOutput for PlanOutput {
    fn to_human(&self) -> String {
        let preview = &self.0;
        let partition = &preview.partition;
        let mut lines = Vec::new();

        if let Some(ref run) = preview.open_run {
            lines.push(format!(
                "{} merge run {} is {} at batch {}/{}; `fanin merge` resumes it.",
                console::style("Note:").yellow().bold(),
                run.id,
                run.state,
                run.next_batch,
                run.plan.batch_count()
            ));
        }

        lines.push(format!("Reference commit: {}", preview.reference_commit));
        let mut table = list_table(&["category", "branches"]);
        for (label, count) in [
            ("has results", partition.has_results.len()),
            ("no results", partition.no_results.len()),
            ("already merged", partition.already_merged.len()),
            ("deferred", partition.deferred.len()),
            ("orphaned", partition.orphaned.len()),
        ] {
            table.add_row(vec![label.to_string(), count.to_string()]);
        }
        lines.push(table.to_string());

        if preview.plan.is_empty() {
            lines.push("Nothing to merge.".to_string());
        } else {
            lines.push(format!(
                "{} batch(es) of at most {}: {:?}",
                preview.plan.batch_count(),
                preview.plan.chunk_size,
                preview.plan.batch_sizes()
            ));
        }

        lines.extend(name_list("Deferred", &partition.deferred, LIST_LIMIT));
        lines.extend(name_list("Orphaned", &partition.orphaned, LIST_LIMIT));
        lines.join("\n")
    }
}

pub async fn execute(ctx: &AppContext, json_mode: bool) -> Result<()> {
    let preview = ctx
        .merge_engine()
        .plan()
        .await
        .context("Failed to compute merge plan")?;
    output(&PlanOutput(preview), json_mode);
    Ok(())
}
