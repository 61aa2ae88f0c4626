//! `fanin merge`: run or resume the batched merge.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{name_list, output, CommandOutput};
use crate::domain::models::MergeReport;

const LIST_LIMIT: usize = 20;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct MergeOutput(pub MergeReport);

impl CommandOutput for MergeOutput {
    fn to_human(&self) -> String {
        let report = &self.0;
        let mut lines = vec![format!(
            "Merge run {} {}: {} branch(es) in {} batch(es).",
            report.run_id,
            console::style(report.state).green().bold(),
            report.merged_branches,
            report.batch_count
        )];
        lines.push(format!("Reference commit: {}", report.reference_commit));
        if let Some(ref commit) = report.final_commit {
            lines.push(format!("Final commit: {commit}"));
        }
        lines.extend(name_list(
            "No results",
            &report.partition.no_results,
            LIST_LIMIT,
        ));
        lines.extend(name_list("Orphaned", &report.partition.orphaned, LIST_LIMIT));
        lines.extend(name_list("Deferred", &report.partition.deferred, LIST_LIMIT));
        lines.join("\n")
    }
}

/// Conflicts and incomplete content surface as errors after their reports
/// are written; the exit code tells them apart.
pub async fn execute(ctx: &AppContext, json_mode: bool) -> Result<()> {
    let report = ctx
        .merge_engine()
        .run()
        .await
        .with_context(|| {
            format!(
                "Merge did not complete; reports are in {}",
                ctx.config.merge.reports_dir
            )
        })?;
    output(&MergeOutput(report), json_mode);
    Ok(())
}
