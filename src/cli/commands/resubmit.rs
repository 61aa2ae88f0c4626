//! `fanin resubmit`: retry scheduler failures or operator-picked units.

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::commands::submit::SubmitOutput;
use crate::cli::context::AppContext;
use crate::cli::output::output;
use crate::domain::models::UnitId;

#[derive(Args, Debug)]
pub struct ResubmitArgs {
    /// Resubmit every scheduler failure below the attempt cap
    #[arg(long, conflicts_with = "units")]
    pub auto: bool,

    /// Units to resubmit, e.g. `sub-01` or `sub-01_ses-A`
    #[arg(required_unless_present = "auto")]
    pub units: Vec<String>,
}

pub async fn execute(args: ResubmitArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let service = ctx.submission_service();
    let report = if args.auto {
        service
            .resubmit_failed()
            .await
            .context("Failed to resubmit scheduler failures")?
    } else {
        let units = args
            .units
            .iter()
            .map(|u| UnitId::parse(u))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid unit id")?;
        service
            .resubmit(&units)
            .await
            .context("Failed to resubmit units")?
    };
    output(&SubmitOutput::from(report), json_mode);
    Ok(())
}
