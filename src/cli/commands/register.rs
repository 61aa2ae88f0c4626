//! `fanin register`: seed the ledger from the cohort manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::services::TaskRegistry;

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Manifest to read instead of `cohort.manifest_path`
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct RegisterOutput {
    pub manifest: String,
    pub units: usize,
    pub inserted: usize,
}

impl CommandOutput for RegisterOutput {
    fn to_human(&self) -> String {
        format!(
            "Registered {} new unit(s) from {} ({} in cohort, {} already known).",
            self.inserted,
            self.manifest,
            self.units,
            self.units - self.inserted
        )
    }
}

pub async fn execute(args: RegisterArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let (manifest, registry) = match args.manifest {
        Some(path) => {
            let registry = TaskRegistry::from_manifest(&path)
                .with_context(|| format!("Failed to read cohort manifest {}", path.display()))?;
            (path.display().to_string(), registry)
        }
        None => (ctx.config.cohort.manifest_path.clone(), ctx.registry()?),
    };

    let inserted = ctx
        .submission_service()
        .register(&registry)
        .await
        .context("Failed to register cohort")?;

    output(
        &RegisterOutput {
            manifest,
            units: registry.len(),
            inserted,
        },
        json_mode,
    );
    Ok(())
}
