//! Wiring of adapters and services for one CLI invocation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::adapters::git::GitAnnexStore;
use crate::adapters::lock::PushLock;
use crate::adapters::scheduler;
use crate::adapters::sqlite::{initialize_database, SqliteMergeRunRepository, SqliteStatusLedger};
use crate::domain::models::Config;
use crate::domain::ports::{MergeCheckpointStore, ResultStore, SchedulerAdapter, StatusLedger};
use crate::services::{
    MergeEngine, OutcomeClassifier, ReportWriter, RetryPolicy, SubmissionService, TaskRegistry,
};

pub struct AppContext {
    pub config: Config,
    pub ledger: Arc<dyn StatusLedger>,
    pub checkpoints: Arc<dyn MergeCheckpointStore>,
    pub store: Arc<dyn ResultStore>,
    pub scheduler: Arc<dyn SchedulerAdapter>,
    pub retry: RetryPolicy,
}

impl AppContext {
    /// Open the ledger database and build every adapter named by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = initialize_database(&config.database.url(), config.database.max_connections)
            .await
            .with_context(|| format!("Failed to open ledger at {}", config.database.path))?;

        let scheduler = scheduler::from_config(&config.scheduler)
            .context("Failed to configure scheduler")?;

        Ok(Self {
            ledger: Arc::new(SqliteStatusLedger::new(pool.clone())),
            checkpoints: Arc::new(SqliteMergeRunRepository::new(pool)),
            store: Arc::new(GitAnnexStore::new(&config.store)),
            scheduler,
            retry: RetryPolicy::from_config(&config.retry),
            config,
        })
    }

    pub fn registry(&self) -> Result<TaskRegistry> {
        let path = Path::new(&self.config.cohort.manifest_path);
        TaskRegistry::from_manifest(path)
            .with_context(|| format!("Failed to read cohort manifest {}", path.display()))
    }

    pub fn submission_service(&self) -> SubmissionService {
        SubmissionService::new(
            self.ledger.clone(),
            self.scheduler.clone(),
            self.store.clone(),
            self.retry.clone(),
            self.config.cohort.branch_prefix.clone(),
            self.config.scheduler.max_attempts,
        )
    }

    pub fn classifier(&self) -> OutcomeClassifier {
        OutcomeClassifier::new(
            self.ledger.clone(),
            self.scheduler.clone(),
            self.store.clone(),
            self.retry.clone(),
            self.config.cohort.branch_prefix.clone(),
        )
    }

    pub fn merge_engine(&self) -> MergeEngine {
        let merge = &self.config.merge;
        MergeEngine::new(
            self.ledger.clone(),
            self.checkpoints.clone(),
            self.store.clone(),
            self.retry.clone(),
            ReportWriter::new(&merge.reports_dir),
            PushLock::new(&merge.lock_path, Duration::from_secs(merge.lock_ttl_secs)),
            self.config.cohort.branch_prefix.clone(),
            merge.chunk_size,
        )
    }
}
