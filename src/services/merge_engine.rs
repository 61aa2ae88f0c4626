//! Merge engine.
//!
//! Folds the result branches of succeeded tasks into the canonical output
//! history in bounded, deterministic batches and refuses to call a merge
//! finished until every referenced content key is present in the durable
//! store.
//!
//! Run states: `STARTED -> ENUMERATING -> MERGING -> {CONFLICT_ABORT |
//! PUSHED -> VERIFYING -> {COMPLETE | INCOMPLETE}}`. Progress is
//! checkpointed after every batch; any run that has not reached `COMPLETE`
//! is resumed by the next invocation. Batches already merged are kept as
//! they are, the rest of the plan is rebuilt from the branches eligible at
//! resume time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::adapters::lock::PushLock;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    parse_branch_name, BranchPartition, LedgerEntry, MergeOutcome, MergePlan, MergeReport,
    MergeRun, MergeRunState, PushMode, TaskState,
};
use crate::domain::ports::{MergeCheckpointStore, ResultStore, StatusLedger};
use crate::services::reports::ReportWriter;
use crate::services::retry::RetryPolicy;

/// Dry-run view of what a merge would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePreview {
    pub reference_commit: String,
    pub partition: BranchPartition,
    pub plan: MergePlan,
    /// Set when an unfinished run exists; `merge` resumes it instead.
    pub open_run: Option<MergeRun>,
}

pub struct MergeEngine {
    ledger: Arc<dyn StatusLedger>,
    checkpoints: Arc<dyn MergeCheckpointStore>,
    store: Arc<dyn ResultStore>,
    retry: RetryPolicy,
    reports: ReportWriter,
    lock: PushLock,
    branch_prefix: String,
    chunk_size: usize,
}

impl MergeEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn StatusLedger>,
        checkpoints: Arc<dyn MergeCheckpointStore>,
        store: Arc<dyn ResultStore>,
        retry: RetryPolicy,
        reports: ReportWriter,
        lock: PushLock,
        branch_prefix: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            ledger,
            checkpoints,
            store,
            retry,
            reports,
            lock,
            branch_prefix: branch_prefix.into(),
            chunk_size,
        }
    }

    /// Compute the partition and batch plan without merging anything.
    #[instrument(skip(self))]
    pub async fn plan(&self) -> DomainResult<MergePreview> {
        let open_run = self.checkpoints.load_open_run().await?;

        self.retry
            .execute("store refresh", || self.store.prepare())
            .await?;
        let reference_commit = self
            .retry
            .execute("default tip", || self.store.default_tip())
            .await?;

        let partition = self.partition(&reference_commit).await?;
        let plan = MergePlan::new(partition.has_results.clone(), self.chunk_size);

        Ok(MergePreview {
            reference_commit,
            partition,
            plan,
            open_run,
        })
    }

    /// Run or resume a merge.
    ///
    /// Returns the final report on `COMPLETE`. `CONFLICT_ABORT` and
    /// `INCOMPLETE` are returned as [`DomainError::MergeConflict`] and
    /// [`DomainError::ContentIncomplete`] after their checkpoint and reports
    /// are written.
    #[instrument(skip(self))]
    pub async fn run(&self) -> DomainResult<MergeReport> {
        let guard = self.lock.acquire()?;
        let result = self.run_locked().await;
        guard.release()?;
        result
    }

    async fn run_locked(&self) -> DomainResult<MergeReport> {
        let resumed = self.checkpoints.load_open_run().await?;

        self.retry
            .execute("store refresh", || self.store.prepare())
            .await?;

        let mut run = match resumed {
            Some(run) => {
                info!(
                    run_id = %run.id,
                    state = %run.state,
                    next_batch = run.next_batch,
                    batch_count = run.plan.batch_count(),
                    "Resuming merge run"
                );
                run
            }
            None => {
                let reference = self
                    .retry
                    .execute("default tip", || self.store.default_tip())
                    .await?;
                let run = MergeRun::new(reference);
                self.checkpoints.save_run(&run).await?;
                info!(run_id = %run.id, reference_commit = %run.reference_commit, "Started merge run");
                run
            }
        };

        if matches!(run.state, MergeRunState::Started | MergeRunState::Enumerating) {
            run.transition(MergeRunState::Enumerating);
            self.checkpoints.save_run(&run).await?;

            let partition = self.partition(&run.reference_commit).await?;
            self.reports.write_no_results(&partition.no_results)?;
            self.reports.write_orphaned(&partition.orphaned)?;

            run.plan = MergePlan::new(partition.has_results.clone(), self.chunk_size);
            run.next_batch = 1;
            info!(
                has_results = partition.has_results.len(),
                no_results = partition.no_results.len(),
                orphaned = partition.orphaned.len(),
                deferred = partition.deferred.len(),
                already_merged = partition.already_merged.len(),
                batch_sizes = ?run.plan.batch_sizes(),
                "Merge plan computed"
            );
            run.partition = partition;
            run.transition(MergeRunState::Merging);
            self.checkpoints.save_run(&run).await?;
        } else if !run.state.merges_done() {
            self.replan_remaining(&mut run).await?;
        }

        if !run.state.merges_done() {
            self.merge_batches(&mut run).await?;

            self.retry
                .execute("push", || self.store.push(PushMode::WithData))
                .await?;
            run.transition(MergeRunState::Pushed);
            self.checkpoints.save_run(&run).await?;
            info!(run_id = %run.id, "Pushed merged history");
        }

        self.verify(&mut run).await?;

        self.retry
            .execute("retire source", || self.store.retire_source())
            .await?;
        self.retry
            .execute("metadata push", || self.store.push(PushMode::HistoryOnly))
            .await?;

        run.transition(MergeRunState::Complete);
        run.last_error = None;
        self.checkpoints.save_run(&run).await?;

        let report = self.report(&run, Vec::new()).await?;
        self.reports.write_missing_content(&[])?;
        self.reports.write_merge_report(&report)?;
        info!(run_id = %run.id, merged = report.merged_branches, "Merge run complete");
        Ok(report)
    }

    /// Rebuild the unmerged tail of a resumed run.
    ///
    /// Branches deleted since the run was planned, or no longer the latest
    /// succeeded branch of their unit, are dropped; branches that became
    /// eligible meanwhile are added.
    async fn replan_remaining(&self, run: &mut MergeRun) -> DomainResult<()> {
        let merged = run.plan.merged_before(run.next_batch);
        let merged_set: HashSet<&String> = merged.iter().collect();

        let mut partition = self.partition(&run.reference_commit).await?;
        let remaining: Vec<String> = partition
            .has_results
            .iter()
            .filter(|b| !merged_set.contains(b))
            .cloned()
            .collect();

        let planned: Vec<String> = run
            .remaining_batches()
            .iter()
            .flat_map(|b| b.branches.iter().cloned())
            .collect();
        let eligible: HashSet<&String> = remaining.iter().collect();
        for branch in planned.iter().filter(|b| !eligible.contains(b)) {
            warn!(branch = %branch, "Dropping branch no longer eligible to merge");
        }
        let planned_set: HashSet<&String> = planned.iter().collect();
        let added = remaining.iter().filter(|b| !planned_set.contains(b)).count();

        self.reports.write_no_results(&partition.no_results)?;
        self.reports.write_orphaned(&partition.orphaned)?;

        run.plan = run.plan.with_tail(run.next_batch, remaining);
        partition.has_results = run
            .plan
            .batches
            .iter()
            .flat_map(|b| b.branches.iter().cloned())
            .collect();
        partition.has_results.sort();
        run.partition = partition;

        info!(
            run_id = %run.id,
            next_batch = run.next_batch,
            branches = run.plan.branch_count(),
            added,
            batch_sizes = ?run.plan.batch_sizes(),
            "Replanned remaining batches"
        );
        self.checkpoints.save_run(run).await
    }

    async fn merge_batches(&self, run: &mut MergeRun) -> DomainResult<()> {
        if run.state != MergeRunState::Merging {
            run.transition(MergeRunState::Merging);
            self.checkpoints.save_run(run).await?;
        }

        let batch_count = run.plan.batch_count();
        let remaining = run.remaining_batches().to_vec();
        for batch in remaining {
            let message = batch.message(batch_count);
            debug!(batch_index = batch.index, batch_count, branches = batch.branches.len(), "Merging batch");

            match self.store.merge(&batch.branches, &message).await {
                Ok(MergeOutcome::Committed { commit }) => {
                    run.next_batch = batch.index + 1;
                    run.transition(MergeRunState::Merging);
                    self.checkpoints.save_run(run).await?;
                    info!(batch_index = batch.index, batch_count, commit = %commit, "Merged batch");
                }
                Ok(MergeOutcome::Conflict { paths, branches }) => {
                    let err = DomainError::MergeConflict {
                        batch_index: batch.index,
                        batch_count,
                        branches,
                        paths,
                    };
                    warn!(error = %err, "Merge batch aborted");

                    // The remote reflects exactly the batches merged so far.
                    if batch.index > 1 {
                        self.retry
                            .execute("partial push", || self.store.push(PushMode::HistoryOnly))
                            .await?;
                    }
                    run.transition(MergeRunState::ConflictAbort);
                    run.last_error = Some(err.to_string());
                    self.checkpoints.save_run(run).await?;

                    let report = self.report(run, Vec::new()).await?;
                    self.reports.write_merge_report(&report)?;
                    return Err(err);
                }
                Err(e) => {
                    run.last_error = Some(e.to_string());
                    self.checkpoints.save_run(run).await?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Mandatory completeness check; never downgraded to a warning.
    async fn verify(&self, run: &mut MergeRun) -> DomainResult<()> {
        run.transition(MergeRunState::Verifying);
        self.checkpoints.save_run(run).await?;

        self.retry
            .execute("refresh content locations", || {
                self.store.refresh_content_locations()
            })
            .await?;
        let missing: Vec<String> = self
            .retry
            .execute("find missing content", || self.store.find_missing_content())
            .await?
            .into_iter()
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        let err = DomainError::ContentIncomplete {
            missing: missing.clone(),
        };
        run.transition(MergeRunState::Incomplete);
        run.last_error = Some(err.to_string());
        self.checkpoints.save_run(run).await?;

        self.reports.write_missing_content(&missing)?;
        let report = self.report(run, missing).await?;
        self.reports.write_merge_report(&report)?;
        warn!(run_id = %run.id, missing = report.missing_content.len(), "Merge incomplete");
        Err(err)
    }

    /// Split candidate branches by content and by the orphan policy: only
    /// the latest recorded branch of a succeeded unit is merged.
    async fn partition(&self, reference_commit: &str) -> DomainResult<BranchPartition> {
        let branches = self
            .retry
            .execute("list branches", || self.store.list_branches(&self.branch_prefix))
            .await?;
        let entries: HashMap<String, LedgerEntry> = self
            .ledger
            .list()
            .await?
            .into_iter()
            .map(|e| (e.unit_id.key(), e))
            .collect();

        let mut partition = BranchPartition::default();
        for name in branches {
            let Some(parsed) = parse_branch_name(&self.branch_prefix, &name) else {
                debug!(branch = %name, "Ignoring branch outside the naming scheme");
                continue;
            };
            let Some(tip) = self
                .retry
                .execute("branch tip", || self.store.tip(&name))
                .await?
            else {
                continue;
            };
            let entry = entries.get(&parsed.unit.key());

            let base = entry.and_then(|e| e.base_commit.as_deref());
            if tip == reference_commit || Some(tip.as_str()) == base {
                partition.no_results.push(name);
                continue;
            }
            if self
                .retry
                .execute("ancestry", || self.store.is_ancestor(&tip, reference_commit))
                .await?
            {
                partition.already_merged.push(name);
                continue;
            }

            match entry {
                Some(e) if e.branch_name.as_deref() == Some(name.as_str()) => {
                    if e.state == TaskState::Succeeded {
                        partition.has_results.push(name);
                    } else {
                        partition.deferred.push(name);
                    }
                }
                _ => partition.orphaned.push(name),
            }
        }

        for list in [
            &mut partition.has_results,
            &mut partition.no_results,
            &mut partition.orphaned,
            &mut partition.deferred,
            &mut partition.already_merged,
        ] {
            list.sort();
        }
        Ok(partition)
    }

    async fn report(
        &self,
        run: &MergeRun,
        missing_content: Vec<String>,
    ) -> DomainResult<MergeReport> {
        let merged_batches = run.next_batch.saturating_sub(1).min(run.plan.batch_count());
        let merged_branches = run.plan.batches[..merged_batches]
            .iter()
            .map(|b| b.branches.len())
            .sum();
        let final_commit = self.store.default_tip().await.ok();

        Ok(MergeReport {
            run_id: run.id,
            state: run.state,
            reference_commit: run.reference_commit.clone(),
            batch_count: run.plan.batch_count(),
            batch_sizes: run.plan.batch_sizes(),
            merged_branches,
            final_commit,
            partition: run.partition.clone(),
            missing_content,
            finished_at: Utc::now(),
        })
    }
}
