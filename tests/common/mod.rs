//! Common test utilities for integration tests
//!
//! In-memory scheduler and result store fakes plus a harness that wires
//! them to a migrated in-memory ledger.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fanin::adapters::lock::PushLock;
use fanin::adapters::sqlite::{
    create_migrated_test_pool, SqliteMergeRunRepository, SqliteStatusLedger,
};
use fanin::domain::errors::{DomainError, DomainResult};
use fanin::domain::models::{
    JobId, MergeOutcome, PushMode, SchedulerState, Task, TaskState, UnitId,
};
use fanin::domain::ports::{ResultStore, SchedulerAdapter, StatusLedger};
use fanin::services::{
    MergeEngine, OutcomeClassifier, ReportWriter, RetryPolicy, SubmissionService, TaskRegistry,
};

pub const PREFIX: &str = "job";

/// Retry policy fast enough for tests.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(1),
        Duration::from_millis(5),
        Duration::from_secs(2),
    )
}

/// `sub-01` .. `sub-NN`.
pub fn units(n: usize) -> Vec<UnitId> {
    (1..=n)
        .map(|i| UnitId::subject(format!("sub-{i:02}")).unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SchedulerInner {
    next_array: u32,
    states: HashMap<JobId, SchedulerState>,
    submissions: Vec<(Vec<UnitId>, u32)>,
    transient_poll_failures: u32,
}

/// Scheduler fake. Submitted jobs start PENDING; tests move them along.
pub struct FakeScheduler {
    inner: Mutex<SchedulerInner>,
}

impl Default for FakeScheduler {
    fn default() -> Self {
        Self {
            inner: Mutex::new(SchedulerInner {
                next_array: 1000,
                ..SchedulerInner::default()
            }),
        }
    }
}

impl FakeScheduler {
    pub fn set_state(&self, job: &JobId, state: SchedulerState) {
        self.inner.lock().unwrap().states.insert(job.clone(), state);
    }

    /// Drop a job from accounting so it polls as UNKNOWN.
    pub fn forget(&self, job: &JobId) {
        self.inner.lock().unwrap().states.remove(job);
    }

    pub fn submissions(&self) -> Vec<(Vec<UnitId>, u32)> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn fail_polls_transiently(&self, times: u32) {
        self.inner.lock().unwrap().transient_poll_failures = times;
    }
}

#[async_trait]
impl SchedulerAdapter for FakeScheduler {
    fn name(&self) -> &str {
        "fake"
    }

    async fn submit(&self, tasks: &[Task], attempt: u32) -> DomainResult<HashMap<UnitId, JobId>> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_array += 1;
        let array = inner.next_array;

        let mut jobs = HashMap::new();
        for task in tasks {
            let id = JobId::new(format!("{array}_{}", task.array_index))?;
            inner.states.insert(id.clone(), SchedulerState::Pending);
            jobs.insert(task.unit_id.clone(), id);
        }
        inner
            .submissions
            .push((tasks.iter().map(|t| t.unit_id.clone()).collect(), attempt));
        Ok(jobs)
    }

    async fn poll(&self, job_ids: &[JobId]) -> DomainResult<HashMap<JobId, SchedulerState>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.transient_poll_failures > 0 {
            inner.transient_poll_failures -= 1;
            return Err(DomainError::TransientInfra("sacct timed out".into()));
        }
        Ok(job_ids
            .iter()
            .map(|id| {
                let state = inner
                    .states
                    .get(id)
                    .copied()
                    .unwrap_or(SchedulerState::Unknown);
                (id.clone(), state)
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Result store
// ---------------------------------------------------------------------------

struct StoreInner {
    commit_seq: u32,
    /// Commits of the default branch, oldest first.
    history: Vec<String>,
    /// Commit -> index of the first default-branch commit containing it.
    reachable: HashMap<String, usize>,
    branches: BTreeMap<String, String>,
    missing: BTreeSet<String>,
    conflicting: HashSet<String>,
    merged_batches: Vec<Vec<String>>,
    pushes: Vec<PushMode>,
    retired: usize,
    refreshed: usize,
}

impl StoreInner {
    fn next_commit(&mut self, tag: &str) -> String {
        self.commit_seq += 1;
        format!("{:07x}-{tag}", self.commit_seq)
    }

    fn advance_default(&mut self, commit: String) {
        let index = self.history.len();
        self.reachable.insert(commit.clone(), index);
        self.history.push(commit);
    }

    fn tip(&self) -> String {
        self.history.last().cloned().unwrap_or_default()
    }
}

/// Result store fake modelling a linear default branch and job branches
/// forked from it.
pub struct FakeResultStore {
    inner: Mutex<StoreInner>,
}

impl Default for FakeResultStore {
    fn default() -> Self {
        let mut inner = StoreInner {
            commit_seq: 0,
            history: Vec::new(),
            reachable: HashMap::new(),
            branches: BTreeMap::new(),
            missing: BTreeSet::new(),
            conflicting: HashSet::new(),
            merged_batches: Vec::new(),
            pushes: Vec::new(),
            retired: 0,
            refreshed: 0,
        };
        let root = inner.next_commit("root");
        inner.advance_default(root);
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl FakeResultStore {
    /// A job branch carrying one new commit.
    pub fn push_result(&self, branch: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        let commit = inner.next_commit("result");
        inner.branches.insert(branch.to_string(), commit.clone());
        commit
    }

    /// A job branch pushed without new commits, at `tip`.
    pub fn push_empty(&self, branch: &str, tip: &str) {
        self.inner
            .lock()
            .unwrap()
            .branches
            .insert(branch.to_string(), tip.to_string());
    }

    /// Move the default branch on without touching job branches.
    pub fn advance(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        let commit = inner.next_commit("other");
        inner.advance_default(commit.clone());
        commit
    }

    pub fn current_tip(&self) -> String {
        self.inner.lock().unwrap().tip()
    }

    pub fn mark_missing(&self, key: &str) {
        self.inner.lock().unwrap().missing.insert(key.to_string());
    }

    pub fn clear_missing(&self) {
        self.inner.lock().unwrap().missing.clear();
    }

    pub fn make_conflicting(&self, branch: &str) {
        self.inner
            .lock()
            .unwrap()
            .conflicting
            .insert(branch.to_string());
    }

    pub fn resolve_conflicts(&self) {
        self.inner.lock().unwrap().conflicting.clear();
    }

    /// Remove a job branch from the remote.
    pub fn delete_branch(&self, branch: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.branches.remove(branch);
        inner.conflicting.remove(branch);
    }

    pub fn merged_batches(&self) -> Vec<Vec<String>> {
        self.inner.lock().unwrap().merged_batches.clone()
    }

    pub fn pushes(&self) -> Vec<PushMode> {
        self.inner.lock().unwrap().pushes.clone()
    }

    pub fn retired(&self) -> usize {
        self.inner.lock().unwrap().retired
    }

    pub fn refreshed(&self) -> usize {
        self.inner.lock().unwrap().refreshed
    }
}

#[async_trait]
impl ResultStore for FakeResultStore {
    async fn prepare(&self) -> DomainResult<()> {
        Ok(())
    }

    async fn default_tip(&self) -> DomainResult<String> {
        Ok(self.inner.lock().unwrap().tip())
    }

    async fn list_branches(&self, prefix: &str) -> DomainResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .branches
            .keys()
            .filter(|b| b.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn branch_exists(&self, name: &str) -> DomainResult<bool> {
        Ok(self.inner.lock().unwrap().branches.contains_key(name))
    }

    async fn tip(&self, name: &str) -> DomainResult<Option<String>> {
        Ok(self.inner.lock().unwrap().branches.get(name).cloned())
    }

    async fn is_ancestor(&self, commit: &str, descendant: &str) -> DomainResult<bool> {
        let inner = self.inner.lock().unwrap();
        let Some(&at) = inner.reachable.get(commit) else {
            return Ok(false);
        };
        Ok(inner
            .history
            .iter()
            .position(|c| c == descendant)
            .is_some_and(|d| at <= d))
    }

    async fn merge(&self, branches: &[String], _message: &str) -> DomainResult<MergeOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let conflicting: Vec<String> = branches
            .iter()
            .filter(|b| inner.conflicting.contains(*b))
            .cloned()
            .collect();
        if !conflicting.is_empty() {
            return Ok(MergeOutcome::Conflict {
                paths: conflicting.iter().map(|b| format!("{b}/shared.tsv")).collect(),
                branches: conflicting,
            });
        }

        let commit = inner.next_commit("merge");
        inner.advance_default(commit.clone());
        let index = inner.history.len() - 1;
        for branch in branches {
            let tip = inner
                .branches
                .get(branch)
                .cloned()
                .ok_or_else(|| DomainError::Store(format!("no such branch {branch}")))?;
            inner.reachable.entry(tip).or_insert(index);
        }
        inner.merged_batches.push(branches.to_vec());
        Ok(MergeOutcome::Committed { commit })
    }

    async fn push(&self, mode: PushMode) -> DomainResult<()> {
        self.inner.lock().unwrap().pushes.push(mode);
        Ok(())
    }

    async fn refresh_content_locations(&self) -> DomainResult<()> {
        self.inner.lock().unwrap().refreshed += 1;
        Ok(())
    }

    async fn find_missing_content(&self) -> DomainResult<BTreeSet<String>> {
        Ok(self.inner.lock().unwrap().missing.clone())
    }

    async fn retire_source(&self) -> DomainResult<()> {
        self.inner.lock().unwrap().retired += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub ledger: Arc<SqliteStatusLedger>,
    pub checkpoints: Arc<SqliteMergeRunRepository>,
    pub scheduler: Arc<FakeScheduler>,
    pub store: Arc<FakeResultStore>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = create_migrated_test_pool()
            .await
            .expect("failed to create test pool");
        Self {
            ledger: Arc::new(SqliteStatusLedger::new(pool.clone())),
            checkpoints: Arc::new(SqliteMergeRunRepository::new(pool)),
            scheduler: Arc::new(FakeScheduler::default()),
            store: Arc::new(FakeResultStore::default()),
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    /// Harness with `n` registered units.
    pub async fn with_cohort(n: usize) -> Self {
        let harness = Self::new().await;
        let registry = TaskRegistry::from_units(units(n)).unwrap();
        harness.submission().register(&registry).await.unwrap();
        harness
    }

    pub fn submission(&self) -> SubmissionService {
        SubmissionService::new(
            self.ledger.clone(),
            self.scheduler.clone(),
            self.store.clone(),
            fast_retry(),
            PREFIX,
            3,
        )
    }

    pub fn classifier(&self) -> OutcomeClassifier {
        OutcomeClassifier::new(
            self.ledger.clone(),
            self.scheduler.clone(),
            self.store.clone(),
            fast_retry(),
            PREFIX,
        )
    }

    pub fn reports_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("reports")
    }

    pub fn lock(&self) -> PushLock {
        PushLock::new(self.dir.path().join("merge.lock"), Duration::from_secs(60))
    }

    pub fn merge_engine(&self, chunk_size: usize) -> MergeEngine {
        MergeEngine::new(
            self.ledger.clone(),
            self.checkpoints.clone(),
            self.store.clone(),
            fast_retry(),
            ReportWriter::new(self.reports_dir()),
            self.lock(),
            PREFIX,
            chunk_size,
        )
    }

    /// Submit everything, then finish each job: units in `empty` exit
    /// cleanly without pushing a result, all others push one.
    pub async fn run_cohort(&self, empty: &[usize]) {
        let report = self.submission().submit_pending(None).await.unwrap();
        let base = report.base_commit.clone().unwrap();
        for (i, task) in report.submitted.iter().enumerate() {
            if empty.contains(&(i + 1)) {
                self.store.push_empty(&task.branch_name, &base);
            } else {
                self.store.push_result(&task.branch_name);
            }
            self.scheduler
                .set_state(&task.job_id, SchedulerState::Completed);
        }
    }

    pub async fn state_of(&self, unit: &UnitId) -> TaskState {
        self.ledger.get(unit).await.unwrap().unwrap().state
    }

    pub fn read_report(&self, name: &str) -> String {
        std::fs::read_to_string(self.reports_dir().join(name)).unwrap_or_default()
    }
}
