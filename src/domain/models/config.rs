use serde::{Deserialize, Serialize};

use crate::domain::models::branch::DEFAULT_BRANCH_PREFIX;
use crate::domain::models::merge::DEFAULT_CHUNK_SIZE;

/// Main configuration structure for fanin
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Status ledger database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry policy for scheduler and store queries
    #[serde(default)]
    pub retry: RetryConfig,

    /// Cohort definition
    #[serde(default)]
    pub cohort: CohortConfig,

    /// Scheduler adapter configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Result store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Merge engine configuration
    #[serde(default)]
    pub merge: MergeConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` ledger file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".fanin/ledger.db".to_string()
}

const fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation policy for file logs: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Give up on a transient failure after this many milliseconds
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_max_elapsed_ms() -> u64 {
    300_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

/// Cohort configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CohortConfig {
    /// Participants TSV or YAML unit list
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Prefix of every result branch name
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_manifest_path() -> String {
    "participants.tsv".to_string()
}

fn default_branch_prefix() -> String {
    DEFAULT_BRANCH_PREFIX.to_string()
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            manifest_path: default_manifest_path(),
            branch_prefix: default_branch_prefix(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Scheduler kind; only "slurm" ships with fanin
    #[serde(default = "default_scheduler_kind")]
    pub kind: String,

    /// Pre-generated array job script
    #[serde(default = "default_script_path")]
    pub script_path: String,

    /// Attempt cap for automatic resubmission of scheduler failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Extra arguments passed to the submission command
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_scheduler_kind() -> String {
    "slurm".to_string()
}

fn default_script_path() -> String {
    "analysis/code/participant_job.sh".to_string()
}

const fn default_max_attempts() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: default_scheduler_kind(),
            script_path: default_script_path(),
            max_attempts: default_max_attempts(),
            extra_args: vec![],
        }
    }
}

/// Result store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// URL of the shared output repository jobs push to
    #[serde(default)]
    pub remote_url: String,

    /// Name of that remote in the working clone
    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    /// Special remote holding the annexed content
    #[serde(default = "default_content_remote")]
    pub content_remote: String,

    /// Canonical output history
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Location of the working clone used for polling and merging
    #[serde(default = "default_workdir")]
    pub workdir: String,
}

fn default_remote_name() -> String {
    "origin".to_string()
}

fn default_content_remote() -> String {
    "output-storage".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_workdir() -> String {
    ".fanin/merge_ds".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            remote_name: default_remote_name(),
            content_remote: default_content_remote(),
            default_branch: default_branch(),
            workdir: default_workdir(),
        }
    }
}

/// Merge engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MergeConfig {
    /// Maximum number of branches per merge commit
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Lock file serializing merge runs against the shared remote
    #[serde(default = "default_lock_path")]
    pub lock_path: String,

    /// Seconds after which an abandoned lock may be taken over
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Directory for operator-facing reports
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_lock_path() -> String {
    ".fanin/merge.lock".to_string()
}

const fn default_lock_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_reports_dir() -> String {
    ".fanin/reports".to_string()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            lock_path: default_lock_path(),
            lock_ttl_secs: default_lock_ttl_secs(),
            reports_dir: default_reports_dir(),
        }
    }
}
