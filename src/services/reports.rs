//! Operator-facing reports.
//!
//! Plain enumerations of identifiers, one per line, plus a JSON summary of
//! the last merge run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LedgerEntry, MergeReport, TaskState};

pub const NO_RESULTS_FILE: &str = "no_results.txt";
pub const ORPHANED_FILE: &str = "orphaned.txt";
pub const MISSING_CONTENT_FILE: &str = "missing_content.txt";
pub const MERGE_REPORT_FILE: &str = "merge_report.json";

/// Number of ledger entries in one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCount {
    pub state: TaskState,
    pub count: u64,
}

/// Per-state counts in a fixed order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: u64,
    pub counts: Vec<StateCount>,
}

impl StatusSummary {
    pub fn from_counts(counts: &HashMap<TaskState, u64>) -> Self {
        let counts: Vec<StateCount> = TaskState::ALL
            .iter()
            .map(|state| StateCount {
                state: *state,
                count: counts.get(state).copied().unwrap_or(0),
            })
            .collect();
        Self {
            total: counts.iter().map(|c| c.count).sum(),
            counts,
        }
    }

    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut counts = HashMap::new();
        for entry in entries {
            *counts.entry(entry.state).or_insert(0) += 1;
        }
        Self::from_counts(&counts)
    }

    pub fn count(&self, state: TaskState) -> u64 {
        self.counts
            .iter()
            .find(|c| c.state == state)
            .map_or(0, |c| c.count)
    }
}

/// Writes report files under one directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Branches whose tip equals the reference commit.
    pub fn write_no_results(&self, branches: &[String]) -> DomainResult<PathBuf> {
        self.write_lines(NO_RESULTS_FILE, branches)
    }

    pub fn write_orphaned(&self, branches: &[String]) -> DomainResult<PathBuf> {
        self.write_lines(ORPHANED_FILE, branches)
    }

    /// Content keys absent from the durable store.
    pub fn write_missing_content(&self, keys: &[String]) -> DomainResult<PathBuf> {
        self.write_lines(MISSING_CONTENT_FILE, keys)
    }

    pub fn write_merge_report(&self, report: &MergeReport) -> DomainResult<PathBuf> {
        let body = serde_json::to_string_pretty(report)?;
        self.write_file(MERGE_REPORT_FILE, &body)
    }

    fn write_lines(&self, name: &str, items: &[String]) -> DomainResult<PathBuf> {
        let mut body = items.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        self.write_file(name, &body)
    }

    /// Write through a temporary file so a reader never sees a partial report.
    fn write_file(&self, name: &str, body: &str) -> DomainResult<PathBuf> {
        let io = |e: std::io::Error| DomainError::Store(format!("Failed to write report {name}: {e}"));
        std::fs::create_dir_all(&self.dir).map_err(io)?;

        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        std::fs::write(&tmp, body).map_err(io)?;
        std::fs::rename(&tmp, &path).map_err(io)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_orders_all_states() {
        let mut counts = HashMap::new();
        counts.insert(TaskState::Succeeded, 8);
        counts.insert(TaskState::FailedNoResult, 2);
        let summary = StatusSummary::from_counts(&counts);

        assert_eq!(summary.total, 10);
        assert_eq!(summary.counts.len(), TaskState::ALL.len());
        assert_eq!(summary.count(TaskState::Succeeded), 8);
        assert_eq!(summary.count(TaskState::Running), 0);
    }

    #[test]
    fn test_reports_are_one_identifier_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("reports"));

        let path = writer
            .write_no_results(&["job-1_1-a1-sub-01".into(), "job-1_2-a1-sub-02".into()])
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "job-1_1-a1-sub-01\njob-1_2-a1-sub-02\n"
        );

        let path = writer.write_missing_content(&[]).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "");
    }
}
