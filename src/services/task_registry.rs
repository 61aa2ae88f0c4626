//! Task registry: enumerates the cohort from a manifest.
//!
//! Two manifest formats are accepted:
//! - a BIDS-style `participants.tsv` with a `participant_id` column and an
//!   optional `session_id` column,
//! - a YAML document `units: [{subject: sub-01, session: ses-A}, ...]`.
//!
//! Units are sorted by `(subject, session)` and numbered from 1, so the
//! array index of a unit is stable for a given manifest.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, UnitId};

#[derive(Debug, Deserialize)]
struct YamlManifest {
    units: Vec<YamlUnit>,
}

#[derive(Debug, Deserialize)]
struct YamlUnit {
    subject: String,
    #[serde(default)]
    session: Option<String>,
}

/// Ordered cohort with stable array indices.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    /// Build a registry from unit ids. Duplicates are rejected.
    pub fn from_units(units: impl IntoIterator<Item = UnitId>) -> DomainResult<Self> {
        let mut seen = BTreeSet::new();
        for unit in units {
            let key = unit.key();
            if !seen.insert(unit) {
                return Err(DomainError::DuplicateUnit(key));
            }
        }

        let tasks = seen
            .into_iter()
            .zip(1u32..)
            .map(|(unit, index)| Task::new(unit, index))
            .collect();

        Ok(Self { tasks })
    }

    /// Load the cohort from a TSV or YAML manifest, chosen by extension.
    pub fn from_manifest(path: &Path) -> DomainResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DomainError::Manifest(format!("Failed to read {}: {e}", path.display()))
        })?;

        let units = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => parse_yaml_manifest(&content)?,
            _ => parse_tsv_manifest(&content)?,
        };
        if units.is_empty() {
            return Err(DomainError::Manifest(format!(
                "{} lists no units",
                path.display()
            )));
        }

        let registry = Self::from_units(units)?;
        tracing::debug!(manifest = %path.display(), units = registry.len(), "Loaded cohort manifest");
        Ok(registry)
    }

    /// Tasks in array-index order.
    pub fn enumerate(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn parse_tsv_manifest(content: &str) -> DomainResult<Vec<UnitId>> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| DomainError::Manifest("Manifest is empty".to_string()))?
        .split('\t')
        .map(str::trim)
        .collect();

    let subject_col = header
        .iter()
        .position(|h| *h == "participant_id")
        .ok_or_else(|| DomainError::Manifest("Missing participant_id column".to_string()))?;
    let session_col = header.iter().position(|h| *h == "session_id");

    lines
        .enumerate()
        .map(|(i, line)| {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            let subject = fields.get(subject_col).copied().unwrap_or_default();
            if subject.is_empty() {
                return Err(DomainError::Manifest(format!(
                    "Row {} has no participant_id",
                    i + 2
                )));
            }
            let session = session_col
                .and_then(|c| fields.get(c).copied())
                .filter(|s| !s.is_empty() && *s != "n/a")
                .map(str::to_string);
            UnitId::new(subject, session)
        })
        .collect()
}

fn parse_yaml_manifest(content: &str) -> DomainResult<Vec<UnitId>> {
    let manifest: YamlManifest = serde_yaml::from_str(content)
        .map_err(|e| DomainError::Manifest(format!("Invalid YAML manifest: {e}")))?;
    manifest
        .units
        .into_iter()
        .map(|u| UnitId::new(u.subject, u.session))
        .collect()
}
