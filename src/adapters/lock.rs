//! File-based push lock serializing merge runs against one shared remote.
//!
//! The lock file is created with `create_new`, so only one holder can win.
//! It records who holds it and until when; an expired lock may be taken
//! over by the next run.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Lock file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(holder_id: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            holder_id: holder_id.into(),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(6)),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub struct PushLock {
    path: PathBuf,
    ttl: Duration,
    holder_id: String,
}

impl PushLock {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            holder_id: format!("{}-{}", std::process::id(), Uuid::new_v4()),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Acquire the lock once, taking over an expired one.
    pub fn acquire(&self) -> DomainResult<PushLockGuard> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(&e))?;
            }
        }

        match self.try_create() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = self.read_info()?;
                match existing {
                    Some(info) if !info.is_expired() => Err(DomainError::LockHeld {
                        path: self.path.display().to_string(),
                        holder: info.holder_id,
                        expires_at: info.expires_at,
                    }),
                    previous => {
                        tracing::warn!(
                            path = %self.path.display(),
                            previous_holder = previous.as_ref().map_or("unreadable", |i| i.holder_id.as_str()),
                            "Taking over expired push lock"
                        );
                        std::fs::remove_file(&self.path).map_err(|e| self.io_error(&e))?;
                        self.try_create().map_err(|e| self.io_error(&e))
                    }
                }
            }
            Err(e) => Err(self.io_error(&e)),
        }
    }

    fn try_create(&self) -> std::io::Result<PushLockGuard> {
        let info = LockInfo::new(&self.holder_id, self.ttl);
        let body = serde_json::to_vec_pretty(&info)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        file.write_all(&body)?;
        file.sync_all()?;

        tracing::debug!(path = %self.path.display(), holder = %self.holder_id, "Acquired push lock");
        Ok(PushLockGuard {
            path: self.path.clone(),
            holder_id: self.holder_id.clone(),
            released: false,
        })
    }

    /// Current lock contents. An unparseable file counts as expired.
    pub fn read_info(&self) -> DomainResult<Option<LockInfo>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(&e)),
        }
    }

    fn io_error(&self, e: &std::io::Error) -> DomainError {
        DomainError::Store(format!("Push lock {}: {e}", self.path.display()))
    }
}

/// Held lock; removes the lock file on release or drop.
pub struct PushLockGuard {
    path: PathBuf,
    holder_id: String,
    released: bool,
}

impl PushLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> DomainResult<()> {
        self.released = true;
        remove_if_owned(&self.path, &self.holder_id)
    }
}

impl Drop for PushLockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = remove_if_owned(&self.path, &self.holder_id) {
                tracing::warn!(error = %e, "Failed to release push lock");
            }
        }
    }
}

fn remove_if_owned(path: &Path, holder_id: &str) -> DomainResult<()> {
    let owned = std::fs::read(path)
        .ok()
        .and_then(|b| serde_json::from_slice::<LockInfo>(&b).ok())
        .is_some_and(|info| info.holder_id == holder_id);
    if owned {
        std::fs::remove_file(path)
            .map_err(|e| DomainError::Store(format!("Push lock {}: {e}", path.display())))?;
    }
    Ok(())
}
