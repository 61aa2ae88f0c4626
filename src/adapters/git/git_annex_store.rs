//! ResultStore implementation over a git-annex working clone.
//!
//! Jobs push their result branches to a shared output repository and their
//! annexed content to a separate content remote. This adapter keeps a
//! working clone of the output repository, reads result branches as
//! remote-tracking refs and performs the batched octopus merges on the
//! local default branch.
//!
//! Annex steps are skipped for repositories without a `git-annex` branch:
//! such a history references no annexed keys.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;

use crate::adapters::command::{classify_failure, run_checked, run_raw, ProcessOutput};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{validate_branch_name, MergeOutcome, PushMode, StoreConfig};
use crate::domain::ports::ResultStore;

pub struct GitAnnexStore {
    workdir: PathBuf,
    remote_url: String,
    remote_name: String,
    content_remote: String,
    default_branch: String,
}

impl GitAnnexStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            workdir: PathBuf::from(&config.workdir),
            remote_url: config.remote_url.clone(),
            remote_name: config.remote_name.clone(),
            content_remote: config.content_remote.clone(),
            default_branch: config.default_branch.clone(),
        }
    }

    async fn git(&self, args: &[&str]) -> DomainResult<ProcessOutput> {
        run_checked("git", args, Some(&self.workdir), DomainError::Store).await
    }

    async fn git_raw(&self, args: &[&str]) -> DomainResult<ProcessOutput> {
        run_raw("git", args, Some(&self.workdir)).await
    }

    fn remote_ref(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{}", self.remote_name, branch)
    }

    async fn rev_parse(&self, rev: &str) -> DomainResult<Option<String>> {
        let spec = format!("{rev}^{{commit}}");
        let out = self
            .git_raw(&["rev-parse", "--verify", "--quiet", &spec])
            .await?;
        Ok(out
            .success
            .then(|| out.stdout.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    async fn has_annex(&self) -> DomainResult<bool> {
        if self.rev_parse("refs/heads/git-annex").await?.is_some() {
            return Ok(true);
        }
        Ok(self
            .rev_parse(&self.remote_ref("git-annex"))
            .await?
            .is_some())
    }

    async fn annex(&self, args: &[&str]) -> DomainResult<ProcessOutput> {
        let mut full = vec!["annex"];
        full.extend_from_slice(args);
        self.git(&full).await
    }

    /// Paths git reports as unmerged, or failing that the paths touched by
    /// more than one branch of the batch.
    async fn conflict_details(
        &self,
        refs: &[String],
        branches: &[String],
    ) -> DomainResult<(Vec<String>, Vec<String>)> {
        let unmerged = self
            .git_raw(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let mut paths: BTreeSet<String> = unmerged.stdout_lines().map(str::to_string).collect();

        let mut touched: HashMap<&str, BTreeSet<String>> = HashMap::new();
        for (reference, branch) in refs.iter().zip(branches) {
            let range = format!("HEAD...{reference}");
            let diff = self.git_raw(&["diff", "--name-only", &range]).await?;
            touched.insert(
                branch.as_str(),
                diff.stdout_lines().map(str::to_string).collect(),
            );
        }

        if paths.is_empty() {
            let mut seen: HashMap<&str, usize> = HashMap::new();
            for files in touched.values() {
                for file in files {
                    *seen.entry(file.as_str()).or_default() += 1;
                }
            }
            paths = seen
                .into_iter()
                .filter(|(_, n)| *n > 1)
                .map(|(p, _)| p.to_string())
                .collect();
        }

        let culprits = branches
            .iter()
            .filter(|b| {
                touched
                    .get(b.as_str())
                    .is_some_and(|files| files.iter().any(|f| paths.contains(f)))
            })
            .cloned()
            .collect();

        Ok((paths.into_iter().collect(), culprits))
    }
}

#[async_trait]
impl ResultStore for GitAnnexStore {
    async fn prepare(&self) -> DomainResult<()> {
        validate_branch_name(&self.default_branch)?;

        if !self.workdir.join(".git").exists() {
            if self.remote_url.is_empty() {
                return Err(DomainError::Store(
                    "store.remote_url is required to create the working clone".to_string(),
                ));
            }
            if let Some(parent) = self.workdir.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DomainError::Store(format!("Failed to create {}: {e}", parent.display())))?;
            }
            let target = self.workdir.to_string_lossy().into_owned();
            run_checked(
                "git",
                &["clone", "--origin", &self.remote_name, "--", &self.remote_url, &target],
                None,
                DomainError::Store,
            )
            .await?;
            tracing::info!(workdir = %target, "Cloned output repository");
        } else {
            self.git(&["fetch", "--prune", &self.remote_name]).await?;
        }

        let upstream = self.remote_ref(&self.default_branch);
        if self.rev_parse(&format!("refs/heads/{}", self.default_branch)).await?.is_some() {
            self.git(&["checkout", "--quiet", &self.default_branch]).await?;
            // Never rewinds local merges that are not pushed yet.
            self.git(&["merge", "--ff-only", "--quiet", &upstream]).await?;
        } else {
            self.git(&["checkout", "--quiet", "-b", &self.default_branch, &upstream])
                .await?;
        }

        if self.has_annex().await? {
            self.annex(&["merge"]).await?;
        }
        Ok(())
    }

    async fn default_tip(&self) -> DomainResult<String> {
        let local = format!("refs/heads/{}", self.default_branch);
        self.rev_parse(&local).await?.ok_or_else(|| {
            DomainError::Store(format!("Default branch {} does not exist", self.default_branch))
        })
    }

    async fn list_branches(&self, prefix: &str) -> DomainResult<Vec<String>> {
        let namespace = format!("refs/remotes/{}/", self.remote_name);
        let out = self
            .git(&["for-each-ref", "--format=%(refname:strip=3)", &namespace])
            .await?;
        let wanted = format!("{prefix}-");
        Ok(out
            .stdout_lines()
            .filter(|name| name.starts_with(&wanted))
            .map(str::to_string)
            .collect())
    }

    async fn branch_exists(&self, name: &str) -> DomainResult<bool> {
        Ok(self.tip(name).await?.is_some())
    }

    async fn tip(&self, name: &str) -> DomainResult<Option<String>> {
        validate_branch_name(name)?;
        self.rev_parse(&self.remote_ref(name)).await
    }

    async fn is_ancestor(&self, commit: &str, descendant: &str) -> DomainResult<bool> {
        let out = self
            .git_raw(&["merge-base", "--is-ancestor", commit, descendant])
            .await?;
        if out.success {
            return Ok(true);
        }
        // Exit status 1 means "not an ancestor"; anything else is an error.
        if out.stderr.trim().is_empty() {
            return Ok(false);
        }
        Err(classify_failure(
            "git",
            &["merge-base"],
            &out.stderr,
            DomainError::Store,
        ))
    }

    async fn merge(&self, branches: &[String], message: &str) -> DomainResult<MergeOutcome> {
        for branch in branches {
            validate_branch_name(branch)?;
        }
        let refs: Vec<String> = branches.iter().map(|b| self.remote_ref(b)).collect();

        let mut args = vec!["merge", "--no-ff", "--no-edit", "-m", message];
        args.extend(refs.iter().map(String::as_str));
        let out = self.git_raw(&args).await?;

        if out.success {
            let commit = self.rev_parse("HEAD").await?.ok_or_else(|| {
                DomainError::Store("HEAD does not resolve after merge".to_string())
            })?;
            return Ok(MergeOutcome::Committed { commit });
        }

        let combined = format!("{}\n{}", out.stdout, out.stderr);
        let is_conflict = combined.contains("CONFLICT")
            || combined.contains("Automatic merge failed")
            || combined.contains("octopus");
        if !is_conflict {
            let _ = self.git_raw(&["reset", "--merge"]).await;
            return Err(classify_failure(
                "git",
                &["merge"],
                &out.stderr,
                DomainError::Store,
            ));
        }

        let (paths, culprits) = self.conflict_details(&refs, branches).await?;
        self.git(&["reset", "--merge"]).await?;
        Ok(MergeOutcome::Conflict {
            paths,
            branches: culprits,
        })
    }

    async fn push(&self, mode: PushMode) -> DomainResult<()> {
        let annex = self.has_annex().await?;
        if annex && mode == PushMode::WithData {
            self.annex(&["copy", "--fast", "--to", &self.content_remote])
                .await?;
        }

        let mut args = vec!["push", self.remote_name.as_str(), self.default_branch.as_str()];
        if annex {
            args.push("git-annex");
        }
        self.git(&args).await?;
        Ok(())
    }

    async fn refresh_content_locations(&self) -> DomainResult<()> {
        if !self.has_annex().await? {
            tracing::debug!("No git-annex branch; nothing to refresh");
            return Ok(());
        }
        // fsck exits non-zero when it finds missing copies, which is the
        // information being refreshed, so only infrastructure errors count.
        let out = self
            .git_raw(&["annex", "fsck", "--fast", "--quiet", "-f", &self.content_remote])
            .await?;
        if !out.success {
            let err = classify_failure(
                "git",
                &["annex", "fsck"],
                &out.stderr,
                DomainError::Store,
            );
            if matches!(err, DomainError::TransientInfra(_) | DomainError::PermissionDenied(_)) {
                return Err(err);
            }
        }
        Ok(())
    }

    async fn find_missing_content(&self) -> DomainResult<BTreeSet<String>> {
        if !self.has_annex().await? {
            return Ok(BTreeSet::new());
        }
        let out = self
            .annex(&[
                "find",
                "--not",
                "--in",
                &self.content_remote,
                "--format=${key}\\n",
            ])
            .await?;
        Ok(out.stdout_lines().map(str::to_string).collect())
    }

    async fn retire_source(&self) -> DomainResult<()> {
        if self.has_annex().await? {
            self.annex(&["dead", "here"]).await?;
        }
        Ok(())
    }
}
