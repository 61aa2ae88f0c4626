//! GitAnnexStore against a real bare remote. Skipped when git is missing.
//!
//! The repositories carry no git-annex branch, so only the git side of the
//! store is exercised here.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use fanin::adapters::git::GitAnnexStore;
use fanin::domain::models::{MergeOutcome, PushMode, StoreConfig};
use fanin::domain::ports::ResultStore;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn set_identity() {
    for (key, value) in [
        ("GIT_AUTHOR_NAME", "fanin test"),
        ("GIT_AUTHOR_EMAIL", "fanin@example.org"),
        ("GIT_COMMITTER_NAME", "fanin test"),
        ("GIT_COMMITTER_EMAIL", "fanin@example.org"),
    ] {
        std::env::set_var(key, value);
    }
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// A bare output repository plus a seeding clone playing the jobs' role.
struct Fixture {
    _dir: TempDir,
    remote: PathBuf,
    seed: PathBuf,
    workdir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        set_identity();
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("output.git");
        let seed = dir.path().join("seed");
        let workdir = dir.path().join("merge_ds");

        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "--quiet", "--bare"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["checkout", "--quiet", "-b", "main"]);
        std::fs::write(seed.join("README"), "cohort outputs\n").unwrap();
        git(&seed, &["add", "README"]);
        git(&seed, &["commit", "--quiet", "-m", "init"]);
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        git(&seed, &["push", "--quiet", "origin", "main"]);

        Self {
            _dir: dir,
            remote,
            seed,
            workdir,
        }
    }

    fn store(&self) -> GitAnnexStore {
        GitAnnexStore::new(&StoreConfig {
            remote_url: self.remote.to_string_lossy().into_owned(),
            workdir: self.workdir.to_string_lossy().into_owned(),
            ..StoreConfig::default()
        })
    }

    /// Push a job branch forked from `main` writing `file`.
    fn push_job(&self, branch: &str, file: Option<(&str, &str)>) -> String {
        git(&self.seed, &["checkout", "--quiet", "-B", branch, "main"]);
        if let Some((path, content)) = file {
            let full = self.seed.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, content).unwrap();
            git(&self.seed, &["add", path]);
            git(&self.seed, &["commit", "--quiet", "-m", branch]);
        }
        git(&self.seed, &["push", "--quiet", "--force", "origin", branch]);
        let tip = git(&self.seed, &["rev-parse", "HEAD"]);
        git(&self.seed, &["checkout", "--quiet", "main"]);
        tip
    }

    fn remote_main(&self) -> String {
        git(&self.remote, &["rev-parse", "refs/heads/main"])
    }
}

#[tokio::test]
async fn test_prepare_lists_and_resolves_job_branches() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let fx = Fixture::new();
    let with_result = fx.push_job("job-1_1-a1-sub-01", Some(("sub-01/out.tsv", "1\n")));
    fx.push_job("job-1_2-a1-sub-02", None);

    let store = fx.store();
    store.prepare().await.unwrap();

    let base = store.default_tip().await.unwrap();
    assert_eq!(base, fx.remote_main());

    let mut branches = store.list_branches("job").await.unwrap();
    branches.sort();
    assert_eq!(branches, vec!["job-1_1-a1-sub-01", "job-1_2-a1-sub-02"]);

    assert_eq!(
        store.tip("job-1_1-a1-sub-01").await.unwrap(),
        Some(with_result)
    );
    assert_eq!(
        store.tip("job-1_2-a1-sub-02").await.unwrap(),
        Some(base.clone())
    );
    assert!(!store.branch_exists("job-9_9-a1-sub-09").await.unwrap());

    // A second prepare fetches instead of cloning.
    fx.push_job("job-1_3-a1-sub-03", Some(("sub-03/out.tsv", "3\n")));
    store.prepare().await.unwrap();
    assert!(store.branch_exists("job-1_3-a1-sub-03").await.unwrap());
}

#[tokio::test]
async fn test_merge_batch_and_push_history() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let fx = Fixture::new();
    let a = fx.push_job("job-2_1-a1-sub-01", Some(("sub-01/out.tsv", "1\n")));
    let b = fx.push_job("job-2_2-a1-sub-02", Some(("sub-02/out.tsv", "2\n")));
    fx.push_job("job-2_3-a1-sub-03", Some(("sub-03/out.tsv", "3\n")));

    let store = fx.store();
    store.prepare().await.unwrap();
    let reference = store.default_tip().await.unwrap();

    let batch = vec![
        "job-2_1-a1-sub-01".to_string(),
        "job-2_2-a1-sub-02".to_string(),
    ];
    let commit = match store.merge(&batch, "Merge batch 1/2").await.unwrap() {
        MergeOutcome::Committed { commit } => commit,
        other => panic!("expected a merge commit, got {other:?}"),
    };
    assert_eq!(store.default_tip().await.unwrap(), commit);
    assert!(store.is_ancestor(&a, &commit).await.unwrap());
    assert!(store.is_ancestor(&b, &commit).await.unwrap());
    assert!(store.is_ancestor(&reference, &commit).await.unwrap());
    assert!(!store.is_ancestor(&commit, &reference).await.unwrap());

    let single = vec!["job-2_3-a1-sub-03".to_string()];
    assert!(matches!(
        store.merge(&single, "Merge batch 2/2").await.unwrap(),
        MergeOutcome::Committed { .. }
    ));

    store.push(PushMode::WithData).await.unwrap();
    assert_eq!(fx.remote_main(), store.default_tip().await.unwrap());

    // No git-annex branch: nothing is referenced, nothing is missing.
    store.refresh_content_locations().await.unwrap();
    assert!(store.find_missing_content().await.unwrap().is_empty());
    store.retire_source().await.unwrap();
}

#[tokio::test]
async fn test_conflicting_batch_is_rolled_back() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let fx = Fixture::new();
    fx.push_job("job-3_1-a1-sub-01", Some(("group/summary.tsv", "one\n")));
    fx.push_job("job-3_2-a1-sub-02", Some(("sub-02/out.tsv", "2\n")));
    fx.push_job("job-3_3-a1-sub-03", Some(("group/summary.tsv", "three\n")));

    let store = fx.store();
    store.prepare().await.unwrap();
    let before = store.default_tip().await.unwrap();

    let batch = vec![
        "job-3_1-a1-sub-01".to_string(),
        "job-3_2-a1-sub-02".to_string(),
        "job-3_3-a1-sub-03".to_string(),
    ];
    match store.merge(&batch, "Merge batch 1/1").await.unwrap() {
        MergeOutcome::Conflict { paths, branches } => {
            assert_eq!(paths, vec!["group/summary.tsv"]);
            assert_eq!(branches, vec!["job-3_1-a1-sub-01", "job-3_3-a1-sub-03"]);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }

    assert_eq!(store.default_tip().await.unwrap(), before);
    let status = git(&fx.workdir, &["status", "--porcelain"]);
    assert!(status.is_empty(), "working copy not clean: {status}");
}
