//! Merge engine batching, verification, resume and branch partitioning.

mod common;

use common::{units, Harness};
use fanin::domain::errors::DomainError;
use fanin::domain::models::{MergeRunState, PushMode, SchedulerState, TaskState};
use fanin::domain::ports::MergeCheckpointStore;
use fanin::services::reports::{MERGE_REPORT_FILE, MISSING_CONTENT_FILE, ORPHANED_FILE};

async fn succeeded_cohort(n: usize) -> Harness {
    let h = Harness::with_cohort(n).await;
    h.run_cohort(&[]).await;
    h.classifier().poll_pass().await.unwrap();
    h
}

#[tokio::test]
async fn test_twelve_branches_in_three_batches() {
    let h = succeeded_cohort(12).await;

    let report = h.merge_engine(5).run().await.unwrap();
    assert_eq!(report.state, MergeRunState::Complete);
    assert_eq!(report.batch_sizes, vec![5, 5, 2]);

    let merged = h.store.merged_batches();
    assert_eq!(merged.len(), 3);
    let flat: Vec<String> = merged.concat();
    let mut sorted = flat.clone();
    sorted.sort();
    assert_eq!(flat, sorted);
}

#[tokio::test]
async fn test_plan_is_a_dry_run() {
    let h = succeeded_cohort(4).await;

    let preview = h.merge_engine(3).plan().await.unwrap();
    assert_eq!(preview.plan.batch_sizes(), vec![3, 1]);
    assert_eq!(preview.partition.has_results.len(), 4);
    assert!(preview.open_run.is_none());

    assert!(h.store.merged_batches().is_empty());
    assert!(h.store.pushes().is_empty());
    assert!(h.checkpoints.load_open_run().await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_content_blocks_completion() {
    let h = succeeded_cohort(3).await;
    h.store.mark_missing("MD5E-s42--deadbeef.nii.gz");

    let err = h.merge_engine(2).run().await.unwrap_err();
    match err {
        DomainError::ContentIncomplete { ref missing } => {
            assert_eq!(missing, &vec!["MD5E-s42--deadbeef.nii.gz".to_string()]);
        }
        other => panic!("expected ContentIncomplete, got {other:?}"),
    }

    assert_eq!(h.store.retired(), 0);
    assert_eq!(h.store.pushes(), vec![PushMode::WithData]);
    assert_eq!(
        h.read_report(MISSING_CONTENT_FILE),
        "MD5E-s42--deadbeef.nii.gz\n"
    );
    assert!(h.read_report(MERGE_REPORT_FILE).contains("\"INCOMPLETE\""));

    let open = h.checkpoints.load_open_run().await.unwrap().unwrap();
    assert_eq!(open.state, MergeRunState::Incomplete);

    // Once the content lands the rerun only verifies.
    h.store.clear_missing();
    let report = h.merge_engine(2).run().await.unwrap();
    assert_eq!(report.state, MergeRunState::Complete);
    assert_eq!(report.run_id, open.id);
    assert_eq!(h.store.merged_batches().len(), 2);
    assert_eq!(h.store.retired(), 1);
    assert_eq!(h.read_report(MISSING_CONTENT_FILE), "");
}

#[tokio::test]
async fn test_conflict_aborts_and_resume_skips_merged_batches() {
    let h = succeeded_cohort(12).await;
    let preview = h.merge_engine(5).plan().await.unwrap();
    let offender = preview.plan.batches[1].branches[0].clone();
    h.store.make_conflicting(&offender);

    let err = h.merge_engine(5).run().await.unwrap_err();
    match err {
        DomainError::MergeConflict {
            batch_index,
            batch_count,
            ref branches,
            ref paths,
        } => {
            assert_eq!(batch_index, 2);
            assert_eq!(batch_count, 3);
            assert_eq!(branches, &vec![offender.clone()]);
            assert_eq!(paths.len(), 1);
        }
        other => panic!("expected MergeConflict, got {other:?}"),
    }

    // Batch 1 is merged and published, nothing else.
    assert_eq!(h.store.merged_batches().len(), 1);
    assert_eq!(h.store.pushes(), vec![PushMode::HistoryOnly]);
    assert_eq!(h.store.retired(), 0);
    let open = h.checkpoints.load_open_run().await.unwrap().unwrap();
    assert_eq!(open.state, MergeRunState::ConflictAbort);
    assert_eq!(open.next_batch, 2);
    assert!(h.read_report(MERGE_REPORT_FILE).contains("CONFLICT_ABORT"));

    h.store.resolve_conflicts();
    let report = h.merge_engine(5).run().await.unwrap();
    assert_eq!(report.state, MergeRunState::Complete);
    assert_eq!(report.merged_branches, 12);

    let merged = h.store.merged_batches();
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[0], preview.plan.batches[0].branches);
    assert_eq!(merged[1], preview.plan.batches[1].branches);
    assert_eq!(merged[2], preview.plan.batches[2].branches);
}

#[tokio::test]
async fn test_deleting_conflicting_branch_lets_resume_finish() {
    let h = succeeded_cohort(12).await;
    let preview = h.merge_engine(5).plan().await.unwrap();
    let offender = preview.plan.batches[1].branches[2].clone();
    h.store.make_conflicting(&offender);

    let err = h.merge_engine(5).run().await.unwrap_err();
    assert!(matches!(err, DomainError::MergeConflict { batch_index: 2, .. }));
    let aborted = h.checkpoints.load_open_run().await.unwrap().unwrap();

    // The operator drops the offending result instead of fixing it.
    h.store.delete_branch(&offender);
    let report = h.merge_engine(5).run().await.unwrap();
    assert_eq!(report.state, MergeRunState::Complete);
    assert_eq!(report.run_id, aborted.id);
    assert_eq!(report.merged_branches, 11);
    assert_eq!(report.batch_sizes, vec![5, 5, 1]);
    assert!(!report.partition.has_results.contains(&offender));

    let merged = h.store.merged_batches();
    assert_eq!(merged[0], preview.plan.batches[0].branches);
    assert!(!merged.concat().contains(&offender));
    assert!(h.checkpoints.load_open_run().await.unwrap().is_none());
}

#[tokio::test]
async fn test_resume_picks_up_units_that_succeeded_meanwhile() {
    let h = Harness::with_cohort(3).await;
    let first = h.submission().submit_pending(None).await.unwrap();
    for task in &first.submitted {
        h.store.push_result(&task.branch_name);
    }
    h.scheduler
        .set_state(&first.submitted[0].job_id, SchedulerState::Completed);
    h.scheduler
        .set_state(&first.submitted[1].job_id, SchedulerState::Completed);
    h.scheduler
        .set_state(&first.submitted[2].job_id, SchedulerState::Running);
    h.classifier().poll_pass().await.unwrap();

    let late = first.submitted[2].branch_name.clone();
    let second = first.submitted[1].branch_name.clone();
    h.store.make_conflicting(&second);
    let err = h.merge_engine(1).run().await.unwrap_err();
    assert!(matches!(err, DomainError::MergeConflict { batch_index: 2, .. }));

    h.scheduler
        .set_state(&first.submitted[2].job_id, SchedulerState::Completed);
    h.classifier().poll_pass().await.unwrap();
    h.store.resolve_conflicts();

    let report = h.merge_engine(1).run().await.unwrap();
    assert_eq!(report.batch_sizes, vec![1, 1, 1]);
    assert_eq!(report.merged_branches, 3);
    assert!(report.partition.deferred.is_empty());
    assert!(h.store.merged_batches().concat().contains(&late));
}

#[tokio::test]
async fn test_resumed_report_keeps_full_partition() {
    let h = Harness::with_cohort(12).await;
    h.run_cohort(&[12]).await;
    h.classifier().poll_pass().await.unwrap();

    let preview = h.merge_engine(5).plan().await.unwrap();
    h.store.make_conflicting(&preview.plan.batches[1].branches[0]);
    h.merge_engine(5).run().await.unwrap_err();

    h.store.resolve_conflicts();
    let report = h.merge_engine(5).run().await.unwrap();
    assert_eq!(report.partition.no_results.len(), 1);
    assert!(report.partition.no_results[0].ends_with("sub-12"));
    assert_eq!(report.partition.has_results.len(), 11);
    assert!(h.read_report(MERGE_REPORT_FILE).contains("sub-12"));
}

#[tokio::test]
async fn test_incomplete_resume_reports_original_partition() {
    let h = Harness::with_cohort(3).await;
    h.run_cohort(&[3]).await;
    h.classifier().poll_pass().await.unwrap();
    h.store.mark_missing("MD5E-s1--cafe.tsv");
    h.merge_engine(5).run().await.unwrap_err();

    h.store.clear_missing();
    let report = h.merge_engine(5).run().await.unwrap();
    assert_eq!(report.partition.has_results.len(), 2);
    assert_eq!(report.partition.no_results.len(), 1);
}

#[tokio::test]
async fn test_conflict_in_first_batch_pushes_nothing() {
    let h = succeeded_cohort(3).await;
    let preview = h.merge_engine(5).plan().await.unwrap();
    h.store.make_conflicting(&preview.plan.batches[0].branches[0]);

    let err = h.merge_engine(5).run().await.unwrap_err();
    assert!(matches!(err, DomainError::MergeConflict { batch_index: 1, .. }));
    assert!(h.store.pushes().is_empty());
}

#[tokio::test]
async fn test_orphaned_and_deferred_branches_are_not_merged() {
    let h = Harness::with_cohort(3).await;
    let all = units(3);

    let first = h.submission().submit_pending(None).await.unwrap();
    // sub-01 pushes partial output, then the scheduler kills it.
    let stale = first.submitted[0].branch_name.clone();
    h.store.push_result(&stale);
    h.scheduler
        .set_state(&first.submitted[0].job_id, SchedulerState::Failed);
    // sub-02 has pushed but is still running.
    let running = first.submitted[1].branch_name.clone();
    h.store.push_result(&running);
    h.scheduler
        .set_state(&first.submitted[1].job_id, SchedulerState::Running);
    // sub-03 succeeds.
    h.store.push_result(&first.submitted[2].branch_name);
    h.scheduler
        .set_state(&first.submitted[2].job_id, SchedulerState::Completed);
    h.classifier().poll_pass().await.unwrap();

    let retry = h.submission().resubmit_failed().await.unwrap();
    let fresh = retry.submitted[0].clone();
    h.store.push_result(&fresh.branch_name);
    h.scheduler.set_state(&fresh.job_id, SchedulerState::Completed);
    h.classifier().poll_pass().await.unwrap();

    assert_eq!(h.state_of(&all[0]).await, TaskState::Succeeded);
    assert_eq!(h.state_of(&all[1]).await, TaskState::Running);

    let report = h.merge_engine(10).run().await.unwrap();
    assert_eq!(report.partition.orphaned, vec![stale.clone()]);
    assert_eq!(report.partition.deferred, vec![running.clone()]);
    assert_eq!(report.merged_branches, 2);

    let merged = h.store.merged_batches().concat();
    assert!(merged.contains(&fresh.branch_name));
    assert!(!merged.contains(&stale));
    assert!(!merged.contains(&running));
    assert_eq!(h.read_report(ORPHANED_FILE), format!("{stale}\n"));
}

#[tokio::test]
async fn test_rerun_after_complete_finds_everything_merged() {
    let h = succeeded_cohort(4).await;
    h.merge_engine(3).run().await.unwrap();

    let preview = h.merge_engine(3).plan().await.unwrap();
    assert!(preview.plan.is_empty());
    assert_eq!(preview.partition.already_merged.len(), 4);
    assert!(preview.partition.no_results.is_empty());

    let again = h.merge_engine(3).run().await.unwrap();
    assert_eq!(again.merged_branches, 0);
    assert_eq!(h.store.merged_batches().len(), 2);
}

#[tokio::test]
async fn test_empty_branch_against_moved_default_is_no_result() {
    let h = Harness::with_cohort(2).await;
    h.run_cohort(&[2]).await;
    // Another merge lands on the default branch after submission.
    h.store.advance();
    h.classifier().poll_pass().await.unwrap();

    let preview = h.merge_engine(5).plan().await.unwrap();
    assert_eq!(preview.partition.has_results.len(), 1);
    assert_eq!(preview.partition.no_results.len(), 1);
    assert!(preview.partition.no_results[0].ends_with("sub-02"));
}

#[tokio::test]
async fn test_held_lock_refuses_to_merge() {
    let h = succeeded_cohort(2).await;
    let _guard = h.lock().acquire().unwrap();

    let err = h.merge_engine(5).run().await.unwrap_err();
    assert!(matches!(err, DomainError::LockHeld { .. }));
    assert!(h.store.merged_batches().is_empty());
    assert!(h.checkpoints.load_open_run().await.unwrap().is_none());
}
