//! Recovery E2E tests.
//!
//! The completion state committed with the index decides what a restarted,
//! restored or health-checked queue executes again.

use pretty_assertions::assert_eq;

use e2e_tests::{add_document, fast_settings, TestHarness};
use index_queue::ActivityOutcome;
use index_types::{Activity, CompletionState, IndexBatch, IndexTerm};

/// Activities stored while no queue ran are executed on start.
#[tokio::test(flavor = "multi_thread")]
async fn test_startup_replays_unexecuted() {
    let harness = TestHarness::new();
    harness.register(add_document(1, 1, "/Root/A"));
    harness.register(add_document(2, 2, "/Root/B"));
    harness.register(Activity::remove_tree(1, "/Root/A"));

    let queue = harness.queue(fast_settings());
    let report = queue.start().await.unwrap();
    assert_eq!(report.range_replayed, 3);
    assert_eq!(report.gaps_replayed, 0);
    queue.shutdown().await.unwrap();

    assert_eq!(harness.index.document_count(), 1);
    assert_eq!(harness.indexed_versions(IndexTerm::VersionId(2)), vec![2]);
    assert_eq!(
        harness.index.completion_state().unwrap(),
        Some(CompletionState::new(3, vec![]))
    );
}

/// A restart against an up-to-date index replays nothing.
#[tokio::test(flavor = "multi_thread")]
async fn test_restart_is_idempotent() {
    let mut harness = TestHarness::new();
    {
        let queue = harness.queue(fast_settings());
        queue.start().await.unwrap();
        for node in 1..=4u64 {
            let outcome = queue
                .register_and_execute(add_document(node, node, &format!("/Root/N{node}")))
                .await
                .unwrap();
            assert_eq!(outcome, ActivityOutcome::Executed);
        }
        queue.shutdown().await.unwrap();
    }

    harness.reopen_index().await;
    assert_eq!(
        harness.index.completion_state().unwrap(),
        Some(CompletionState::new(4, vec![]))
    );

    let queue = harness.queue(fast_settings());
    let report = queue.start().await.unwrap();
    assert_eq!(report.replayed(), 0);
    queue.shutdown().await.unwrap();
    assert_eq!(harness.index.document_count(), 4);
}

/// Gaps are replayed from the store; gap ids the store lost are dropped.
#[tokio::test(flavor = "multi_thread")]
async fn test_gap_replay_and_missing_gap_dropped() {
    let harness = TestHarness::new();
    for node in 1..=3u64 {
        harness.register(add_document(node, node, &format!("/Root/N{node}")));
    }
    // Index claims 1..=5 except 2 and 4; the store never saw 4 or 5
    harness
        .index
        .set_completion_state(&CompletionState::new(5, vec![2, 4]))
        .unwrap();
    harness.index.commit().unwrap();

    let queue = harness.queue(fast_settings());
    let report = queue.start().await.unwrap();
    assert_eq!(report.gaps_replayed, 1);
    assert_eq!(report.gaps_dropped, 1);
    assert_eq!(report.range_replayed, 0);
    assert_eq!(
        queue.current_completion_state().unwrap(),
        CompletionState::new(5, vec![])
    );
    queue.shutdown().await.unwrap();

    assert_eq!(harness.indexed_versions(IndexTerm::VersionId(2)), vec![2]);
    assert_eq!(harness.index.document_count(), 1);
}

/// An activity the queue never heard of is picked up by the health check.
#[tokio::test(flavor = "multi_thread")]
async fn test_health_check_executes_lost_activity() {
    let harness = TestHarness::new();
    let queue = harness.queue(fast_settings());
    queue.start().await.unwrap();

    queue
        .register_and_execute(add_document(1, 1, "/Root/A"))
        .await
        .unwrap();
    // Registered by another process whose message never arrived
    harness.register(add_document(2, 2, "/Root/B"));

    let report = queue.health_check().await.unwrap();
    assert_eq!(report.range_replayed, 1);
    assert_eq!(
        queue.current_completion_state().unwrap(),
        CompletionState::new(2, vec![])
    );
    queue.shutdown().await.unwrap();
    assert_eq!(harness.indexed_versions(IndexTerm::VersionId(2)), vec![2]);
}

/// After an index snapshot restore, everything past the backup point is
/// executed again.
#[tokio::test(flavor = "multi_thread")]
async fn test_restore_replays_after_backup_point() {
    let harness = TestHarness::new();
    let queue = harness.queue(fast_settings());
    queue.start().await.unwrap();
    for node in 1..=4u64 {
        queue
            .register_and_execute(add_document(node, node, &format!("/Root/N{node}")))
            .await
            .unwrap();
    }

    // The restored snapshot predates activities 3 and 4
    harness
        .index
        .write(&IndexBatch {
            deletions: vec![IndexTerm::VersionId(3), IndexTerm::VersionId(4)],
            ..Default::default()
        })
        .unwrap();
    harness.index.commit().unwrap();
    assert_eq!(harness.index.document_count(), 2);

    let report = queue
        .restore_completion_state(CompletionState::new(2, vec![]))
        .await
        .unwrap();
    assert_eq!(report.range_replayed, 2);
    queue.shutdown().await.unwrap();

    assert_eq!(harness.index.document_count(), 4);
    assert_eq!(
        harness.index.completion_state().unwrap(),
        Some(CompletionState::new(4, vec![]))
    );
}

/// Rebuild clears the index and re-executes the whole store.
#[tokio::test(flavor = "multi_thread")]
async fn test_rebuild_index() {
    let harness = TestHarness::new();
    let queue = harness.queue(fast_settings());
    queue.start().await.unwrap();
    for node in 1..=3u64 {
        queue
            .register_and_execute(add_document(node, node, &format!("/Root/N{node}")))
            .await
            .unwrap();
    }
    queue
        .register_and_execute(Activity::remove_tree(3, "/Root/N3"))
        .await
        .unwrap();

    let report = queue.rebuild_index().await.unwrap();
    assert_eq!(report.range_replayed, 4);
    queue.shutdown().await.unwrap();

    assert_eq!(harness.indexed_versions(IndexTerm::InTree("/Root".to_string())), vec![1, 2]);
}
