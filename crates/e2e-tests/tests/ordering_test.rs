//! Ordering E2E tests.
//!
//! Activities reach the queue out of id order and overlap in scope; the
//! committed index must look as if they ran one by one in id order.

use futures::future::join_all;
use pretty_assertions::assert_eq;

use e2e_tests::{add_document, document, fast_settings, update_document, TestHarness};
use index_queue::ActivityOutcome;
use index_types::{Activity, CompletionState, IndexTerm, VersioningInfo};

/// Received activities arrive newest first and still execute in id order.
#[tokio::test(flavor = "multi_thread")]
async fn test_received_out_of_order() {
    let harness = TestHarness::new();
    let queue = harness.queue(fast_settings());
    queue.start().await.unwrap();

    // Another process registered these
    let first = harness.register(add_document(1, 1, "/Root/Docs"));
    let second = harness.register(update_document(1, 2, "/Root/Docs"));
    let third = harness.register(Activity::remove_tree(1, "/Root/Docs"));

    let mut signals = Vec::new();
    for activity in [third, second, first] {
        signals.push(queue.enqueue_received(activity).await.unwrap());
    }
    for signal in signals {
        assert!(!signal.wait().await.is_failed());
    }
    queue.shutdown().await.unwrap();

    assert_eq!(harness.indexed_versions(IndexTerm::NodeId(1)), Vec::<u64>::new());
    assert_eq!(
        harness.index.completion_state().unwrap(),
        Some(CompletionState::new(3, vec![]))
    );
}

/// Writes to one node keep their order: the last version wins.
#[tokio::test(flavor = "multi_thread")]
async fn test_same_node_versions_in_order() {
    let harness = TestHarness::new();
    let queue = harness.queue(fast_settings());
    queue.start().await.unwrap();

    let mut handles = Vec::new();
    let first = queue.register_and_execute(add_document(7, 1, "/Root/Page")).await;
    assert_eq!(first.unwrap(), ActivityOutcome::Executed);

    for version in 2..=4u64 {
        let versioning = VersioningInfo {
            last_draft_version_id: Some(version),
            delete: vec![version - 1],
            ..Default::default()
        };
        let activity = update_document(7, version, "/Root/Page").with_versioning(versioning);
        handles.push(queue.register_and_execute(activity));
    }
    for outcome in join_all(handles).await {
        assert_eq!(outcome.unwrap(), ActivityOutcome::Executed);
    }
    queue.shutdown().await.unwrap();

    assert_eq!(harness.indexed_versions(IndexTerm::NodeId(7)), vec![4]);
    assert_eq!(harness.index.version_flags(4).unwrap(), Some((false, true)));
}

/// A subtree removal does not erase documents written after it.
#[tokio::test(flavor = "multi_thread")]
async fn test_tree_removal_then_recreate() {
    let harness = TestHarness::new();
    let queue = harness.queue(fast_settings());
    queue.start().await.unwrap();

    for (node, path) in [(10, "/Root/Site"), (11, "/Root/Site/A"), (12, "/Root/Site/A/B"), (13, "/Root/Other")] {
        queue.register_and_execute(add_document(node, node, path)).await.unwrap();
    }
    let removal = queue.register_and_execute(Activity::remove_tree(10, "/Root/Site"));
    let recreate = queue.register_and_execute(add_document(14, 14, "/Root/Site/New"));
    let (removal, recreate) = tokio::join!(removal, recreate);
    assert_eq!(removal.unwrap(), ActivityOutcome::Executed);
    assert_eq!(recreate.unwrap(), ActivityOutcome::Executed);
    queue.shutdown().await.unwrap();

    assert_eq!(
        harness.indexed_versions(IndexTerm::InTree("/Root/Site".to_string())),
        vec![14]
    );
    assert_eq!(harness.indexed_versions(IndexTerm::NodeId(13)), vec![13]);
}

/// AddTree re-adds whatever the document source has below the path.
#[tokio::test(flavor = "multi_thread")]
async fn test_add_tree_from_document_source() {
    let harness = TestHarness::new();
    harness.documents.put(document(20, 20, "/Root/Lib")).unwrap();
    harness.documents.put(document(21, 21, "/Root/Lib/Item")).unwrap();
    harness.documents.put(document(22, 22, "/Root/Library")).unwrap();

    let queue = harness.queue(fast_settings());
    queue.start().await.unwrap();
    let outcome = queue
        .register_and_execute(Activity::add_tree(20, "/Root/Lib"))
        .await
        .unwrap();
    assert_eq!(outcome, ActivityOutcome::Executed);
    queue.shutdown().await.unwrap();

    assert_eq!(
        harness.indexed_versions(IndexTerm::InTree("/root/lib".to_string())),
        vec![20, 21]
    );
    assert_eq!(harness.indexed_versions(IndexTerm::VersionId(22)), Vec::<u64>::new());
}
