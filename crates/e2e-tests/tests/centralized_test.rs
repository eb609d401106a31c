//! Centralized queue E2E tests.
//!
//! Several queues share one RocksDB store and one index. The store's leases
//! decide who executes what.

use futures::future::join_all;
use pretty_assertions::assert_eq;

use e2e_tests::{add_document, fast_settings, TestHarness};
use index_queue::ActivityOutcome;
use index_types::{Activity, IndexTerm};

/// Commits are immediate: the write is searchable when the call returns.
#[tokio::test(flavor = "multi_thread")]
async fn test_immediately_visible() {
    let harness = TestHarness::new();
    let queue = harness.centralized_queue("node-a", fast_settings());
    queue.start().await.unwrap();

    let outcome = queue
        .register_and_execute(add_document(1, 1, "/Root/A"))
        .await
        .unwrap();
    assert_eq!(outcome, ActivityOutcome::Executed);
    assert_eq!(harness.indexed_versions(IndexTerm::VersionId(1)), vec![1]);

    queue.shutdown().await.unwrap();
}

/// Unprocessed activities run on start, overlapping ones in id order.
#[tokio::test(flavor = "multi_thread")]
async fn test_startup_respects_scope_order() {
    let harness = TestHarness::new();
    harness.register(add_document(1, 1, "/Root/Site/Old"));
    harness.register(Activity::remove_tree(2, "/Root/Site"));
    harness.register(add_document(3, 3, "/Root/Site/New"));
    harness.register(add_document(4, 4, "/Root/Elsewhere"));

    let queue = harness.centralized_queue("node-a", fast_settings());
    assert_eq!(queue.start().await.unwrap(), 4);
    queue.shutdown().await.unwrap();

    assert_eq!(
        harness.indexed_versions(IndexTerm::InTree("/Root/Site".to_string())),
        vec![3]
    );
    assert_eq!(harness.indexed_versions(IndexTerm::VersionId(4)), vec![4]);
    assert_eq!(harness.store.stats().unwrap().done_count, 4);
}

/// Two processes register concurrently; each activity executes once.
#[tokio::test(flavor = "multi_thread")]
async fn test_shared_store_no_double_execution() {
    let harness = TestHarness::new();
    let first = harness.centralized_queue("node-a", fast_settings());
    let second = harness.centralized_queue("node-b", fast_settings());
    first.start().await.unwrap();
    second.start().await.unwrap();

    let writes = (1..=12u64).map(|node| {
        let queue = if node % 2 == 0 { first.clone() } else { second.clone() };
        async move {
            queue
                .register_and_execute(add_document(node, node, &format!("/Root/Shared/N{node}")))
                .await
                .unwrap()
        }
    });
    for outcome in join_all(writes).await {
        assert!(!outcome.is_failed());
    }

    let executed = first.stats().unwrap().executed + second.stats().unwrap().executed;
    assert_eq!(executed, 12);
    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();

    assert_eq!(harness.index.document_count(), 12);
    assert_eq!(harness.store.stats().unwrap().done_count, 12);
}
