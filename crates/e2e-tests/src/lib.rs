//! End-to-end test infrastructure for the indexing activity queue.
//!
//! Provides a shared TestHarness wiring a RocksDB activity store, an
//! on-disk tantivy index and an in-memory document source into queues.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use index_engine::{ContentIndex, ContentIndexConfig};
use index_queue::{CentralizedIndexingQueue, InMemoryDocumentSource, IndexingQueue, TantivyEngine};
use index_store::ActivityDb;
use index_types::{Activity, IndexDocument, IndexTerm, QueueSettings};

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub index_path: PathBuf,
    pub store: Arc<ActivityDb>,
    pub index: Arc<ContentIndex>,
    pub documents: Arc<InMemoryDocumentSource>,
}

impl TestHarness {
    /// Create a new test harness with temp directory, store and index.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            ActivityDb::open(&temp_dir.path().join("activities"))
                .expect("Failed to open activity store"),
        );
        let index_path = temp_dir.path().join("index");
        let index = Arc::new(open_index(&index_path));

        Self {
            _temp_dir: temp_dir,
            index_path,
            store,
            index,
            documents: Arc::new(InMemoryDocumentSource::new()),
        }
    }

    /// Distributed queue over the harness backends.
    pub fn queue(&self, settings: QueueSettings) -> IndexingQueue {
        IndexingQueue::new(
            self.store.clone(),
            Arc::new(TantivyEngine::new(self.index.clone())),
            self.documents.clone(),
            settings,
        )
        .expect("Failed to create queue")
    }

    /// Centralized queue over the harness backends.
    pub fn centralized_queue(&self, owner: &str, settings: QueueSettings) -> Arc<CentralizedIndexingQueue> {
        Arc::new(
            CentralizedIndexingQueue::new(
                owner,
                self.store.clone(),
                Arc::new(TantivyEngine::centralized(self.index.clone())),
                self.documents.clone(),
                settings,
            )
            .expect("Failed to create centralized queue"),
        )
    }

    /// Reopen the on-disk index as a restarted process would.
    ///
    /// Every queue using the old index must be dropped first.
    pub async fn reopen_index(&mut self) {
        let placeholder = ContentIndex::in_memory().expect("Failed to create placeholder index");
        let old = std::mem::replace(&mut self.index, Arc::new(placeholder));
        // Finished tasks may still hold the old index for a moment
        for _ in 0..100 {
            if Arc::strong_count(&old) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Release the writer lock before opening the directory again
        drop(old);
        self.index = Arc::new(open_index(&self.index_path));
    }

    /// Register an activity in the store without executing it.
    pub fn register(&self, activity: Activity) -> Activity {
        self.store.register(&activity).expect("Failed to register activity")
    }

    /// Version ids the committed index holds for `term`, ascending.
    pub fn indexed_versions(&self, term: IndexTerm) -> Vec<u64> {
        let mut versions = self.index.version_ids(&term).expect("Failed to query index");
        versions.sort_unstable();
        versions
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn open_index(path: &std::path::Path) -> ContentIndex {
    ContentIndex::open_or_create(ContentIndexConfig::new(path)).expect("Failed to open index")
}

/// Settings with timers short enough for tests.
pub fn fast_settings() -> QueueSettings {
    QueueSettings {
        commit_max_wait_ms: 200,
        commit_idle_ms: 50,
        commit_heartbeat_ms: 20,
        poll_interval_ms: 20,
        poll_jitter_ms: 5,
        load_chunk_size: 3,
        ..Default::default()
    }
}

/// Document for `version` of `node` at `path`.
pub fn document(node: u64, version: u64, path: &str) -> IndexDocument {
    IndexDocument::new(node, version, path).with_field("name", path.rsplit('/').next().unwrap_or(""))
}

/// AddDocument activity carrying its document.
pub fn add_document(node: u64, version: u64, path: &str) -> Activity {
    Activity::add_document(node, version, path).with_document(document(node, version, path))
}

/// UpdateDocument activity carrying its document.
pub fn update_document(node: u64, version: u64, path: &str) -> Activity {
    Activity::update_document(node, version, path).with_document(document(node, version, path))
}
