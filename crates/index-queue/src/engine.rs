//! Indexing engine interface and the Tantivy-backed implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use index_engine::ContentIndex;
use index_types::{CompletionState, IndexBatch};

use crate::error::QueueError;

/// Write side of the full-text index.
///
/// The engine serializes its own writes; the queue only guarantees it is
/// never handed conflicting writes for the same item or subtree at once.
#[async_trait]
pub trait IndexingEngine: Send + Sync {
    /// Whether one index instance is shared by every process.
    fn is_centralized(&self) -> bool;

    /// Apply deletions, updates and additions (in that order).
    async fn write_index(&self, batch: IndexBatch) -> Result<(), QueueError>;

    async fn commit(&self) -> Result<(), QueueError>;

    /// Delete every document; visible after the next commit.
    async fn clear_index(&self) -> Result<(), QueueError>;

    /// Completion state to persist with the next commit.
    async fn write_completion_state(&self, state: &CompletionState) -> Result<(), QueueError>;

    /// Completion state of the last commit, `None` for a fresh index.
    async fn read_completion_state(&self) -> Result<Option<CompletionState>, QueueError>;
}

/// [`IndexingEngine`] over a [`ContentIndex`].
pub struct TantivyEngine {
    index: Arc<ContentIndex>,
    centralized: bool,
}

impl TantivyEngine {
    /// Engine for a local index replica.
    pub fn new(index: Arc<ContentIndex>) -> Self {
        Self {
            index,
            centralized: false,
        }
    }

    /// Engine for an index shared by all processes.
    pub fn centralized(index: Arc<ContentIndex>) -> Self {
        Self {
            index,
            centralized: true,
        }
    }

    pub fn index(&self) -> &Arc<ContentIndex> {
        &self.index
    }
}

#[async_trait]
impl IndexingEngine for TantivyEngine {
    fn is_centralized(&self) -> bool {
        self.centralized
    }

    async fn write_index(&self, batch: IndexBatch) -> Result<(), QueueError> {
        Ok(self.index.write(&batch)?)
    }

    async fn commit(&self) -> Result<(), QueueError> {
        let opstamp = self.index.commit()?;
        debug!(opstamp, "Index commit");
        Ok(())
    }

    async fn clear_index(&self) -> Result<(), QueueError> {
        Ok(self.index.clear()?)
    }

    async fn write_completion_state(&self, state: &CompletionState) -> Result<(), QueueError> {
        Ok(self.index.set_completion_state(state)?)
    }

    async fn read_completion_state(&self) -> Result<Option<CompletionState>, QueueError> {
        Ok(self.index.completion_state()?)
    }
}
