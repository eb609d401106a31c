//! Content-layer document source.
//!
//! The queue does not decide what is indexable; it asks the source for the
//! index document of a version or for every document of a subtree.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use index_types::{path_is_in_tree, IndexDocument};

use crate::error::QueueError;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Document of one version, `None` when it is not indexable (or gone).
    async fn load_document(&self, version_id: u64) -> Result<Option<IndexDocument>, QueueError>;

    /// Every indexable document at or below `root`.
    async fn load_tree_documents(&self, root: &str) -> Result<Vec<IndexDocument>, QueueError>;
}

/// Document source backed by a map of version id to document.
#[derive(Debug, Default)]
pub struct InMemoryDocumentSource {
    documents: RwLock<BTreeMap<u64, IndexDocument>>,
}

impl InMemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, document: IndexDocument) -> Result<(), QueueError> {
        self.documents
            .write()?
            .insert(document.version_id, document);
        Ok(())
    }

    pub fn remove(&self, version_id: u64) -> Result<Option<IndexDocument>, QueueError> {
        Ok(self.documents.write()?.remove(&version_id))
    }
}

#[async_trait]
impl DocumentSource for InMemoryDocumentSource {
    async fn load_document(&self, version_id: u64) -> Result<Option<IndexDocument>, QueueError> {
        Ok(self.documents.read()?.get(&version_id).cloned())
    }

    async fn load_tree_documents(&self, root: &str) -> Result<Vec<IndexDocument>, QueueError> {
        Ok(self
            .documents
            .read()?
            .values()
            .filter(|doc| path_is_in_tree(&doc.path, root))
            .cloned()
            .collect())
    }
}
