//! Index write batch handed to the indexing engine.

use serde::{Deserialize, Serialize};

use crate::document::IndexDocument;

/// A term selecting documents to delete or replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum IndexTerm {
    /// The document of one version
    VersionId(u64),
    /// Every document of a node
    NodeId(u64),
    /// Every document at or below a path
    InTree(String),
}

/// Replace whatever matches `term` with `document`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub term: IndexTerm,
    pub document: IndexDocument,
}

/// One activity's worth of index mutations, applied in order:
/// deletions, then updates, then additions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexBatch {
    pub deletions: Vec<IndexTerm>,
    pub updates: Vec<DocumentUpdate>,
    pub additions: Vec<IndexDocument>,
}

impl IndexBatch {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.updates.is_empty() && self.additions.is_empty()
    }

    /// Number of individual operations in the batch.
    pub fn len(&self) -> usize {
        self.deletions.len() + self.updates.len() + self.additions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_len() {
        let mut batch = IndexBatch::default();
        assert!(batch.is_empty());
        batch.deletions.push(IndexTerm::InTree("/a".to_string()));
        batch.additions.push(IndexDocument::new(1, 1, "/a/b"));
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_term_serialization() {
        let json = serde_json::to_string(&IndexTerm::VersionId(7)).unwrap();
        assert_eq!(json, r#"{"kind":"version_id","value":7}"#);
    }
}
