//! Indexing activity: one index mutation request.
//!
//! Activities are created by content write operations, registered in the
//! durable store (which assigns the id) and then travel through the queue.
//! The scope rule in [`Activity::must_wait_for`] decides which activities
//! may run concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::IndexDocument;

/// Store-assigned activity id. Zero means "not registered yet".
pub type ActivityId = u64;

/// Kind of index mutation an activity performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// Index a newly created version
    AddDocument,
    /// Replace the document of an existing version
    UpdateDocument,
    /// Remove a whole subtree from the index
    RemoveTree,
    /// (Re)index a whole subtree
    AddTree,
    /// Drop and re-add every document of a node
    Rebuild,
    /// Re-apply a version's document after an index snapshot restore
    Restore,
}

impl ActivityType {
    /// Tree activities scope a whole subtree rooted at the activity path.
    pub fn is_tree(&self) -> bool {
        matches!(self, ActivityType::RemoveTree | ActivityType::AddTree)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::AddDocument => "add_document",
            ActivityType::UpdateDocument => "update_document",
            ActivityType::RemoveTree => "remove_tree",
            ActivityType::AddTree => "add_tree",
            ActivityType::Rebuild => "rebuild",
            ActivityType::Restore => "restore",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Versioning side effects of a document write.
///
/// When the last major/minor version pointers of a node shift, older
/// versions have to be deleted from the index or re-indexed with updated
/// flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningInfo {
    /// Version that is the last public one after this write
    #[serde(default)]
    pub last_public_version_id: Option<u64>,
    /// Version that is the last draft after this write
    #[serde(default)]
    pub last_draft_version_id: Option<u64>,
    /// Version ids to delete from the index
    #[serde(default)]
    pub delete: Vec<u64>,
    /// Version ids to re-index as a side effect
    #[serde(default)]
    pub reindex: Vec<u64>,
}

/// One index mutation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Store-assigned id (0 until registered)
    pub id: ActivityId,

    /// What the activity does to the index
    pub activity_type: ActivityType,

    /// Affected node (subtree root node for tree activities)
    pub node_id: u64,

    /// Affected version (0 for tree activities)
    pub version_id: u64,

    /// Affected path (subtree root for tree activities)
    pub path: String,

    /// Versions to delete or re-index as a side effect
    #[serde(default)]
    pub versioning: VersioningInfo,

    /// Precomputed index document, dropped under memory pressure
    #[serde(default)]
    pub document: Option<IndexDocument>,

    /// Creation time (milliseconds since epoch in JSON)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Arrived through inter-process delivery
    #[serde(skip)]
    pub from_receiver: bool,

    /// Loaded from the store to fill a gap
    #[serde(skip)]
    pub from_database: bool,

    /// Replayed at startup or by the health check
    #[serde(skip)]
    pub is_unprocessed: bool,
}

impl Activity {
    fn new(activity_type: ActivityType, node_id: u64, version_id: u64, path: &str) -> Self {
        Self {
            id: 0,
            activity_type,
            node_id,
            version_id,
            path: path.to_string(),
            versioning: VersioningInfo::default(),
            document: None,
            created_at: Utc::now(),
            from_receiver: false,
            from_database: false,
            is_unprocessed: false,
        }
    }

    pub fn add_document(node_id: u64, version_id: u64, path: &str) -> Self {
        Self::new(ActivityType::AddDocument, node_id, version_id, path)
    }

    pub fn update_document(node_id: u64, version_id: u64, path: &str) -> Self {
        Self::new(ActivityType::UpdateDocument, node_id, version_id, path)
    }

    pub fn remove_tree(node_id: u64, path: &str) -> Self {
        Self::new(ActivityType::RemoveTree, node_id, 0, path)
    }

    pub fn add_tree(node_id: u64, path: &str) -> Self {
        Self::new(ActivityType::AddTree, node_id, 0, path)
    }

    pub fn rebuild(node_id: u64, version_id: u64, path: &str) -> Self {
        Self::new(ActivityType::Rebuild, node_id, version_id, path)
    }

    pub fn restore(node_id: u64, version_id: u64, path: &str) -> Self {
        Self::new(ActivityType::Restore, node_id, version_id, path)
    }

    /// Set the store-assigned id.
    pub fn with_id(mut self, id: ActivityId) -> Self {
        self.id = id;
        self
    }

    pub fn with_versioning(mut self, versioning: VersioningInfo) -> Self {
        self.versioning = versioning;
        self
    }

    pub fn with_document(mut self, document: IndexDocument) -> Self {
        self.document = Some(document);
        self
    }

    /// Mark as delivered by another process.
    pub fn received(mut self) -> Self {
        self.from_receiver = true;
        self
    }

    pub fn is_tree(&self) -> bool {
        self.activity_type.is_tree()
    }

    /// Release the document payload; it is reloaded at execution time.
    pub fn drop_document(&mut self) {
        self.document = None;
    }

    /// Whether this (newer) activity has to wait for `older`.
    ///
    /// Coarse scope test: same node, same path, or subtree containment in
    /// either direction when a tree activity is involved. It may report
    /// false dependencies but never misses a real conflict.
    pub fn must_wait_for(&self, older: &Activity) -> bool {
        if self.node_id == older.node_id
            || normalize_path(&self.path) == normalize_path(&older.path)
        {
            return true;
        }
        match (older.is_tree(), self.is_tree()) {
            (true, true) => {
                path_is_in_tree(&self.path, &older.path) || path_is_in_tree(&older.path, &self.path)
            }
            (true, false) => path_is_in_tree(&self.path, &older.path),
            (false, true) => path_is_in_tree(&older.path, &self.path),
            (false, false) => false,
        }
    }
}

/// Lowercased path without trailing slashes; the root stays "/".
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && !path.is_empty() {
        return "/".to_string();
    }
    trimmed.to_lowercase()
}

/// Case-insensitive subtree containment (`path` equals `root` or lies below it).
pub fn path_is_in_tree(path: &str, root: &str) -> bool {
    let path = normalize_path(path);
    let root = normalize_path(root);
    if root == "/" {
        return path.starts_with('/');
    }
    path == root || path.starts_with(&format!("{root}/"))
}
