//! Index document produced by the content/schema layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A precomputed index document for one content version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub node_id: u64,
    pub version_id: u64,
    pub path: String,

    /// Version is the last public one of its node
    #[serde(default)]
    pub is_last_public: bool,

    /// Version is the last draft of its node
    #[serde(default)]
    pub is_last_draft: bool,

    /// Field name -> extracted value
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl IndexDocument {
    pub fn new(node_id: u64, version_id: u64, path: impl Into<String>) -> Self {
        Self {
            node_id,
            version_id,
            path: path.into(),
            is_last_public: false,
            is_last_draft: false,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_flags(mut self, is_last_public: bool, is_last_draft: bool) -> Self {
        self.is_last_public = is_last_public;
        self.is_last_draft = is_last_draft;
        self
    }

    /// Full-text content: all field values joined by spaces.
    pub fn text(&self) -> String {
        self.fields
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
