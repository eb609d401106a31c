//! # index-engine
//!
//! Full-text content index written by the indexing activity queue.
//!
//! ## Features
//! - Embedded Tantivy index with MmapDirectory for persistence (or RAM for tests)
//! - Term deletes by version id, node id and subtree
//! - Commits carry the queue's completion state as commit payload, so the
//!   index itself records which activities it reflects

pub mod document;
pub mod error;
pub mod index;
pub mod schema;

pub use document::{ancestor_paths, index_document_to_doc, index_term_to_term, tree_term_text};
pub use error::EngineError;
pub use index::{open_or_create_index, ContentIndex, ContentIndexConfig};
pub use schema::{build_content_schema, ContentSchema};
