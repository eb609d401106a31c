//! # index-types
//!
//! Shared domain types for the indexing activity queue.
//!
//! This crate defines the data structures passed between the durable
//! activity store, the queue and the indexing engine:
//! - Activities: one index mutation request each, with scope and versioning
//! - Index documents: the precomputed document an activity writes
//! - Completion state: the frontier and gaps persisted into the index
//! - Index batches: deletions, updates and additions for the engine
//! - Settings: queue tuning and admin configuration
//!
//! ## Usage
//!
//! ```rust
//! use index_types::{Activity, CompletionState};
//!
//! let older = Activity::remove_tree(1, "/Root/Sites");
//! let newer = Activity::add_document(2, 3, "/Root/Sites/Default");
//! assert!(newer.must_wait_for(&older));
//!
//! let state = CompletionState::new(10, vec![7]);
//! assert!(!state.is_finished(7));
//! ```

pub mod activity;
pub mod completion;
pub mod config;
pub mod document;
pub mod error;
pub mod write;

pub use activity::{path_is_in_tree, Activity, ActivityId, ActivityType, VersioningInfo};
pub use completion::CompletionState;
pub use config::{AdminSettings, CommitPolicy, QueueSettings};
pub use document::IndexDocument;
pub use error::TypesError;
pub use write::{DocumentUpdate, IndexBatch, IndexTerm};
