//! # index-queue
//!
//! Indexing activity queue: applies index mutations ("activities") to a
//! search index in a consistent order while executing unrelated work in
//! parallel.
//!
//! Two variants:
//! - [`IndexingQueue`]: one replica per process. Activities are serialized
//!   by id, scheduled by scope overlap, committed near-real-time, and the
//!   completion state stored in the index drives recovery.
//! - [`CentralizedIndexingQueue`]: one shared index. Processes poll the
//!   activity store for executable work under a lease and commit at once.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use index_engine::ContentIndex;
//! use index_queue::{IndexingQueue, InMemoryActivityStore, InMemoryDocumentSource, TantivyEngine};
//! use index_types::{Activity, IndexDocument, QueueSettings};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let index = Arc::new(ContentIndex::in_memory()?);
//! let queue = IndexingQueue::new(
//!     Arc::new(InMemoryActivityStore::new()),
//!     Arc::new(TantivyEngine::new(index)),
//!     Arc::new(InMemoryDocumentSource::new()),
//!     QueueSettings::default(),
//! )?;
//! queue.start().await?;
//!
//! let activity = Activity::add_document(1, 1, "/Root/Sites")
//!     .with_document(IndexDocument::new(1, 1, "/Root/Sites"));
//! queue.register_and_execute(activity).await?;
//! queue.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod centralized;
pub mod commit;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod executor;
pub mod health;
pub mod queue;
pub mod serializer;
pub mod signal;
pub mod source;
pub mod stats;
pub mod store;
pub mod termination;

#[cfg(test)]
mod test_support;

pub use centralized::CentralizedIndexingQueue;
pub use commit::CommitManager;
pub use dependency::DependencyManager;
pub use engine::{IndexingEngine, TantivyEngine};
pub use error::QueueError;
pub use executor::Executor;
pub use health::{HealthCheck, ReplayReport};
pub use queue::IndexingQueue;
pub use serializer::Serializer;
pub use signal::{ActivityOutcome, CompletionSignal};
pub use source::{DocumentSource, InMemoryDocumentSource};
pub use stats::{QueueCounters, QueueStats};
pub use store::{ActivityStore, ExecutableBatch, InMemoryActivityStore};
pub use termination::TerminationHistory;
