//! Error types for the indexing queue.

use index_engine::EngineError;
use index_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the indexing queue
#[derive(Error, Debug)]
pub enum QueueError {
    /// Activity store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Content index operation failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Document source could not produce a document
    #[error("Document source error: {0}")]
    DocumentSource(String),

    /// Invalid queue settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared structure's lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    Poisoned(String),

    /// The caller's wait was cancelled; the activity itself still runs
    #[error("Wait for activity {0} cancelled")]
    Cancelled(u64),

    /// Queue is already running
    #[error("Queue is already running")]
    AlreadyRunning,

    /// Queue is not running
    #[error("Queue is not running")]
    NotRunning,
}

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        QueueError::Poisoned(err.to_string())
    }
}
