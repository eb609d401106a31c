//! Durable activity store for the indexing queue.
//!
//! Provides RocksDB-backed storage with:
//! - Monotonic, never reused activity ids assigned at registration
//! - Ordered range loads and id-set loads for gap filling
//! - Running state and leases for the centralized queue
//! - Purging of finished activities without losing the id counter

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod lease;
pub mod record;

pub use db::{ActivityDb, StoreStats};
pub use error::StoreError;
pub use keys::ActivityKey;
pub use lease::{select_executable, ClaimSelection};
pub use record::{store_completion_state, ActivityRecord, RunningState};
