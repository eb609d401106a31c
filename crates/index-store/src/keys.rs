//! Key encoding and decoding for the activity store.
//!
//! Key format: `act:{id:020}`. Zero padding keeps lexicographic order equal
//! to numeric order so range scans follow activity ids.

use index_types::ActivityId;

use crate::error::StoreError;

/// Meta key holding the next id to assign
pub const NEXT_ID_KEY: &[u8] = b"next_id";

/// Key for activity records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityKey {
    pub id: ActivityId,
}

impl ActivityKey {
    pub fn new(id: ActivityId) -> Self {
        Self { id }
    }

    /// Encode key to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("act:{:020}", self.id).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StoreError::Key(format!("Invalid UTF-8: {}", e)))?;

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 || parts[0] != "act" {
            return Err(StoreError::Key(format!("Invalid activity key format: {}", s)));
        }

        let id: ActivityId = parts[1]
            .parse()
            .map_err(|e| StoreError::Key(format!("Invalid activity id: {}", e)))?;

        Ok(Self { id })
    }
}
