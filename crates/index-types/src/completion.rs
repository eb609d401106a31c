//! Completion state persisted into the index.
//!
//! The state tells which activities the index already reflects: every id at
//! or below `last_activity_id` that is not listed in `gaps`. It is written
//! with every commit so that a restarted process knows what to replay.

use serde::{Deserialize, Serialize};

use crate::activity::ActivityId;
use crate::error::TypesError;

/// Snapshot of the termination history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionState {
    /// Highest finished activity id
    pub last_activity_id: ActivityId,

    /// Ids below `last_activity_id` that have not finished, ascending
    #[serde(default)]
    pub gaps: Vec<ActivityId>,
}

impl CompletionState {
    /// Create a normalized state: gaps sorted, deduplicated and below the frontier.
    pub fn new(last_activity_id: ActivityId, gaps: Vec<ActivityId>) -> Self {
        let mut gaps: Vec<ActivityId> = gaps
            .into_iter()
            .filter(|id| *id > 0 && *id < last_activity_id)
            .collect();
        gaps.sort_unstable();
        gaps.dedup();
        Self {
            last_activity_id,
            gaps,
        }
    }

    /// Whether `id` is known to be reflected in the index.
    pub fn is_finished(&self, id: ActivityId) -> bool {
        id <= self.last_activity_id && self.gaps.binary_search(&id).is_err()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::from)
    }
}

impl std::fmt::Display for CompletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gaps: Vec<String> = self.gaps.iter().map(|id| id.to_string()).collect();
        write!(f, "{}({})", self.last_activity_id, gaps.join(","))
    }
}
