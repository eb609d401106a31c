//! Stored form of an activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

use index_types::{Activity, ActivityId, CompletionState};

use crate::error::StoreError;

/// Execution state tracked by the store (used by the centralized queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunningState {
    #[default]
    Waiting,
    Running,
    Done,
}

/// An activity together with its store-side execution bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub activity: Activity,

    #[serde(default)]
    pub running_state: RunningState,

    /// Process holding the execution lease
    #[serde(default)]
    pub lock_owner: Option<String>,

    /// When the lease was taken or last refreshed
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub lock_time: Option<DateTime<Utc>>,
}

impl ActivityRecord {
    pub fn new(activity: Activity) -> Self {
        Self {
            activity,
            running_state: RunningState::Waiting,
            lock_owner: None,
            lock_time: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.running_state == RunningState::Done
    }

    /// Whether a running lease is older than `lease`.
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        match self.lock_time {
            Some(at) => now - at > lease,
            None => true,
        }
    }

    /// Take the lease for `owner`.
    pub fn lock(&mut self, owner: &str, now: DateTime<Utc>) {
        self.running_state = RunningState::Running;
        self.lock_owner = Some(owner.to_string());
        self.lock_time = Some(now);
    }

    /// Whether `owner` holds the running lease.
    pub fn is_held_by(&self, owner: &str) -> bool {
        self.running_state == RunningState::Running && self.lock_owner.as_deref() == Some(owner)
    }

    /// Set a state, clearing the lease unless the activity is running.
    pub fn set_state(&mut self, state: RunningState) {
        self.running_state = state;
        if state != RunningState::Running {
            self.lock_owner = None;
            self.lock_time = None;
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(StoreError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(StoreError::from)
    }
}

/// Completion state of a store whose ids run up to `last_id`.
///
/// The frontier is the highest id that is done or purged; unfinished
/// records below it are the gaps.
pub fn store_completion_state<'a>(
    last_id: ActivityId,
    records: impl IntoIterator<Item = &'a ActivityRecord>,
) -> CompletionState {
    let unfinished: BTreeSet<ActivityId> = records
        .into_iter()
        .filter(|r| !r.is_done())
        .map(|r| r.activity.id)
        .collect();
    let mut frontier = last_id;
    while frontier > 0 && unfinished.contains(&frontier) {
        frontier -= 1;
    }
    CompletionState::new(frontier, unfinished.into_iter().collect())
}
