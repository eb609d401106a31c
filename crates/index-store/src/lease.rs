//! Executable-activity selection for the centralized queue.
//!
//! An activity is executable when it is not done, nobody holds a live lease
//! on it, and no older unfinished activity overlaps its scope. Running
//! activities whose lease expired are handed out again.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use index_types::{Activity, ActivityId};

use crate::record::{ActivityRecord, RunningState};

/// Result of one selection pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClaimSelection {
    /// Activities the caller may lock and execute, ascending
    pub executable: Vec<ActivityId>,
    /// Ids from the caller's waiting set that are done or already purged
    pub finished: Vec<ActivityId>,
}

/// Select up to `max` executable activities from records in ascending id order.
pub fn select_executable<'a>(
    records: impl IntoIterator<Item = &'a ActivityRecord>,
    now: DateTime<Utc>,
    lease: chrono::Duration,
    max: usize,
    waiting: &HashSet<ActivityId>,
) -> ClaimSelection {
    let mut selection = ClaimSelection::default();
    let mut unfinished: Vec<&Activity> = Vec::new();
    let mut seen: HashSet<ActivityId> = HashSet::new();

    for record in records {
        let activity = &record.activity;
        seen.insert(activity.id);
        if record.is_done() {
            if waiting.contains(&activity.id) {
                selection.finished.push(activity.id);
            }
            continue;
        }

        let available = match record.running_state {
            RunningState::Waiting => true,
            RunningState::Running => record.lease_expired(now, lease),
            RunningState::Done => false,
        };
        let blocked = unfinished.iter().any(|older| activity.must_wait_for(older));

        if available && !blocked && selection.executable.len() < max {
            selection.executable.push(activity.id);
        }
        unfinished.push(activity);
    }

    // Only finished activities are ever deleted
    selection
        .finished
        .extend(waiting.iter().copied().filter(|id| !seen.contains(id)));
    selection.finished.sort_unstable();
    selection
}
