//! Termination history: which activities have finished.
//!
//! The frontier (`last`) is the highest finished id. Ids below it that have
//! not finished are kept as gaps. Finishing an id past the frontier moves
//! the frontier there and turns every skipped id into a gap; finishing a gap
//! id closes it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use index_types::{ActivityId, CompletionState};

/// Completion bookkeeping shared by the scheduler and the commit manager.
pub type SharedHistory = Arc<Mutex<TerminationHistory>>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TerminationHistory {
    last: ActivityId,
    gaps: BTreeSet<ActivityId>,
}

impl TerminationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: &CompletionState) -> Self {
        let mut history = Self::new();
        history.reset(state);
        history
    }

    pub fn shared(state: &CompletionState) -> SharedHistory {
        Arc::new(Mutex::new(Self::from_state(state)))
    }

    /// Replace the contents with `state`.
    pub fn reset(&mut self, state: &CompletionState) {
        self.last = state.last_activity_id;
        self.gaps = state
            .gaps
            .iter()
            .copied()
            .filter(|id| *id > 0 && *id < state.last_activity_id)
            .collect();
    }

    /// Record a finished activity.
    pub fn finish(&mut self, id: ActivityId) {
        if id > self.last {
            self.gaps.extend(self.last + 1..id);
            self.last = id;
        } else {
            self.gaps.remove(&id);
        }
    }

    pub fn is_finished(&self, id: ActivityId) -> bool {
        id <= self.last && !self.gaps.contains(&id)
    }

    /// Forget gap ids that will never finish (not present in the store).
    pub fn remove_gaps(&mut self, ids: &[ActivityId]) -> usize {
        ids.iter().filter(|id| self.gaps.remove(id)).count()
    }

    pub fn last_activity_id(&self) -> ActivityId {
        self.last
    }

    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }

    pub fn state(&self) -> CompletionState {
        CompletionState {
            last_activity_id: self.last,
            gaps: self.gaps.iter().copied().collect(),
        }
    }
}
