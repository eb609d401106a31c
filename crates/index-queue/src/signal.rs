//! One-shot completion signals.
//!
//! Every queued activity carries a signal. Waiters subscribe to it, and a
//! duplicate arrival of the same id attaches one more signal to the queued
//! activity so all callers are released together.

use std::sync::Arc;

use tokio::sync::watch;

/// How an activity finished, as seen by its waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// Written to the index
    Executed,
    /// The index write failed; the activity still counts as finished
    Failed(String),
    /// Released without execution, the id had already finished
    Skipped,
    /// Another process sharing the store executed it
    FinishedElsewhere,
}

impl ActivityOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ActivityOutcome::Failed(_))
    }
}

/// Resolved at most once; later completions are ignored.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<Option<ActivityOutcome>>>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Resolve the signal. Returns false if it was already resolved.
    pub fn complete(&self, outcome: ActivityOutcome) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        })
    }

    pub fn is_completed(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Outcome if already resolved.
    pub fn outcome(&self) -> Option<ActivityOutcome> {
        self.tx.borrow().clone()
    }

    /// Wait until the signal resolves.
    pub async fn wait(&self) -> ActivityOutcome {
        let mut rx = self.tx.subscribe();
        let resolved = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| value.clone());
        // The sender lives as long as `self`, so the wait cannot fail.
        resolved.unwrap_or(ActivityOutcome::Skipped)
    }
}
