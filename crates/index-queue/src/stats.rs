//! Queue counters and diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use index_types::CompletionState;

use crate::signal::ActivityOutcome;

/// Outcome counters, updated as activities finish.
#[derive(Debug, Default)]
pub struct QueueCounters {
    executed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    finished_elsewhere: AtomicU64,
}

impl QueueCounters {
    pub fn record(&self, outcome: &ActivityOutcome) {
        let counter = match outcome {
            ActivityOutcome::Executed => &self.executed,
            ActivityOutcome::Failed(_) => &self.failed,
            ActivityOutcome::Skipped => &self.skipped,
            ActivityOutcome::FinishedElsewhere => &self.finished_elsewhere,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn finished_elsewhere(&self) -> u64 {
        self.finished_elsewhere.load(Ordering::Relaxed)
    }
}

/// Snapshot of the queue for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Activities in the arrival queue
    pub arrival_length: usize,
    /// Activities scheduled but not finished
    pub waiting_length: usize,
    pub executed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Waited-for activities another process executed
    pub finished_elsewhere: u64,
    pub commits: u64,
    pub completion_state: CompletionState,
}
