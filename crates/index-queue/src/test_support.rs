//! Engine double that records what was written and when.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use index_types::{CompletionState, IndexBatch, IndexTerm};

use crate::engine::IndexingEngine;
use crate::error::QueueError;

#[derive(Default)]
pub struct RecordingEngine {
    centralized: bool,
    delay: Duration,
    failing: Mutex<HashSet<u64>>,
    events: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
    pending_state: Mutex<Option<CompletionState>>,
    committed_state: Mutex<Option<CompletionState>>,
    commits: AtomicUsize,
    failing_commits: AtomicUsize,
    clears: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Short name of a batch: the main document version, else the first deletion.
pub fn batch_label(batch: &IndexBatch) -> String {
    if let Some(update) = batch.updates.last() {
        return format!("v{}", update.document.version_id);
    }
    if let Some(term) = batch.deletions.first() {
        return match term {
            IndexTerm::VersionId(id) => format!("v{id}"),
            IndexTerm::NodeId(id) => format!("node:{id}"),
            IndexTerm::InTree(path) => format!("tree:{path}"),
        };
    }
    batch
        .additions
        .first()
        .map(|doc| format!("v{}", doc.version_id))
        .unwrap_or_default()
}

fn mentions(batch: &IndexBatch, version: u64) -> bool {
    batch.deletions.contains(&IndexTerm::VersionId(version))
        || batch.updates.iter().any(|u| u.document.version_id == version)
        || batch.additions.iter().any(|d| d.version_id == version)
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn centralized() -> Self {
        Self {
            centralized: true,
            ..Self::default()
        }
    }

    /// Every write takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Pretend the index was committed with `state` before.
    pub fn with_committed_state(self, state: CompletionState) -> Self {
        *self.committed_state.lock().unwrap() = Some(state);
        self
    }

    /// Fail every write that touches `version`.
    pub fn fail_on(&self, version: u64) {
        self.failing.lock().unwrap().insert(version);
    }

    /// Fail the next `count` commits.
    pub fn fail_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// "start:label" / "end:label" in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Labels of successful writes in completion order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn committed_state(&self) -> Option<CompletionState> {
        self.committed_state.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Position of an event, for ordering assertions.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

#[async_trait]
impl IndexingEngine for RecordingEngine {
    fn is_centralized(&self) -> bool {
        self.centralized
    }

    async fn write_index(&self, batch: IndexBatch) -> Result<(), QueueError> {
        let label = batch_label(&batch);
        let failing = {
            let failing = self.failing.lock().unwrap();
            failing.iter().any(|v| mentions(&batch, *v))
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("start:{label}"));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.events.lock().unwrap().push(format!("end:{label}"));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if failing {
            return Err(QueueError::DocumentSource(format!("injected failure for {label}")));
        }
        self.executed.lock().unwrap().push(label);
        Ok(())
    }

    async fn commit(&self) -> Result<(), QueueError> {
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::DocumentSource("injected commit failure".to_string()));
        }
        let state = self.pending_state.lock().unwrap().clone();
        if state.is_some() {
            *self.committed_state.lock().unwrap() = state;
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_index(&self) -> Result<(), QueueError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().clear();
        Ok(())
    }

    async fn write_completion_state(&self, state: &CompletionState) -> Result<(), QueueError> {
        *self.pending_state.lock().unwrap() = Some(state.clone());
        Ok(())
    }

    async fn read_completion_state(&self) -> Result<Option<CompletionState>, QueueError> {
        Ok(self.committed_state())
    }
}
