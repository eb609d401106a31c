//! Dependency scheduling.
//!
//! The waiting set holds every activity that was scheduled but has not
//! finished. A new activity waits for each member whose scope overlaps its
//! own ([`Activity::must_wait_for`]); with no such member it is dispatched
//! at once. Finishing an activity clears its edges and dispatches every
//! dependent that has nothing left to wait for.
//!
//! The waiting set lock is never held across an index write.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use index_types::{Activity, ActivityId};

use crate::commit::CommitManager;
use crate::error::QueueError;
use crate::executor::{execute_isolated, Executor};
use crate::signal::{ActivityOutcome, CompletionSignal};
use crate::stats::QueueCounters;
use crate::termination::SharedHistory;

struct WaitingNode {
    /// Kept for scope checks; the document travels with the dispatched copy.
    activity: Activity,
    waiting_for: HashSet<ActivityId>,
    waiting_for_me: HashSet<ActivityId>,
    signals: Vec<CompletionSignal>,
}

impl WaitingNode {
    fn new(activity: Activity, signal: CompletionSignal) -> Self {
        Self {
            activity,
            waiting_for: HashSet::new(),
            waiting_for_me: HashSet::new(),
            signals: vec![signal],
        }
    }

    fn take_for_execution(&mut self) -> Activity {
        let activity = self.activity.clone();
        self.activity.drop_document();
        activity
    }
}

pub struct DependencyManager {
    waiting: Mutex<BTreeMap<ActivityId, WaitingNode>>,
    waiting_len: AtomicUsize,
    history: SharedHistory,
    executor: Arc<Executor>,
    commit: Arc<CommitManager>,
    counters: Arc<QueueCounters>,
}

impl DependencyManager {
    pub fn new(
        history: SharedHistory,
        executor: Arc<Executor>,
        commit: Arc<CommitManager>,
        counters: Arc<QueueCounters>,
    ) -> Self {
        Self {
            waiting: Mutex::new(BTreeMap::new()),
            waiting_len: AtomicUsize::new(0),
            history,
            executor,
            commit,
            counters,
        }
    }

    /// Number of scheduled, unfinished activities.
    pub fn waiting_len(&self) -> usize {
        self.waiting_len.load(Ordering::SeqCst)
    }

    pub fn is_working(&self) -> bool {
        self.waiting_len() > 0
    }

    /// Add an activity to the waiting set, or attach/release a duplicate.
    pub fn schedule(
        self: &Arc<Self>,
        activity: Activity,
        signal: CompletionSignal,
    ) -> Result<(), QueueError> {
        let id = activity.id;
        let ready = {
            let mut waiting = self.waiting.lock()?;

            if let Some(node) = waiting.get_mut(&id) {
                node.signals.push(signal);
                debug!(activity_id = id, "Attached duplicate to waiting activity");
                return Ok(());
            }

            if self.history.lock()?.is_finished(id) {
                drop(waiting);
                debug!(activity_id = id, "Released duplicate of finished activity");
                self.counters.record(&ActivityOutcome::Skipped);
                signal.complete(ActivityOutcome::Skipped);
                return Ok(());
            }

            let mut node = WaitingNode::new(activity, signal);
            for (other_id, other) in waiting.iter_mut() {
                if node.activity.must_wait_for(&other.activity) {
                    node.waiting_for.insert(*other_id);
                    other.waiting_for_me.insert(id);
                }
            }

            let ready = if node.waiting_for.is_empty() {
                Some(node.take_for_execution())
            } else {
                debug!(
                    activity_id = id,
                    waiting_for = ?node.waiting_for,
                    "Activity waits for overlapping activities"
                );
                None
            };
            waiting.insert(id, node);
            self.waiting_len.store(waiting.len(), Ordering::SeqCst);
            ready
        };

        if let Some(activity) = ready {
            self.dispatch(activity);
        }
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, activity: Activity) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let id = activity.id;
            let outcome = execute_isolated(Arc::clone(&manager.executor), activity).await;
            manager.complete(id, outcome).await;
        });
    }

    async fn complete(self: &Arc<Self>, id: ActivityId, outcome: ActivityOutcome) {
        let (signals, freed) = match self.finish(id) {
            Ok(result) => result,
            Err(e) => {
                error!(activity_id = id, error = %e, "Could not finish activity");
                return;
            }
        };
        self.counters.record(&outcome);

        for activity in freed {
            self.dispatch(activity);
        }

        if let Err(e) = self.commit.activity_finished().await {
            warn!(activity_id = id, error = %e, "Commit after activity failed");
        }

        for signal in signals {
            signal.complete(outcome.clone());
        }
    }

    /// Remove a finished activity and collect dependents that became free.
    fn finish(
        &self,
        id: ActivityId,
    ) -> Result<(Vec<CompletionSignal>, Vec<Activity>), QueueError> {
        let mut waiting = self.waiting.lock()?;
        let Some(node) = waiting.remove(&id) else {
            return Ok((Vec::new(), Vec::new()));
        };
        self.history.lock()?.finish(id);

        let mut freed = Vec::new();
        for dependent in &node.waiting_for_me {
            if let Some(other) = waiting.get_mut(dependent) {
                other.waiting_for.remove(&id);
                if other.waiting_for.is_empty() {
                    freed.push(other.take_for_execution());
                }
            }
        }
        freed.sort_by_key(|a| a.id);
        self.waiting_len.store(waiting.len(), Ordering::SeqCst);

        Ok((node.signals, freed))
    }
}
