//! Health check and replay.
//!
//! Replay brings the index up to the store: every gap id and every id past
//! the frontier is loaded and executed. Ids the store does not have are
//! dropped from the gaps with a warning. Startup, restore and rebuild
//! replay from a given state; the periodic health check replays from the
//! live history and is skipped while the queue is busy.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use index_types::{Activity, ActivityId, CompletionState};

use crate::error::QueueError;
use crate::serializer::Serializer;
use crate::signal::CompletionSignal;
use crate::store::ActivityStore;
use crate::termination::SharedHistory;

/// What one replay did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// The queue was busy and nothing was done
    pub skipped: bool,
    /// Gap activities found and executed
    pub gaps_replayed: usize,
    /// Gap ids missing from the store, removed from the history
    pub gaps_dropped: usize,
    /// Activities past the frontier executed
    pub range_replayed: usize,
    /// Ids past the frontier missing from the store
    pub range_dropped: usize,
}

impl ReplayReport {
    pub fn replayed(&self) -> usize {
        self.gaps_replayed + self.range_replayed
    }
}

pub struct HealthCheck {
    store: Arc<dyn ActivityStore>,
    serializer: Arc<Serializer>,
    history: SharedHistory,
    chunk: u64,
}

fn unprocessed(mut activity: Activity) -> Activity {
    activity.from_database = true;
    activity.is_unprocessed = true;
    activity
}

impl HealthCheck {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        serializer: Arc<Serializer>,
        history: SharedHistory,
        chunk: u64,
    ) -> Self {
        Self {
            store,
            serializer,
            history,
            chunk: chunk.max(1),
        }
    }

    /// Replay from the live history unless the queue is working.
    pub async fn run(&self) -> Result<ReplayReport, QueueError> {
        if self.serializer.is_working() {
            debug!("Health check skipped, queue is working");
            return Ok(ReplayReport {
                skipped: true,
                ..Default::default()
            });
        }

        let state = self.history.lock()?.state();
        let report = self.replay(&state).await?;
        if report.replayed() > 0 || report.gaps_dropped > 0 || report.range_dropped > 0 {
            info!(
                gaps_replayed = report.gaps_replayed,
                gaps_dropped = report.gaps_dropped,
                range_replayed = report.range_replayed,
                range_dropped = report.range_dropped,
                "Health check repaired completion state"
            );
        } else {
            debug!(state = %state, "Health check found nothing to do");
        }
        Ok(report)
    }

    /// Execute the gaps and the range after the frontier of `state`, and wait
    /// for all of them.
    pub async fn replay(&self, state: &CompletionState) -> Result<ReplayReport, QueueError> {
        let mut report = ReplayReport::default();
        let mut signals: Vec<CompletionSignal> = Vec::new();

        let mut missing_gaps = Vec::new();
        for chunk in state.gaps.chunks(self.chunk as usize) {
            let loaded = self.store.load_activities_by_ids(chunk).await?;
            let found: HashSet<ActivityId> = loaded.iter().map(|a| a.id).collect();
            missing_gaps.extend(chunk.iter().copied().filter(|id| !found.contains(id)));

            report.gaps_replayed += loaded.len();
            for activity in loaded {
                signals.push(self.serializer.enqueue(unprocessed(activity)).await?);
            }
        }
        if !missing_gaps.is_empty() {
            warn!(ids = ?missing_gaps, "Gap activities not found in store, dropping them");
            report.gaps_dropped = self.history.lock()?.remove_gaps(&missing_gaps);
        }

        let last_stored = self.store.last_activity_id().await?;
        let mut missing_range = Vec::new();
        let mut from = state.last_activity_id + 1;
        while from <= last_stored {
            let to = (from + self.chunk - 1).min(last_stored);
            let loaded = self.store.load_activities(from, to).await?;
            let found: HashSet<ActivityId> = loaded.iter().map(|a| a.id).collect();
            missing_range.extend((from..=to).filter(|id| !found.contains(id)));

            report.range_replayed += loaded.len();
            for activity in loaded {
                signals.push(self.serializer.enqueue(unprocessed(activity)).await?);
            }
            from = to + 1;
        }

        debug!(count = signals.len(), "Waiting for replayed activities");
        join_all(signals.iter().map(|signal| signal.wait())).await;

        // Missing ids below a replayed id turned into gaps while it finished
        if !missing_range.is_empty() {
            report.range_dropped = self.history.lock()?.remove_gaps(&missing_range);
            warn!(
                count = missing_range.len(),
                dropped = report.range_dropped,
                "Activities past the frontier not found in store"
            );
        }

        Ok(report)
    }

    /// Run the health check every `interval` until `token` is cancelled.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires at once; startup already replayed.
        ticker.tick().await;
        info!(interval_secs = interval.as_secs(), "Health check loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run().await {
                        warn!(error = %e, "Health check failed");
                    }
                }
            }
        }
        debug!("Health check loop stopped");
    }
}
