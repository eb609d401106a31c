//! Commit policy.
//!
//! - **Immediate**: commit after every finished activity (centralized index).
//! - **Near-real-time**: batch commits; commit when `max_wait` passed since
//!   the last commit, or at once for the first activity after an idle
//!   period. Checked on every finished activity and by a heartbeat.
//!
//! Every commit writes the current completion state into the index first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use index_types::{CommitPolicy, QueueSettings};

use crate::engine::IndexingEngine;
use crate::error::QueueError;
use crate::termination::SharedHistory;

#[derive(Debug)]
struct CommitTimes {
    last_commit: Instant,
    last_activity: Option<Instant>,
    pending: u64,
}

pub struct CommitManager {
    policy: CommitPolicy,
    max_wait: Duration,
    idle: Duration,
    engine: Arc<dyn IndexingEngine>,
    history: SharedHistory,
    times: Mutex<CommitTimes>,
    /// Serializes state write + commit pairs.
    commit_lock: tokio::sync::Mutex<()>,
    commits: AtomicU64,
}

impl CommitManager {
    pub fn new(
        engine: Arc<dyn IndexingEngine>,
        history: SharedHistory,
        settings: &QueueSettings,
    ) -> Self {
        let policy = settings.commit_policy.unwrap_or(if engine.is_centralized() {
            CommitPolicy::Immediate
        } else {
            CommitPolicy::NearRealTime
        });
        debug!(?policy, "Commit policy selected");

        Self {
            policy,
            max_wait: settings.commit_max_wait(),
            idle: settings.commit_idle(),
            engine,
            history,
            times: Mutex::new(CommitTimes {
                last_commit: Instant::now(),
                last_activity: None,
                pending: 0,
            }),
            commit_lock: tokio::sync::Mutex::new(()),
            commits: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Number of commits so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Activities finished since the last commit.
    pub fn pending(&self) -> Result<u64, QueueError> {
        Ok(self.times.lock()?.pending)
    }

    /// Called once per finished activity. Returns whether it committed.
    pub async fn activity_finished(&self) -> Result<bool, QueueError> {
        let due = {
            let mut times = self.times.lock()?;
            let now = Instant::now();
            let after_idle = times.pending == 0
                && times
                    .last_activity
                    .map_or(true, |at| now.duration_since(at) >= self.idle);
            times.pending += 1;
            times.last_activity = Some(now);

            match self.policy {
                CommitPolicy::Immediate => true,
                CommitPolicy::NearRealTime => {
                    after_idle || now.duration_since(times.last_commit) >= self.max_wait
                }
            }
        };

        if due {
            self.commit().await?;
        }
        Ok(due)
    }

    /// Heartbeat check: commit pending work that waited long enough or went quiet.
    pub async fn heartbeat(&self) -> Result<bool, QueueError> {
        let due = {
            let times = self.times.lock()?;
            let now = Instant::now();
            let quiet = times
                .last_activity
                .is_some_and(|at| now.duration_since(at) >= self.idle);
            times.pending > 0
                && (now.duration_since(times.last_commit) >= self.max_wait || quiet)
        };

        if due {
            self.commit().await?;
        }
        Ok(due)
    }

    /// Persist the completion state and commit.
    pub async fn commit(&self) -> Result<(), QueueError> {
        let _guard = self.commit_lock.lock().await;

        let state = self.history.lock()?.state();
        let pending = self.times.lock()?.pending;

        // A failed commit leaves the pending count for the next attempt
        self.engine.write_completion_state(&state).await?;
        self.engine.commit().await?;
        {
            let mut times = self.times.lock()?;
            times.pending = times.pending.saturating_sub(pending);
            times.last_commit = Instant::now();
        }
        self.commits.fetch_add(1, Ordering::SeqCst);

        debug!(state = %state, pending, "Committed index");
        Ok(())
    }

    /// Run the heartbeat until `token` is cancelled.
    pub async fn run_heartbeat(self: Arc<Self>, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "Commit heartbeat started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!(error = %e, "Heartbeat commit failed");
                    }
                }
            }
        }
        debug!("Commit heartbeat stopped");
    }
}
