//! Centralized indexing queue.
//!
//! For a single index shared by every process. Nothing is routed through
//! an in-process dependency graph: each process polls the store for
//! executable activities, which the store hands out under a lease so no two
//! processes run the same one. Locally registered activities sit in a
//! waiting map until the store reports them done.
//!
//! Claimed activities run on their own tasks while a refresh loop keeps
//! their leases alive, so a slow index write is never taken over by another
//! process. The completion state is read back from the store, which also
//! knows about activities other processes finished.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use index_store::RunningState;
use index_types::{Activity, ActivityId, CompletionState, QueueSettings};

use crate::commit::CommitManager;
use crate::engine::IndexingEngine;
use crate::error::QueueError;
use crate::executor::{execute_isolated, Executor};
use crate::queue::Background;
use crate::signal::{ActivityOutcome, CompletionSignal};
use crate::source::DocumentSource;
use crate::stats::{QueueCounters, QueueStats};
use crate::store::ActivityStore;
use crate::termination::{SharedHistory, TerminationHistory};

/// Random extra delay in `0..max_ms` milliseconds.
fn poll_jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

/// Leases are refreshed three times per lease period.
fn refresh_interval(lease: Duration) -> Duration {
    (lease / 3).max(Duration::from_millis(20))
}

pub struct CentralizedIndexingQueue {
    /// Lease owner name of this process
    owner: String,
    settings: QueueSettings,
    store: Arc<dyn ActivityStore>,
    executor: Arc<Executor>,
    commit: Arc<CommitManager>,
    history: SharedHistory,
    counters: Arc<QueueCounters>,
    waiting: Mutex<HashMap<ActivityId, Vec<CompletionSignal>>>,
    /// Claimed by this process and not marked done yet
    in_flight: Mutex<HashSet<ActivityId>>,
    tasks: TaskTracker,
    wake: Notify,
    is_running: AtomicBool,
    background: Mutex<Option<Background>>,
    refresher: Mutex<Option<Background>>,
}

impl CentralizedIndexingQueue {
    pub fn new(
        owner: impl Into<String>,
        store: Arc<dyn ActivityStore>,
        engine: Arc<dyn IndexingEngine>,
        documents: Arc<dyn DocumentSource>,
        settings: QueueSettings,
    ) -> Result<Self, QueueError> {
        settings.validate().map_err(QueueError::Config)?;

        let history = TerminationHistory::shared(&CompletionState::default());
        let executor = Arc::new(Executor::new(engine.clone(), store.clone(), documents));
        let commit = Arc::new(CommitManager::new(engine, history.clone(), &settings));

        Ok(Self {
            owner: owner.into(),
            settings,
            store,
            executor,
            commit,
            history,
            counters: Arc::new(QueueCounters::default()),
            waiting: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            tasks: TaskTracker::new(),
            wake: Notify::new(),
            is_running: AtomicBool::new(false),
            background: Mutex::new(None),
            refresher: Mutex::new(None),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Execute every unprocessed activity, then start polling.
    ///
    /// Returns how many activities the startup pass executed.
    pub async fn start(self: &Arc<Self>) -> Result<usize, QueueError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyRunning);
        }
        self.tasks.reopen();

        let token = CancellationToken::new();
        let refresher = tokio::spawn(Arc::clone(self).run_refresh_loop(token.clone()));
        *self.refresher.lock()? = Some(Background {
            token,
            tasks: vec![refresher],
        });

        let startup = match self.sync_history().await {
            Ok(()) => self.execute_unprocessed().await,
            Err(e) => Err(e),
        };
        let executed = match startup {
            Ok(executed) => executed,
            Err(e) => {
                self.stop_refresher().await;
                self.is_running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(Arc::clone(self).run_poll_loop(token.clone())),
            tokio::spawn(Arc::clone(self).run_cleanup_loop(token.clone())),
        ];
        *self.background.lock()? = Some(Background { token, tasks });

        info!(owner = %self.owner, executed, "Centralized indexing queue started");
        Ok(executed)
    }

    pub async fn shutdown(&self) -> Result<(), QueueError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Err(QueueError::NotRunning);
        }
        let background = self.background.lock()?.take();
        if let Some(background) = background {
            background.stop().await;
        }
        self.tasks.close();
        self.tasks.wait().await;
        self.stop_refresher().await;

        if let Err(e) = self.sync_history().await {
            warn!(owner = %self.owner, error = %e, "Could not read completion state from store");
        }
        self.commit.commit().await?;
        info!(owner = %self.owner, "Centralized indexing queue stopped");
        Ok(())
    }

    async fn stop_refresher(&self) {
        let refresher = match self.refresher.lock() {
            Ok(mut refresher) => refresher.take(),
            Err(e) => {
                warn!(error = %e, "Lease refresher unavailable");
                None
            }
        };
        if let Some(refresher) = refresher {
            refresher.stop().await;
        }
    }

    /// Replay unprocessed activities in bounded parallel batches. Each batch
    /// only holds activities with no older unfinished overlap.
    async fn execute_unprocessed(&self) -> Result<usize, QueueError> {
        let unprocessed = self.store.load_unprocessed().await?;
        if unprocessed.is_empty() {
            return Ok(0);
        }
        info!(count = unprocessed.len(), "Executing unprocessed activities");

        let parallelism = self.settings.startup_parallelism;
        let none = HashSet::new();
        let mut executed = 0;
        loop {
            let batch = self
                .store
                .load_executable(&self.owner, parallelism, self.settings.lease_timeout(), &none)
                .await?;
            if batch.activities.is_empty() {
                break;
            }
            executed += batch.activities.len();
            self.mark_in_flight(&batch.activities)?;
            stream::iter(batch.activities)
                .map(|activity| self.run_claimed(activity))
                .buffer_unordered(parallelism)
                .collect::<Vec<_>>()
                .await;
        }
        Ok(executed)
    }

    /// Register an activity and wait until some process executed it.
    pub async fn register_and_execute(&self, activity: Activity) -> Result<ActivityOutcome, QueueError> {
        self.register_and_execute_with_cancel(activity, CancellationToken::new())
            .await
    }

    pub async fn register_and_execute_with_cancel(
        &self,
        activity: Activity,
        cancel: CancellationToken,
    ) -> Result<ActivityOutcome, QueueError> {
        if !self.is_running() {
            return Err(QueueError::NotRunning);
        }

        let activity = self.store.register_activity(&activity).await?;
        let id = activity.id;
        let signal = CompletionSignal::new();
        self.waiting.lock()?.entry(id).or_default().push(signal.clone());
        self.wake.notify_one();

        tokio::select! {
            outcome = signal.wait() => Ok(outcome),
            _ = cancel.cancelled() => {
                debug!(activity_id = id, "Wait for activity cancelled");
                Err(QueueError::Cancelled(id))
            }
        }
    }

    /// One poll: claim a batch and start executing it, release waiters of
    /// activities other processes finished.
    ///
    /// At most `poll_batch_size` claimed activities run at a time. Returns
    /// how many were claimed.
    pub async fn poll_once(self: &Arc<Self>) -> Result<usize, QueueError> {
        // Waiters of activities running here are released by their own run
        let waited: Vec<ActivityId> = self.waiting.lock()?.keys().copied().collect();
        let in_flight = self.in_flight.lock()?.clone();
        let waiting: HashSet<ActivityId> = waited
            .into_iter()
            .filter(|id| !in_flight.contains(id))
            .collect();
        let capacity = self.settings.poll_batch_size.saturating_sub(in_flight.len());

        let batch = self
            .store
            .load_executable(&self.owner, capacity, self.settings.lease_timeout(), &waiting)
            .await?;

        if !batch.finished.is_empty() {
            if let Err(e) = self.sync_history().await {
                warn!(owner = %self.owner, error = %e, "Could not read completion state from store");
            }
            for id in batch.finished {
                if self.release(id, ActivityOutcome::FinishedElsewhere) > 0 {
                    self.counters.record(&ActivityOutcome::FinishedElsewhere);
                }
            }
        }

        let count = batch.activities.len();
        if count > 0 {
            debug!(owner = %self.owner, count, "Executing claimed activities");
            self.mark_in_flight(&batch.activities)?;
            for activity in batch.activities {
                let queue = Arc::clone(self);
                self.tasks.spawn(async move {
                    queue.run_claimed(activity).await;
                });
            }
        }
        Ok(count)
    }

    fn mark_in_flight(&self, activities: &[Activity]) -> Result<(), QueueError> {
        self.in_flight
            .lock()?
            .extend(activities.iter().map(|a| a.id));
        Ok(())
    }

    /// Extend the leases this process holds on claimed and waited-for ids.
    pub async fn refresh_leases(&self) -> Result<usize, QueueError> {
        let mut ids: Vec<ActivityId> = self.in_flight.lock()?.iter().copied().collect();
        ids.extend(self.waiting.lock()?.keys().copied());
        if ids.is_empty() {
            return Ok(0);
        }
        ids.sort_unstable();
        ids.dedup();
        self.store.refresh_lock(&self.owner, &ids).await
    }

    /// Replace the termination history with what the store reports.
    async fn sync_history(&self) -> Result<(), QueueError> {
        let state = self.store.completion_state().await?;
        self.history.lock()?.reset(&state);
        Ok(())
    }

    async fn run_claimed(&self, activity: Activity) -> ActivityOutcome {
        let id = activity.id;
        let outcome = execute_isolated(Arc::clone(&self.executor), activity).await;

        if let Err(e) = self.store.set_running_state(id, RunningState::Done).await {
            warn!(activity_id = id, error = %e, "Could not mark activity done");
        }
        if let Err(e) = self.sync_history().await {
            warn!(activity_id = id, error = %e, "Could not read completion state from store");
            match self.history.lock() {
                Ok(mut history) => history.finish(id),
                Err(e) => warn!(activity_id = id, error = %e, "Termination history unavailable"),
            }
        }
        self.counters.record(&outcome);
        if let Err(e) = self.commit.activity_finished().await {
            warn!(activity_id = id, error = %e, "Commit after activity failed");
        }

        self.release(id, outcome.clone());
        match self.in_flight.lock() {
            Ok(mut in_flight) => {
                in_flight.remove(&id);
            }
            Err(e) => warn!(activity_id = id, error = %e, "In-flight set unavailable"),
        }
        outcome
    }

    /// Complete every waiter of `id`. Returns how many were waiting.
    fn release(&self, id: ActivityId, outcome: ActivityOutcome) -> usize {
        let signals = match self.waiting.lock() {
            Ok(mut waiting) => waiting.remove(&id).unwrap_or_default(),
            Err(e) => {
                warn!(activity_id = id, error = %e, "Waiting map unavailable");
                return 0;
            }
        };
        for signal in &signals {
            signal.complete(outcome.clone());
        }
        signals.len()
    }

    async fn run_poll_loop(self: Arc<Self>, token: CancellationToken) {
        info!(
            owner = %self.owner,
            interval_ms = self.settings.poll_interval_ms,
            "Activity poll loop started"
        );
        loop {
            let delay = self.settings.poll_interval() + poll_jitter(self.settings.poll_jitter_ms);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
            if let Err(e) = self.poll_once().await {
                warn!(owner = %self.owner, error = %e, "Activity poll failed");
            }
        }
        debug!(owner = %self.owner, "Activity poll loop stopped");
    }

    async fn run_refresh_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(refresh_interval(self.settings.lease_timeout()));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.refresh_leases().await {
                        Ok(0) => {}
                        Ok(count) => debug!(owner = %self.owner, count, "Refreshed leases"),
                        Err(e) => warn!(owner = %self.owner, error = %e, "Lease refresh failed"),
                    }
                }
            }
        }
    }

    async fn run_cleanup_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.cleanup_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.store.delete_finished().await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Deleted finished activities"),
                        Err(e) => warn!(error = %e, "Finished activity cleanup failed"),
                    }
                }
            }
        }
    }

    /// Completion state of the shared store as last read.
    pub fn current_completion_state(&self) -> Result<CompletionState, QueueError> {
        Ok(self.history.lock()?.state())
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            arrival_length: 0,
            waiting_length: self.waiting.lock()?.len(),
            executed: self.counters.executed(),
            failed: self.counters.failed(),
            skipped: self.counters.skipped(),
            finished_elsewhere: self.counters.finished_elsewhere(),
            commits: self.commit.commit_count(),
            completion_state: self.current_completion_state()?,
        })
    }
}
