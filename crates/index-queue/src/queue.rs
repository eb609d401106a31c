//! Distributed indexing queue.
//!
//! One instance per process, each writing its own index replica. Local
//! writes come in through [`IndexingQueue::register_and_execute`], activities
//! from other processes through [`IndexingQueue::enqueue_received`].
//!
//! Flow: register in store -> [`Serializer`] -> [`DependencyManager`] ->
//! [`Executor`] -> [`CommitManager`] -> termination history -> waiters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use index_types::{Activity, CommitPolicy, CompletionState, QueueSettings};

use crate::commit::CommitManager;
use crate::dependency::DependencyManager;
use crate::engine::IndexingEngine;
use crate::error::QueueError;
use crate::executor::Executor;
use crate::health::{HealthCheck, ReplayReport};
use crate::serializer::Serializer;
use crate::signal::{ActivityOutcome, CompletionSignal};
use crate::source::DocumentSource;
use crate::stats::{QueueCounters, QueueStats};
use crate::store::ActivityStore;
use crate::termination::{SharedHistory, TerminationHistory};

/// Background loops of a started queue.
pub(crate) struct Background {
    pub(crate) token: CancellationToken,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

impl Background {
    pub(crate) async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub struct IndexingQueue {
    settings: QueueSettings,
    store: Arc<dyn ActivityStore>,
    engine: Arc<dyn IndexingEngine>,
    history: SharedHistory,
    serializer: Arc<Serializer>,
    dependencies: Arc<DependencyManager>,
    commit: Arc<CommitManager>,
    health: Arc<HealthCheck>,
    counters: Arc<QueueCounters>,
    is_running: AtomicBool,
    /// Set once the startup replay finished
    is_open: AtomicBool,
    background: Mutex<Option<Background>>,
}

impl IndexingQueue {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        engine: Arc<dyn IndexingEngine>,
        documents: Arc<dyn DocumentSource>,
        settings: QueueSettings,
    ) -> Result<Self, QueueError> {
        settings.validate().map_err(QueueError::Config)?;

        let history = TerminationHistory::shared(&CompletionState::default());
        let counters = Arc::new(QueueCounters::default());
        let executor = Arc::new(Executor::new(engine.clone(), store.clone(), documents));
        let commit = Arc::new(CommitManager::new(engine.clone(), history.clone(), &settings));
        let dependencies = Arc::new(DependencyManager::new(
            history.clone(),
            executor,
            commit.clone(),
            counters.clone(),
        ));
        let serializer = Arc::new(Serializer::new(
            store.clone(),
            dependencies.clone(),
            settings.clone(),
        ));
        let health = Arc::new(HealthCheck::new(
            store.clone(),
            serializer.clone(),
            history.clone(),
            settings.load_chunk_size,
        ));

        Ok(Self {
            settings,
            store,
            engine,
            history,
            serializer,
            dependencies,
            commit,
            health,
            counters,
            is_running: AtomicBool::new(false),
            is_open: AtomicBool::new(false),
            background: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn is_overloaded(&self) -> bool {
        self.serializer.is_overloaded()
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        self.commit.policy()
    }

    /// Read the committed completion state from the index, replay what the
    /// index is missing, then open the queue and start the background loops.
    pub async fn start(&self) -> Result<ReplayReport, QueueError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyRunning);
        }

        match self.open().await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<ReplayReport, QueueError> {
        let state = self.engine.read_completion_state().await?.unwrap_or_default();
        info!(state = %state, "Starting indexing queue");

        let report = self.replay_from(&state).await?;
        self.is_open.store(true, Ordering::SeqCst);

        let token = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(
            self.health
                .clone()
                .run_periodic(self.settings.health_check_interval(), token.clone()),
        )];
        if self.commit.policy() == CommitPolicy::NearRealTime {
            tasks.push(tokio::spawn(
                self.commit
                    .clone()
                    .run_heartbeat(self.settings.commit_heartbeat(), token.clone()),
            ));
        }
        *self.background.lock()? = Some(Background { token, tasks });

        info!(
            replayed = report.replayed(),
            policy = ?self.commit.policy(),
            "Indexing queue started"
        );
        Ok(report)
    }

    /// Stop the background loops, let in-flight activities finish and commit.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Err(QueueError::NotRunning);
        }
        self.is_open.store(false, Ordering::SeqCst);

        let background = self.background.lock()?.take();
        if let Some(background) = background {
            background.stop().await;
        }

        self.serializer.wait_idle().await;
        self.commit.commit().await?;
        info!(state = %self.current_completion_state()?, "Indexing queue stopped");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.is_open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::NotRunning)
        }
    }

    /// Register a locally created activity and wait until it finished.
    ///
    /// Index failures are reported in the outcome, not as `Err`.
    pub async fn register_and_execute(&self, activity: Activity) -> Result<ActivityOutcome, QueueError> {
        self.register_and_execute_with_cancel(activity, CancellationToken::new())
            .await
    }

    /// As [`register_and_execute`](Self::register_and_execute); cancelling
    /// `cancel` abandons the wait but not the activity.
    pub async fn register_and_execute_with_cancel(
        &self,
        activity: Activity,
        cancel: CancellationToken,
    ) -> Result<ActivityOutcome, QueueError> {
        self.ensure_open()?;
        self.serializer.wait_while_overloaded().await;

        let activity = self.store.register_activity(&activity).await?;
        let id = activity.id;
        let signal = self.serializer.enqueue(activity).await?;

        tokio::select! {
            outcome = signal.wait() => Ok(outcome),
            _ = cancel.cancelled() => {
                debug!(activity_id = id, "Wait for activity cancelled");
                Err(QueueError::Cancelled(id))
            }
        }
    }

    /// Queue an activity delivered by another process.
    pub async fn enqueue_received(&self, activity: Activity) -> Result<CompletionSignal, QueueError> {
        self.ensure_open()?;
        self.serializer.enqueue(activity.received()).await
    }

    pub fn current_completion_state(&self) -> Result<CompletionState, QueueError> {
        Ok(self.history.lock()?.state())
    }

    /// Roll the index's completion state back to a backup point and
    /// re-execute everything after it.
    pub async fn restore_completion_state(
        &self,
        state: CompletionState,
    ) -> Result<ReplayReport, QueueError> {
        self.ensure_open()?;
        let state = CompletionState::new(state.last_activity_id, state.gaps);
        info!(state = %state, "Restoring completion state");

        self.history.lock()?.reset(&state);
        self.commit.commit().await?;
        let reset = self.store.restore_running_state(&state).await?;
        debug!(reset, "Store running states restored");

        self.serializer.reset(state.last_activity_id).await;
        self.health.replay(&state).await
    }

    /// Run the health check now.
    pub async fn health_check(&self) -> Result<ReplayReport, QueueError> {
        self.ensure_open()?;
        self.health.run().await
    }

    /// Clear the index and replay the whole store.
    pub async fn rebuild_index(&self) -> Result<ReplayReport, QueueError> {
        self.ensure_open()?;
        info!("Rebuilding index from activity store");
        self.serializer.wait_idle().await;
        self.engine.clear_index().await?;

        let empty = CompletionState::default();
        let report = self.replay_from(&empty).await?;
        self.commit.commit().await?;
        Ok(report)
    }

    async fn replay_from(&self, state: &CompletionState) -> Result<ReplayReport, QueueError> {
        self.history.lock()?.reset(state);
        self.serializer.reset(state.last_activity_id).await;
        self.health.replay(state).await
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            arrival_length: self.serializer.len(),
            waiting_length: self.dependencies.waiting_len(),
            executed: self.counters.executed(),
            failed: self.counters.failed(),
            skipped: self.counters.skipped(),
            finished_elsewhere: self.counters.finished_elsewhere(),
            commits: self.commit.commit_count(),
            completion_state: self.current_completion_state()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::source::InMemoryDocumentSource;
    use crate::store::InMemoryActivityStore;
    use crate::test_support::RecordingEngine;
    use index_types::IndexDocument;

    struct Fixture {
        queue: IndexingQueue,
        store: Arc<InMemoryActivityStore>,
        engine: Arc<RecordingEngine>,
    }

    fn fixture_with(
        engine: RecordingEngine,
        store: Arc<InMemoryActivityStore>,
        settings: QueueSettings,
    ) -> Fixture {
        let engine = Arc::new(engine);
        let queue = IndexingQueue::new(
            store.clone(),
            engine.clone(),
            Arc::new(InMemoryDocumentSource::new()),
            settings,
        )
        .unwrap();
        Fixture {
            queue,
            store,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            RecordingEngine::new(),
            Arc::new(InMemoryActivityStore::new()),
            QueueSettings::default(),
        )
    }

    fn doc_activity(node: u64, version: u64, path: &str) -> Activity {
        Activity::add_document(node, version, path)
            .with_document(IndexDocument::new(node, version, path))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_requires_start() {
        let f = fixture();
        let result = f
            .queue
            .register_and_execute(doc_activity(1, 1, "/Root/A"))
            .await;
        assert!(matches!(result, Err(QueueError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lifecycle() {
        let f = fixture();
        f.queue.start().await.unwrap();
        assert!(f.queue.is_running());
        assert!(matches!(f.queue.start().await, Err(QueueError::AlreadyRunning)));

        let outcome = f
            .queue
            .register_and_execute(doc_activity(1, 1, "/Root/A"))
            .await
            .unwrap();
        assert_eq!(outcome, ActivityOutcome::Executed);

        f.queue.shutdown().await.unwrap();
        assert!(!f.queue.is_running());
        assert!(matches!(f.queue.shutdown().await, Err(QueueError::NotRunning)));
        assert_eq!(
            f.engine.committed_state(),
            Some(CompletionState::new(1, vec![]))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_received_out_of_order() {
        let f = fixture();
        f.queue.start().await.unwrap();

        // Registered by another process
        let mut activities = Vec::new();
        for node in 1..=5 {
            activities.push(
                f.store
                    .register_activity(&doc_activity(node, node, &format!("/Root/N{node}")))
                    .await
                    .unwrap(),
            );
        }

        let mut signals = Vec::new();
        for index in [2, 0, 4, 1, 3] {
            signals.push(f.queue.enqueue_received(activities[index].clone()).await.unwrap());
        }
        for signal in signals {
            signal.wait().await;
        }

        f.queue.shutdown().await.unwrap();
        assert_eq!(
            f.queue.current_completion_state().unwrap(),
            CompletionState::new(5, vec![])
        );
        assert_eq!(f.engine.executed().len(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_write_still_succeeds_for_caller() {
        let f = fixture();
        f.engine.fail_on(3);
        f.queue.start().await.unwrap();

        let outcome = f
            .queue
            .register_and_execute(doc_activity(1, 3, "/Root/A"))
            .await
            .unwrap();
        assert!(outcome.is_failed());
        assert_eq!(
            f.queue.current_completion_state().unwrap(),
            CompletionState::new(1, vec![])
        );
        assert_eq!(f.queue.stats().unwrap().failed, 1);
        f.queue.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_aborts_wait_only() {
        let f = fixture_with(
            RecordingEngine::new().with_delay(Duration::from_millis(100)),
            Arc::new(InMemoryActivityStore::new()),
            QueueSettings::default(),
        );
        f.queue.start().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = f
            .queue
            .register_and_execute_with_cancel(doc_activity(1, 1, "/Root/A"), cancel)
            .await;
        assert!(matches!(result, Err(QueueError::Cancelled(1))));

        // The activity still runs to completion
        f.queue.shutdown().await.unwrap();
        assert_eq!(f.engine.executed(), vec!["v1"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_startup_replays_from_committed_state() {
        let store = Arc::new(InMemoryActivityStore::new());
        for node in 1..=6 {
            store
                .register_activity(&doc_activity(node, node, &format!("/Root/N{node}")))
                .await
                .unwrap();
        }
        let engine = RecordingEngine::new().with_committed_state(CompletionState::new(4, vec![2]));
        let f = fixture_with(engine, store, QueueSettings::default());

        let report = f.queue.start().await.unwrap();
        assert_eq!(report.gaps_replayed, 1);
        assert_eq!(report.range_replayed, 2);

        let mut executed = f.engine.executed();
        executed.sort();
        assert_eq!(executed, vec!["v2", "v5", "v6"]);
        assert_eq!(
            f.queue.current_completion_state().unwrap(),
            CompletionState::new(6, vec![])
        );
        f.queue.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health_check_drops_missing_gap() {
        let store = Arc::new(InMemoryActivityStore::new());
        for id in (1..=10).filter(|id| *id != 7) {
            store
                .insert(doc_activity(id, id, &format!("/Root/N{id}")).with_id(id))
                .unwrap();
        }
        let engine =
            RecordingEngine::new().with_committed_state(CompletionState::new(10, vec![7]));
        let f = fixture_with(engine, store, QueueSettings::default());

        let report = f.queue.start().await.unwrap();
        assert_eq!(report.gaps_dropped, 1);
        assert_eq!(
            f.queue.current_completion_state().unwrap(),
            CompletionState::new(10, vec![])
        );
        assert!(f.engine.executed().is_empty());
        f.queue.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health_check_closes_gaps() {
        let f = fixture();
        f.queue.start().await.unwrap();

        // Ids 1..=3 registered elsewhere; only 3 is delivered here
        let mut last = None;
        for node in 1..=3 {
            last = Some(
                f.store
                    .register_activity(&doc_activity(node, node, &format!("/Root/N{node}")))
                    .await
                    .unwrap(),
            );
        }
        // Delivery of 3 pulls 1 and 2 from the store
        f.queue
            .enqueue_received(last.unwrap())
            .await
            .unwrap()
            .wait()
            .await;
        f.queue.shutdown().await.unwrap();
        assert_eq!(
            f.queue.current_completion_state().unwrap(),
            CompletionState::new(3, vec![])
        );

        // Simulate lost completions, then let the health check repair them
        f.queue.start().await.unwrap();
        f.queue
            .history
            .lock()
            .unwrap()
            .reset(&CompletionState::new(3, vec![1, 2]));
        let report = f.queue.health_check().await.unwrap();
        assert_eq!(report.gaps_replayed, 2);
        assert_eq!(
            f.queue.current_completion_state().unwrap(),
            CompletionState::new(3, vec![])
        );
        f.queue.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_replays_after_backup_point() {
        let f = fixture();
        f.queue.start().await.unwrap();
        for node in 1..=4 {
            f.queue
                .register_and_execute(doc_activity(node, node, &format!("/Root/N{node}")))
                .await
                .unwrap();
        }
        assert_eq!(f.engine.executed().len(), 4);

        let report = f
            .queue
            .restore_completion_state(CompletionState::new(2, vec![]))
            .await
            .unwrap();
        assert_eq!(report.range_replayed, 2);
        assert_eq!(f.engine.executed().len(), 6);
        assert_eq!(
            f.queue.current_completion_state().unwrap(),
            CompletionState::new(4, vec![])
        );
        f.queue.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rebuild_replays_everything() {
        let f = fixture();
        f.queue.start().await.unwrap();
        for node in 1..=3 {
            f.queue
                .register_and_execute(doc_activity(node, node, &format!("/Root/N{node}")))
                .await
                .unwrap();
        }

        let report = f.queue.rebuild_index().await.unwrap();
        assert_eq!(report.range_replayed, 3);
        assert_eq!(f.engine.clear_count(), 1);
        assert_eq!(f.engine.executed().len(), 3);
        f.queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let settings = QueueSettings {
            max_queue_length: 0,
            ..Default::default()
        };
        let result = IndexingQueue::new(
            Arc::new(InMemoryActivityStore::new()),
            Arc::new(RecordingEngine::new()),
            Arc::new(InMemoryDocumentSource::new()),
            settings,
        );
        assert!(matches!(result, Err(QueueError::Config(_))));
    }
}
