//! Arrival queue.
//!
//! Activities may arrive in any order and more than once. The serializer
//! keeps them sorted by id, attaches duplicates to the queued copy, and
//! loads ids it never saw from the store before accepting a later one. A
//! single consumer task, started on demand, drains the queue into the
//! [`DependencyManager`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use index_types::{Activity, ActivityId, QueueSettings};

use crate::dependency::DependencyManager;
use crate::error::QueueError;
use crate::signal::CompletionSignal;
use crate::store::ActivityStore;

struct QueuedActivity {
    activity: Activity,
    signal: CompletionSignal,
}

struct ArrivalQueue {
    /// Ascending by id
    queue: VecDeque<QueuedActivity>,
    /// Highest id ever queued
    last_queued: ActivityId,
    consumer_running: bool,
}

pub struct Serializer {
    arrival: Mutex<ArrivalQueue>,
    length: AtomicUsize,
    /// Drained by the consumer but not yet handed to the dependency manager
    scheduling: AtomicUsize,
    store: Arc<dyn ActivityStore>,
    dependencies: Arc<DependencyManager>,
    settings: QueueSettings,
}

impl Serializer {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        dependencies: Arc<DependencyManager>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            arrival: Mutex::new(ArrivalQueue {
                queue: VecDeque::new(),
                last_queued: 0,
                consumer_running: false,
            }),
            length: AtomicUsize::new(0),
            scheduling: AtomicUsize::new(0),
            store,
            dependencies,
            settings,
        }
    }

    /// Activities in the arrival queue.
    pub fn len(&self) -> usize {
        self.length.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether anything is queued or still scheduled.
    pub fn is_working(&self) -> bool {
        !self.is_empty()
            || self.scheduling.load(Ordering::SeqCst) > 0
            || self.dependencies.is_working()
    }

    pub fn is_overloaded(&self) -> bool {
        let max = self.settings.max_queue_length;
        self.len() > max || self.dependencies.waiting_len() > max
    }

    /// Continue id tracking from `last_known`; ids above it that were never
    /// seen are loaded from the store on the next arrival.
    pub async fn reset(&self, last_known: ActivityId) {
        let mut arrival = self.arrival.lock().await;
        arrival.last_queued = arrival
            .queue
            .back()
            .map_or(last_known, |q| q.activity.id.max(last_known));
        debug!(last_queued = arrival.last_queued, "Arrival queue reset");
    }

    /// Queue an activity and return the signal its waiters subscribe to.
    pub async fn enqueue(self: &Arc<Self>, activity: Activity) -> Result<CompletionSignal, QueueError> {
        let mut arrival = self.arrival.lock().await;

        if let Some(queued) = arrival.queue.iter().find(|q| q.activity.id == activity.id) {
            debug!(activity_id = activity.id, "Attached to queued activity");
            return Ok(queued.signal.clone());
        }

        if activity.id > arrival.last_queued + 1 {
            self.load_missing(&mut arrival, activity.id).await?;
        }

        let signal = CompletionSignal::new();
        self.push(&mut arrival, activity, signal.clone());
        self.start_consumer(&mut arrival);
        Ok(signal)
    }

    /// Load `last_queued + 1 .. up_to` from the store, in chunks.
    async fn load_missing(
        &self,
        arrival: &mut ArrivalQueue,
        up_to: ActivityId,
    ) -> Result<(), QueueError> {
        let chunk = self.settings.load_chunk_size.max(1);
        let first = arrival.last_queued + 1;
        let mut from = first;
        let mut loaded = 0usize;

        while from < up_to {
            let to = (from + chunk - 1).min(up_to - 1);
            for mut activity in self.store.load_activities(from, to).await? {
                activity.from_database = true;
                loaded += 1;
                self.push(arrival, activity, CompletionSignal::new());
            }
            from = to + 1;
        }

        debug!(from = first, to = up_to - 1, loaded, "Loaded missing activities from store");
        Ok(())
    }

    fn push(&self, arrival: &mut ArrivalQueue, mut activity: Activity, signal: CompletionSignal) {
        if arrival.queue.len() >= self.settings.payload_retention_limit {
            activity.drop_document();
        }

        let id = activity.id;
        let queued = QueuedActivity { activity, signal };
        if id > arrival.last_queued {
            arrival.last_queued = id;
            arrival.queue.push_back(queued);
        } else {
            let position = arrival.queue.partition_point(|q| q.activity.id < id);
            arrival.queue.insert(position, queued);
        }
        self.length.store(arrival.queue.len(), Ordering::SeqCst);
    }

    fn start_consumer(self: &Arc<Self>, arrival: &mut ArrivalQueue) {
        if arrival.consumer_running || arrival.queue.is_empty() {
            return;
        }
        arrival.consumer_running = true;
        let serializer = Arc::clone(self);
        tokio::spawn(async move { serializer.consume().await });
    }

    async fn consume(&self) {
        loop {
            let batch: Vec<QueuedActivity> = {
                let mut arrival = self.arrival.lock().await;
                if arrival.queue.is_empty() {
                    arrival.consumer_running = false;
                    return;
                }
                let batch: Vec<QueuedActivity> = arrival.queue.drain(..).collect();
                self.scheduling.store(batch.len(), Ordering::SeqCst);
                self.length.store(0, Ordering::SeqCst);
                batch
            };

            for queued in batch {
                let id = queued.activity.id;
                if let Err(e) = self.dependencies.schedule(queued.activity, queued.signal) {
                    error!(activity_id = id, error = %e, "Could not schedule activity");
                }
                self.scheduling.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Make sure the consumer runs if anything is queued.
    pub async fn force_drain(self: &Arc<Self>) {
        let mut arrival = self.arrival.lock().await;
        self.start_consumer(&mut arrival);
    }

    /// Block while the queue is overloaded, forcing a drain every few polls.
    pub async fn wait_while_overloaded(self: &Arc<Self>) {
        let every = self.settings.forced_drain_every.max(1);
        let mut polls = 0u32;
        while self.is_overloaded() {
            polls += 1;
            if polls % every == 0 {
                debug!(polls, "Queue overloaded, forcing drain");
                self.force_drain().await;
            }
            tokio::time::sleep(self.settings.overload_poll()).await;
        }
    }

    /// Wait until nothing is queued or scheduled.
    pub async fn wait_idle(self: &Arc<Self>) {
        while self.is_working() {
            self.force_drain().await;
            tokio::time::sleep(self.settings.overload_poll()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::commit::CommitManager;
    use crate::executor::Executor;
    use crate::signal::ActivityOutcome;
    use crate::source::InMemoryDocumentSource;
    use crate::stats::QueueCounters;
    use crate::store::InMemoryActivityStore;
    use crate::termination::{SharedHistory, TerminationHistory};
    use crate::test_support::RecordingEngine;
    use index_types::{CompletionState, IndexDocument};

    struct Fixture {
        serializer: Arc<Serializer>,
        store: Arc<InMemoryActivityStore>,
        engine: Arc<RecordingEngine>,
        history: SharedHistory,
    }

    fn fixture(engine: RecordingEngine, settings: QueueSettings) -> Fixture {
        let engine = Arc::new(engine);
        let store = Arc::new(InMemoryActivityStore::new());
        let history = TerminationHistory::shared(&CompletionState::default());
        let executor = Arc::new(Executor::new(
            engine.clone(),
            store.clone(),
            Arc::new(InMemoryDocumentSource::new()),
        ));
        let commit = Arc::new(CommitManager::new(engine.clone(), history.clone(), &settings));
        let dependencies = Arc::new(DependencyManager::new(
            history.clone(),
            executor,
            commit,
            Arc::new(QueueCounters::default()),
        ));
        Fixture {
            serializer: Arc::new(Serializer::new(store.clone(), dependencies, settings)),
            store,
            engine,
            history,
        }
    }

    async fn register(store: &InMemoryActivityStore, node: u64, path: &str) -> Activity {
        store
            .register_activity(
                &Activity::add_document(node, node, path)
                    .with_document(IndexDocument::new(node, node, path)),
            )
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_out_of_order_arrival_loads_missing() {
        let f = fixture(RecordingEngine::new(), QueueSettings::default());
        let mut activities = Vec::new();
        for node in 1..=5 {
            activities.push(register(&f.store, node, &format!("/Root/N{node}")).await);
        }

        let mut signals = Vec::new();
        for index in [2, 0, 4, 1, 3] {
            signals.push(f.serializer.enqueue(activities[index].clone()).await.unwrap());
        }
        for signal in signals {
            signal.wait().await;
        }
        f.serializer.wait_idle().await;

        let mut executed = f.engine.executed();
        executed.sort();
        assert_eq!(executed, vec!["v1", "v2", "v3", "v4", "v5"]);
        assert_eq!(f.history.lock().unwrap().state(), CompletionState::new(5, vec![]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_later_id_first_still_runs_in_order() {
        let f = fixture(
            RecordingEngine::new().with_delay(Duration::from_millis(20)),
            QueueSettings::default(),
        );
        let first = register(&f.store, 10, "/Root/Doc").await;
        let second = f
            .store
            .register_activity(
                &Activity::update_document(10, 11, "/Root/Doc")
                    .with_document(IndexDocument::new(10, 11, "/Root/Doc")),
            )
            .await
            .unwrap();

        // Id 2 arrives first; id 1 is pulled from the store ahead of it
        let signal = f.serializer.enqueue(second).await.unwrap();
        assert_eq!(signal.wait().await, ActivityOutcome::Executed);
        let late = f.serializer.enqueue(first).await.unwrap();
        assert_eq!(late.wait().await, ActivityOutcome::Skipped);

        assert_eq!(f.engine.executed(), vec!["v10", "v11"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_arrivals_execute_once() {
        let f = fixture(
            RecordingEngine::new().with_delay(Duration::from_millis(20)),
            QueueSettings::default(),
        );
        let activity = register(&f.store, 1, "/Root/A").await;

        let signals = vec![
            f.serializer.enqueue(activity.clone()).await.unwrap(),
            f.serializer.enqueue(activity.clone().received()).await.unwrap(),
            f.serializer.enqueue(activity.clone()).await.unwrap(),
        ];
        for signal in signals {
            assert!(!signal.wait().await.is_failed());
        }
        f.serializer.wait_idle().await;
        assert_eq!(f.engine.executed(), vec!["v1"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overload_and_forced_drain() {
        let settings = QueueSettings {
            max_queue_length: 1,
            overload_poll_ms: 5,
            forced_drain_every: 2,
            ..Default::default()
        };
        let f = fixture(
            RecordingEngine::new().with_delay(Duration::from_millis(30)),
            settings,
        );

        // Same node: they chain, so the waiting set fills up
        for _ in 0..3 {
            let activity = register(&f.store, 7, "/Root/Same").await;
            f.serializer.enqueue(activity).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.serializer.is_overloaded());

        tokio::time::timeout(Duration::from_secs(5), f.serializer.wait_while_overloaded())
            .await
            .unwrap();
        assert!(!f.serializer.is_overloaded());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_payload_dropped_beyond_retention_limit() {
        let settings = QueueSettings {
            payload_retention_limit: 0,
            ..Default::default()
        };
        let f = fixture(RecordingEngine::new(), settings);
        let activity = register(&f.store, 3, "/Root/C").await;

        // Document comes back from the stored record
        let signal = f.serializer.enqueue(activity).await.unwrap();
        assert_eq!(signal.wait().await, ActivityOutcome::Executed);
        assert_eq!(f.engine.executed(), vec!["v3"]);
    }
}
