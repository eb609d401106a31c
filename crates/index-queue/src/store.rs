//! Durable activity store interface.
//!
//! The store assigns strictly increasing ids (never reused) and must show an
//! activity to readers before the next id is handed out. Implemented for
//! the RocksDB [`ActivityDb`] and for the in-memory store used by tests and
//! single-process setups.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use index_store::{
    select_executable, store_completion_state, ActivityDb, ActivityRecord, RunningState,
};
use index_types::{Activity, ActivityId, CompletionState};

use crate::error::QueueError;

/// Executable activities claimed by one poll, plus which of the caller's
/// waiting ids turned out to be done already.
#[derive(Debug, Default, Clone)]
pub struct ExecutableBatch {
    pub activities: Vec<Activity>,
    pub finished: Vec<ActivityId>,
}

/// Operations the queue needs from the durable activity store.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Persist a new activity and return it with its assigned id.
    async fn register_activity(&self, activity: &Activity) -> Result<Activity, QueueError>;

    /// Activities with `from <= id <= to`, ascending.
    async fn load_activities(
        &self,
        from: ActivityId,
        to: ActivityId,
    ) -> Result<Vec<Activity>, QueueError>;

    /// Activities for the given ids, ascending; unknown ids are omitted.
    async fn load_activities_by_ids(
        &self,
        ids: &[ActivityId],
    ) -> Result<Vec<Activity>, QueueError>;

    /// Highest id ever assigned (0 when nothing was registered).
    async fn last_activity_id(&self) -> Result<ActivityId, QueueError>;

    /// Extend the lease of activities among `ids` that `owner` is running.
    async fn refresh_lock(&self, owner: &str, ids: &[ActivityId]) -> Result<usize, QueueError>;

    /// Completion state derived from the running states. Purged ids are done.
    async fn completion_state(&self) -> Result<CompletionState, QueueError>;

    /// Purge finished activities.
    async fn delete_finished(&self) -> Result<usize, QueueError>;

    /// Lease up to `max` executable activities for `owner`.
    async fn load_executable(
        &self,
        owner: &str,
        max: usize,
        lease: Duration,
        waiting: &HashSet<ActivityId>,
    ) -> Result<ExecutableBatch, QueueError>;

    async fn set_running_state(&self, id: ActivityId, state: RunningState)
        -> Result<(), QueueError>;

    /// Every activity that is not done, ascending.
    async fn load_unprocessed(&self) -> Result<Vec<Activity>, QueueError>;

    /// Mark what `state` reflects as done and everything else as waiting.
    async fn restore_running_state(&self, state: &CompletionState) -> Result<usize, QueueError>;
}

fn chrono_lease(lease: Duration) -> Result<chrono::Duration, QueueError> {
    chrono::Duration::from_std(lease).map_err(|e| QueueError::Config(e.to_string()))
}

#[async_trait]
impl ActivityStore for ActivityDb {
    async fn register_activity(&self, activity: &Activity) -> Result<Activity, QueueError> {
        Ok(self.register(activity)?)
    }

    async fn load_activities(
        &self,
        from: ActivityId,
        to: ActivityId,
    ) -> Result<Vec<Activity>, QueueError> {
        let records = self.load_range(from, to, usize::MAX)?;
        Ok(records.into_iter().map(|r| r.activity).collect())
    }

    async fn load_activities_by_ids(
        &self,
        ids: &[ActivityId],
    ) -> Result<Vec<Activity>, QueueError> {
        let records = self.load_ids(ids)?;
        Ok(records.into_iter().map(|r| r.activity).collect())
    }

    async fn last_activity_id(&self) -> Result<ActivityId, QueueError> {
        Ok(self.last_id()?)
    }

    async fn refresh_lock(&self, owner: &str, ids: &[ActivityId]) -> Result<usize, QueueError> {
        Ok(ActivityDb::refresh_lock(self, owner, ids)?)
    }

    async fn completion_state(&self) -> Result<CompletionState, QueueError> {
        Ok(ActivityDb::completion_state(self)?)
    }

    async fn delete_finished(&self) -> Result<usize, QueueError> {
        Ok(ActivityDb::delete_finished(self)?)
    }

    async fn load_executable(
        &self,
        owner: &str,
        max: usize,
        lease: Duration,
        waiting: &HashSet<ActivityId>,
    ) -> Result<ExecutableBatch, QueueError> {
        let (activities, finished) =
            self.claim_executable(owner, max, chrono_lease(lease)?, waiting)?;
        Ok(ExecutableBatch {
            activities,
            finished,
        })
    }

    async fn set_running_state(
        &self,
        id: ActivityId,
        state: RunningState,
    ) -> Result<(), QueueError> {
        Ok(ActivityDb::set_running_state(self, id, state)?)
    }

    async fn load_unprocessed(&self) -> Result<Vec<Activity>, QueueError> {
        let records = ActivityDb::load_unprocessed(self)?;
        Ok(records.into_iter().map(|r| r.activity).collect())
    }

    async fn restore_running_state(&self, state: &CompletionState) -> Result<usize, QueueError> {
        Ok(ActivityDb::restore_running_state(self, state)?)
    }
}

#[derive(Debug)]
struct MemoryState {
    records: BTreeMap<ActivityId, ActivityRecord>,
    next_id: ActivityId,
}

/// Activity store kept in process memory.
#[derive(Debug)]
pub struct InMemoryActivityStore {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryActivityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Store an activity under its preassigned id, as another process
    /// sharing the store would have. The id counter moves past it.
    pub fn insert(&self, activity: Activity) -> Result<(), QueueError> {
        let mut state = self.state.lock()?;
        let id = activity.id;
        state.next_id = state.next_id.max(id + 1);
        state.records.insert(id, ActivityRecord::new(activity));
        Ok(())
    }

    /// Running state of one activity.
    pub fn running_state(&self, id: ActivityId) -> Result<Option<RunningState>, QueueError> {
        let state = self.state.lock()?;
        Ok(state.records.get(&id).map(|r| r.running_state))
    }

    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn register_activity(&self, activity: &Activity) -> Result<Activity, QueueError> {
        let mut state = self.state.lock()?;
        let id = state.next_id;
        state.next_id += 1;
        let stored = activity.clone().with_id(id);
        state.records.insert(id, ActivityRecord::new(stored.clone()));
        debug!(activity_id = id, activity_type = %stored.activity_type, "Registered activity");
        Ok(stored)
    }

    async fn load_activities(
        &self,
        from: ActivityId,
        to: ActivityId,
    ) -> Result<Vec<Activity>, QueueError> {
        if from > to {
            return Ok(Vec::new());
        }
        let state = self.state.lock()?;
        Ok(state
            .records
            .range(from..=to)
            .map(|(_, r)| r.activity.clone())
            .collect())
    }

    async fn load_activities_by_ids(
        &self,
        ids: &[ActivityId],
    ) -> Result<Vec<Activity>, QueueError> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let state = self.state.lock()?;
        Ok(sorted
            .iter()
            .filter_map(|id| state.records.get(id))
            .map(|r| r.activity.clone())
            .collect())
    }

    async fn last_activity_id(&self) -> Result<ActivityId, QueueError> {
        Ok(self.state.lock()?.next_id - 1)
    }

    async fn refresh_lock(&self, owner: &str, ids: &[ActivityId]) -> Result<usize, QueueError> {
        let mut state = self.state.lock()?;
        let now = Utc::now();
        let mut count = 0;
        for id in ids {
            if let Some(record) = state.records.get_mut(id) {
                if record.is_held_by(owner) {
                    record.lock_time = Some(now);
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn completion_state(&self) -> Result<CompletionState, QueueError> {
        let state = self.state.lock()?;
        Ok(store_completion_state(state.next_id - 1, state.records.values()))
    }

    async fn delete_finished(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock()?;
        let before = state.records.len();
        state.records.retain(|_, r| !r.is_done());
        Ok(before - state.records.len())
    }

    async fn load_executable(
        &self,
        owner: &str,
        max: usize,
        lease: Duration,
        waiting: &HashSet<ActivityId>,
    ) -> Result<ExecutableBatch, QueueError> {
        let lease = chrono_lease(lease)?;
        let mut state = self.state.lock()?;
        let now = Utc::now();
        let selection = select_executable(state.records.values(), now, lease, max, waiting);

        let mut activities = Vec::with_capacity(selection.executable.len());
        for id in &selection.executable {
            if let Some(record) = state.records.get_mut(id) {
                record.lock(owner, now);
                activities.push(record.activity.clone());
            }
        }
        Ok(ExecutableBatch {
            activities,
            finished: selection.finished,
        })
    }

    async fn set_running_state(
        &self,
        id: ActivityId,
        running_state: RunningState,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock()?;
        let record = state
            .records
            .get_mut(&id)
            .ok_or(index_store::StoreError::NotFound(id))?;
        record.set_state(running_state);
        Ok(())
    }

    async fn load_unprocessed(&self) -> Result<Vec<Activity>, QueueError> {
        let state = self.state.lock()?;
        Ok(state
            .records
            .values()
            .filter(|r| !r.is_done())
            .map(|r| r.activity.clone())
            .collect())
    }

    async fn restore_running_state(&self, completion: &CompletionState) -> Result<usize, QueueError> {
        let mut state = self.state.lock()?;
        let mut reset = 0;
        for record in state.records.values_mut() {
            if completion.is_finished(record.activity.id) {
                record.set_state(RunningState::Done);
            } else {
                record.set_state(RunningState::Waiting);
                reset += 1;
            }
        }
        Ok(reset)
    }
}
