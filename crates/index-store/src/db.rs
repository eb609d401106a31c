//! RocksDB wrapper for the activity store.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Id assignment under a register lock (ids strictly increasing, no reuse)
//! - Range and id-set reads in ascending id order
//! - Running state, leases and purging for the centralized queue

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use index_types::{Activity, ActivityId, CompletionState};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_ACTIVITIES, CF_META};
use crate::error::StoreError;
use crate::keys::{ActivityKey, NEXT_ID_KEY};
use crate::lease::select_executable;
use crate::record::{store_completion_state, ActivityRecord, RunningState};

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub activity_count: u64,
    pub waiting_count: u64,
    pub running_count: u64,
    pub done_count: u64,
    pub last_id: ActivityId,
}

/// Durable activity store backed by RocksDB.
pub struct ActivityDb {
    db: DB,
    /// Serializes id assignment and read-modify-write of records.
    /// Holds the next id to assign.
    write_lock: Mutex<ActivityId>,
}

impl ActivityDb {
    /// Open the store at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!("Opening activity store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        let next_id = Self::load_next_id(&db)?;
        debug!(next_id, "Loaded activity id counter");

        Ok(Self {
            db,
            write_lock: Mutex::new(next_id),
        })
    }

    /// The next id is the larger of the persisted counter and the highest key + 1.
    fn load_next_id(db: &DB) -> Result<ActivityId, StoreError> {
        let meta = db
            .cf_handle(CF_META)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(CF_META.to_string()))?;
        let persisted = match db.get_cf(&meta, NEXT_ID_KEY)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                u64::from_be_bytes(buf)
            }
            _ => 1,
        };

        let activities = db
            .cf_handle(CF_ACTIVITIES)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(CF_ACTIVITIES.to_string()))?;
        let mut iter = db.iterator_cf(&activities, IteratorMode::End);
        let from_keys = match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                ActivityKey::from_bytes(&key)?.id + 1
            }
            None => 1,
        };

        Ok(persisted.max(from_keys))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ActivityId>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn activities_cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_ACTIVITIES)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(CF_ACTIVITIES.to_string()))
    }

    fn put_record(&self, batch: &mut WriteBatch, record: &ActivityRecord) -> Result<(), StoreError> {
        let cf = self.activities_cf()?;
        batch.put_cf(cf, ActivityKey::new(record.activity.id).to_bytes(), record.to_bytes()?);
        Ok(())
    }

    /// Persist a new activity and return it with its assigned id.
    ///
    /// The record and the advanced counter are written in one batch while
    /// the register lock is held, so id N is visible before N+1 is assigned.
    pub fn register(&self, activity: &Activity) -> Result<Activity, StoreError> {
        let mut next_id = self.lock()?;
        let id = *next_id;

        let mut stored = activity.clone();
        stored.id = id;
        let record = ActivityRecord::new(stored.clone());

        let meta = self
            .db
            .cf_handle(CF_META)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(CF_META.to_string()))?;
        let mut batch = WriteBatch::default();
        self.put_record(&mut batch, &record)?;
        batch.put_cf(&meta, NEXT_ID_KEY, (id + 1).to_be_bytes());
        self.db.write(batch)?;

        *next_id = id + 1;
        debug!(activity_id = id, activity_type = %stored.activity_type, "Registered activity");
        Ok(stored)
    }

    /// Get a single record by id.
    pub fn get(&self, id: ActivityId) -> Result<Option<ActivityRecord>, StoreError> {
        let cf = self.activities_cf()?;
        match self.db.get_cf(cf, ActivityKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(ActivityRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Records with `from <= id <= to`, ascending, at most `limit`.
    pub fn load_range(
        &self,
        from: ActivityId,
        to: ActivityId,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let cf = self.activities_cf()?;
        let start = ActivityKey::new(from).to_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            if results.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if ActivityKey::from_bytes(&key)?.id > to {
                break;
            }
            results.push(ActivityRecord::from_bytes(&value)?);
        }
        Ok(results)
    }

    /// Records for the given ids, ascending; unknown ids are omitted.
    pub fn load_ids(&self, ids: &[ActivityId]) -> Result<Vec<ActivityRecord>, StoreError> {
        let cf = self.activities_cf()?;
        let mut sorted: Vec<ActivityId> = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let keys: Vec<Vec<u8>> = sorted.iter().map(|id| ActivityKey::new(*id).to_bytes()).collect();
        let mut results = Vec::with_capacity(keys.len());
        for value in self.db.multi_get_cf(keys.iter().map(|k| (cf, k.as_slice()))) {
            if let Some(bytes) = value? {
                results.push(ActivityRecord::from_bytes(&bytes)?);
            }
        }
        Ok(results)
    }

    /// Highest id ever assigned (0 when empty).
    pub fn last_id(&self) -> Result<ActivityId, StoreError> {
        Ok(self.lock()?.saturating_sub(1))
    }

    fn scan(&self) -> Result<Vec<ActivityRecord>, StoreError> {
        let cf = self.activities_cf()?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(ActivityRecord::from_bytes(&value)?);
        }
        Ok(records)
    }

    /// Every activity that is not done, ascending.
    pub fn load_unprocessed(&self) -> Result<Vec<ActivityRecord>, StoreError> {
        Ok(self.scan()?.into_iter().filter(|r| !r.is_done()).collect())
    }

    /// Update the running state of one activity.
    pub fn set_running_state(&self, id: ActivityId, state: RunningState) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut record = self.get(id)?.ok_or(StoreError::NotFound(id))?;
        record.set_state(state);
        let mut batch = WriteBatch::default();
        self.put_record(&mut batch, &record)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Lock and return up to `max` executable activities for `owner`.
    ///
    /// Also returns which of `waiting` are already done.
    pub fn claim_executable(
        &self,
        owner: &str,
        max: usize,
        lease: chrono::Duration,
        waiting: &HashSet<ActivityId>,
    ) -> Result<(Vec<Activity>, Vec<ActivityId>), StoreError> {
        let _guard = self.lock()?;
        let now = Utc::now();
        let records = self.scan()?;
        let selection = select_executable(&records, now, lease, max, waiting);
        if selection.executable.is_empty() {
            return Ok((Vec::new(), selection.finished));
        }

        let claimed: HashSet<ActivityId> = selection.executable.iter().copied().collect();
        let mut batch = WriteBatch::default();
        let mut activities = Vec::with_capacity(claimed.len());
        for mut record in records.into_iter().filter(|r| claimed.contains(&r.activity.id)) {
            record.lock(owner, now);
            self.put_record(&mut batch, &record)?;
            activities.push(record.activity);
        }
        self.db.write(batch)?;

        debug!(owner, count = activities.len(), "Claimed executable activities");
        Ok((activities, selection.finished))
    }

    /// Refresh the lease time of activities among `ids` that `owner` runs.
    ///
    /// Leases held by other owners are left alone so they can expire.
    pub fn refresh_lock(&self, owner: &str, ids: &[ActivityId]) -> Result<usize, StoreError> {
        let _guard = self.lock()?;
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for mut record in self.load_ids(ids)? {
            if record.is_held_by(owner) {
                record.lock_time = Some(now);
                self.put_record(&mut batch, &record)?;
                count += 1;
            }
        }
        if count > 0 {
            self.db.write(batch)?;
        }
        Ok(count)
    }

    /// Completion state of the store itself. Purged ids count as done.
    pub fn completion_state(&self) -> Result<CompletionState, StoreError> {
        let last_id = self.last_id()?;
        Ok(store_completion_state(last_id, &self.scan()?))
    }

    /// Delete every done activity. The id counter is kept in the meta family.
    pub fn delete_finished(&self) -> Result<usize, StoreError> {
        let _guard = self.lock()?;
        let cf = self.activities_cf()?;
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for record in self.scan()?.iter().filter(|r| r.is_done()) {
            batch.delete_cf(cf, ActivityKey::new(record.activity.id).to_bytes());
            count += 1;
        }
        if count > 0 {
            self.db.write(batch)?;
            debug!(count, "Deleted finished activities");
        }
        Ok(count)
    }

    /// Align running states with a restored index: everything the state
    /// reflects is done, everything after it (or in its gaps) waits again.
    pub fn restore_running_state(&self, state: &CompletionState) -> Result<usize, StoreError> {
        let _guard = self.lock()?;
        let mut batch = WriteBatch::default();
        let mut reset = 0;
        for mut record in self.scan()? {
            let target = if state.is_finished(record.activity.id) {
                RunningState::Done
            } else {
                reset += 1;
                RunningState::Waiting
            };
            if record.running_state != target {
                record.set_state(target);
                self.put_record(&mut batch, &record)?;
            }
        }
        self.db.write(batch)?;
        info!(state = %state, reset, "Restored activity running states");
        Ok(reset)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }

    /// Count records per running state.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats {
            last_id: self.last_id()?,
            ..Default::default()
        };
        for record in self.scan()? {
            stats.activity_count += 1;
            match record.running_state {
                RunningState::Waiting => stats.waiting_count += 1,
                RunningState::Running => stats.running_count += 1,
                RunningState::Done => stats.done_count += 1,
            }
        }
        Ok(stats)
    }
}
