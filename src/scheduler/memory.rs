//! In-process job store.
//!
//! Implements the full [`JobStore`] contract over an in-memory map: priority
//! + FIFO ordering, delayed scheduling, pause/resume, stale recovery and
//! bounded terminal retention. Used by the test suite and by single-process
//! runs that have no Redis available; it is not durable across restarts.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::job::{JobRecord, JobState};
use super::store::{JobStore, StateCounts, StoreError};

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, JobRecord>,
    /// Ready jobs ordered by (inverted priority, sequence): the first entry
    /// is the highest-priority, oldest job.
    ready: BTreeMap<(u8, u64), Uuid>,
    /// Scheduled jobs ordered by eligibility time.
    delayed: BTreeMap<(DateTime<Utc>, Uuid), Uuid>,
    active: HashSet<Uuid>,
    completed: VecDeque<Uuid>,
    failed: VecDeque<Uuid>,
    paused: bool,
    closed: bool,
    seq: u64,
}

impl Inner {
    fn ready_key(&mut self, priority: u8) -> (u8, u64) {
        self.seq += 1;
        (10u8.saturating_sub(priority), self.seq)
    }

    /// Moves due delayed jobs into the ready set.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<_> = self
            .delayed
            .range(..=(now, Uuid::max()))
            .map(|(key, id)| (*key, *id))
            .collect();

        for (key, id) in due {
            self.delayed.remove(&key);
            let priority = self.records.get(&id).map(|r| r.priority).unwrap_or(1);
            let ready_key = self.ready_key(priority);
            self.ready.insert(ready_key, id);
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

/// In-memory implementation of [`JobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().ensure_open()
    }

    async fn insert(&self, record: &JobRecord, delay: Duration) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        inner.records.insert(record.id, record.clone());
        if delay.is_zero() {
            let key = inner.ready_key(record.priority);
            inner.ready.insert(key, record.id);
        } else {
            let ready_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            inner.delayed.insert((ready_at, record.id), record.id);
        }
        Ok(())
    }

    async fn claim(&self) -> Result<Option<JobRecord>, StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        if inner.paused {
            return Ok(None);
        }

        inner.promote_due(Utc::now());

        let Some((&key, &id)) = inner.ready.iter().next() else {
            return Ok(None);
        };
        inner.ready.remove(&key);
        inner.active.insert(id);

        let record = inner
            .records
            .get_mut(&id)
            .expect("ready job must have a record");
        record.state = JobState::Active;
        record.attempts += 1;
        record.started_at = Some(Utc::now());
        record.progress = Some(0);

        Ok(Some(record.clone()))
    }

    async fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        inner.active.remove(&id);
        if let Some(record) = inner.records.get_mut(&id) {
            record.state = JobState::Completed;
            record.finished_at = Some(Utc::now());
            record.result = Some(result);
        }
        inner.completed.push_front(id);
        Ok(())
    }

    async fn retry(&self, record: &JobRecord, delay: Duration) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        inner.active.remove(&record.id);

        let mut requeued = record.clone();
        requeued.state = JobState::Waiting;
        requeued.started_at = None;
        requeued.progress = None;
        inner.records.insert(record.id, requeued);

        if delay.is_zero() {
            let key = inner.ready_key(record.priority);
            inner.ready.insert(key, record.id);
        } else {
            let ready_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            inner.delayed.insert((ready_at, record.id), record.id);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        inner.active.remove(&id);
        if let Some(record) = inner.records.get_mut(&id) {
            record.state = JobState::Failed;
            record.finished_at = Some(Utc::now());
            record.failure_reason = Some(reason.to_string());
        }
        inner.failed.push_front(id);
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        if let Some(record) = inner.records.get_mut(&id) {
            if record.progress.unwrap_or(0) <= progress {
                record.progress = Some(progress);
            }
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.lock().records.get(&id).cloned())
    }

    async fn counts(&self) -> Result<StateCounts, StoreError> {
        let inner = self.lock();
        Ok(StateCounts {
            waiting: inner.ready.len() + inner.delayed.len(),
            active: inner.active.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
        })
    }

    async fn pause(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        inner.paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        inner.paused = false;
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, StoreError> {
        Ok(self.lock().paused)
    }

    async fn recover_stale(&self, older_than: Duration) -> Result<Vec<JobRecord>, StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let stale: Vec<Uuid> = inner
            .active
            .iter()
            .filter(|id| {
                inner
                    .records
                    .get(*id)
                    .and_then(|r| r.started_at)
                    .is_some_and(|started| started < cutoff)
            })
            .copied()
            .collect();

        let mut recovered = Vec::with_capacity(stale.len());
        for id in stale {
            inner.active.remove(&id);
            if let Some(record) = inner.records.get(&id) {
                recovered.push(record.clone());
            }
        }
        Ok(recovered)
    }

    async fn sweep(&self, keep_completed: usize, keep_failed: usize) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ensure_open()?;

        while inner.completed.len() > keep_completed {
            if let Some(id) = inner.completed.pop_back() {
                inner.records.remove(&id);
            }
        }
        while inner.failed.len() > keep_failed {
            if let Some(id) = inner.failed.pop_back() {
                inner.records.remove(&id);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.lock().closed = true;
        Ok(())
    }
}
