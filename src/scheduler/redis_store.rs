//! Redis-backed job store.
//!
//! # Key layout
//!
//! All keys share a namespace prefix (default `claimforge`):
//!
//! - `{ns}:ready` — sorted set of claimable job ids; score encodes inverted
//!   priority in the high digits and an insertion sequence in the low digits,
//!   so `ZPOPMIN` yields the highest-priority, oldest job
//! - `{ns}:delayed` — sorted set of scheduled job ids, scored by their
//!   eligibility time in epoch milliseconds
//! - `{ns}:active` — set of claimed job ids
//! - `{ns}:prio` — hash of job id to priority, used when promoting delayed
//!   jobs back into the ready set
//! - `{ns}:job:{id}` — JSON-serialized [`JobRecord`]
//! - `{ns}:completed`, `{ns}:failed` — bounded lists of terminal job ids
//! - `{ns}:paused` — claim-gate flag
//! - `{ns}:seq` — insertion sequence counter
//!
//! # Reliability
//!
//! The claim operation runs as a single Lua script: it promotes due delayed
//! jobs, pops the best ready job and adds it to the active set atomically,
//! so exactly one worker obtains a given job. Terminal records carry a
//! 7-day expiry as a backstop beyond the bounded retention lists.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use async_trait::async_trait;
use uuid::Uuid;

use super::job::{JobRecord, JobState};
use super::store::{JobStore, StateCounts, StoreError};

/// Expiry for terminal job records, in seconds.
const TERMINAL_RECORD_TTL_SECS: u64 = 604_800;

/// Span reserved for the insertion sequence inside a ready score.
const SEQ_SPAN: f64 = 1e12;

/// Atomic claim: promote due delayed jobs, pop the best ready job, mark it
/// active. KEYS: ready, delayed, active, paused, prio, seq. ARGV: now_ms.
const CLAIM_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[4]) == 1 then
  return false
end
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, id in ipairs(due) do
  local prio = tonumber(redis.call('HGET', KEYS[5], id)) or 1
  local seq = redis.call('INCR', KEYS[6])
  redis.call('ZADD', KEYS[1], (10 - prio) * 1e12 + seq, id)
  redis.call('ZREM', KEYS[2], id)
end
local popped = redis.call('ZPOPMIN', KEYS[1], 1)
if #popped == 0 then
  return false
end
redis.call('SADD', KEYS[3], popped[1])
return popped[1]
"#;

/// Redis implementation of [`JobStore`].
pub struct RedisJobStore {
    redis: ConnectionManager,
    ready_key: String,
    delayed_key: String,
    active_key: String,
    paused_key: String,
    prio_key: String,
    seq_key: String,
    completed_key: String,
    failed_key: String,
    job_prefix: String,
    claim_script: redis::Script,
    completed_retention: usize,
    failed_retention: usize,
}

impl RedisJobStore {
    /// Connects to Redis and creates a new store under the given namespace.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, namespace))
    }

    /// Creates a store sharing an existing connection manager.
    pub fn from_connection(redis: ConnectionManager, namespace: &str) -> Self {
        Self {
            redis,
            ready_key: format!("{namespace}:ready"),
            delayed_key: format!("{namespace}:delayed"),
            active_key: format!("{namespace}:active"),
            paused_key: format!("{namespace}:paused"),
            prio_key: format!("{namespace}:prio"),
            seq_key: format!("{namespace}:seq"),
            completed_key: format!("{namespace}:completed"),
            failed_key: format!("{namespace}:failed"),
            job_prefix: format!("{namespace}:job"),
            claim_script: redis::Script::new(CLAIM_SCRIPT),
            completed_retention: 100,
            failed_retention: 50,
        }
    }

    /// Sets the bounded retention for terminal jobs.
    pub fn with_retention(mut self, completed: usize, failed: usize) -> Self {
        self.completed_retention = completed;
        self.failed_retention = failed;
        self
    }

    fn job_key(&self, id: Uuid) -> String {
        format!("{}:{}", self.job_prefix, id)
    }

    fn ready_score(&self, priority: u8, seq: u64) -> f64 {
        f64::from(10u8.saturating_sub(priority)) * SEQ_SPAN + seq as f64
    }

    async fn load(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(self.job_key(id)).await?;
        match data {
            // Unparseable records are repaired to the Unknown sentinel,
            // never surfaced as a hard error
            Some(s) => Ok(Some(
                serde_json::from_str(&s).unwrap_or_else(|_| JobRecord::unknown(id)),
            )),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let data = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(self.job_key(record.id), data).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn insert(&self, record: &JobRecord, delay: Duration) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let data = serde_json::to_string(record)?;

        if delay.is_zero() {
            let seq: u64 = conn.incr(&self.seq_key, 1u64).await?;
            let score = self.ready_score(record.priority, seq);

            let mut pipe = redis::pipe();
            pipe.set(self.job_key(record.id), data)
                .hset(&self.prio_key, record.id.to_string(), record.priority)
                .zadd(&self.ready_key, record.id.to_string(), score);
            pipe.query_async::<_, ()>(&mut conn).await?;
        } else {
            let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

            let mut pipe = redis::pipe();
            pipe.set(self.job_key(record.id), data)
                .hset(&self.prio_key, record.id.to_string(), record.priority)
                .zadd(&self.delayed_key, record.id.to_string(), ready_at);
            pipe.query_async::<_, ()>(&mut conn).await?;
        }
        Ok(())
    }

    async fn claim(&self) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let now_ms = Utc::now().timestamp_millis();

        let claimed: Option<String> = self
            .claim_script
            .key(&self.ready_key)
            .key(&self.delayed_key)
            .key(&self.active_key)
            .key(&self.paused_key)
            .key(&self.prio_key)
            .key(&self.seq_key)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;

        let Some(id_str) = claimed else {
            return Ok(None);
        };
        let Ok(id) = Uuid::parse_str(&id_str) else {
            // Corrupt member: drop it from the active set and report empty
            conn.srem::<_, _, ()>(&self.active_key, &id_str).await?;
            return Ok(None);
        };

        let Some(mut record) = self.load(id).await? else {
            // Record vanished (swept or expired): release the claim
            conn.srem::<_, _, ()>(&self.active_key, id.to_string())
                .await?;
            return Ok(None);
        };

        record.state = JobState::Active;
        record.attempts += 1;
        record.started_at = Some(Utc::now());
        record.progress = Some(0);
        self.save(&record).await?;

        Ok(Some(record))
    }

    async fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<(), StoreError> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(());
        };
        record.state = JobState::Completed;
        record.finished_at = Some(Utc::now());
        record.result = Some(result);

        let data = serde_json::to_string(&record)?;
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.set_ex(self.job_key(id), data, TERMINAL_RECORD_TTL_SECS)
            .srem(&self.active_key, id.to_string())
            .lpush(&self.completed_key, id.to_string())
            .ltrim(&self.completed_key, 0, self.completed_retention as isize - 1)
            .hdel(&self.prio_key, id.to_string());
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn retry(&self, record: &JobRecord, delay: Duration) -> Result<(), StoreError> {
        let mut requeued = record.clone();
        requeued.state = JobState::Waiting;
        requeued.started_at = None;
        requeued.progress = None;

        let data = serde_json::to_string(&requeued)?;
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.set(self.job_key(record.id), data)
            .srem(&self.active_key, record.id.to_string())
            .zadd(&self.delayed_key, record.id.to_string(), ready_at);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(());
        };
        record.state = JobState::Failed;
        record.finished_at = Some(Utc::now());
        record.failure_reason = Some(reason.to_string());

        let data = serde_json::to_string(&record)?;
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.set_ex(self.job_key(id), data, TERMINAL_RECORD_TTL_SECS)
            .srem(&self.active_key, id.to_string())
            .lpush(&self.failed_key, id.to_string())
            .ltrim(&self.failed_key, 0, self.failed_retention as isize - 1)
            .hdel(&self.prio_key, id.to_string());
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), StoreError> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(());
        };
        if record.progress.unwrap_or(0) > progress {
            return Ok(());
        }
        record.progress = Some(progress);
        self.save(&record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        self.load(id).await
    }

    async fn counts(&self) -> Result<StateCounts, StoreError> {
        let mut conn = self.redis.clone();
        let (ready, delayed, active, completed, failed): (usize, usize, usize, usize, usize) =
            redis::pipe()
                .zcard(&self.ready_key)
                .zcard(&self.delayed_key)
                .scard(&self.active_key)
                .llen(&self.completed_key)
                .llen(&self.failed_key)
                .query_async(&mut conn)
                .await?;

        Ok(StateCounts {
            waiting: ready + delayed,
            active,
            completed,
            failed,
        })
    }

    async fn pause(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(&self.paused_key, 1).await?;
        Ok(())
    }

    async fn resume(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(&self.paused_key).await?;
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let paused: bool = conn.exists(&self.paused_key).await?;
        Ok(paused)
    }

    async fn recover_stale(&self, older_than: Duration) -> Result<Vec<JobRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let active_ids: Vec<String> = conn.smembers(&self.active_key).await?;

        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut recovered = Vec::new();

        for id_str in active_ids {
            let Ok(id) = Uuid::parse_str(&id_str) else {
                conn.srem::<_, _, ()>(&self.active_key, &id_str).await?;
                continue;
            };
            let Some(record) = self.load(id).await? else {
                conn.srem::<_, _, ()>(&self.active_key, &id_str).await?;
                continue;
            };
            if record.started_at.is_some_and(|started| started < cutoff) {
                conn.srem::<_, _, ()>(&self.active_key, &id_str).await?;
                recovered.push(record);
            }
        }
        Ok(recovered)
    }

    async fn sweep(&self, keep_completed: usize, keep_failed: usize) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();

        for (list, keep) in [
            (&self.completed_key, keep_completed),
            (&self.failed_key, keep_failed),
        ] {
            let evicted: Vec<String> = conn.lrange(list, keep as isize, -1).await?;
            if evicted.is_empty() {
                continue;
            }
            let mut pipe = redis::pipe();
            for id in &evicted {
                pipe.del(format!("{}:{}", self.job_prefix, id));
            }
            pipe.ltrim(list, 0, keep as isize - 1);
            pipe.query_async::<_, ()>(&mut conn).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        // ConnectionManager has no explicit close; dropping the last clone
        // releases the connection
        Ok(())
    }
}
