//! Redis list-backed job queue.
//!
//! Uses one Redis list per queue name:
//! - **Enqueue**: `LPUSH <queue> <record>` (head)
//! - **Dequeue**: `BRPOP <queue> <timeout>` (tail, oldest first)
//! - **Claim**: `BLMOVE <queue> <queue>:processing RIGHT LEFT <timeout>` plus a
//!   deadline in the sorted set `<queue>:inflight`
//! - **Ack**: `LREM` from the processing list and `ZREM` from the deadline set
//! - **Requeue**: a Lua script moves every expired claim back to the tail
//!
//! Redis provides the atomicity of each push/pop; nothing here locks.
//!
//! The connection is opened lazily and held in a `ConnectionManager`, which
//! reconnects after failures. Connecting is a single attempt bounded by
//! [`CONNECT_TIMEOUT`]; a refused or slow store surfaces as
//! `QueueError::Unavailable` and retrying is left to the caller. A blocking
//! pop occupies the multiplexed connection until it returns, so a worker
//! should own its queue instance.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use taskq_core::{JobRecord, JobRequest};

use super::{Claim, JobQueue, QueueError, ReliableQueue, codec};
use crate::config::StoreConfig;

/// Upper bound on opening the connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Moves expired claims back to the consuming end of the queue.
///
/// KEYS: processing list, queue list, deadline set. ARGV: now (unix ms).
/// An entry is requeued only by the caller that removed it from the
/// processing list, so concurrent reapers never duplicate it. Entries are
/// pushed newest deadline first so the oldest claim ends up at the tail.
const REQUEUE_EXPIRED_LUA: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
local requeued = 0
for i = #expired, 1, -1 do
  local raw = expired[i]
  redis.call('ZREM', KEYS[3], raw)
  if redis.call('LREM', KEYS[1], 1, raw) > 0 then
    redis.call('RPUSH', KEYS[2], raw)
    requeued = requeued + 1
  end
end
return requeued
"#;

impl From<RedisError> for QueueError {
    fn from(err: RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

pub struct RedisJobQueue {
    client: redis::Client,
    name: String,
    processing_key: String,
    inflight_key: String,
    requeue_script: Script,
    conn: Mutex<Option<ConnectionManager>>,
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("name", &self.name)
            .field("processing_key", &self.processing_key)
            .field("inflight_key", &self.inflight_key)
            .finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    /// Create a queue adapter. Does not connect; the first operation does.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `queue_name` - key of the Redis list (e.g., "tasks_queue")
    pub fn new(redis_url: impl AsRef<str>, queue_name: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        let name = queue_name.into();

        Ok(Self {
            client,
            processing_key: format!("{name}:processing"),
            inflight_key: format!("{name}:inflight"),
            name,
            requeue_script: Script::new(REQUEUE_EXPIRED_LUA),
            conn: Mutex::new(None),
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, QueueError> {
        Self::new(&config.redis_url, config.queue_name.clone())
    }

    async fn connection(&self) -> Result<ConnectionManager, QueueError> {
        if let Some(conn) = self.conn.lock().await.as_ref() {
            return Ok(conn.clone());
        }

        // Slot is not held while connecting; the first connection stored wins.
        // Single attempt, also on reconnect. No response timeout: BRPOP blocks.
        let conn = ConnectionManager::new_with_backoff_and_timeouts(
            self.client.clone(),
            2,
            100,
            0,
            Duration::MAX,
            CONNECT_TIMEOUT,
        )
        .await?;
        debug!(queue = %self.name, "connected to redis");

        Ok(self.conn.lock().await.get_or_insert(conn).clone())
    }

    /// Drop an in-flight entry that can never be processed.
    async fn forget(&self, conn: &mut ConnectionManager, raw: &str) -> Result<(), QueueError> {
        let () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(raw)
            .ignore()
            .cmd("ZREM")
            .arg(&self.inflight_key)
            .arg(raw)
            .ignore()
            .query_async(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip_all, fields(queue = %self.name))]
    async fn enqueue(&self, request: JobRequest) -> Result<JobRecord, QueueError> {
        let record = JobRecord::admit(request)?;
        let raw = codec::encode(&record)?;

        let mut conn = self.connection().await?;
        let _len: i64 = redis::cmd("LPUSH")
            .arg(&self.name)
            .arg(&raw)
            .query_async(&mut conn)
            .await?;

        Ok(record)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.connection().await?;

        // BRPOP treats 0 as "block forever"; a zero wait is a plain RPOP.
        let raw: Option<String> = if timeout.is_zero() {
            redis::cmd("RPOP")
                .arg(&self.name)
                .query_async(&mut conn)
                .await?
        } else {
            let popped: Option<(String, String)> = redis::cmd("BRPOP")
                .arg(&self.name)
                .arg(timeout.as_secs_f64())
                .query_async(&mut conn)
                .await?;
            popped.map(|(_key, raw)| raw)
        };

        raw.map(|raw| codec::decode(&raw)).transpose()
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let len: usize = redis::cmd("LLEN")
            .arg(&self.name)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl ReliableQueue for RedisJobQueue {
    async fn claim(
        &self,
        timeout: Duration,
        visibility: Duration,
    ) -> Result<Option<Claim>, QueueError> {
        let mut conn = self.connection().await?;

        let raw: Option<String> = if timeout.is_zero() {
            redis::cmd("LMOVE")
                .arg(&self.name)
                .arg(&self.processing_key)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?
        } else {
            redis::cmd("BLMOVE")
                .arg(&self.name)
                .arg(&self.processing_key)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(timeout.as_secs_f64())
                .query_async(&mut conn)
                .await?
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        let deadline_ms = Utc::now().timestamp_millis()
            + i64::try_from(visibility.as_millis()).unwrap_or(i64::MAX / 2);
        let _added: i64 = redis::cmd("ZADD")
            .arg(&self.inflight_key)
            .arg(deadline_ms)
            .arg(&raw)
            .query_async(&mut conn)
            .await?;

        match codec::decode(&raw) {
            Ok(record) => Ok(Some(Claim::new(record, raw))),
            Err(e) => {
                self.forget(&mut conn, &raw).await?;
                Err(e)
            }
        }
    }

    async fn ack(&self, claim: &Claim) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        self.forget(&mut conn, claim.receipt()).await
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let requeued: usize = self
            .requeue_script
            .key(&self.processing_key)
            .key(&self.name)
            .key(&self.inflight_key)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(requeued)
    }
}
