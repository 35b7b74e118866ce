use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Connection, RedisResult, Script};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::{Broker, DelayedPoll};
use crate::error::{SchedulerError, SchedulerResult};
use crate::execution::Execution;

/// Pops the head of the delayed index if due, otherwise reports its score.
/// A retrying execution is parked again at now + its retry timeout.
///
/// KEYS: delayed zset, bodies hash. ARGV: now (ms), default retry timeout (ms).
const POLL_DELAYED: &str = r#"
local head = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if #head == 0 then
    return {'empty'}
end
if tonumber(head[2]) > tonumber(ARGV[1]) then
    return {'pending', head[2]}
end
redis.call('ZREM', KEYS[1], head[1])
local body = redis.call('HGET', KEYS[2], head[1])
if not body then
    return {'orphan'}
end
local execution = cjson.decode(body)
if execution.retry then
    local timeout = ARGV[2]
    if execution.retry_timeout_ms then
        timeout = execution.retry_timeout_ms
    end
    redis.call('ZADD', KEYS[1], tonumber(ARGV[1]) + tonumber(timeout), head[1])
else
    redis.call('HDEL', KEYS[2], head[1])
end
return {'due', body}
"#;

/// Slack on top of the BLPOP timeout before the socket read gives up.
const READ_TIMEOUT_MARGIN: Duration = Duration::from_secs(2);

/// KEYS: lock key, delayed zset, bodies hash.
/// ARGV: guard (ms), execution id, retry deadline (ms or ''), body.
const LOCK_AND_RECORD: &str = r#"
if not redis.call('SET', KEYS[1], '1', 'NX', 'PX', ARGV[1]) then
    return 0
end
if ARGV[3] ~= '' then
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
    redis.call('HSET', KEYS[3], ARGV[2], ARGV[4])
end
return 1
"#;

/// Broker backed by a Redis server shared by every scheduler process.
///
/// Layout under the key prefix:
/// - `{prefix}:ready:{task_id}`: list, one ready queue per task
/// - `{prefix}:delayed`: sorted set of execution ids scored by due time (ms)
/// - `{prefix}:executions`: hash of parked execution bodies
/// - `{prefix}:lock:{execution_id}`: dedup lock with a PX expiry
pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
    /// Idle connections for BLPOP, so a blocking pop never stalls the
    /// multiplexed one. Each concurrent pop holds its own connection.
    blocking: Arc<Mutex<Vec<Connection>>>,
    prefix: String,
    poll_script: Script,
    lock_script: Script,
}

impl RedisBroker {
    pub async fn connect(url: &str, prefix: impl Into<String>) -> SchedulerResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let broker = Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
            prefix: prefix.into(),
            poll_script: Script::new(POLL_DELAYED),
            lock_script: Script::new(LOCK_AND_RECORD),
        };
        broker.ping().await?;
        debug!(prefix = %broker.prefix, "Connected to Redis broker");
        Ok(broker)
    }

    pub async fn ping(&self) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(SchedulerError::broker(format!("Unexpected PING response: {response}")))
        }
    }

    fn ready_key(&self, task_id: &str) -> String {
        format!("{}:ready:{}", self.prefix, task_id)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn bodies_key(&self) -> String {
        format!("{}:executions", self.prefix)
    }

    fn lock_key(&self, execution_id: &str) -> String {
        format!("{}:lock:{}", self.prefix, execution_id)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue_ready(&self, execution: &Execution) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("RPUSH")
            .arg(self.ready_key(execution.task_id()))
            .arg(execution.to_json()?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue_ready(&self, task_ids: &[String], timeout: Duration) -> SchedulerResult<Option<Execution>> {
        if task_ids.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        let keys: Vec<String> = task_ids.iter().map(|id| self.ready_key(id)).collect();
        // BLPOP treats 0 as "wait forever".
        let seconds = timeout.as_secs_f64().max(0.01);
        let client = self.client.clone();
        let slot = self.blocking.clone();

        let popped = tokio::task::spawn_blocking(move || -> RedisResult<Option<(String, String)>> {
            let idle = slot.lock().unwrap_or_else(PoisonError::into_inner).pop();
            let mut conn = match idle {
                Some(conn) => conn,
                None => client.get_connection()?,
            };
            conn.set_read_timeout(Some(timeout + READ_TIMEOUT_MARGIN))?;
            let result = redis::cmd("BLPOP").arg(&keys).arg(seconds).query(&mut conn);
            // A failed connection is dropped rather than pooled.
            if result.is_ok() {
                slot.lock().unwrap_or_else(PoisonError::into_inner).push(conn);
            }
            result
        })
        .await
        .map_err(|e| SchedulerError::broker(format!("blocking pop task failed: {e}")))??;

        match popped {
            Some((_, body)) => Ok(Some(Execution::from_json(&body)?)),
            None => Ok(None),
        }
    }

    async fn poll_delayed(&self, now: DateTime<Utc>, default_retry_timeout: Duration) -> SchedulerResult<DelayedPoll> {
        let mut conn = self.conn.clone();
        let default_ms = u64::try_from(default_retry_timeout.as_millis()).unwrap_or(u64::MAX);
        loop {
            let reply: Vec<String> = self
                .poll_script
                .key(self.delayed_key())
                .key(self.bodies_key())
                .arg(now.timestamp_millis())
                .arg(default_ms)
                .invoke_async(&mut conn)
                .await?;

            match reply.first().map(String::as_str) {
                Some("empty") => return Ok(DelayedPoll::Empty),
                Some("pending") => {
                    let score = reply
                        .get(1)
                        .and_then(|raw| raw.parse::<f64>().ok())
                        .ok_or_else(|| SchedulerError::broker("malformed delayed score"))?;
                    let due_at = DateTime::from_timestamp_millis(score as i64).unwrap_or(now);
                    return Ok(DelayedPoll::Pending(due_at));
                }
                Some("due") => {
                    let body = reply
                        .get(1)
                        .ok_or_else(|| SchedulerError::broker("delayed entry without body"))?;
                    return Ok(DelayedPoll::Due(Execution::from_json(body)?));
                }
                // Entry whose body vanished; it was dropped, look at the next one.
                Some("orphan") => continue,
                other => {
                    return Err(SchedulerError::broker(format!(
                        "unexpected delayed poll reply: {other:?}"
                    )))
                }
            }
        }
    }

    async fn enqueue_delayed(&self, due_at: DateTime<Utc>, execution: &Execution) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(self.delayed_key())
            .arg(due_at.timestamp_millis())
            .arg(execution.execution_id())
            .ignore()
            .cmd("HSET")
            .arg(self.bodies_key())
            .arg(execution.execution_id())
            .arg(execution.to_json()?)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn lock_and_record(
        &self,
        execution: &Execution,
        guard: Duration,
        retry_deadline: Option<DateTime<Utc>>,
    ) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let deadline = retry_deadline
            .map(|d| d.timestamp_millis().to_string())
            .unwrap_or_default();
        let guard_ms = u64::try_from(guard.as_millis()).unwrap_or(u64::MAX).max(1);

        let acquired: i64 = self
            .lock_script
            .key(self.lock_key(execution.execution_id()))
            .key(self.delayed_key())
            .key(self.bodies_key())
            .arg(guard_ms)
            .arg(execution.execution_id())
            .arg(deadline)
            .arg(execution.to_json()?)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    async fn clear_pending(&self, execution_id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZREM")
            .arg(self.delayed_key())
            .arg(execution_id)
            .ignore()
            .cmd("HDEL")
            .arg(self.bodies_key())
            .arg(execution_id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_pending(&self, execution_id: &str) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(self.delayed_key())
            .arg(execution_id)
            .query_async(&mut conn)
            .await?;
        Ok(score.is_some())
    }
}
