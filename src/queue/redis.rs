//! Redis queue backend using a bb8 connection pool.
//!
//! Key layout under `{prefix}:{queue}`:
//! - `waiting`   list, LPUSH on enqueue, RPOP on lease
//! - `active`    sorted set of leased ids scored by lease deadline (ms)
//! - `delayed`   sorted set of retrying ids scored by due time (ms)
//! - `dead`      list of dead-lettered ids
//! - `completed` counter
//! - `job:{id}`  hash with payload, attempts_made, created_at, processed_at,
//!   finished_at, last_error
//!
//! Every multi-key transition runs as a Lua script.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use jiff::Timestamp;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config::RedisQueueConfig;
use crate::jobs::{HandlerError, Job, JobId};
use crate::queue::{FailOutcome, QueueBackend, QueueError, RetryPolicies};

type RedisPool = Pool<Client>;

static LEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[3], id)
  redis.call('LPUSH', KEYS[1], id)
end
local id = redis.call('RPOP', KEYS[1])
if not id then
  return nil
end
redis.call('ZADD', KEYS[2], ARGV[2], id)
local key = ARGV[3] .. id
redis.call('HSET', key, 'processed_at', ARGV[1])
local fields = redis.call('HMGET', key, 'payload', 'attempts_made', 'created_at')
return {id, fields[1] or 'null', fields[2] or '0', fields[3] or ARGV[1]}
",
    )
});

static EXTEND_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
  redis.call('ZADD', KEYS[1], 'XX', ARGV[2], ARGV[1])
  return 1
end
return 0
",
    )
});

static ACK_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('DEL', KEYS[2])
redis.call('INCR', KEYS[3])
return 1
",
    )
});

static FAIL_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[4], 'attempts_made', ARGV[3], 'last_error', ARGV[5])
if ARGV[2] == 'retry' then
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
else
  redis.call('HSET', KEYS[4], 'finished_at', ARGV[6])
  redis.call('LPUSH', KEYS[3], ARGV[1])
end
return 1
",
    )
});

static RECLAIM_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('RPUSH', KEYS[2], id)
end
return expired
",
    )
});

/// Key builder for one queue
#[derive(Debug, Clone)]
struct QueueKeys {
    base: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{prefix}:{queue}"),
        }
    }

    fn waiting(&self) -> String {
        format!("{}:waiting", self.base)
    }

    fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    fn delayed(&self) -> String {
        format!("{}:delayed", self.base)
    }

    fn dead(&self) -> String {
        format!("{}:dead", self.base)
    }

    fn completed(&self) -> String {
        format!("{}:completed", self.base)
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.base)
    }

    fn job(&self, id: &JobId) -> String {
        format!("{}{}", self.job_prefix(), id)
    }
}

fn now_ms() -> i64 {
    Timestamp::now().as_millisecond()
}

fn after_ms(delay: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}

/// Decodes the `[id, payload, attempts_made, created_at]` reply of the lease script.
fn decode_leased(queue: &str, reply: Vec<String>) -> Result<Job, QueueError> {
    let [id, payload, attempts_made, created_at]: [String; 4] = reply
        .try_into()
        .map_err(|r: Vec<String>| {
            QueueError::Serialization(format!("lease reply has {} fields, expected 4", r.len()))
        })?;

    let attempts_made = attempts_made
        .parse::<u32>()
        .map_err(|e| QueueError::Serialization(format!("attempts_made: {e}")))?;
    let created_at = created_at
        .parse::<i64>()
        .ok()
        .and_then(|ms| Timestamp::from_millisecond(ms).ok())
        .ok_or_else(|| QueueError::Serialization(format!("created_at: {created_at}")))?;

    Ok(Job {
        id: JobId::new(id),
        queue_name: queue.to_string(),
        payload: serde_json::from_str(&payload)?,
        attempts_made,
        created_at,
        processed_at: Some(Timestamp::now()),
        finished_at: None,
    })
}

/// Redis-backed durable queue.
pub struct RedisQueue {
    pool: RwLock<Option<RedisPool>>,
    key_prefix: String,
    policies: RetryPolicies,
    closed: AtomicBool,
}

impl RedisQueue {
    pub async fn new(config: &RedisQueueConfig, policies: RetryPolicies) -> Result<Self, QueueError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| QueueError::Connection(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(config.connection_timeout))
            .build(client)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            pool: RwLock::new(Some(pool)),
            key_prefix: config.key_prefix.clone(),
            policies,
            closed: AtomicBool::new(false),
        })
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.key_prefix, queue)
    }

    fn pool(&self) -> Result<RedisPool, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        self.pool
            .read()
            .map_err(|e| QueueError::Operation(e.to_string()))?
            .clone()
            .ok_or(QueueError::Closed)
    }

    async fn get_conn(pool: &RedisPool) -> Result<PooledConnection<'_, Client>, QueueError> {
        pool.get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    fn not_leased(job: &Job) -> QueueError {
        QueueError::NotLeased {
            queue: job.queue_name.clone(),
            job_id: job.id.to_string(),
        }
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn enqueue(&self, queue: &str, payload: JsonValue) -> Result<JobId, QueueError> {
        let pool = self.pool()?;
        let mut conn = Self::get_conn(&pool).await?;
        let keys = self.keys(queue);
        let id = JobId::new(Uuid::new_v4().to_string());
        let payload = serde_json::to_string(&payload)?;

        let conn_ref: &mut MultiplexedConnection = &mut conn;
        redis::pipe()
            .atomic()
            .hset_multiple(
                keys.job(&id),
                &[
                    ("payload", payload),
                    ("attempts_made", "0".to_string()),
                    ("created_at", now_ms().to_string()),
                ],
            )
            .ignore()
            .lpush(keys.waiting(), id.as_str())
            .ignore()
            .query_async::<()>(conn_ref)
            .await?;

        Ok(id)
    }

    async fn lease(&self, queue: &str, lease_for: Duration) -> Result<Option<Job>, QueueError> {
        let pool = self.pool()?;
        let mut conn = Self::get_conn(&pool).await?;
        let keys = self.keys(queue);

        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let reply: Option<Vec<String>> = LEASE_SCRIPT
            .key(keys.waiting())
            .key(keys.active())
            .key(keys.delayed())
            .arg(now_ms())
            .arg(after_ms(lease_for))
            .arg(keys.job_prefix())
            .invoke_async(conn_ref)
            .await?;

        reply.map(|fields| decode_leased(queue, fields)).transpose()
    }

    async fn extend_lease(&self, job: &Job, lease_for: Duration) -> Result<(), QueueError> {
        let pool = self.pool()?;
        let mut conn = Self::get_conn(&pool).await?;
        let keys = self.keys(&job.queue_name);

        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let extended: i64 = EXTEND_SCRIPT
            .key(keys.active())
            .arg(job.id.as_str())
            .arg(after_ms(lease_for))
            .invoke_async(conn_ref)
            .await?;

        if extended == 1 {
            Ok(())
        } else {
            Err(Self::not_leased(job))
        }
    }

    async fn ack(&self, job: &Job) -> Result<(), QueueError> {
        let pool = self.pool()?;
        let mut conn = Self::get_conn(&pool).await?;
        let keys = self.keys(&job.queue_name);

        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let acked: i64 = ACK_SCRIPT
            .key(keys.active())
            .key(keys.job(&job.id))
            .key(keys.completed())
            .arg(job.id.as_str())
            .invoke_async(conn_ref)
            .await?;

        if acked == 1 {
            Ok(())
        } else {
            Err(Self::not_leased(job))
        }
    }

    async fn fail(&self, job: &Job, error: &HandlerError) -> Result<FailOutcome, QueueError> {
        let pool = self.pool()?;
        let mut conn = Self::get_conn(&pool).await?;
        let keys = self.keys(&job.queue_name);

        let outcome = self
            .policies
            .for_queue(&job.queue_name)
            .decide(job.attempts_made, error);
        let (mode, due) = match outcome {
            FailOutcome::Retrying { delay, .. } => ("retry", after_ms(delay)),
            FailOutcome::DeadLettered { .. } => ("dead", now_ms()),
        };

        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let failed: i64 = FAIL_SCRIPT
            .key(keys.active())
            .key(keys.delayed())
            .key(keys.dead())
            .key(keys.job(&job.id))
            .arg(job.id.as_str())
            .arg(mode)
            .arg(outcome.attempts_made())
            .arg(due)
            .arg(serde_json::to_string(error)?)
            .arg(now_ms())
            .invoke_async(conn_ref)
            .await?;

        if failed == 1 {
            Ok(outcome)
        } else {
            Err(Self::not_leased(job))
        }
    }

    async fn reclaim_stalled(&self, queue: &str) -> Result<Vec<JobId>, QueueError> {
        let pool = self.pool()?;
        let mut conn = Self::get_conn(&pool).await?;
        let keys = self.keys(queue);

        let conn_ref: &mut MultiplexedConnection = &mut conn;
        let expired: Vec<String> = RECLAIM_SCRIPT
            .key(keys.active())
            .key(keys.waiting())
            .arg(now_ms())
            .invoke_async(conn_ref)
            .await?;

        Ok(expired.into_iter().map(JobId::new).collect())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        // Idle connections are released once in-flight clones of the pool drop
        self.pool
            .write()
            .map_err(|e| QueueError::Operation(e.to_string()))?
            .take();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keys_layout() {
        let keys = QueueKeys::new("taskhive", "email-delivery");
        assert_eq!(keys.waiting(), "taskhive:email-delivery:waiting");
        assert_eq!(keys.active(), "taskhive:email-delivery:active");
        assert_eq!(keys.delayed(), "taskhive:email-delivery:delayed");
        assert_eq!(keys.dead(), "taskhive:email-delivery:dead");
        assert_eq!(keys.completed(), "taskhive:email-delivery:completed");
        assert_eq!(
            keys.job(&JobId::from("abc")),
            "taskhive:email-delivery:job:abc"
        );
    }

    #[test]
    fn test_decode_leased_reply() {
        let reply = vec![
            "abc".to_string(),
            r#"{"to":"ops@example.com"}"#.to_string(),
            "2".to_string(),
            "1700000000000".to_string(),
        ];

        let job = decode_leased("email-delivery", reply).unwrap();
        assert_eq!(job.id, JobId::from("abc"));
        assert_eq!(job.queue_name, "email-delivery");
        assert_eq!(job.payload["to"], "ops@example.com");
        assert_eq!(job.attempts_made, 2);
        assert_eq!(job.created_at.as_millisecond(), 1_700_000_000_000);
    }

    #[test]
    fn test_decode_leased_reply_missing_hash() {
        // The script substitutes defaults when the job hash is gone
        let reply = vec![
            "abc".to_string(),
            "null".to_string(),
            "0".to_string(),
            "1700000000000".to_string(),
        ];
        let job = decode_leased("maintenance", reply).unwrap();
        assert!(job.payload.is_null());
    }

    #[test]
    fn test_decode_leased_reply_malformed() {
        assert!(matches!(
            decode_leased("q", vec!["abc".to_string()]),
            Err(QueueError::Serialization(_))
        ));

        let reply = vec![
            "abc".to_string(),
            "{}".to_string(),
            "many".to_string(),
            "0".to_string(),
        ];
        assert!(matches!(
            decode_leased("q", reply),
            Err(QueueError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_is_connection_error() {
        let config = RedisQueueConfig {
            url: "not-a-redis-url".to_string(),
            ..Default::default()
        };
        let result = RedisQueue::new(&config, RetryPolicies::default()).await;
        assert!(matches!(result, Err(QueueError::Connection(_))));
    }
}
