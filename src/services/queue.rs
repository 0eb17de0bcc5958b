use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use uuid::Uuid;

use crate::models::job::{JobDescriptor, QueueMessage, ReceiptHandle};

/// How often an empty long-poll re-checks for claimable messages.
const POLL_INTERVAL_MS: u64 = 500;

/// At-least-once task queue with per-delivery visibility.
///
/// A delivered message is hidden from other consumers until it is
/// acknowledged or its visibility deadline passes, after which it is
/// delivered again with a new receipt handle.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a raw message body.
    async fn enqueue_raw(&self, body: String) -> Result<(), QueueError>;

    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<(), QueueError> {
        let body = serde_json::to_string(descriptor)?;
        self.enqueue_raw(body).await
    }

    /// Wait up to `wait` for at least one message and claim up to
    /// `max_messages`. Returns an empty list on timeout.
    async fn poll(&self, max_messages: usize, wait: Duration)
        -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete the message delivered with `receipt`.
    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Push the visibility deadline of a delivery to now + `visibility`.
    /// A zero duration makes the message immediately available again.
    async fn extend_visibility(
        &self,
        receipt: &ReceiptHandle,
        visibility: Duration,
    ) -> Result<(), QueueError>;

    /// Number of messages waiting to be delivered.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

// Re-queues deliveries whose visibility expired, then claims up to
// #ARGV - 2 messages. Returns a flat list of (receipt, body, receive_count).
const CLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', ARGV[1])
for _, receipt in ipairs(expired) do
    local id = redis.call('HGET', KEYS[5], receipt)
    redis.call('ZREM', KEYS[4], receipt)
    redis.call('HDEL', KEYS[5], receipt)
    if id and redis.call('HEXISTS', KEYS[2], id) == 1 then
        redis.call('RPUSH', KEYS[1], id)
    end
end
local out = {}
for i = 3, #ARGV do
    local id = redis.call('RPOP', KEYS[1])
    if not id then break end
    local body = redis.call('HGET', KEYS[2], id)
    if body then
        local count = redis.call('HINCRBY', KEYS[3], id, 1)
        redis.call('ZADD', KEYS[4], ARGV[2], ARGV[i])
        redis.call('HSET', KEYS[5], ARGV[i], id)
        table.insert(out, ARGV[i])
        table.insert(out, body)
        table.insert(out, tostring(count))
    end
end
return out
"#;

const ACK_SCRIPT: &str = r#"
local id = redis.call('HGET', KEYS[2], ARGV[1])
if not id then return 0 end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], id)
redis.call('HDEL', KEYS[4], id)
return 1
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
    return 1
end
return 0
"#;

/// Redis-backed task queue.
///
/// Layout under the `name` prefix: a pending list of message ids, a hash of
/// message bodies, a hash of delivery counts, an in-flight sorted set of
/// receipts scored by visibility deadline, and a receipt → message id hash.
/// All state transitions run as Lua scripts so concurrent workers never
/// claim the same delivery twice. Deadlines use the workers' wall clocks.
pub struct RedisTaskQueue {
    conn: ConnectionManager,
    keys: QueueKeys,
    visibility_timeout: Duration,
    claim: Script,
    ack: Script,
    extend: Script,
}

struct QueueKeys {
    pending: String,
    messages: String,
    attempts: String,
    inflight: String,
    receipts: String,
}

impl QueueKeys {
    fn new(name: &str) -> Self {
        Self {
            pending: format!("{}:pending", name),
            messages: format!("{}:messages", name),
            attempts: format!("{}:attempts", name),
            inflight: format!("{}:inflight", name),
            receipts: format!("{}:receipts", name),
        }
    }
}

impl RedisTaskQueue {
    pub async fn connect(
        redis_url: &str,
        name: &str,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            keys: QueueKeys::new(name),
            visibility_timeout,
            claim: Script::new(CLAIM_SCRIPT),
            ack: Script::new(ACK_SCRIPT),
            extend: Script::new(EXTEND_SCRIPT),
        })
    }

    async fn try_claim(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let deadline_ms = now_ms + self.visibility_timeout.as_millis() as i64;

        let mut invocation = self.claim.prepare_invoke();
        invocation
            .key(&self.keys.pending)
            .key(&self.keys.messages)
            .key(&self.keys.attempts)
            .key(&self.keys.inflight)
            .key(&self.keys.receipts)
            .arg(now_ms)
            .arg(deadline_ms);
        for _ in 0..max_messages {
            invocation.arg(Uuid::new_v4().to_string());
        }

        let mut conn = self.conn.clone();
        let flat: Vec<String> = invocation.invoke_async(&mut conn).await?;

        flat.chunks_exact(3)
            .map(|chunk| {
                let receive_count = chunk[2].parse::<u32>().map_err(|e| {
                    QueueError::Protocol(format!("bad receive count {:?}: {}", chunk[2], e))
                })?;
                Ok(QueueMessage {
                    receipt: ReceiptHandle::new(chunk[0].clone()),
                    body: chunk[1].clone(),
                    receive_count,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue_raw(&self, body: String) -> Result<(), QueueError> {
        let message_id = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset(&self.keys.messages, &message_id, &body)
            .ignore()
            .lpush(&self.keys.pending, &message_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn poll(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let max_messages = max_messages.max(1);
        let started = Instant::now();
        loop {
            let messages = self.try_claim(max_messages).await?;
            if !messages.is_empty() {
                return Ok(messages);
            }
            let elapsed = started.elapsed();
            if elapsed >= wait {
                return Ok(Vec::new());
            }
            sleep((wait - elapsed).min(Duration::from_millis(POLL_INTERVAL_MS))).await;
        }
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .ack
            .key(&self.keys.inflight)
            .key(&self.keys.receipts)
            .key(&self.keys.messages)
            .key(&self.keys.attempts)
            .arg(receipt.as_str())
            .invoke_async(&mut conn)
            .await?;
        if removed == 1 {
            Ok(())
        } else {
            Err(QueueError::UnknownReceipt)
        }
    }

    async fn extend_visibility(
        &self,
        receipt: &ReceiptHandle,
        visibility: Duration,
    ) -> Result<(), QueueError> {
        let deadline_ms = Utc::now().timestamp_millis() + visibility.as_millis() as i64;
        let mut conn = self.conn.clone();
        let updated: i64 = self
            .extend
            .key(&self.keys.inflight)
            .arg(receipt.as_str())
            .arg(deadline_ms)
            .invoke_async(&mut conn)
            .await?;
        if updated == 1 {
            Ok(())
        } else {
            Err(QueueError::UnknownReceipt)
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let depth: u64 = conn.llen(&self.keys.pending).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The receipt is stale: the delivery expired or was already acknowledged.
    #[error("Receipt handle is no longer valid")]
    UnknownReceipt,

    #[error("Unexpected queue response: {0}")]
    Protocol(String),
}
