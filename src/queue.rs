use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::Result;

/// FIFO list of event ids eligible for an immediate delivery attempt.
pub const READY_QUEUE_KEY: &str = "webhook:queue";
/// Sorted set of event ids scored by the unix second they become due again.
pub const RETRY_SET_KEY: &str = "webhook:retry";

/// Bridge to the Redis broker. Holds only references (event ids); the store
/// owns canonical state, so lost entries are recoverable by re-scanning.
#[derive(Clone)]
pub struct BrokerQueue {
    conn: ConnectionManager,
}

impl BrokerQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Publish an event id onto the ready queue.
    pub async fn push_ready(&self, event_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(READY_QUEUE_KEY)
            .arg(event_id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Blocking-pop from the ready queue, waiting up to `timeout_secs`.
    /// Returns `None` when the timeout elapses with an empty queue.
    pub async fn pop_ready(&self, timeout_secs: u64) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(READY_QUEUE_KEY)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    /// Add an event to the delayed-retry set, scored by its due time.
    pub async fn schedule_retry(&self, event_id: Uuid, due_at_unix: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(RETRY_SET_KEY)
            .arg(due_at_unix)
            .arg(event_id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Event ids whose retry score is due at or before `now_unix`.
    pub async fn due_retries(&self, now_unix: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(RETRY_SET_KEY)
            .arg(0)
            .arg(now_unix)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    /// Remove an event id from the delayed-retry set.
    pub async fn remove_retry(&self, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZREM")
            .arg(RETRY_SET_KEY)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
