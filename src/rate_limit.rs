use redis::aio::ConnectionManager;
use redis::Script;

use crate::error::{PipelineError, Result};

/// Token-bucket state key protecting the downstream receiver.
pub const DOWNSTREAM_BUCKET_KEY: &str = "rate_limit:downstream";
/// Downstream receiver refill rate, tokens per second.
pub const DOWNSTREAM_RATE: u32 = 3;
/// Downstream receiver burst capacity.
pub const DOWNSTREAM_BURST: u32 = 3;

// Atomic token bucket: refill from elapsed time, clamp to capacity, then
// conditionally deduct. Runs server-side so concurrent callers never
// read-modify-write the bucket from the application.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local refill_rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local tokens_requested = tonumber(ARGV[4] or 1)

local current = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(current[1]) or capacity
local last_refill = tonumber(current[2]) or now_ms

local time_passed = math.max(0, now_ms - last_refill)
tokens = math.min(capacity, tokens + (time_passed / 1000) * refill_rate)

if tokens >= tokens_requested then
    tokens = tokens - tokens_requested
    redis.call('HMSET', key, 'tokens', tokens, 'last_refill', now_ms)
    redis.call('EXPIRE', key, 3600)
    return 1
else
    redis.call('HMSET', key, 'tokens', tokens, 'last_refill', now_ms)
    redis.call('EXPIRE', key, 3600)
    return 0
end
"#;

/// Rate limiter using a token bucket evaluated atomically in Redis.
pub struct TokenBucketRateLimiter {
    conn: ConnectionManager,
    script: Script,
    rate: u32,
    capacity: u32,
}

impl TokenBucketRateLimiter {
    /// `rate` is tokens added per second, `capacity` the maximum burst.
    pub fn new(conn: ConnectionManager, rate: u32, capacity: u32) -> Self {
        Self {
            conn,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
            rate,
            capacity,
        }
    }

    /// Check whether `requested_tokens` can be consumed under `key`.
    /// Deducts only when allowed.
    pub async fn is_request_allowed(&self, key: &str, requested_tokens: u32) -> Result<bool> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let allowed: i64 = self
            .script
            .key(key)
            .arg(self.rate)
            .arg(self.capacity)
            .arg(now_ms)
            .arg(requested_tokens)
            .invoke_async(&mut conn)
            .await
            .map_err(classify_redis_error)?;
        Ok(allowed == 1)
    }
}

fn classify_redis_error(e: redis::RedisError) -> PipelineError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
    {
        PipelineError::service_unavailable(
            "Rate limiting service unavailable due to connection error",
        )
    } else {
        PipelineError::internal(format!("rate limit script failed: {e}"))
    }
}
