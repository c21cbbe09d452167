use crate::error::Result;
use crate::store::SharedStore;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info};

/// Lua scripts; each runs atomically on the server so concurrent workers
/// never interleave a read and the write that depends on it.
mod scripts {
    use redis::Script;

    /// KEYS[1] value key, KEYS[2] score key; ARGV value, score, ttl seconds (0 = none).
    pub fn set_if_not_lower() -> Script {
        Script::new(
            r#"
            local current = redis.call('GET', KEYS[2])
            if current and tonumber(current) > tonumber(ARGV[2]) then
                return 0
            end
            local ttl = tonumber(ARGV[3])
            if ttl > 0 then
                redis.call('SET', KEYS[1], ARGV[1], 'EX', ttl)
                redis.call('SET', KEYS[2], ARGV[2], 'EX', ttl)
            else
                redis.call('SET', KEYS[1], ARGV[1])
                redis.call('SET', KEYS[2], ARGV[2])
            end
            return 1
            "#,
        )
    }

    /// Sliding window log over a sorted set scored by admission time.
    pub fn sliding_window_log() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local window = tonumber(ARGV[2])
            local limit = tonumber(ARGV[3])

            redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

            local current = redis.call('ZCARD', key)
            if current < limit then
                redis.call('ZADD', key, now, ARGV[4])
                redis.call('PEXPIRE', key, window)
                return 1
            end
            return 0
            "#,
        )
    }
}

/// Redis-backed [`SharedStore`] shared by every worker process.
///
/// Monotonic writes keep their score in a sibling `<key>:score` key, which
/// [`SharedStore::delete`] removes together with the value.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", redis_url);
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn score_key(key: &str) -> String {
        format!("{key}:score")
    }
}

fn ttl_secs(ttl: Option<Duration>) -> u64 {
    ttl.map(|t| t.as_secs().max(1)).unwrap_or(0)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        debug!(key, hit = value.is_some(), "Store GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl_secs(ttl) {
            0 => conn.set::<_, _, ()>(key, value).await?,
            secs => conn.set_ex::<_, _, ()>(key, value, secs).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&[key.to_string(), Self::score_key(key)])
            .await?;
        Ok(())
    }

    async fn set_if_not_lower(
        &self,
        key: &str,
        value: &str,
        score: f64,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let written: i64 = scripts::set_if_not_lower()
            .key(key)
            .key(Self::score_key(key))
            .arg(value)
            .arg(score)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
        member: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let admitted: i64 = scripts::sliding_window_log()
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(admitted == 1)
    }
}
