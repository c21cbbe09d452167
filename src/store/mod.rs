//! Shared key-value store used for jobs, checkpoints, and rate windows.
//!
//! The engine only needs a handful of primitives, each atomic per key:
//! plain get/set/delete with TTL, a monotonic write guarded by a numeric
//! score, and a sliding-window admission check. [`MemoryStore`] serves a
//! single process and tests; [`RedisStore`] (feature `redis-store`) is shared
//! across worker processes.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value`, replacing any previous value. `None` TTL never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Stores `value` unless the key already holds a value written with a
    /// higher `score`. Returns whether the write happened.
    async fn set_if_not_lower(
        &self,
        key: &str,
        value: &str,
        score: f64,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Sliding-window admission: drops entries older than `window_ms`, and if
    /// fewer than `limit` remain, records `member` at `now_ms` and admits.
    async fn window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
        member: &str,
    ) -> Result<bool>;
}

/// Builds namespaced keys such as `scribed:job:<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, kind: &str, id: &str) -> String {
        format!("{}:{}:{}", self.prefix, kind, id)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(crate::defaults::KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_space_namespaces_keys() {
        let keys = KeySpace::new("test");
        assert_eq!(keys.key("job", "abc"), "test:job:abc");
        assert_eq!(KeySpace::default().key("rate", "c1"), "scribed:rate:c1");
    }
}
