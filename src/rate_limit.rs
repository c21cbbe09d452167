//! Sliding-window request limiter shared across processes.

use crate::clock::Clock;
use crate::config::{FailMode, RateLimitConfig};
use crate::error::Result;
use crate::store::{KeySpace, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Admits at most `max_requests` per client within any trailing window.
///
/// Every admitted request is one timestamped entry in the shared store, so
/// all instances pointed at the same store enforce one limit together.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
    window: Duration,
    max_requests: u32,
    fail_mode: FailMode,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("keys", &self.keys)
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("fail_mode", &self.fail_mode)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn SharedStore>,
        keys: KeySpace,
        clock: Arc<dyn Clock>,
        config: &RateLimitConfig,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            window: Duration::from_secs(config.window_secs),
            max_requests: config.max_requests,
            fail_mode: config.fail_mode,
        }
    }

    /// Admission check that reports store failures instead of applying the
    /// fail mode.
    pub async fn check(&self, client: &str) -> Result<bool> {
        let now_ms = self.clock.now_millis();
        let member = format!("{now_ms}-{}", Uuid::new_v4());
        self.store
            .window_admit(
                &self.keys.key("rate", client),
                now_ms,
                self.window.as_millis() as i64,
                self.max_requests,
                &member,
            )
            .await
    }

    /// Whether `client` may submit now. When the store is unreachable the
    /// configured fail mode decides.
    pub async fn is_allowed(&self, client: &str) -> bool {
        match self.check(client).await {
            Ok(admitted) => {
                if !admitted {
                    debug!(client, limit = self.max_requests, "Rate limit exceeded");
                }
                admitted
            }
            Err(e) => {
                let admitted = self.fail_mode == FailMode::Open;
                warn!(client, error = %e, admitted, "Rate limiter store unreachable");
                admitted
            }
        }
    }
}
