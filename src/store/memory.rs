use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ScribedError};
use crate::store::SharedStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    score: Option<f64>,
    expires_at: Option<DateTime<Utc>>,
}

/// Admissions for one rate key; the whole log lapses `window` after the
/// latest admission.
#[derive(Debug, Default)]
struct WindowLog {
    entries: VecDeque<(i64, String)>,
    expires_ms: i64,
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Entry>,
    windows: HashMap<String, WindowLog>,
}

/// In-process [`SharedStore`].
///
/// Expiry is evaluated lazily against the injected clock. Clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    unreachable: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("unreachable", &self.unreachable.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate an outage: every operation fails with `StoreUnavailable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ScribedError::StoreUnavailable {
                message: "memory store marked unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
    }

    /// Live entry for `key`, dropping it first if it has expired.
    fn live<'a>(&self, state: &'a mut State, key: &str) -> Option<&'a Entry> {
        let now = self.clock.now();
        if state
            .values
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now)
        {
            state.values.remove(key);
        }
        state.values.get(key)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_reachable()?;
        let mut state = self.lock();
        Ok(self.live(&mut state, key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.check_reachable()?;
        let expires_at = self.expiry(ttl);
        self.lock().values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                score: None,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.lock();
        state.values.remove(key);
        state.windows.remove(key);
        Ok(())
    }

    async fn set_if_not_lower(
        &self,
        key: &str,
        value: &str,
        score: f64,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.check_reachable()?;
        let expires_at = self.expiry(ttl);
        let mut state = self.lock();
        if let Some(current) = self.live(&mut state, key).and_then(|e| e.score)
            && current > score
        {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                score: Some(score),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
        member: &str,
    ) -> Result<bool> {
        self.check_reachable()?;
        let mut state = self.lock();
        state.windows.retain(|_, log| log.expires_ms > now_ms);

        let log = state.windows.entry(key.to_string()).or_default();
        while log
            .entries
            .front()
            .is_some_and(|(at, _)| *at <= now_ms - window_ms)
        {
            log.entries.pop_front();
        }
        if log.entries.len() >= limit as usize {
            if log.entries.is_empty() {
                state.windows.remove(key);
            }
            return Ok(false);
        }
        log.entries.push_back((now_ms, member.to_string()));
        log.expires_ms = now_ms + window_ms;
        Ok(true)
    }
}
