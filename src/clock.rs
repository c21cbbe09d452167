//! Wall-clock abstraction shared by every time-dependent component.
//!
//! Circuit cool-downs, checkpoint cadence, rate windows and job timestamps all
//! read time through [`Clock`] so tests can drive them deterministically.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch, the unit stored in the shared store.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that follows tokio's timer from the moment it is created.
///
/// Under paused tokio time it advances exactly as far as sleeps and timeouts
/// do, so cool-downs measured on it agree with the waits that cover them.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed =
            chrono::Duration::from_std(self.started.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.origin.checked_add_signed(elapsed).unwrap_or(self.origin)
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can hand one clone to the component
/// under test and advance another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a manual clock starting at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a manual clock starting at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = current.checked_add_signed(delta).unwrap_or(*current);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Elapsed time between two instants, clamped to zero if time went backwards.
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_all_clones() {
        let clock = ManualClock::new();
        let observer = clock.clone();
        let start = observer.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(elapsed_between(start, observer.now()), Duration::from_secs(90));
    }

    #[test]
    fn manual_clock_is_frozen_without_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn elapsed_between_clamps_negative() {
        let clock = ManualClock::new();
        let later = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(elapsed_between(clock.now(), later), Duration::ZERO);
    }

    #[test]
    fn now_millis_matches_timestamp() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_millis(), clock.now().timestamp_millis());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let start = clock.now();

        tokio::time::sleep(Duration::from_secs(90)).await;

        let elapsed = elapsed_between(start, clock.now());
        assert!(elapsed >= Duration::from_secs(90), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(91), "{elapsed:?}");
    }

    #[test]
    fn clock_trait_is_object_safe() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let _ = clock.now();
    }
}
