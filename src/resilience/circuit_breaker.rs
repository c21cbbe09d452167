use crate::clock::{Clock, elapsed_between};
use crate::error::{Result, ScribedError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    last_transition: DateTime<Utc>,
    trial_in_flight: bool,
}

impl Circuit {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            last_transition: now,
            trial_in_flight: false,
        }
    }

    fn transition(&mut self, state: CircuitState, now: DateTime<Utc>) {
        self.state = state;
        self.last_transition = now;
    }
}

/// Point-in-time view of one dependency's circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_transition: DateTime<Utc>,
}

/// Per-dependency circuit breaker.
///
/// Circuits are created lazily on first use of a name and live as long as
/// the breaker. After `failure_threshold` consecutive counted failures a
/// circuit opens and rejects calls with [`ScribedError::CircuitOpen`] without
/// running them. Once `cool_down` has passed, exactly one trial call is let
/// through; its outcome closes the circuit or reopens it for another
/// cool-down.
///
/// Errors for which [`ScribedError::counts_against_circuit`] is false (bad
/// input) count as the dependency answering.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    failure_threshold: u32,
    cool_down: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("failure_threshold", &self.failure_threshold)
            .field("cool_down", &self.cool_down)
            .finish_non_exhaustive()
    }
}

/// Admission granted for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

/// Releases a half-open trial slot if the call is dropped before it reports.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    dependency: &'a str,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut circuits = self.breaker.lock();
            if let Some(circuit) = circuits.get_mut(self.dependency) {
                circuit.trial_in_flight = false;
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cool_down: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            cool_down,
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `operation` under the circuit for `dependency`.
    pub async fn call<T, F, Fut>(&self, dependency: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.acquire(dependency)?;
        let mut guard = TrialGuard {
            breaker: self,
            dependency,
            armed: permit == Permit::Trial,
        };

        let result = operation().await;

        guard.armed = false;
        let failed = result.as_ref().is_err_and(|e| e.counts_against_circuit());
        self.record(dependency, permit, failed);
        result
    }

    fn acquire(&self, dependency: &str) -> Result<Permit> {
        let now = self.clock.now();
        let mut circuits = self.lock();
        let circuit = circuits
            .entry(dependency.to_string())
            .or_insert_with(|| Circuit::new(now));

        match circuit.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let elapsed = elapsed_between(circuit.last_transition, now);
                if elapsed >= self.cool_down {
                    circuit.transition(CircuitState::HalfOpen, now);
                    circuit.trial_in_flight = true;
                    info!(dependency, "Circuit half-open, allowing trial call");
                    Ok(Permit::Trial)
                } else {
                    Err(ScribedError::CircuitOpen {
                        dependency: dependency.to_string(),
                        retry_after: self.cool_down - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen if circuit.trial_in_flight => Err(ScribedError::CircuitOpen {
                dependency: dependency.to_string(),
                retry_after: self.cool_down,
            }),
            CircuitState::HalfOpen => {
                circuit.trial_in_flight = true;
                Ok(Permit::Trial)
            }
        }
    }

    fn record(&self, dependency: &str, permit: Permit, failed: bool) {
        let now = self.clock.now();
        let mut circuits = self.lock();
        let Some(circuit) = circuits.get_mut(dependency) else {
            return;
        };
        if permit == Permit::Trial {
            circuit.trial_in_flight = false;
        }

        if !failed {
            if circuit.state != CircuitState::Closed {
                circuit.transition(CircuitState::Closed, now);
                info!(dependency, "Circuit closed");
            }
            circuit.consecutive_failures = 0;
            return;
        }

        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        circuit.last_failure = Some(now);

        let reopen = permit == Permit::Trial;
        let trip = circuit.state == CircuitState::Closed
            && circuit.consecutive_failures >= self.failure_threshold;
        if reopen || trip {
            circuit.transition(CircuitState::Open, now);
            warn!(
                dependency,
                failures = circuit.consecutive_failures,
                cool_down_secs = self.cool_down.as_secs(),
                "Circuit opened"
            );
        }
    }

    /// Current state; unknown dependencies are closed.
    pub fn state(&self, dependency: &str) -> CircuitState {
        self.lock()
            .get(dependency)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, dependency: &str) -> Option<CircuitSnapshot> {
        self.lock().get(dependency).map(|c| CircuitSnapshot {
            dependency: dependency.to_string(),
            state: c.state,
            consecutive_failures: c.consecutive_failures,
            last_failure: c.last_failure,
            last_transition: c.last_transition,
        })
    }

    /// Snapshots of every circuit seen so far, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names.iter().filter_map(|n| self.snapshot(n)).collect()
    }
}
