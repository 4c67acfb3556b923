//! Circuit breaker guarding wrapped feature code.
//!
//! - `Closed`: calls flow. Failures accumulate and successes decay them by
//!   one; at `failure_threshold` the circuit opens.
//! - `Open`: calls are short-circuited until `reset_timeout` has passed since
//!   the last failure; the next attempt then probes in `HalfOpen`.
//! - `HalfOpen`: `success_threshold` successes close the circuit; any failure
//!   reopens it.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::info;
use warden_core::{BreakerConfig, CircuitState, Clock};

pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    half_open_successes: AtomicU32,
    last_failure: RwLock<Option<Instant>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            last_failure: RwLock::new(None),
            config,
            clock,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    pub fn half_open_successes(&self) -> u32 {
        self.half_open_successes.load(Ordering::SeqCst)
    }

    pub fn last_failure(&self) -> Option<Instant> {
        *self.last_failure.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call may proceed. An open circuit whose reset timeout has
    /// elapsed moves to half-open and admits the call.
    pub fn is_allowed(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure()
                    .map(|last| self.clock.now().saturating_duration_since(last));
                match elapsed {
                    Some(elapsed) if elapsed >= self.config.reset_timeout => {
                        self.transition(CircuitState::Open, CircuitState::HalfOpen);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                let _ = self
                    .failure_count
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
            }
            CircuitState::HalfOpen => {
                let count = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.success_threshold
                    && self.transition(CircuitState::HalfOpen, CircuitState::Closed)
                {
                    self.failure_count.store(0, Ordering::SeqCst);
                    self.half_open_successes.store(0, Ordering::SeqCst);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        *self.last_failure.write().unwrap_or_else(|e| e.into_inner()) = Some(self.clock.now());

        match self.state() {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.failure_threshold {
                    self.transition(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.half_open_successes.store(0, Ordering::SeqCst);
                self.transition(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit closed with zeroed counters.
    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.half_open_successes.store(0, Ordering::SeqCst);
        *self.last_failure.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            info!(
                from = %from,
                to = %to,
                failures = self.failure_count(),
                "breaker.transition"
            );
        }
        moved
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Relaxed))
            .field("half_open_successes", &self.half_open_successes.load(Ordering::Relaxed))
            .finish()
    }
}
