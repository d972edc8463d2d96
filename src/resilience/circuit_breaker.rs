//! # Circuit Breaker
//!
//! Fault isolation for calls to unreliable dependencies. Three states:
//! Closed passes calls through, Open fails fast, and Half-Open probes
//! recovery with a bounded batch of trial calls.
//!
//! The open-to-half-open transition is lazy and pull-based: there is no
//! background timer, the first call arriving after the reset timeout performs
//! the transition itself.

use crate::config::CircuitBreakerConfig;
use crate::resilience::CircuitBreakerMetrics;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Call-path bookkeeping, all atomic. Mutated only by the owning breaker.
#[derive(Debug)]
struct AtomicBreakerCounters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    half_open_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicBreakerCounters {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            half_open_calls: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn increment_consecutive_failures(&self) -> u64 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn reset_consecutive_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    #[inline]
    fn increment_half_open_calls(&self) -> u64 {
        self.half_open_calls.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn reset_half_open(&self) {
        self.half_open_calls.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CircuitState) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            half_open_calls: self.half_open_calls.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(
                self.total_duration_nanos.load(Ordering::Relaxed),
            ),
            current_state: state,
        }
    }
}

/// Wall-clock now as epoch nanos, the form the breaker's atomics store.
#[inline]
fn epoch_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

/// Operational mode of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed = 0,
    /// Calls are rejected without invoking the operation.
    Open = 1,
    /// A bounded batch of trial calls is admitted to probe recovery.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            // An unknown discriminant maps to Open: failing fast is the
            // only safe interpretation of corrupted state.
            _ => CircuitState::Open,
        }
    }
}

/// Errors that can occur during circuit breaker operation.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Fast-fail rejection while the circuit is open. Never retryable.
    #[error("Circuit breaker is open for {service}")]
    CircuitOpen { service: String },

    /// The wrapped operation itself failed.
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    /// True for the fast-fail rejection, which callers must never retry.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }
}

/// A single state transition, handed to registered transition hooks.
#[derive(Debug, Clone)]
pub struct CircuitTransition {
    pub service: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub consecutive_failures: u64,
    pub at: DateTime<Utc>,
}

/// Callback invoked on every state transition. Hooks must not block: they
/// run inline on the transitioning call's path.
pub type TransitionHook = Arc<dyn Fn(&CircuitTransition) + Send + Sync>;

/// Point-in-time view of a breaker for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub success_count: u64,
    pub total_calls: u64,
    pub half_open_calls: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Per-service circuit breaker. All state lives in atomics, so concurrent
/// callers never contend on a lock in the call path.
pub struct CircuitBreaker {
    /// Service name, the key under which the orchestrator registered this
    /// breaker.
    name: String,

    /// Holds a `CircuitState` discriminant.
    state: AtomicU8,

    config: CircuitBreakerConfig,

    counters: AtomicBreakerCounters,

    /// When the circuit opened, as epoch nanos; zero while not open.
    opened_at_epoch_nanos: AtomicU64,

    /// Most recent failure, as epoch nanos; zero before any failure.
    last_failure_epoch_nanos: AtomicU64,

    /// Transition observers, registered explicitly.
    hooks: RwLock<Vec<TransitionHook>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("config", &self.config)
            .field("counters", &self.counters)
            .field("opened_at_epoch_nanos", &self.opened_at_epoch_nanos)
            .field("last_failure_epoch_nanos", &self.last_failure_epoch_nanos)
            .field("hooks", &format_args!("<{} hooks>", self.hooks.read().len()))
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            service = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_secs = config.reset_timeout.as_secs(),
            half_open_max_calls = config.half_open_max_calls,
            "Circuit breaker created"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            counters: AtomicBreakerCounters::new(),
            opened_at_epoch_nanos: AtomicU64::new(0),
            last_failure_epoch_nanos: AtomicU64::new(0),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a transition observer. The orchestrator wires one hook per
    /// breaker at creation time.
    pub fn on_transition(&self, hook: TransitionHook) {
        self.hooks.write().push(hook);
    }

    /// Run an operation behind this breaker.
    ///
    /// When the call is rejected the operation is never invoked.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_admit() {
            return Err(CircuitBreakerError::CircuitOpen {
                service: self.name.clone(),
            });
        }

        let start_time = std::time::Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(duration),
            Err(_) => self.record_failure(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether to admit a call, performing the lazy open-to-half-open
    /// transition when the reset timeout has elapsed. Admission into the
    /// half-open state consumes one slot of the bounded trial batch.
    fn try_admit(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_nanos = self.opened_at_epoch_nanos.load(Ordering::Acquire);
                if opened_nanos == 0 {
                    warn!(service = %self.name, "Circuit open but no timestamp recorded");
                    return true;
                }

                let elapsed_nanos = epoch_nanos_now().saturating_sub(opened_nanos);
                let timeout_nanos = self.config.reset_timeout.as_nanos() as u64;
                if elapsed_nanos < timeout_nanos {
                    return false;
                }

                if self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    // This call is the first of the trial batch.
                    self.counters.half_open_calls.store(1, Ordering::Release);
                    info!(
                        service = %self.name,
                        half_open_max_calls = self.config.half_open_max_calls,
                        "Circuit breaker entering half-open trial"
                    );
                    self.notify(CircuitState::Open, CircuitState::HalfOpen);
                    true
                } else {
                    // Another caller performed the transition; compete for a
                    // remaining trial slot.
                    self.admit_half_open()
                }
            }
            CircuitState::HalfOpen => self.admit_half_open(),
        }
    }

    fn admit_half_open(&self) -> bool {
        let admitted = self.counters.increment_half_open_calls();
        admitted <= self.config.half_open_max_calls as u64
    }

    fn record_success(&self, duration: Duration) {
        self.counters.record_success(duration);

        debug!(
            service = %self.name,
            duration_ms = duration.as_millis(),
            "Protected call succeeded"
        );

        match self.state() {
            CircuitState::HalfOpen => {
                let admitted = self.counters.half_open_calls.load(Ordering::Acquire);
                if admitted >= self.config.half_open_max_calls as u64 {
                    self.transition_to_closed(CircuitState::HalfOpen);
                }
            }
            CircuitState::Closed => {
                self.counters.reset_consecutive_failures();
            }
            CircuitState::Open => {
                warn!(service = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn record_failure(&self, duration: Duration) {
        self.counters.record_failure(duration);
        self.last_failure_epoch_nanos
            .store(epoch_nanos_now(), Ordering::Release);

        error!(
            service = %self.name,
            duration_ms = duration.as_millis(),
            "Protected call failed"
        );

        match self.state() {
            CircuitState::Closed => {
                let failures = self.counters.increment_consecutive_failures();
                if failures == self.config.failure_threshold as u64 {
                    self.transition_to_open(CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state immediately reopens.
                self.transition_to_open(CircuitState::HalfOpen);
            }
            CircuitState::Open => {
                // Already open, just record the failure.
            }
        }
    }

    /// Transition to closed state (normal operation).
    fn transition_to_closed(&self, from: CircuitState) {
        if self
            .state
            .compare_exchange(
                from as u8,
                CircuitState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        self.counters.reset_consecutive_failures();
        self.counters.reset_half_open();
        self.opened_at_epoch_nanos.store(0, Ordering::Release);

        info!(
            service = %self.name,
            total_calls = self.counters.total_calls.load(Ordering::Relaxed),
            "Circuit breaker closed after successful trial batch"
        );
        self.notify(from, CircuitState::Closed);
    }

    /// Transition to open state (failing fast).
    fn transition_to_open(&self, from: CircuitState) {
        // Record the open timestamp before the state flips so a concurrent
        // admission check never observes Open without one.
        self.opened_at_epoch_nanos
            .store(epoch_nanos_now(), Ordering::Release);

        if self
            .state
            .compare_exchange(
                from as u8,
                CircuitState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        self.counters.reset_half_open();

        error!(
            service = %self.name,
            consecutive_failures = self.counters.consecutive_failures.load(Ordering::Relaxed),
            failure_threshold = self.config.failure_threshold,
            reset_timeout_secs = self.config.reset_timeout.as_secs(),
            "Circuit breaker opened, failing fast"
        );
        self.notify(from, CircuitState::Open);
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        let transition = CircuitTransition {
            service: self.name.clone(),
            from,
            to,
            consecutive_failures: self.counters.consecutive_failures.load(Ordering::Relaxed),
            at: Utc::now(),
        };

        for hook in self.hooks.read().iter() {
            hook(&transition);
        }
    }

    /// Manually open the circuit, e.g. during an incident or maintenance
    /// window.
    pub fn force_open(&self) {
        let from = self.state();
        if from != CircuitState::Open {
            warn!(service = %self.name, "Circuit breaker forced open");
            self.transition_to_open(from);
        }
    }

    /// Manually close the circuit, overriding the trial protocol.
    pub fn force_closed(&self) {
        let from = self.state();
        if from != CircuitState::Closed {
            warn!(service = %self.name, "Circuit breaker forced closed");
            self.transition_to_closed(from);
        }
    }

    /// Copy of the live counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.counters.snapshot(self.state())
    }

    /// Status snapshot for query surfaces.
    pub fn status(&self) -> CircuitBreakerStatus {
        let opened_nanos = self.opened_at_epoch_nanos.load(Ordering::Acquire);
        let next_attempt_at = if opened_nanos > 0 {
            let due = opened_nanos + self.config.reset_timeout.as_nanos() as u64;
            Some(DateTime::from_timestamp_nanos(due as i64))
        } else {
            None
        };

        let last_failure_nanos = self.last_failure_epoch_nanos.load(Ordering::Acquire);
        let last_failure_at = if last_failure_nanos > 0 {
            Some(DateTime::from_timestamp_nanos(last_failure_nanos as i64))
        } else {
            None
        };

        CircuitBreakerStatus {
            service: self.name.clone(),
            state: self.state(),
            consecutive_failures: self.counters.consecutive_failures.load(Ordering::Relaxed),
            success_count: self.counters.success_count.load(Ordering::Relaxed),
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            half_open_calls: self.counters.half_open_calls.load(Ordering::Relaxed),
            last_failure_at,
            next_attempt_at,
        }
    }

    /// Closed with a low failure rate.
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        // Under ten calls there is not enough signal to call it unhealthy.
        let total_calls = self.counters.total_calls.load(Ordering::Relaxed);
        if total_calls < 10 {
            return true;
        }

        let failure_count = self.counters.failure_count.load(Ordering::Relaxed);
        (failure_count as f64 / total_calls as f64) < 0.1
    }
}
