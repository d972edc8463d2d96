//! Circuit breaking, retry, recovery and their orchestration.

pub mod circuit_breaker;
pub mod metrics;
pub mod orchestrator;
pub mod recovery;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus, CircuitState, CircuitTransition,
    TransitionHook,
};
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use orchestrator::ResilienceOrchestrator;
pub use recovery::{
    CacheReconnectAction, DatabaseReconnectAction, RecoveryAction, RecoveryActionInfo,
    RecoveryOutcome, RecoveryRegistry,
};
pub use retry::RetryExecutor;
