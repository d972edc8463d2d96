//! # Resilience Orchestrator
//!
//! Owns the circuit-breaker-per-service registry and the retry executor,
//! composes them for callers, and drives the recovery registry when a
//! breaker opens. Constructed once at process start and passed by reference;
//! there is no hidden global state.

use crate::config::{CircuitBreakerSettings, RetryPolicy};
use crate::events::{EventPublisher, ResilienceEvent};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus, CircuitState, CircuitTransition,
    RecoveryActionInfo, RecoveryRegistry, RetryExecutor, SystemCircuitBreakerMetrics,
};
use crate::types::ServiceHealth;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Composes circuit breaking, retry and auto-recovery for callers.
pub struct ResilienceOrchestrator {
    /// Circuit breakers by service name, created lazily on first use.
    breakers: DashMap<String, Arc<CircuitBreaker>>,

    /// Default and per-service breaker configuration.
    settings: CircuitBreakerSettings,

    retry: RetryExecutor,
    recovery: Arc<RecoveryRegistry>,
    publisher: EventPublisher,
}

impl ResilienceOrchestrator {
    pub fn new(
        settings: CircuitBreakerSettings,
        retry_policy: RetryPolicy,
        recovery: Arc<RecoveryRegistry>,
        publisher: EventPublisher,
    ) -> Self {
        info!("Resilience orchestrator initialized");
        Self {
            breakers: DashMap::new(),
            settings,
            retry: RetryExecutor::new(retry_policy),
            recovery,
            publisher,
        }
    }

    /// Get or lazily create the named breaker. Transition hooks are wired
    /// exactly once, inside the creating insert.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return Arc::clone(existing.value());
        }

        let entry = self.breakers.entry(service.to_string()).or_insert_with(|| {
            let config = self.settings.config_for_component(service).to_breaker_config();
            let breaker = Arc::new(CircuitBreaker::new(service.to_string(), config));
            Self::wire_hooks(&breaker, self.publisher.clone(), Arc::clone(&self.recovery));
            debug!(service = service, "Created circuit breaker");
            breaker
        });
        Arc::clone(entry.value())
    }

    fn wire_hooks(
        breaker: &Arc<CircuitBreaker>,
        publisher: EventPublisher,
        recovery: Arc<RecoveryRegistry>,
    ) {
        breaker.on_transition(Arc::new(move |transition: &CircuitTransition| {
            publisher.publish(ResilienceEvent::CircuitStateChanged {
                service: transition.service.clone(),
                from: transition.from,
                to: transition.to,
                at: transition.at,
            });

            match transition.to {
                CircuitState::Open => {
                    publisher.publish(ResilienceEvent::CircuitOpened {
                        service: transition.service.clone(),
                        consecutive_failures: transition.consecutive_failures,
                        at: transition.at,
                    });

                    let service = transition.service.clone();
                    let reason = format!(
                        "circuit opened after {} consecutive failures",
                        transition.consecutive_failures
                    );
                    let recovery = Arc::clone(&recovery);
                    let publisher = publisher.clone();
                    match tokio::runtime::Handle::try_current() {
                        Ok(handle) => {
                            handle.spawn(async move {
                                recovery.run_auto_recovery(&service, &reason, &publisher).await;
                            });
                        }
                        Err(_) => {
                            warn!(
                                service = %service,
                                "No async runtime available, skipping auto-recovery"
                            );
                        }
                    }
                }
                CircuitState::Closed => {
                    publisher.publish(ResilienceEvent::CircuitClosed {
                        service: transition.service.clone(),
                        at: transition.at,
                    });
                }
                CircuitState::HalfOpen => {}
            }
        }));
    }

    /// Run an operation behind the named service's circuit breaker.
    pub async fn protect<F, Fut, T, E>(
        &self,
        service: &str,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker(service).call(operation).await
    }

    /// Run an operation under the retry policy (per-call override or the
    /// orchestrator default), without circuit breaking.
    pub async fn protect_with_retry<F, Fut, T, E>(
        &self,
        operation: F,
        policy: Option<&RetryPolicy>,
        is_retriable: impl Fn(&E) -> bool,
        context: &str,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry.execute(operation, is_retriable, policy, context).await
    }

    /// Compose breaker around retry; when the circuit rejects the call and a
    /// fallback was supplied, the fallback result is returned instead of the
    /// rejection.
    pub async fn protect_full<F, Fut, T, E, G, GFut>(
        &self,
        service: &str,
        operation: F,
        retry_policy: Option<RetryPolicy>,
        is_retriable: impl Fn(&E) -> bool,
        fallback: Option<G>,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let breaker = self.breaker(service);
        let result = breaker
            .call(|| {
                self.retry
                    .execute(&operation, &is_retriable, retry_policy.as_ref(), service)
            })
            .await;

        match result {
            Err(error) if error.is_circuit_open() => match fallback {
                Some(fallback) => {
                    info!(service = service, "Circuit open, invoking fallback");
                    fallback().await.map_err(CircuitBreakerError::OperationFailed)
                }
                None => Err(error),
            },
            other => other,
        }
    }

    /// Run the auto-recovery sweep for a service. Also invoked automatically
    /// from the breaker-open hook.
    pub async fn trigger_recovery(&self, service: &str, reason: &str) -> Option<String> {
        self.recovery
            .run_auto_recovery(service, reason, &self.publisher)
            .await
    }

    /// Health of one service, derived from its live breaker state.
    pub fn service_health(&self, service: &str) -> Option<ServiceHealth> {
        self.breakers
            .get(service)
            .map(|breaker| Self::derive_health(breaker.value()))
    }

    /// Health of every protected service.
    pub fn service_health_map(&self) -> HashMap<String, ServiceHealth> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), Self::derive_health(entry.value())))
            .collect()
    }

    fn derive_health(breaker: &CircuitBreaker) -> ServiceHealth {
        match breaker.state() {
            CircuitState::Open => ServiceHealth::Unhealthy,
            CircuitState::HalfOpen => ServiceHealth::Recovering,
            CircuitState::Closed => {
                if breaker.status().consecutive_failures > 0 {
                    ServiceHealth::Degraded
                } else {
                    ServiceHealth::Healthy
                }
            }
        }
    }

    /// Status snapshot of one breaker.
    pub fn breaker_status(&self, service: &str) -> Option<CircuitBreakerStatus> {
        self.breakers.get(service).map(|b| b.status())
    }

    /// Status snapshots of all breakers.
    pub fn all_breaker_statuses(&self) -> Vec<CircuitBreakerStatus> {
        self.breakers.iter().map(|entry| entry.value().status()).collect()
    }

    /// System-wide breaker metrics.
    pub fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut metrics = SystemCircuitBreakerMetrics::new();
        for entry in self.breakers.iter() {
            metrics.add_circuit_breaker(entry.key().clone(), entry.value().metrics());
        }
        metrics
    }

    /// Registered recovery actions with their in-progress flags.
    pub fn recovery_actions(&self) -> Vec<RecoveryActionInfo> {
        self.recovery.snapshot()
    }

    /// Force all circuit breakers open (emergency stop).
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");
        for entry in self.breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Force all circuit breakers closed (emergency recovery).
    pub fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");
        for entry in self.breakers.iter() {
            entry.value().force_closed();
        }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }
}
