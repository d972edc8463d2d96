//! Metrics snapshots for circuit breakers.
//!
//! A breaker hands out raw counters; rates and averages are derived on read
//! so a snapshot is nothing more than a copy of the atomics. The orchestrator
//! aggregates per-breaker snapshots into a system-wide view for its query
//! surface.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Point-in-time counters for one circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub half_open_calls: u64,
    /// Cumulative wall time spent inside protected operations.
    pub total_duration: Duration,
    pub current_state: CircuitState,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            half_open_calls: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
        }
    }

    /// Fraction of calls that failed, 0.0 when nothing has run yet.
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_calls as f64
    }

    /// Fraction of calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_calls as f64
    }

    /// Mean duration of a protected call.
    pub fn average_duration(&self) -> Duration {
        if self.total_calls == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.total_calls as u32
    }

    /// A breaker reads as healthy while closed with a failure rate under 10%.
    /// Half-open counts as healthy: recovery is already being probed.
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate() < 0.1,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        }
    }

    /// One-line summary for operator logs.
    pub fn format_summary(&self) -> String {
        format!(
            "state={:?} calls={} success={:.1}% consecutive_failures={} avg_ms={}",
            self.current_state,
            self.total_calls,
            self.success_rate() * 100.0,
            self.consecutive_failures,
            self.average_duration().as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated snapshots for every breaker the orchestrator owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Per-service snapshots, keyed by service name.
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
        self.collected_at = Utc::now();
    }

    /// How many breakers sit in each state.
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for snapshot in self.circuit_breakers.values() {
            *counts.entry(snapshot.current_state).or_insert(0) += 1;
        }
        counts
    }

    /// Services whose breakers are not currently healthy.
    pub fn unhealthy_circuits(&self) -> Vec<(&String, &CircuitBreakerMetrics)> {
        self.circuit_breakers
            .iter()
            .filter(|(_, snapshot)| !snapshot.is_healthy())
            .collect()
    }

    /// Share of breakers that are healthy, 1.0 when none are registered.
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }
        let healthy = self
            .circuit_breakers
            .values()
            .filter(|snapshot| snapshot.is_healthy())
            .count();
        healthy as f64 / self.circuit_breakers.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.total_calls).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.failure_count).sum()
    }

    /// Failure rate across every protected service.
    pub fn system_failure_rate(&self) -> f64 {
        let calls = self.total_calls();
        if calls == 0 {
            return 0.0;
        }
        self.total_failures() as f64 / calls as f64
    }

    /// One-line summary for operator logs.
    pub fn format_summary(&self) -> String {
        let states = self.count_by_state();
        format!(
            "breakers={} closed={} open={} half_open={} health={:.1}% failure_rate={:.2}%",
            self.circuit_breakers.len(),
            states.get(&CircuitState::Closed).unwrap_or(&0),
            states.get(&CircuitState::Open).unwrap_or(&0),
            states.get(&CircuitState::HalfOpen).unwrap_or(&0),
            self.health_score() * 100.0,
            self.system_failure_rate() * 100.0
        )
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: CircuitState, calls: u64, failures: u64) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: calls,
            success_count: calls - failures,
            failure_count: failures,
            current_state: state,
            ..CircuitBreakerMetrics::new()
        }
    }

    #[test]
    fn test_rates_derived_from_counters() {
        let fresh = CircuitBreakerMetrics::new();
        assert_eq!(fresh.failure_rate(), 0.0);
        assert_eq!(fresh.average_duration(), Duration::ZERO);
        assert!(fresh.is_healthy());

        let mut busy = snapshot(CircuitState::Closed, 100, 5);
        busy.total_duration = Duration::from_millis(400);
        assert_eq!(busy.failure_rate(), 0.05);
        assert_eq!(busy.success_rate(), 0.95);
        assert_eq!(busy.average_duration(), Duration::from_millis(4));
    }

    #[test]
    fn test_health_depends_on_state_and_rate() {
        assert!(snapshot(CircuitState::Closed, 100, 5).is_healthy());
        assert!(!snapshot(CircuitState::Closed, 100, 15).is_healthy());
        assert!(!snapshot(CircuitState::Open, 100, 0).is_healthy());
        assert!(snapshot(CircuitState::HalfOpen, 100, 50).is_healthy());
    }

    #[test]
    fn test_system_aggregation() {
        let mut system = SystemCircuitBreakerMetrics::new();
        system.add_circuit_breaker(
            "database".to_string(),
            snapshot(CircuitState::Closed, 100, 5),
        );
        system.add_circuit_breaker("cache".to_string(), snapshot(CircuitState::Open, 50, 25));

        assert_eq!(system.total_calls(), 150);
        assert_eq!(system.total_failures(), 30);
        assert_eq!(system.system_failure_rate(), 0.2);
        assert_eq!(system.health_score(), 0.5);

        let states = system.count_by_state();
        assert_eq!(states.get(&CircuitState::Closed), Some(&1));
        assert_eq!(states.get(&CircuitState::Open), Some(&1));

        let unhealthy = system.unhealthy_circuits();
        assert_eq!(unhealthy.len(), 1);
        assert_eq!(unhealthy[0].0, "cache");
    }

    #[test]
    fn test_summaries_are_single_line() {
        let system = SystemCircuitBreakerMetrics::new();
        assert!(!system.format_summary().contains('\n'));
        assert!(!CircuitBreakerMetrics::new().format_summary().contains('\n'));
    }
}
