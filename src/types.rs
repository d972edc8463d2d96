//! Shared enums used across the resilience, healing and degradation engines.

use serde::{Deserialize, Serialize};

/// Execution priority for recovery actions, healing rules and degradation
/// rules. Ordered ascending by rank: critical work runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Numeric rank used for ascending sort (critical=0 .. low=3).
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

/// Per-service health derived from live circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    /// Breaker closed with no consecutive failures.
    Healthy,
    /// Breaker closed but accumulating failures.
    Degraded,
    /// Breaker half-open, probing recovery.
    Recovering,
    /// Breaker open, failing fast.
    Unhealthy,
}

/// Severity classification for an individual component health check.
///
/// Variant order matters: `max()` over a set of component levels yields the
/// worst observed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl HealthLevel {
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        matches!(self, HealthLevel::Warning | HealthLevel::Critical)
    }

    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, HealthLevel::Critical)
    }
}
