//! Degradation rules, service statuses and feature flags.
//!
//! A rule pairs a condition on one dependency's live status with an ordered
//! list of actions. Every action has a symmetric inverse, so applying and
//! reverting a rule are mirror operations.

use crate::types::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live availability of a named dependency, as reported by the host's
/// health poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Degraded,
    Unavailable,
}

/// Most recent reported status of one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: String,
    pub availability: Availability,
    pub response_time_ms: u64,
    pub error_rate_pct: f64,
    pub last_check: DateTime<Utc>,
    /// How degraded the dependency currently is, 0 (fully up) to 100.
    pub degradation_level: u8,
}

impl ServiceStatus {
    pub fn new(service: impl Into<String>, availability: Availability) -> Self {
        Self {
            service: service.into(),
            availability,
            response_time_ms: 0,
            error_rate_pct: 0.0,
            last_check: Utc::now(),
            degradation_level: match availability {
                Availability::Available => 0,
                Availability::Degraded => 50,
                Availability::Unavailable => 100,
            },
        }
    }

    pub fn available(service: impl Into<String>) -> Self {
        Self::new(service, Availability::Available)
    }

    pub fn unavailable(service: impl Into<String>) -> Self {
        Self::new(service, Availability::Unavailable)
    }

    pub fn response_time_ms(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }

    pub fn error_rate_pct(mut self, error_rate_pct: f64) -> Self {
        self.error_rate_pct = error_rate_pct;
        self
    }

    pub fn degradation_level(mut self, level: u8) -> Self {
        self.degradation_level = level.min(100);
        self
    }
}

/// Condition a rule evaluates against its service's latest status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "condition")]
pub enum DegradationCondition {
    /// The dependency reported itself unavailable.
    Unavailable,
    /// Response time exceeds the threshold.
    Slow { threshold_ms: u64 },
    /// Error rate exceeds the threshold.
    ErrorRateAbove { threshold_pct: f64 },
}

impl DegradationCondition {
    /// Whether the condition currently holds for the given status.
    pub fn holds(&self, status: &ServiceStatus) -> bool {
        match self {
            DegradationCondition::Unavailable => {
                status.availability == Availability::Unavailable
            }
            DegradationCondition::Slow { threshold_ms } => {
                status.response_time_ms > *threshold_ms
            }
            DegradationCondition::ErrorRateAbove { threshold_pct } => {
                status.error_rate_pct > *threshold_pct
            }
        }
    }
}

/// One degradation step. Each variant's activate effect has a symmetric
/// deactivate effect; see the engine for the mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DegradationAction {
    /// Disable a feature flag (degradation level 100) while active.
    DisableFeature { feature: String },
    /// Route the target through a fallback path while active.
    UseFallback {
        target: String,
        params: serde_json::Value,
    },
    /// Reduce the target to essential functionality while active.
    ReduceFunctionality { target: String },
    /// Serve aggressively cached responses for the target while active.
    CacheResponse { target: String },
    /// Queue the target's requests for later processing while active.
    QueueRequest { target: String },
}

/// Condition plus ordered actions for one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationRule {
    pub id: String,
    /// Service whose status reports this rule evaluates against.
    pub service: String,
    pub condition: DegradationCondition,
    /// Applied in declared order on activation, reverted in the same order
    /// on deactivation.
    pub actions: Vec<DegradationAction>,
    pub enabled: bool,
    pub priority: Priority,
}

impl DegradationRule {
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        condition: DegradationCondition,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            condition,
            actions: Vec::new(),
            enabled: true,
            priority: Priority::Medium,
        }
    }

    pub fn action(mut self, action: DegradationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A named optional capability the backend can switch off under pressure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
    pub enabled: bool,
    /// 0 when fully enabled, 100 when disabled by a degradation rule.
    pub degradation_level: u8,
    /// Services this feature depends on; the feature counts as unavailable
    /// while any of them is not reporting `Available`.
    pub dependencies: Vec<String>,
}

impl FeatureFlag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            degradation_level: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.dependencies.push(service.into());
        self
    }
}

/// Record of a currently applied rule, keyed by rule id in the engine.
///
/// Membership in this set, not the instantaneous condition, decides whether
/// activation or deactivation runs; that is what makes both idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDegradation {
    pub rule_id: String,
    pub service: String,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_unavailable() {
        let condition = DegradationCondition::Unavailable;
        assert!(condition.holds(&ServiceStatus::unavailable("cache")));
        assert!(!condition.holds(&ServiceStatus::available("cache")));
        assert!(!condition.holds(&ServiceStatus::new("cache", Availability::Degraded)));
    }

    #[test]
    fn test_condition_slow_is_strict() {
        let condition = DegradationCondition::Slow { threshold_ms: 500 };
        assert!(!condition.holds(&ServiceStatus::available("database").response_time_ms(500)));
        assert!(condition.holds(&ServiceStatus::available("database").response_time_ms(501)));
    }

    #[test]
    fn test_condition_error_rate() {
        let condition = DegradationCondition::ErrorRateAbove { threshold_pct: 10.0 };
        assert!(!condition.holds(&ServiceStatus::available("api").error_rate_pct(10.0)));
        assert!(condition.holds(&ServiceStatus::available("api").error_rate_pct(10.5)));
    }

    #[test]
    fn test_rule_builder() {
        let rule = DegradationRule::new("cache_down", "cache", DegradationCondition::Unavailable)
            .action(DegradationAction::DisableFeature {
                feature: "search".to_string(),
            })
            .action(DegradationAction::UseFallback {
                target: "cache".to_string(),
                params: serde_json::json!({"mode": "memory"}),
            })
            .priority(Priority::High);

        assert_eq!(rule.actions.len(), 2);
        assert!(rule.enabled);
        assert_eq!(rule.priority, Priority::High);
    }

    #[test]
    fn test_status_constructors_clamp_level() {
        let status = ServiceStatus::available("db").degradation_level(250);
        assert_eq!(status.degradation_level, 100);
        assert_eq!(ServiceStatus::unavailable("db").degradation_level, 100);
    }
}
