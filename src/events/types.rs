//! Structured event types emitted by the resilience engines.
//!
//! Dashboards and log pipelines subscribe to these; the engines themselves
//! never block on delivery.

use crate::degradation::ServiceStatus;
use crate::healing::AttemptStatus;
use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every observable side effect of the resilience core, as a typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResilienceEvent {
    /// A circuit breaker moved between states.
    CircuitStateChanged {
        service: String,
        from: CircuitState,
        to: CircuitState,
        at: DateTime<Utc>,
    },
    /// A circuit breaker opened (also triggers auto-recovery).
    CircuitOpened {
        service: String,
        consecutive_failures: u64,
        at: DateTime<Utc>,
    },
    /// A circuit breaker closed after a successful half-open batch.
    CircuitClosed { service: String, at: DateTime<Utc> },

    /// A recovery action reported that it restored the dependency.
    RecoveryActionSucceeded {
        service: String,
        action: String,
        at: DateTime<Utc>,
    },
    /// A recovery action ran but did not restore the dependency.
    RecoveryActionFailed {
        service: String,
        action: String,
        at: DateTime<Utc>,
    },
    /// A recovery action errored or timed out.
    RecoveryActionErrored {
        service: String,
        action: String,
        error: String,
        at: DateTime<Utc>,
    },

    /// A healing rule fired and an attempt began.
    HealingStarted {
        rule_id: String,
        attempt_id: Uuid,
        pattern_key: String,
        at: DateTime<Utc>,
    },
    /// A healing attempt finished with the given verdict.
    HealingCompleted {
        rule_id: String,
        attempt_id: Uuid,
        status: AttemptStatus,
        at: DateTime<Utc>,
    },

    /// A dependency's live status was reported.
    ServiceStatusUpdated {
        status: ServiceStatus,
        at: DateTime<Utc>,
    },
    /// A degradation rule's actions were applied.
    DegradationActivated {
        rule_id: String,
        service: String,
        at: DateTime<Utc>,
    },
    /// A degradation rule's actions were reverted.
    DegradationDeactivated {
        rule_id: String,
        service: String,
        at: DateTime<Utc>,
    },

    FeatureEnabled { feature: String, at: DateTime<Utc> },
    FeatureDisabled { feature: String, at: DateTime<Utc> },
    FallbackEnabled {
        target: String,
        params: serde_json::Value,
        at: DateTime<Utc>,
    },
    FallbackDisabled { target: String, at: DateTime<Utc> },
    FunctionalityReduced { target: String, at: DateTime<Utc> },
    FunctionalityRestored { target: String, at: DateTime<Utc> },
    AggressiveCachingEnabled { target: String, at: DateTime<Utc> },
    AggressiveCachingDisabled { target: String, at: DateTime<Utc> },
    RequestQueuingEnabled { target: String, at: DateTime<Utc> },
    RequestQueuingDisabled { target: String, at: DateTime<Utc> },
}

impl ResilienceEvent {
    /// Dotted event name for categorization and log correlation.
    pub fn event_name(&self) -> &'static str {
        match self {
            ResilienceEvent::CircuitStateChanged { .. } => "circuit.state_changed",
            ResilienceEvent::CircuitOpened { .. } => "circuit.opened",
            ResilienceEvent::CircuitClosed { .. } => "circuit.closed",
            ResilienceEvent::RecoveryActionSucceeded { .. } => "recovery.action_succeeded",
            ResilienceEvent::RecoveryActionFailed { .. } => "recovery.action_failed",
            ResilienceEvent::RecoveryActionErrored { .. } => "recovery.action_errored",
            ResilienceEvent::HealingStarted { .. } => "healing.started",
            ResilienceEvent::HealingCompleted { .. } => "healing.completed",
            ResilienceEvent::ServiceStatusUpdated { .. } => "degradation.service_status_updated",
            ResilienceEvent::DegradationActivated { .. } => "degradation.activated",
            ResilienceEvent::DegradationDeactivated { .. } => "degradation.deactivated",
            ResilienceEvent::FeatureEnabled { .. } => "feature.enabled",
            ResilienceEvent::FeatureDisabled { .. } => "feature.disabled",
            ResilienceEvent::FallbackEnabled { .. } => "fallback.enabled",
            ResilienceEvent::FallbackDisabled { .. } => "fallback.disabled",
            ResilienceEvent::FunctionalityReduced { .. } => "functionality.reduced",
            ResilienceEvent::FunctionalityRestored { .. } => "functionality.restored",
            ResilienceEvent::AggressiveCachingEnabled { .. } => "caching.aggressive_enabled",
            ResilienceEvent::AggressiveCachingDisabled { .. } => "caching.aggressive_disabled",
            ResilienceEvent::RequestQueuingEnabled { .. } => "queuing.enabled",
            ResilienceEvent::RequestQueuingDisabled { .. } => "queuing.disabled",
        }
    }

    /// When the event occurred.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ResilienceEvent::CircuitStateChanged { at, .. }
            | ResilienceEvent::CircuitOpened { at, .. }
            | ResilienceEvent::CircuitClosed { at, .. }
            | ResilienceEvent::RecoveryActionSucceeded { at, .. }
            | ResilienceEvent::RecoveryActionFailed { at, .. }
            | ResilienceEvent::RecoveryActionErrored { at, .. }
            | ResilienceEvent::HealingStarted { at, .. }
            | ResilienceEvent::HealingCompleted { at, .. }
            | ResilienceEvent::ServiceStatusUpdated { at, .. }
            | ResilienceEvent::DegradationActivated { at, .. }
            | ResilienceEvent::DegradationDeactivated { at, .. }
            | ResilienceEvent::FeatureEnabled { at, .. }
            | ResilienceEvent::FeatureDisabled { at, .. }
            | ResilienceEvent::FallbackEnabled { at, .. }
            | ResilienceEvent::FallbackDisabled { at, .. }
            | ResilienceEvent::FunctionalityReduced { at, .. }
            | ResilienceEvent::FunctionalityRestored { at, .. }
            | ResilienceEvent::AggressiveCachingEnabled { at, .. }
            | ResilienceEvent::AggressiveCachingDisabled { at, .. }
            | ResilienceEvent::RequestQueuingEnabled { at, .. }
            | ResilienceEvent::RequestQueuingDisabled { at, .. } => *at,
        }
    }

    /// Convert to JSON for log pipelines.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = ResilienceEvent::CircuitOpened {
            service: "database".to_string(),
            consecutive_failures: 5,
            at: Utc::now(),
        };
        assert_eq!(event.event_name(), "circuit.opened");

        let event = ResilienceEvent::FallbackEnabled {
            target: "cache".to_string(),
            params: serde_json::json!({"mode": "memory"}),
            at: Utc::now(),
        };
        assert_eq!(event.event_name(), "fallback.enabled");
    }

    #[test]
    fn test_event_serialization() {
        let at = Utc::now();
        let event = ResilienceEvent::FeatureDisabled {
            feature: "sales_reports".to_string(),
            at,
        };

        let json = event.to_json().unwrap();
        assert!(json.get("FeatureDisabled").is_some());
        assert_eq!(event.timestamp(), at);
    }
}
