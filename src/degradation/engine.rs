//! # Degradation Engine
//!
//! Maintains the live status table for named dependencies and a set of
//! degradation rules; toggles feature flags and emits side-effect events
//! when rule conditions hold.
//!
//! Whether a rule is currently applied is decided solely by membership in
//! the active-degradations set. Activation and deactivation are the only two
//! mutators of that set, and each claims the rule id before running any
//! action, so repeated identical status reports and concurrent evaluation
//! paths cannot double-apply a rule.

use crate::degradation::{
    ActiveDegradation, Availability, DegradationAction, DegradationRule, FeatureFlag,
    ServiceStatus,
};
use crate::errors::{ResilienceError, ResilienceResult};
use crate::events::{EventPublisher, ResilienceEvent};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Adaptively degrades optional features when dependencies are unhealthy.
/// Constructed once at process start; the host's health poller feeds it
/// status reports.
pub struct DegradationEngine {
    statuses: DashMap<String, ServiceStatus>,
    rules: RwLock<Vec<Arc<DegradationRule>>>,
    flags: DashMap<String, FeatureFlag>,
    /// Sole source of truth for "is this rule currently applied".
    active: DashMap<String, ActiveDegradation>,
    publisher: EventPublisher,
}

impl DegradationEngine {
    pub fn new(publisher: EventPublisher) -> Self {
        info!("Degradation engine initialized");
        Self {
            statuses: DashMap::new(),
            rules: RwLock::new(Vec::new()),
            flags: DashMap::new(),
            active: DashMap::new(),
            publisher,
        }
    }

    /// Register a degradation rule. Duplicate ids are rejected.
    pub fn register_rule(&self, rule: DegradationRule) -> ResilienceResult<()> {
        let mut rules = self.rules.write();
        if rules.iter().any(|existing| existing.id == rule.id) {
            return Err(ResilienceError::Configuration(format!(
                "degradation rule '{}' already registered",
                rule.id
            )));
        }

        info!(
            rule = %rule.id,
            service = %rule.service,
            actions = rule.actions.len(),
            "Degradation rule registered"
        );
        rules.push(Arc::new(rule));
        Ok(())
    }

    /// Register a feature flag, replacing any previous flag with the same
    /// name.
    pub fn register_flag(&self, flag: FeatureFlag) {
        debug!(feature = %flag.name, enabled = flag.enabled, "Feature flag registered");
        self.flags.insert(flag.name.clone(), flag);
    }

    /// Report a dependency's live status. Upserts the status table, emits
    /// `service_status_updated`, then evaluates every enabled rule targeting
    /// the service in ascending priority order. Rule evaluation errors are
    /// logged and never block later reports.
    pub fn report_status(&self, status: ServiceStatus) {
        let service = status.service.clone();
        debug!(
            service = %service,
            availability = ?status.availability,
            response_time_ms = status.response_time_ms,
            "Service status reported"
        );

        self.statuses.insert(service.clone(), status.clone());
        self.publisher.publish(ResilienceEvent::ServiceStatusUpdated {
            status: status.clone(),
            at: Utc::now(),
        });

        let mut rules: Vec<Arc<DegradationRule>> = self
            .rules
            .read()
            .iter()
            .filter(|rule| rule.enabled && rule.service == service)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.priority.rank());

        for rule in rules {
            if let Err(error) = self.evaluate_rule(&rule, &status) {
                warn!(
                    rule = %rule.id,
                    error = %error,
                    "Degradation rule evaluation failed"
                );
            }
        }
    }

    /// Transition logic for one rule: condition holds and the rule is not
    /// active, activate; condition no longer holds and the rule is active,
    /// deactivate. Anything else is a no-op.
    fn evaluate_rule(
        &self,
        rule: &Arc<DegradationRule>,
        status: &ServiceStatus,
    ) -> ResilienceResult<()> {
        if rule.condition.holds(status) {
            self.activate(rule)
        } else {
            self.deactivate(rule)
        }
    }

    /// Apply the rule's actions in declared order and record it as active.
    /// A no-op when the rule is already active.
    fn activate(&self, rule: &Arc<DegradationRule>) -> ResilienceResult<()> {
        // Claiming the id first makes concurrent activation a no-op for the
        // loser, so actions never run twice.
        match self.active.entry(rule.id.clone()) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(vacant) => {
                vacant.insert(ActiveDegradation {
                    rule_id: rule.id.clone(),
                    service: rule.service.clone(),
                    started_at: Utc::now(),
                });
            }
        }

        info!(rule = %rule.id, service = %rule.service, "Activating degradation rule");
        let mut first_error = None;
        for action in &rule.actions {
            if let Err(error) = self.apply_action(action) {
                warn!(rule = %rule.id, error = %error, "Degradation action failed");
                first_error.get_or_insert(error);
            }
        }

        self.publisher.publish(ResilienceEvent::DegradationActivated {
            rule_id: rule.id.clone(),
            service: rule.service.clone(),
            at: Utc::now(),
        });

        match first_error {
            Some(error) => Err(ResilienceError::DegradationEvaluation {
                rule: rule.id.clone(),
                reason: error.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Revert the rule's actions in declared order and drop it from the
    /// active set. A no-op when the rule is not active.
    fn deactivate(&self, rule: &Arc<DegradationRule>) -> ResilienceResult<()> {
        if self.active.remove(&rule.id).is_none() {
            return Ok(());
        }

        info!(rule = %rule.id, service = %rule.service, "Deactivating degradation rule");
        let mut first_error = None;
        for action in &rule.actions {
            if let Err(error) = self.revert_action(action) {
                warn!(rule = %rule.id, error = %error, "Degradation action revert failed");
                first_error.get_or_insert(error);
            }
        }

        self.publisher.publish(ResilienceEvent::DegradationDeactivated {
            rule_id: rule.id.clone(),
            service: rule.service.clone(),
            at: Utc::now(),
        });

        match first_error {
            Some(error) => Err(ResilienceError::DegradationEvaluation {
                rule: rule.id.clone(),
                reason: error.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn apply_action(&self, action: &DegradationAction) -> ResilienceResult<()> {
        match action {
            DegradationAction::DisableFeature { feature } => {
                let mut flag = self
                    .flags
                    .get_mut(feature)
                    .ok_or_else(|| ResilienceError::UnknownFeature(feature.clone()))?;
                flag.enabled = false;
                flag.degradation_level = 100;
                drop(flag);

                self.publisher.publish(ResilienceEvent::FeatureDisabled {
                    feature: feature.clone(),
                    at: Utc::now(),
                });
            }
            DegradationAction::UseFallback { target, params } => {
                self.publisher.publish(ResilienceEvent::FallbackEnabled {
                    target: target.clone(),
                    params: params.clone(),
                    at: Utc::now(),
                });
            }
            DegradationAction::ReduceFunctionality { target } => {
                self.publisher.publish(ResilienceEvent::FunctionalityReduced {
                    target: target.clone(),
                    at: Utc::now(),
                });
            }
            DegradationAction::CacheResponse { target } => {
                self.publisher.publish(ResilienceEvent::AggressiveCachingEnabled {
                    target: target.clone(),
                    at: Utc::now(),
                });
            }
            DegradationAction::QueueRequest { target } => {
                self.publisher.publish(ResilienceEvent::RequestQueuingEnabled {
                    target: target.clone(),
                    at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    fn revert_action(&self, action: &DegradationAction) -> ResilienceResult<()> {
        match action {
            DegradationAction::DisableFeature { feature } => {
                let mut flag = self
                    .flags
                    .get_mut(feature)
                    .ok_or_else(|| ResilienceError::UnknownFeature(feature.clone()))?;
                flag.enabled = true;
                flag.degradation_level = 0;
                drop(flag);

                self.publisher.publish(ResilienceEvent::FeatureEnabled {
                    feature: feature.clone(),
                    at: Utc::now(),
                });
            }
            DegradationAction::UseFallback { target, .. } => {
                self.publisher.publish(ResilienceEvent::FallbackDisabled {
                    target: target.clone(),
                    at: Utc::now(),
                });
            }
            DegradationAction::ReduceFunctionality { target } => {
                self.publisher.publish(ResilienceEvent::FunctionalityRestored {
                    target: target.clone(),
                    at: Utc::now(),
                });
            }
            DegradationAction::CacheResponse { target } => {
                self.publisher.publish(ResilienceEvent::AggressiveCachingDisabled {
                    target: target.clone(),
                    at: Utc::now(),
                });
            }
            DegradationAction::QueueRequest { target } => {
                self.publisher.publish(ResilienceEvent::RequestQueuingDisabled {
                    target: target.clone(),
                    at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    /// Whether a feature is currently usable: its flag is enabled and every
    /// service it depends on last reported `Available`. A dependency with no
    /// status yet does not count against the feature.
    pub fn is_feature_available(&self, feature: &str) -> bool {
        let Some(flag) = self.flags.get(feature) else {
            return false;
        };
        if !flag.enabled {
            return false;
        }

        flag.dependencies.iter().all(|service| {
            self.statuses
                .get(service)
                .map(|status| status.availability == Availability::Available)
                .unwrap_or(true)
        })
    }

    /// Latest reported status of one dependency.
    pub fn service_status(&self, service: &str) -> Option<ServiceStatus> {
        self.statuses.get(service).map(|entry| entry.clone())
    }

    /// Latest reported status of every dependency.
    pub fn service_statuses(&self) -> Vec<ServiceStatus> {
        self.statuses.iter().map(|entry| entry.clone()).collect()
    }

    /// Registered rules in registration order.
    pub fn rules(&self) -> Vec<Arc<DegradationRule>> {
        self.rules.read().clone()
    }

    /// Current feature-flag table.
    pub fn feature_flags(&self) -> Vec<FeatureFlag> {
        self.flags.iter().map(|entry| entry.clone()).collect()
    }

    pub fn feature_flag(&self, name: &str) -> Option<FeatureFlag> {
        self.flags.get(name).map(|entry| entry.clone())
    }

    /// Rules currently applied.
    pub fn active_degradations(&self) -> Vec<ActiveDegradation> {
        self.active.iter().map(|entry| entry.clone()).collect()
    }

    pub fn is_active(&self, rule_id: &str) -> bool {
        self.active.contains_key(rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::degradation::DegradationCondition;
    use crate::types::Priority;
    use tokio::sync::broadcast::Receiver;

    fn engine_with_events() -> (DegradationEngine, Receiver<ResilienceEvent>) {
        let publisher = EventPublisher::with_capacity(128);
        let receiver = publisher.subscribe();
        (DegradationEngine::new(publisher), receiver)
    }

    fn drain(receiver: &mut Receiver<ResilienceEvent>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            names.push(event.event_name().to_string());
        }
        names
    }

    fn cache_rule() -> DegradationRule {
        DegradationRule::new("cache_unavailable", "cache", DegradationCondition::Unavailable)
            .action(DegradationAction::DisableFeature {
                feature: "cache".to_string(),
            })
            .action(DegradationAction::UseFallback {
                target: "cache".to_string(),
                params: serde_json::json!({"mode": "memory"}),
            })
    }

    #[tokio::test]
    async fn test_activate_and_deactivate_round_trip() {
        let (engine, mut events) = engine_with_events();
        engine.register_flag(FeatureFlag::new("cache"));
        engine.register_rule(cache_rule()).unwrap();

        engine.report_status(ServiceStatus::unavailable("cache"));

        let flag = engine.feature_flag("cache").unwrap();
        assert!(!flag.enabled);
        assert_eq!(flag.degradation_level, 100);
        assert!(engine.is_active("cache_unavailable"));

        let names = drain(&mut events);
        assert!(names.contains(&"degradation.service_status_updated".to_string()));
        assert!(names.contains(&"feature.disabled".to_string()));
        assert!(names.contains(&"fallback.enabled".to_string()));
        assert!(names.contains(&"degradation.activated".to_string()));

        engine.report_status(ServiceStatus::available("cache"));

        let flag = engine.feature_flag("cache").unwrap();
        assert!(flag.enabled);
        assert_eq!(flag.degradation_level, 0);
        assert!(!engine.is_active("cache_unavailable"));

        let names = drain(&mut events);
        assert!(names.contains(&"feature.enabled".to_string()));
        assert!(names.contains(&"fallback.disabled".to_string()));
        assert!(names.contains(&"degradation.deactivated".to_string()));
    }

    #[tokio::test]
    async fn test_repeated_unavailable_reports_activate_once() {
        let (engine, mut events) = engine_with_events();
        engine.register_flag(FeatureFlag::new("cache"));
        engine.register_rule(cache_rule()).unwrap();

        engine.report_status(ServiceStatus::unavailable("cache"));
        drain(&mut events);

        engine.report_status(ServiceStatus::unavailable("cache"));

        // Membership in the active set is checked, not the condition, so the
        // second identical report applies nothing.
        let names = drain(&mut events);
        assert!(names.contains(&"degradation.service_status_updated".to_string()));
        assert!(!names.contains(&"degradation.activated".to_string()));
        assert!(!names.contains(&"feature.disabled".to_string()));
        assert_eq!(engine.active_degradations().len(), 1);
    }

    #[tokio::test]
    async fn test_deactivating_inactive_rule_is_noop() {
        let (engine, mut events) = engine_with_events();
        engine.register_flag(FeatureFlag::new("cache"));
        engine.register_rule(cache_rule()).unwrap();

        engine.report_status(ServiceStatus::available("cache"));

        let names = drain(&mut events);
        assert!(!names.contains(&"degradation.deactivated".to_string()));
        assert!(engine.feature_flag("cache").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_slow_condition_rule() {
        let (engine, mut events) = engine_with_events();
        engine
            .register_rule(
                DegradationRule::new(
                    "db_slow",
                    "database",
                    DegradationCondition::Slow { threshold_ms: 500 },
                )
                .action(DegradationAction::CacheResponse {
                    target: "reports".to_string(),
                }),
            )
            .unwrap();

        engine.report_status(ServiceStatus::available("database").response_time_ms(800));
        assert!(engine.is_active("db_slow"));
        assert!(drain(&mut events).contains(&"caching.aggressive_enabled".to_string()));

        engine.report_status(ServiceStatus::available("database").response_time_ms(100));
        assert!(!engine.is_active("db_slow"));
        assert!(drain(&mut events).contains(&"caching.aggressive_disabled".to_string()));
    }

    #[tokio::test]
    async fn test_error_rate_rule_emits_queuing_events() {
        let (engine, mut events) = engine_with_events();
        engine
            .register_rule(
                DegradationRule::new(
                    "api_errors",
                    "external_api",
                    DegradationCondition::ErrorRateAbove { threshold_pct: 25.0 },
                )
                .action(DegradationAction::QueueRequest {
                    target: "notifications".to_string(),
                })
                .action(DegradationAction::ReduceFunctionality {
                    target: "sync".to_string(),
                }),
            )
            .unwrap();

        engine.report_status(ServiceStatus::available("external_api").error_rate_pct(40.0));
        let names = drain(&mut events);
        assert!(names.contains(&"queuing.enabled".to_string()));
        assert!(names.contains(&"functionality.reduced".to_string()));

        engine.report_status(ServiceStatus::available("external_api").error_rate_pct(1.0));
        let names = drain(&mut events);
        assert!(names.contains(&"queuing.disabled".to_string()));
        assert!(names.contains(&"functionality.restored".to_string()));
    }

    #[tokio::test]
    async fn test_rules_evaluate_in_priority_order() {
        let (engine, mut events) = engine_with_events();
        engine
            .register_rule(
                DegradationRule::new("later", "cache", DegradationCondition::Unavailable)
                    .action(DegradationAction::ReduceFunctionality {
                        target: "low_priority".to_string(),
                    })
                    .priority(Priority::Low),
            )
            .unwrap();
        engine
            .register_rule(
                DegradationRule::new("first", "cache", DegradationCondition::Unavailable)
                    .action(DegradationAction::ReduceFunctionality {
                        target: "critical_path".to_string(),
                    })
                    .priority(Priority::Critical),
            )
            .unwrap();

        engine.report_status(ServiceStatus::unavailable("cache"));

        let mut targets = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ResilienceEvent::FunctionalityReduced { target, .. } = event {
                targets.push(target);
            }
        }
        assert_eq!(targets, vec!["critical_path", "low_priority"]);
    }

    #[tokio::test]
    async fn test_unknown_feature_does_not_block_other_actions() {
        let (engine, mut events) = engine_with_events();
        engine
            .register_rule(
                DegradationRule::new("broken", "cache", DegradationCondition::Unavailable)
                    .action(DegradationAction::DisableFeature {
                        feature: "missing_flag".to_string(),
                    })
                    .action(DegradationAction::UseFallback {
                        target: "cache".to_string(),
                        params: serde_json::Value::Null,
                    }),
            )
            .unwrap();

        engine.report_status(ServiceStatus::unavailable("cache"));

        // The failed action is logged; the rest of the rule still applies
        // and later reports keep working.
        let names = drain(&mut events);
        assert!(names.contains(&"fallback.enabled".to_string()));
        assert!(engine.is_active("broken"));

        engine.report_status(ServiceStatus::available("cache"));
        assert!(!engine.is_active("broken"));
    }

    #[tokio::test]
    async fn test_disabled_rules_are_skipped() {
        let (engine, _events) = engine_with_events();
        engine.register_flag(FeatureFlag::new("cache"));
        engine.register_rule(cache_rule().enabled(false)).unwrap();

        engine.report_status(ServiceStatus::unavailable("cache"));

        assert!(engine.active_degradations().is_empty());
        assert!(engine.feature_flag("cache").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_duplicate_rule_rejected() {
        let (engine, _events) = engine_with_events();
        engine.register_rule(cache_rule()).unwrap();
        assert!(engine.register_rule(cache_rule()).is_err());
    }

    #[tokio::test]
    async fn test_feature_availability_tracks_dependencies() {
        let (engine, _events) = engine_with_events();
        engine.register_flag(FeatureFlag::new("sales_reports").depends_on("database"));

        // No status yet: the dependency does not count against the feature.
        assert!(engine.is_feature_available("sales_reports"));

        engine.report_status(ServiceStatus::unavailable("database"));
        assert!(!engine.is_feature_available("sales_reports"));

        engine.report_status(ServiceStatus::available("database"));
        assert!(engine.is_feature_available("sales_reports"));

        assert!(!engine.is_feature_available("nonexistent"));
    }
}
