//! # Self-Healing Engine
//!
//! Tracks error-pattern frequency over sliding windows, evaluates healing
//! rules (diagnosis, bounded healing actions, cooldown) and derives an
//! aggregate system-health verdict from component checks.
//!
//! Mutual exclusion is purely id-keyed: one active attempt per rule id,
//! nothing else is serialized. Healing runs on spawned tasks so callers
//! reporting errors never wait on remediation.

use crate::adapters::{CacheAdapter, DatabaseAdapter, ResourceMonitor};
use crate::config::HealingSettings;
use crate::errors::{ResilienceError, ResilienceResult};
use crate::events::{EventPublisher, ResilienceEvent};
use crate::healing::{
    ActionResult, AttemptStatus, CheckOutcome, CheckResult, CheckSeverity, ComponentHealth,
    ErrorPatternRecord, ErrorPatternTracker, HealingAction, HealingAttempt, HealingRule,
    SystemHealthReport,
};
use crate::types::HealthLevel;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Live marker for a running attempt, keyed by rule id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveAttemptInfo {
    pub rule_id: String,
    pub attempt_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// State shared with spawned attempt tasks and the health monitor.
struct EngineShared {
    settings: HealingSettings,
    active_attempts: DashMap<String, ActiveAttemptInfo>,
    cooldowns: DashMap<String, DateTime<Utc>>,
    history: Mutex<VecDeque<HealingAttempt>>,
    publisher: EventPublisher,
    database: Arc<dyn DatabaseAdapter>,
    cache: Arc<dyn CacheAdapter>,
    resources: Arc<dyn ResourceMonitor>,
    latest_health: RwLock<Option<SystemHealthReport>>,
}

impl EngineShared {
    async fn run_attempt(
        self: Arc<Self>,
        rule: Arc<HealingRule>,
        pattern_key: String,
        trigger_details: serde_json::Value,
        attempt_id: Uuid,
    ) {
        let started_at = Utc::now();
        self.publisher.publish(ResilienceEvent::HealingStarted {
            rule_id: rule.id.clone(),
            attempt_id,
            pattern_key: pattern_key.clone(),
            at: started_at,
        });
        info!(
            rule = %rule.id,
            pattern_key = %pattern_key,
            attempt_id = %attempt_id,
            "Healing attempt started"
        );

        let details_for_panic = trigger_details.clone();
        let attempt = match AssertUnwindSafe(self.execute_attempt(
            &rule,
            attempt_id,
            &pattern_key,
            trigger_details,
        ))
        .catch_unwind()
        .await
        {
            Ok(attempt) => attempt,
            Err(panic) => {
                let message = panic_message(panic);
                error!(rule = %rule.id, panic = %message, "Healing attempt panicked");
                HealingAttempt {
                    id: attempt_id,
                    rule_id: rule.id.clone(),
                    pattern_key,
                    started_at,
                    finished_at: Some(Utc::now()),
                    status: AttemptStatus::Failed,
                    diagnosis: Vec::new(),
                    actions: Vec::new(),
                    error: Some(message),
                    trigger_details: details_for_panic,
                }
            }
        };

        // Cooldown applies regardless of outcome, preventing trigger storms.
        let cooldown_until = Utc::now()
            + chrono::Duration::from_std(rule.cooldown).unwrap_or_else(|_| chrono::Duration::zero());
        self.cooldowns.insert(rule.id.clone(), cooldown_until);
        self.active_attempts.remove(&rule.id);

        self.publisher.publish(ResilienceEvent::HealingCompleted {
            rule_id: rule.id.clone(),
            attempt_id,
            status: attempt.status,
            at: Utc::now(),
        });
        info!(
            rule = %rule.id,
            attempt_id = %attempt_id,
            status = ?attempt.status,
            "Healing attempt completed"
        );

        let mut history = self.history.lock();
        if history.len() >= self.settings.max_history_size {
            history.pop_front();
        }
        history.push_back(attempt);
    }

    async fn execute_attempt(
        &self,
        rule: &HealingRule,
        attempt_id: Uuid,
        pattern_key: &str,
        trigger_details: serde_json::Value,
    ) -> HealingAttempt {
        let mut attempt = HealingAttempt {
            id: attempt_id,
            rule_id: rule.id.clone(),
            pattern_key: pattern_key.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: AttemptStatus::Running,
            diagnosis: Vec::new(),
            actions: Vec::new(),
            error: None,
            trigger_details,
        };

        // Diagnosis: every check runs and is recorded, pass = AND of all.
        let mut diagnosis_passed = true;
        for check in &rule.checks {
            let outcome = match timeout(rule.check_timeout, check.run()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = ResilienceError::DiagnosticTimeout {
                        check: check.name().to_string(),
                        timeout: rule.check_timeout,
                    };
                    CheckOutcome::failed(err.to_string(), CheckSeverity::Critical)
                }
            };

            diagnosis_passed &= outcome.passed;
            attempt.diagnosis.push(CheckResult {
                check: check.name().to_string(),
                passed: outcome.passed,
                message: outcome.message,
                severity: outcome.severity,
                completed_at: Utc::now(),
            });
        }

        if !diagnosis_passed {
            warn!(rule = %rule.id, "Diagnosis failed, skipping healing actions");
            attempt.status = AttemptStatus::Failed;
            attempt.finished_at = Some(Utc::now());
            return attempt;
        }

        let mut succeeded = 0usize;
        for action in &rule.actions {
            let result = self.run_action(rule, action).await;
            if result.succeeded {
                succeeded += 1;
            }
            attempt.actions.push(result);
        }

        attempt.status = if succeeded == rule.actions.len() {
            AttemptStatus::Success
        } else if succeeded > 0 {
            AttemptStatus::Partial
        } else {
            AttemptStatus::Failed
        };
        attempt.finished_at = Some(Utc::now());
        attempt
    }

    /// Run one healing action with bounded retries. Waits grow linearly with
    /// the attempt number; exhaustion triggers the action's rollback when it
    /// has one.
    async fn run_action(
        &self,
        rule: &HealingRule,
        action: &Arc<dyn HealingAction>,
    ) -> ActionResult {
        let max_attempts = rule.max_attempts.max(1);
        let mut last_error = String::new();
        let mut tries = 0u32;

        for attempt_no in 1..=max_attempts {
            tries = attempt_no;
            match timeout(rule.action_timeout, action.run()).await {
                Ok(Ok(())) => {
                    debug!(
                        rule = %rule.id,
                        action = action.name(),
                        attempt = attempt_no,
                        "Healing action succeeded"
                    );
                    return ActionResult {
                        action: action.name().to_string(),
                        succeeded: true,
                        attempts: attempt_no,
                        message: format!("succeeded on attempt {attempt_no}"),
                        completed_at: Utc::now(),
                    };
                }
                Ok(Err(error)) => last_error = error.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", rule.action_timeout),
            }

            if action.retryable() && attempt_no < max_attempts {
                tokio::time::sleep(self.settings.retry_base_delay * attempt_no).await;
            } else {
                break;
            }
        }

        let err = ResilienceError::HealingActionFailed {
            action: action.name().to_string(),
            reason: last_error,
        };
        warn!(rule = %rule.id, error = %err, "Healing action exhausted retries");

        if action.supports_rollback() {
            if let Err(rollback_error) = action.rollback().await {
                warn!(
                    action = action.name(),
                    error = %rollback_error,
                    "Healing action rollback failed"
                );
            }
        }

        ActionResult {
            action: action.name().to_string(),
            succeeded: false,
            attempts: tries,
            message: err.to_string(),
            completed_at: Utc::now(),
        }
    }

    async fn evaluate_system_health(&self) -> SystemHealthReport {
        let thresholds = &self.settings.thresholds;
        let probe_timeout = Duration::from_millis(thresholds.probe_timeout_ms);
        let mut components = Vec::with_capacity(5);

        let started = Instant::now();
        let database = match timeout(probe_timeout, self.database.test_connection()).await {
            Ok(true) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                if elapsed_ms > thresholds.database_slow_ms {
                    ComponentHealth {
                        component: "database".to_string(),
                        level: HealthLevel::Warning,
                        message: format!("database responding slowly ({elapsed_ms}ms)"),
                        observed_pct: None,
                    }
                } else {
                    ComponentHealth {
                        component: "database".to_string(),
                        level: HealthLevel::Healthy,
                        message: format!("database connected ({elapsed_ms}ms)"),
                        observed_pct: None,
                    }
                }
            }
            Ok(false) => ComponentHealth {
                component: "database".to_string(),
                level: HealthLevel::Critical,
                message: "database connection test failed".to_string(),
                observed_pct: None,
            },
            Err(_) => ComponentHealth {
                component: "database".to_string(),
                level: HealthLevel::Critical,
                message: format!("database connection test timed out after {probe_timeout:?}"),
                observed_pct: None,
            },
        };
        components.push(database);

        let cache = match timeout(probe_timeout, self.cache.health_check()).await {
            Ok(Ok(health)) if health.healthy => ComponentHealth {
                component: "cache".to_string(),
                level: HealthLevel::Healthy,
                message: health.message,
                observed_pct: None,
            },
            Ok(Ok(health)) => ComponentHealth {
                component: "cache".to_string(),
                level: HealthLevel::Critical,
                message: health.message,
                observed_pct: None,
            },
            Ok(Err(error)) => ComponentHealth {
                component: "cache".to_string(),
                level: HealthLevel::Critical,
                message: format!("cache health check errored: {error}"),
                observed_pct: None,
            },
            Err(_) => ComponentHealth {
                component: "cache".to_string(),
                level: HealthLevel::Critical,
                message: format!("cache health check timed out after {probe_timeout:?}"),
                observed_pct: None,
            },
        };
        components.push(cache);

        let sample = self.resources.sample();
        components.push(ComponentHealth::from_utilization(
            "memory",
            sample.memory_used_pct,
            thresholds.memory_warning_pct,
            thresholds.memory_critical_pct,
        ));
        components.push(ComponentHealth::from_utilization(
            "cpu",
            sample.cpu_used_pct,
            thresholds.cpu_warning_pct,
            thresholds.cpu_critical_pct,
        ));
        components.push(ComponentHealth::from_utilization(
            "disk",
            sample.disk_used_pct,
            thresholds.disk_warning_pct,
            thresholds.disk_critical_pct,
        ));

        let overall =
            SystemHealthReport::derive_overall(&components, !self.active_attempts.is_empty());
        let report = SystemHealthReport {
            overall,
            components,
            checked_at: Utc::now(),
        };

        *self.latest_health.write() = Some(report.clone());
        report
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "healing task panicked".to_string()
    }
}

/// Detects recurring failure signatures and runs automated diagnosis and
/// healing. Constructed once at process start.
pub struct SelfHealingEngine {
    shared: Arc<EngineShared>,
    rules: DashMap<String, Arc<HealingRule>>,
    tracker: ErrorPatternTracker,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SelfHealingEngine {
    pub fn new(
        settings: HealingSettings,
        publisher: EventPublisher,
        database: Arc<dyn DatabaseAdapter>,
        cache: Arc<dyn CacheAdapter>,
        resources: Arc<dyn ResourceMonitor>,
    ) -> Self {
        let tracker =
            ErrorPatternTracker::new(settings.pattern_window, settings.max_tracked_patterns);

        info!(
            max_history_size = settings.max_history_size,
            max_tracked_patterns = settings.max_tracked_patterns,
            "Self-healing engine initialized"
        );

        Self {
            shared: Arc::new(EngineShared {
                settings,
                active_attempts: DashMap::new(),
                cooldowns: DashMap::new(),
                history: Mutex::new(VecDeque::new()),
                publisher,
                database,
                cache,
                resources,
                latest_health: RwLock::new(None),
            }),
            rules: DashMap::new(),
            tracker,
            monitor_handle: Mutex::new(None),
        }
    }

    /// Start a rule definition seeded with this engine's default check and
    /// action timeouts.
    pub fn new_rule(
        &self,
        id: impl Into<String>,
        matcher: Arc<dyn crate::healing::Matcher>,
    ) -> HealingRule {
        HealingRule::new(id, matcher)
            .check_timeout(self.shared.settings.check_timeout)
            .action_timeout(self.shared.settings.action_timeout)
    }

    /// Register a healing rule. Duplicate ids are rejected.
    pub fn register_rule(&self, rule: HealingRule) -> ResilienceResult<()> {
        if rule.threshold == 0 {
            return Err(ResilienceError::Configuration(format!(
                "healing rule '{}' must have a threshold of at least 1",
                rule.id
            )));
        }
        if self.rules.contains_key(&rule.id) {
            return Err(ResilienceError::Configuration(format!(
                "healing rule '{}' already registered",
                rule.id
            )));
        }

        info!(
            rule = %rule.id,
            matcher = %rule.matcher.describe(),
            threshold = rule.threshold,
            "Healing rule registered"
        );
        self.rules.insert(rule.id.clone(), Arc::new(rule));
        Ok(())
    }

    /// Record one occurrence of an error-pattern key and evaluate every
    /// enabled rule whose matcher matches it. Fired rules heal on spawned
    /// tasks; this call never blocks on remediation.
    pub fn track(&self, key: &str, details: serde_json::Value) {
        let record = self.tracker.record(key);
        debug!(
            pattern_key = key,
            count = record.count,
            "Error pattern tracked"
        );

        let now = Utc::now();
        for entry in self.rules.iter() {
            let rule = Arc::clone(entry.value());
            if !rule.enabled || !rule.matcher.matches(key) {
                continue;
            }
            if record.count < rule.threshold {
                continue;
            }
            let age = (now - record.first_seen).to_std().unwrap_or_default();
            if age > rule.window {
                continue;
            }
            if let Some(until) = self.shared.cooldowns.get(&rule.id) {
                if now < *until.value() {
                    debug!(rule = %rule.id, "Healing rule in cooldown, skipping");
                    continue;
                }
            }

            let attempt_id = Uuid::new_v4();
            match self.shared.active_attempts.entry(rule.id.clone()) {
                Entry::Occupied(_) => {
                    debug!(rule = %rule.id, "Healing attempt already running, skipping");
                    continue;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(ActiveAttemptInfo {
                        rule_id: rule.id.clone(),
                        attempt_id,
                        started_at: now,
                    });
                }
            }

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let shared = Arc::clone(&self.shared);
                    let key = key.to_string();
                    let details = details.clone();
                    handle.spawn(async move {
                        shared.run_attempt(rule, key, details, attempt_id).await;
                    });
                }
                Err(_) => {
                    warn!(
                        rule = %rule.id,
                        "No async runtime available, dropping healing trigger"
                    );
                    self.shared.active_attempts.remove(&rule.id);
                }
            }
        }
    }

    /// Registered rules.
    pub fn rules(&self) -> Vec<Arc<HealingRule>> {
        self.rules.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Attempts currently running, keyed by rule id.
    pub fn active_attempts(&self) -> Vec<ActiveAttemptInfo> {
        self.shared
            .active_attempts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Bounded attempt history, oldest first.
    pub fn history(&self) -> Vec<HealingAttempt> {
        self.shared.history.lock().iter().cloned().collect()
    }

    /// Tracked pattern counters.
    pub fn pattern_records(&self) -> Vec<ErrorPatternRecord> {
        self.tracker.snapshot()
    }

    /// Cooldown expiry for a rule, if one is pending.
    pub fn cooldown_until(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.shared.cooldowns.get(rule_id).map(|entry| *entry.value())
    }

    /// Compute component health and the overall verdict right now.
    pub async fn evaluate_system_health(&self) -> SystemHealthReport {
        self.shared.evaluate_system_health().await
    }

    /// Most recent report, from either an explicit evaluation or the
    /// background sweep.
    pub fn latest_health(&self) -> Option<SystemHealthReport> {
        self.shared.latest_health.read().clone()
    }

    /// Start the periodic background health sweep. No-op when already
    /// running.
    pub fn start_health_monitor(&self, interval: Duration) {
        let mut guard = self.monitor_handle.lock();
        if guard.is_some() {
            warn!("Health monitor already running");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = shared.evaluate_system_health().await;
                debug!(overall = ?report.overall, "Background health sweep completed");
            }
        });
        *guard = Some(handle);
        info!(interval_ms = interval.as_millis() as u64, "Health monitor started");
    }

    /// Cancel the background sweep. Must be called before dropping the
    /// engine at shutdown so no timer outlives the registries.
    pub fn shutdown(&self) {
        if let Some(handle) = self.monitor_handle.lock().take() {
            handle.abort();
            info!("Health monitor stopped");
        }
    }
}

impl Drop for SelfHealingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
