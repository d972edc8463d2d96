//! # Recovery Registry
//!
//! Priority-ordered catalog of idempotent recovery actions, executed when a
//! circuit breaker opens. An id-keyed in-progress set guarantees at most one
//! concurrent execution per action; unrelated actions run independently.

use crate::adapters::{CacheAdapter, DatabaseAdapter};
use crate::errors::{ResilienceError, ResilienceResult};
use crate::events::{EventPublisher, ResilienceEvent};
use crate::types::Priority;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// An idempotent remediation step (e.g. reconnect the database).
///
/// Actions are registered once at startup. `run` must be safe to call
/// repeatedly; the registry only prevents the same action from running
/// concurrently with itself.
#[async_trait]
pub trait RecoveryAction: Send + Sync {
    /// Stable identifier, unique within the registry.
    fn id(&self) -> &str;

    fn priority(&self) -> Priority;

    /// Whether the orchestrator may run this action automatically when a
    /// breaker opens.
    fn auto_execute(&self) -> bool {
        true
    }

    /// Upper bound on a single execution; a stuck dependency cannot hang the
    /// recovery sweep.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Attempt the recovery. `Ok(true)` means the dependency was restored,
    /// `Ok(false)` means the action ran but did not help.
    async fn run(&self) -> anyhow::Result<bool>;
}

/// Outcome of a single recovery action execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The same action id is already executing; skipped.
    AlreadyRunning,
    /// The action reported the dependency restored.
    Recovered,
    /// The action ran to completion without restoring the dependency.
    NotRecovered,
    /// The action returned an error.
    Errored(String),
    /// The action exceeded its timeout.
    TimedOut,
}

/// Registry listing entry for query surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryActionInfo {
    pub id: String,
    pub priority: Priority,
    pub auto_execute: bool,
    pub in_progress: bool,
}

/// Catalog of recovery actions with per-id concurrency guards.
pub struct RecoveryRegistry {
    actions: DashMap<String, Arc<dyn RecoveryAction>>,
    in_progress: DashSet<String>,
}

impl RecoveryRegistry {
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
            in_progress: DashSet::new(),
        }
    }

    /// Register an action. Duplicate ids are rejected.
    pub fn register(&self, action: Arc<dyn RecoveryAction>) -> ResilienceResult<()> {
        let id = action.id().to_string();
        if self.actions.contains_key(&id) {
            return Err(ResilienceError::Configuration(format!(
                "recovery action '{id}' already registered"
            )));
        }

        info!(
            action = %id,
            priority = ?action.priority(),
            auto_execute = action.auto_execute(),
            "Recovery action registered"
        );
        self.actions.insert(id, action);
        Ok(())
    }

    /// All registered actions, sorted ascending by priority rank then id.
    pub fn actions_by_priority(&self) -> Vec<Arc<dyn RecoveryAction>> {
        let mut actions: Vec<Arc<dyn RecoveryAction>> = self
            .actions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        actions.sort_by(|a, b| {
            (a.priority().rank(), a.id().to_string()).cmp(&(b.priority().rank(), b.id().to_string()))
        });
        actions
    }

    /// Listing for query surfaces, including the live in-progress flag.
    pub fn snapshot(&self) -> Vec<RecoveryActionInfo> {
        self.actions_by_priority()
            .into_iter()
            .map(|action| RecoveryActionInfo {
                id: action.id().to_string(),
                priority: action.priority(),
                auto_execute: action.auto_execute(),
                in_progress: self.in_progress.contains(action.id()),
            })
            .collect()
    }

    pub fn is_in_progress(&self, id: &str) -> bool {
        self.in_progress.contains(id)
    }

    /// Execute one action under its timeout and the per-id guard.
    pub async fn execute(&self, action: &Arc<dyn RecoveryAction>) -> RecoveryOutcome {
        let id = action.id().to_string();
        if !self.in_progress.insert(id.clone()) {
            debug!(action = %id, "Recovery action already in progress, skipping");
            return RecoveryOutcome::AlreadyRunning;
        }

        let outcome = match timeout(action.timeout(), action.run()).await {
            Ok(Ok(true)) => RecoveryOutcome::Recovered,
            Ok(Ok(false)) => RecoveryOutcome::NotRecovered,
            Ok(Err(error)) => RecoveryOutcome::Errored(error.to_string()),
            Err(_) => RecoveryOutcome::TimedOut,
        };

        self.in_progress.remove(&id);
        outcome
    }

    /// Run every auto-executable action in priority order, stopping at the
    /// first one that restores the dependency. Returns the successful
    /// action's id, if any.
    pub async fn run_auto_recovery(
        &self,
        service: &str,
        reason: &str,
        publisher: &EventPublisher,
    ) -> Option<String> {
        info!(service = service, reason = reason, "Running auto-recovery");

        for action in self
            .actions_by_priority()
            .into_iter()
            .filter(|action| action.auto_execute())
        {
            let action_id = action.id().to_string();
            match self.execute(&action).await {
                RecoveryOutcome::AlreadyRunning => continue,
                RecoveryOutcome::Recovered => {
                    info!(
                        service = service,
                        action = %action_id,
                        "Recovery action restored dependency"
                    );
                    publisher.publish(ResilienceEvent::RecoveryActionSucceeded {
                        service: service.to_string(),
                        action: action_id.clone(),
                        at: Utc::now(),
                    });
                    return Some(action_id);
                }
                RecoveryOutcome::NotRecovered => {
                    warn!(
                        service = service,
                        action = %action_id,
                        "Recovery action ran but did not restore dependency"
                    );
                    publisher.publish(ResilienceEvent::RecoveryActionFailed {
                        service: service.to_string(),
                        action: action_id,
                        at: Utc::now(),
                    });
                }
                RecoveryOutcome::Errored(error) => {
                    warn!(
                        service = service,
                        action = %action_id,
                        error = %error,
                        "Recovery action errored"
                    );
                    publisher.publish(ResilienceEvent::RecoveryActionErrored {
                        service: service.to_string(),
                        action: action_id,
                        error,
                        at: Utc::now(),
                    });
                }
                RecoveryOutcome::TimedOut => {
                    let error = ResilienceError::RecoveryTimeout {
                        action: action_id.clone(),
                        timeout: action.timeout(),
                    };
                    warn!(service = service, action = %action_id, error = %error, "Recovery action timed out");
                    publisher.publish(ResilienceEvent::RecoveryActionErrored {
                        service: service.to_string(),
                        action: action_id,
                        error: error.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        }

        warn!(service = service, "No recovery action restored the dependency");
        None
    }
}

impl Default for RecoveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconnects the database through the backend's adapter, then probes the
/// connection to report whether recovery took.
pub struct DatabaseReconnectAction {
    database: Arc<dyn DatabaseAdapter>,
}

impl DatabaseReconnectAction {
    pub fn new(database: Arc<dyn DatabaseAdapter>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RecoveryAction for DatabaseReconnectAction {
    fn id(&self) -> &str {
        "database_reconnect"
    }

    fn priority(&self) -> Priority {
        Priority::Critical
    }

    async fn run(&self) -> anyhow::Result<bool> {
        self.database.reconnect().await?;
        Ok(self.database.test_connection().await)
    }
}

/// Reconnects the cache and reports recovery based on a fresh health check.
pub struct CacheReconnectAction {
    cache: Arc<dyn CacheAdapter>,
}

impl CacheReconnectAction {
    pub fn new(cache: Arc<dyn CacheAdapter>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl RecoveryAction for CacheReconnectAction {
    fn id(&self) -> &str {
        "cache_reconnect"
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    async fn run(&self) -> anyhow::Result<bool> {
        self.cache.reconnect().await?;
        let health = self.cache.health_check().await?;
        Ok(health.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct FlakyAction {
        id: &'static str,
        priority: Priority,
        succeeds: bool,
        runs: AtomicUsize,
    }

    impl FlakyAction {
        fn new(id: &'static str, priority: Priority, succeeds: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                priority,
                succeeds,
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RecoveryAction for FlakyAction {
        fn id(&self) -> &str {
            self.id
        }

        fn priority(&self) -> Priority {
            self.priority
        }

        async fn run(&self) -> anyhow::Result<bool> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self.succeeds)
        }
    }

    struct SlowAction;

    #[async_trait]
    impl RecoveryAction for SlowAction {
        fn id(&self) -> &str {
            "slow"
        }

        fn priority(&self) -> Priority {
            Priority::Medium
        }

        async fn run(&self) -> anyhow::Result<bool> {
            sleep(Duration::from_millis(100)).await;
            Ok(true)
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = RecoveryRegistry::new();
        registry
            .register(FlakyAction::new("reconnect", Priority::High, true))
            .unwrap();
        let err = registry
            .register(FlakyAction::new("reconnect", Priority::Low, true))
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Configuration(_)));
    }

    #[test]
    fn test_priority_ordering() {
        let registry = RecoveryRegistry::new();
        registry
            .register(FlakyAction::new("low", Priority::Low, true))
            .unwrap();
        registry
            .register(FlakyAction::new("critical", Priority::Critical, true))
            .unwrap();
        registry
            .register(FlakyAction::new("medium", Priority::Medium, true))
            .unwrap();

        let ids: Vec<String> = registry
            .actions_by_priority()
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        assert_eq!(ids, vec!["critical", "medium", "low"]);
    }

    #[tokio::test]
    async fn test_auto_recovery_stops_at_first_success() {
        let registry = RecoveryRegistry::new();
        let failing = FlakyAction::new("first", Priority::Critical, false);
        let succeeding = FlakyAction::new("second", Priority::High, true);
        let never_reached = FlakyAction::new("third", Priority::Low, true);

        registry.register(Arc::clone(&failing) as Arc<dyn RecoveryAction>).unwrap();
        registry
            .register(Arc::clone(&succeeding) as Arc<dyn RecoveryAction>)
            .unwrap();
        registry
            .register(Arc::clone(&never_reached) as Arc<dyn RecoveryAction>)
            .unwrap();

        let publisher = EventPublisher::new();
        let winner = registry
            .run_auto_recovery("database", "circuit opened", &publisher)
            .await;

        assert_eq!(winner.as_deref(), Some("second"));
        assert_eq!(failing.runs.load(Ordering::SeqCst), 1);
        assert_eq!(succeeding.runs.load(Ordering::SeqCst), 1);
        assert_eq!(never_reached.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_same_action_is_rejected() {
        let registry = Arc::new(RecoveryRegistry::new());
        let action: Arc<dyn RecoveryAction> = Arc::new(SlowAction);
        registry.register(Arc::clone(&action)).unwrap();

        let first = {
            let registry = Arc::clone(&registry);
            let action = Arc::clone(&action);
            tokio::spawn(async move { registry.execute(&action).await })
        };
        sleep(Duration::from_millis(20)).await;
        assert!(registry.is_in_progress("slow"));

        let second = registry.execute(&action).await;
        assert_eq!(second, RecoveryOutcome::AlreadyRunning);

        assert_eq!(first.await.unwrap(), RecoveryOutcome::Recovered);
        assert!(!registry.is_in_progress("slow"));
    }
}
