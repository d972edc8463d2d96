//! Cross-module flows for the self-healing and degradation engines: error
//! patterns triggering healing, status reports toggling feature flags, and
//! both engines sharing one event stream.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stockyard_resilience::config::HealingSettings;
use stockyard_resilience::healing::{AttemptStatus, CheckOutcome, DiagnosticCheck, SubstringMatcher};
use stockyard_resilience::{
    Availability, CacheAdapter, CacheHealth, DatabaseAdapter, DegradationAction,
    DegradationCondition, DegradationEngine, DegradationRule, EventPublisher, FeatureFlag,
    HealingAction, HealingRule, OverallHealth, ResilienceEvent, ResourceMonitor, ResourceSample,
    SelfHealingEngine, ServiceStatus,
};
use tokio::time::sleep;

struct MockDatabase {
    connected: AtomicBool,
    reconnects: AtomicUsize,
}

impl MockDatabase {
    fn new(connected: bool) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            reconnects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DatabaseAdapter for MockDatabase {
    async fn test_connection(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> anyhow::Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockCache;

#[async_trait]
impl CacheAdapter for MockCache {
    async fn health_check(&self) -> anyhow::Result<CacheHealth> {
        Ok(CacheHealth {
            healthy: true,
            message: "PONG".to_string(),
        })
    }

    async fn reconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct QuietHost;

impl ResourceMonitor for QuietHost {
    fn sample(&self) -> ResourceSample {
        ResourceSample {
            memory_used_pct: 40.0,
            cpu_used_pct: 25.0,
            disk_used_pct: 55.0,
        }
    }
}

/// Healing action that reconnects the mock database.
struct ReconnectDatabase {
    database: Arc<MockDatabase>,
}

#[async_trait]
impl HealingAction for ReconnectDatabase {
    fn name(&self) -> &str {
        "reconnect_database"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.database.reconnect().await
    }
}

/// Diagnostic check that passes only while the mock database is down, i.e.
/// healing is still needed.
struct DatabaseDownCheck {
    database: Arc<MockDatabase>,
}

#[async_trait]
impl DiagnosticCheck for DatabaseDownCheck {
    fn name(&self) -> &str {
        "database_down"
    }

    async fn run(&self) -> CheckOutcome {
        if self.database.test_connection().await {
            CheckOutcome::passed("database already reachable")
        } else {
            CheckOutcome::passed("database unreachable, reconnect warranted")
        }
    }
}

fn healing_engine(database: Arc<MockDatabase>) -> SelfHealingEngine {
    SelfHealingEngine::new(
        HealingSettings {
            retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        },
        EventPublisher::new(),
        database,
        Arc::new(MockCache),
        Arc::new(QuietHost),
    )
}

async fn wait_for_history(engine: &SelfHealingEngine, len: usize) {
    for _ in 0..100 {
        if engine.history().len() >= len {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("healing history never reached {len} entries");
}

#[tokio::test]
async fn test_error_pattern_burst_heals_database_once() {
    let database = MockDatabase::new(false);
    let engine = healing_engine(Arc::clone(&database));

    engine
        .register_rule(
            HealingRule::new("db_timeouts", Arc::new(SubstringMatcher::new("database")))
                .threshold(3)
                .window(Duration::from_secs(60))
                .cooldown(Duration::from_secs(300))
                .check(Arc::new(DatabaseDownCheck {
                    database: Arc::clone(&database),
                }))
                .action(Arc::new(ReconnectDatabase {
                    database: Arc::clone(&database),
                })),
        )
        .unwrap();

    // Two occurrences stay below the threshold.
    engine.track("database:timeout", serde_json::json!({"query": "select 1"}));
    engine.track("database:timeout", serde_json::json!({"query": "select 1"}));
    sleep(Duration::from_millis(30)).await;
    assert!(engine.history().is_empty());
    assert_eq!(database.reconnects.load(Ordering::SeqCst), 0);

    // The third fires the rule: diagnosis passes and the action reconnects.
    engine.track("database:timeout", serde_json::json!({"query": "select 1"}));
    wait_for_history(&engine, 1).await;

    assert_eq!(database.reconnects.load(Ordering::SeqCst), 1);
    assert!(database.connected.load(Ordering::SeqCst));
    let attempt = &engine.history()[0];
    assert_eq!(attempt.status, AttemptStatus::Success);
    assert_eq!(attempt.diagnosis.len(), 1);
    assert_eq!(attempt.actions.len(), 1);

    // A fourth occurrence lands inside the cooldown and triggers nothing.
    engine.track("database:timeout", serde_json::json!({}));
    sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.history().len(), 1);
    assert_eq!(database.reconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_healing_events_share_the_stream() {
    let publisher = EventPublisher::with_capacity(64);
    let mut events = publisher.subscribe();

    let database = MockDatabase::new(false);
    let engine = SelfHealingEngine::new(
        HealingSettings {
            retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        },
        publisher,
        Arc::clone(&database) as Arc<dyn DatabaseAdapter>,
        Arc::new(MockCache),
        Arc::new(QuietHost),
    );

    engine
        .register_rule(
            engine
                .new_rule("db_refused", Arc::new(SubstringMatcher::new("refused")))
                .threshold(1)
                .action(Arc::new(ReconnectDatabase {
                    database: Arc::clone(&database),
                })),
        )
        .unwrap();

    engine.track("database:refused", serde_json::json!({}));
    wait_for_history(&engine, 1).await;

    let mut started = None;
    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        match event {
            ResilienceEvent::HealingStarted { rule_id, .. } => started = Some(rule_id),
            ResilienceEvent::HealingCompleted { rule_id, status, .. } => {
                completed = Some((rule_id, status));
            }
            _ => {}
        }
    }
    assert_eq!(started.as_deref(), Some("db_refused"));
    assert_eq!(
        completed,
        Some(("db_refused".to_string(), AttemptStatus::Success))
    );
}

#[tokio::test]
async fn test_system_health_reflects_database_outage() {
    let database = MockDatabase::new(false);
    let engine = healing_engine(Arc::clone(&database));

    let report = engine.evaluate_system_health().await;
    assert_eq!(report.overall, OverallHealth::Critical);

    database.reconnect().await.unwrap();
    let report = engine.evaluate_system_health().await;
    assert_eq!(report.overall, OverallHealth::Healthy);
}

#[tokio::test]
async fn test_cache_outage_degrades_and_recovers_features() {
    let publisher = EventPublisher::with_capacity(128);
    let mut events = publisher.subscribe();
    let engine = DegradationEngine::new(publisher);

    engine.register_flag(FeatureFlag::new("cache").depends_on("cache"));
    engine.register_flag(FeatureFlag::new("sales_reports").depends_on("database"));
    engine
        .register_rule(
            DegradationRule::new("cache_unavailable", "cache", DegradationCondition::Unavailable)
                .action(DegradationAction::DisableFeature {
                    feature: "cache".to_string(),
                })
                .action(DegradationAction::UseFallback {
                    target: "cache".to_string(),
                    params: serde_json::json!({"mode": "memory"}),
                }),
        )
        .unwrap();

    // Outage: flag disabled, fallback announced.
    engine.report_status(ServiceStatus::unavailable("cache"));
    assert!(!engine.feature_flag("cache").unwrap().enabled);
    assert!(!engine.is_feature_available("cache"));
    assert_eq!(engine.active_degradations().len(), 1);

    // A second identical report activates nothing further.
    engine.report_status(ServiceStatus::unavailable("cache"));
    let names: Vec<String> = {
        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.event_name().to_string());
        }
        names
    };
    assert_eq!(
        names
            .iter()
            .filter(|name| *name == "degradation.activated")
            .count(),
        1
    );
    assert_eq!(
        names
            .iter()
            .filter(|name| *name == "fallback.enabled")
            .count(),
        1
    );

    // Recovery: flag re-enabled, fallback withdrawn.
    engine.report_status(ServiceStatus::available("cache"));
    assert!(engine.feature_flag("cache").unwrap().enabled);
    assert!(engine.is_feature_available("cache"));
    assert!(engine.active_degradations().is_empty());

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.event_name().to_string());
    }
    assert!(names.contains(&"feature.enabled".to_string()));
    assert!(names.contains(&"fallback.disabled".to_string()));
    assert!(names.contains(&"degradation.deactivated".to_string()));

    // The unrelated flag never flipped.
    assert!(engine.feature_flag("sales_reports").unwrap().enabled);
}

#[tokio::test]
async fn test_degraded_dependency_blocks_dependent_features() {
    let engine = DegradationEngine::new(EventPublisher::new());
    engine.register_flag(
        FeatureFlag::new("feeding_analytics")
            .depends_on("database")
            .depends_on("cache"),
    );

    engine.report_status(ServiceStatus::available("database"));
    engine.report_status(ServiceStatus::new("cache", Availability::Degraded));

    // Every declared dependency must be fully available.
    assert!(!engine.is_feature_available("feeding_analytics"));

    engine.report_status(ServiceStatus::available("cache"));
    assert!(engine.is_feature_available("feeding_analytics"));
}
