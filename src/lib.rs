#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, PostgreSQL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Stockyard Resilience
//!
//! Resilience and self-healing core for the Stockyard livestock management
//! platform. Protects calls to unreliable dependencies (database, cache,
//! external APIs) via circuit breaking and retry, detects recurring failure
//! signatures and runs automated diagnosis and healing, and adaptively
//! degrades optional features while dependencies are unhealthy.
//!
//! ## Overview
//!
//! This crate is designed to complement the Node.js **Stockyard** backend:
//! the backend keeps the CRUD domain, HTTP routing and scheduling, while this
//! Rust core coordinates the fault-tolerance state machines (per-service
//! circuit breakers, a rule-evaluation engine with cooldowns and bounded
//! retries, and time-windowed error-pattern aggregation) without a central
//! lock, safe under concurrent callers.
//!
//! All state is per-process and in-memory. There is no wire protocol and no
//! cluster-wide coordination; the database and cache are collaborators known
//! only through the adapter traits in [`adapters`].
//!
//! ## Module Organization
//!
//! - [`resilience`] - Circuit breakers, retry executor, recovery registry and
//!   the orchestrator that composes them
//! - [`healing`] - Error-pattern tracking, healing rules and aggregate system
//!   health
//! - [`degradation`] - Service-status table, degradation rules and feature
//!   flags
//! - [`events`] - Typed event catalog and the broadcast publisher
//! - [`adapters`] - Collaborator traits supplied by the host backend
//! - [`config`] - Layered configuration (TOML file + environment)
//! - [`errors`] - Structured error handling
//! - [`logging`] - Console tracing initialization
//!
//! ## Quick Start
//!
//! ```rust
//! use stockyard_resilience::ResilienceConfig;
//!
//! // Defaults are valid out of the box; load() layers config/resilience.toml
//! // and STOCKYARD_RESILIENCE__* environment overrides on top.
//! let config = ResilienceConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.retry.max_retries, 3);
//! ```
//!
//! ## Design Principles
//!
//! - **No hidden global state**: every engine is an explicit struct
//!   constructed once at process start and passed by reference.
//! - **No central lock**: mutual exclusion is id-keyed (action id, rule id);
//!   unrelated work always proceeds concurrently.
//! - **Nothing here is fatal**: recovery, healing and degradation failures
//!   are captured at their boundary and recorded. The goal is graceful
//!   degradation, not crash-and-restart.
//! - **Bounded everything**: attempt history, pattern tables and event
//!   buffers are ring-buffer bounded; suspendable work is raced against
//!   explicit timeouts.

pub mod adapters;
pub mod config;
pub mod degradation;
pub mod errors;
pub mod events;
pub mod healing;
pub mod logging;
pub mod resilience;
pub mod types;

pub use adapters::{CacheAdapter, CacheHealth, DatabaseAdapter, ResourceMonitor, ResourceSample};
pub use config::{
    CircuitBreakerConfig, CircuitBreakerSettings, HealingSettings, ResilienceConfig, RetryPolicy,
};
pub use degradation::{
    ActiveDegradation, Availability, DegradationAction, DegradationCondition, DegradationEngine,
    DegradationRule, FeatureFlag, ServiceStatus,
};
pub use errors::{ResilienceError, ResilienceResult};
pub use events::{EventPublisher, ResilienceEvent};
pub use healing::{
    DiagnosticCheck, HealingAction, HealingAttempt, HealingRule, Matcher, OverallHealth,
    SelfHealingEngine, SystemHealthReport,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitState, RecoveryAction, RecoveryRegistry,
    ResilienceOrchestrator, RetryExecutor,
};
pub use types::{HealthLevel, Priority, ServiceHealth};
