//! Collaborator interfaces consumed by the resilience core.
//!
//! The core never talks to a database, cache or operating system directly.
//! The host backend supplies these capability objects at construction time;
//! the engines only probe and reconnect through them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Database collaborator. The backend's connection pool wraps itself in this
/// trait; the core only ever probes connectivity and asks for a reconnect.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Cheap connectivity probe (e.g. `SELECT 1`). Returns false when the
    /// connection is down rather than erroring.
    async fn test_connection(&self) -> bool;

    /// Attempt to re-establish the connection.
    async fn reconnect(&self) -> anyhow::Result<()>;
}

/// Health report returned by a cache collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub healthy: bool,
    pub message: String,
}

/// Cache collaborator (e.g. the backend's Redis client).
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    async fn health_check(&self) -> anyhow::Result<CacheHealth>;

    async fn reconnect(&self) -> anyhow::Result<()>;
}

/// Point-in-time host resource utilization, supplied by the host process.
/// The core owns only the thresholds applied to these numbers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_used_pct: f64,
    pub cpu_used_pct: f64,
    pub disk_used_pct: f64,
}

/// Resource probe collaborator.
pub trait ResourceMonitor: Send + Sync {
    fn sample(&self) -> ResourceSample;
}
