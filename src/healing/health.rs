//! Aggregate system health types.
//!
//! Component health is derived from simple numeric thresholds on adapter
//! probes and host resource utilization; the overall verdict folds in
//! whether any healing attempt is currently running.

use crate::types::HealthLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall system verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    /// At least one component is at warning level.
    Degraded,
    /// At least one component is critical.
    Critical,
    /// A healing attempt is currently running.
    Healing,
}

/// Health of a single component (database, cache, memory, cpu, disk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub level: HealthLevel,
    pub message: String,
    /// Utilization percentage for resource components.
    pub observed_pct: Option<f64>,
}

impl ComponentHealth {
    /// Classify a utilization percentage against warning/critical thresholds.
    pub fn from_utilization(
        component: impl Into<String>,
        used_pct: f64,
        warning_pct: f64,
        critical_pct: f64,
    ) -> Self {
        let component = component.into();
        let (level, message) = if used_pct > critical_pct {
            (
                HealthLevel::Critical,
                format!("{component} utilization critical at {used_pct:.1}%"),
            )
        } else if used_pct > warning_pct {
            (
                HealthLevel::Warning,
                format!("{component} utilization elevated at {used_pct:.1}%"),
            )
        } else {
            (
                HealthLevel::Healthy,
                format!("{component} utilization normal at {used_pct:.1}%"),
            )
        };

        Self {
            component,
            level,
            message,
            observed_pct: Some(used_pct),
        }
    }
}

/// Point-in-time aggregate health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthReport {
    pub overall: OverallHealth,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealthReport {
    /// Fold component levels into an overall verdict. `healing` wins over
    /// everything: it signals remediation already in flight.
    pub fn derive_overall(components: &[ComponentHealth], healing_active: bool) -> OverallHealth {
        if healing_active {
            return OverallHealth::Healing;
        }
        let worst = components
            .iter()
            .map(|c| c.level)
            .max()
            .unwrap_or(HealthLevel::Healthy);
        match worst {
            HealthLevel::Critical => OverallHealth::Critical,
            HealthLevel::Warning => OverallHealth::Degraded,
            HealthLevel::Healthy => OverallHealth::Healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_classification() {
        let normal = ComponentHealth::from_utilization("memory", 50.0, 85.0, 95.0);
        assert_eq!(normal.level, HealthLevel::Healthy);

        let elevated = ComponentHealth::from_utilization("memory", 90.0, 85.0, 95.0);
        assert_eq!(elevated.level, HealthLevel::Warning);

        let critical = ComponentHealth::from_utilization("memory", 97.5, 85.0, 95.0);
        assert_eq!(critical.level, HealthLevel::Critical);
        assert_eq!(critical.observed_pct, Some(97.5));
    }

    #[test]
    fn test_overall_verdict_precedence() {
        let warning = ComponentHealth::from_utilization("cpu", 80.0, 75.0, 90.0);
        let critical = ComponentHealth::from_utilization("disk", 95.0, 80.0, 90.0);
        let healthy = ComponentHealth::from_utilization("memory", 10.0, 85.0, 95.0);

        assert_eq!(
            SystemHealthReport::derive_overall(&[healthy.clone()], false),
            OverallHealth::Healthy
        );
        assert_eq!(
            SystemHealthReport::derive_overall(&[healthy.clone(), warning.clone()], false),
            OverallHealth::Degraded
        );
        assert_eq!(
            SystemHealthReport::derive_overall(&[warning, critical], false),
            OverallHealth::Critical
        );
        assert_eq!(
            SystemHealthReport::derive_overall(&[healthy], true),
            OverallHealth::Healing
        );
    }
}
