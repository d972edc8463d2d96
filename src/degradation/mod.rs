//! Service-status tracking, degradation rules and feature flags.

pub mod engine;
pub mod rule;

pub use engine::DegradationEngine;
pub use rule::{
    ActiveDegradation, Availability, DegradationAction, DegradationCondition, DegradationRule,
    FeatureFlag, ServiceStatus,
};
