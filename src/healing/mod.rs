//! Error-pattern tracking, rule-driven healing and aggregate system health.

pub mod engine;
pub mod health;
pub mod matcher;
pub mod patterns;
pub mod rule;

pub use engine::{ActiveAttemptInfo, SelfHealingEngine};
pub use health::{ComponentHealth, OverallHealth, SystemHealthReport};
pub use matcher::{ErrorCodeMatcher, Matcher, RegexMatcher, SubstringMatcher};
pub use patterns::{ErrorPatternRecord, ErrorPatternTracker};
pub use rule::{
    ActionResult, AttemptStatus, CheckOutcome, CheckResult, CheckSeverity, DiagnosticCheck,
    HealingAction, HealingAttempt, HealingRule,
};
