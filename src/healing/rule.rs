//! Healing rules and attempt records.
//!
//! A rule pairs a trigger (pattern matcher + threshold within a window) with
//! a diagnosis phase and a bounded, retryable healing phase. Diagnostic
//! checks and healing actions are capability objects supplied by the host at
//! construction time.

use crate::healing::Matcher;
use crate::types::Priority;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Severity attached to a diagnostic check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    Info,
    Warning,
    Critical,
}

/// Result returned by a diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: String,
    pub severity: CheckSeverity,
}

impl CheckOutcome {
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            severity: CheckSeverity::Info,
        }
    }

    pub fn failed(message: impl Into<String>, severity: CheckSeverity) -> Self {
        Self {
            passed: false,
            message: message.into(),
            severity,
        }
    }
}

/// A diagnostic probe run before healing actions are attempted.
#[async_trait]
pub trait DiagnosticCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> CheckOutcome;
}

/// A remediation step executed when diagnosis passes.
#[async_trait]
pub trait HealingAction: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a failed attempt may be retried.
    fn retryable(&self) -> bool {
        true
    }

    /// Whether [`HealingAction::rollback`] should run after the action's
    /// retries are exhausted.
    fn supports_rollback(&self) -> bool {
        false
    }

    async fn run(&self) -> anyhow::Result<()>;

    /// Best-effort undo; failures are logged, never propagated.
    async fn rollback(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Trigger, diagnosis and healing definition for one failure signature.
pub struct HealingRule {
    pub id: String,
    pub matcher: Arc<dyn Matcher>,

    /// Occurrences required within `window` to fire.
    pub threshold: u64,
    pub window: Duration,

    pub checks: Vec<Arc<dyn DiagnosticCheck>>,
    /// Individual timeout raced against each check.
    pub check_timeout: Duration,

    pub actions: Vec<Arc<dyn HealingAction>>,
    /// Tries per action before giving up on it.
    pub max_attempts: u32,
    /// Individual timeout raced against each action attempt.
    pub action_timeout: Duration,

    /// Minimum wait after an attempt completes before the rule may fire
    /// again, regardless of outcome.
    pub cooldown: Duration,

    pub enabled: bool,
    pub priority: Priority,
}

impl HealingRule {
    pub fn new(id: impl Into<String>, matcher: Arc<dyn Matcher>) -> Self {
        Self {
            id: id.into(),
            matcher,
            threshold: 3,
            window: Duration::from_secs(60),
            checks: Vec::new(),
            check_timeout: Duration::from_secs(5),
            actions: Vec::new(),
            max_attempts: 3,
            action_timeout: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
            enabled: true,
            priority: Priority::Medium,
        }
    }

    pub fn threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn check(mut self, check: Arc<dyn DiagnosticCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn action(mut self, action: Arc<dyn HealingAction>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Verdict of a healing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    /// Diagnosis passed and every action eventually succeeded.
    Success,
    /// Diagnosis passed but only some actions succeeded.
    Partial,
    /// Diagnosis failed, or no action succeeded.
    Failed,
}

/// Recorded result of one diagnostic check within an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub message: String,
    pub severity: CheckSeverity,
    pub completed_at: DateTime<Utc>,
}

/// Recorded result of one healing action within an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: String,
    pub succeeded: bool,
    /// Number of tries consumed, including the successful one.
    pub attempts: u32,
    pub message: String,
    pub completed_at: DateTime<Utc>,
}

/// One triggered run of a healing rule, kept in the bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub id: Uuid,
    pub rule_id: String,
    pub pattern_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub diagnosis: Vec<CheckResult>,
    pub actions: Vec<ActionResult>,
    /// Captured message when the attempt died to an unexpected panic.
    pub error: Option<String>,
    pub trigger_details: serde_json::Value,
}
