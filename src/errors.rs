//! Error types for the resilience core.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the resilience engines themselves.
///
/// Nothing in this taxonomy is fatal to the host process: recovery, healing
/// and degradation failures are captured at their boundary and recorded, the
/// caller's own operation errors travel through
/// [`CircuitBreakerError`](crate::resilience::CircuitBreakerError) instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Recovery action '{action}' timed out after {timeout:?}")]
    RecoveryTimeout { action: String, timeout: Duration },

    #[error("Recovery action '{action}' failed: {reason}")]
    RecoveryFailed { action: String, reason: String },

    #[error("Diagnostic check '{check}' timed out after {timeout:?}")]
    DiagnosticTimeout { check: String, timeout: Duration },

    #[error("Healing action '{action}' failed: {reason}")]
    HealingActionFailed { action: String, reason: String },

    #[error("Degradation rule '{rule}' evaluation failed: {reason}")]
    DegradationEvaluation { rule: String, reason: String },

    #[error("Unknown feature flag: {0}")]
    UnknownFeature(String),
}

pub type ResilienceResult<T> = anyhow::Result<T, ResilienceError>;

impl From<config::ConfigError> for ResilienceError {
    fn from(error: config::ConfigError) -> Self {
        ResilienceError::Configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = ResilienceError::RecoveryTimeout {
            action: "database_reconnect".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("database_reconnect"));

        let err = ResilienceError::DegradationEvaluation {
            rule: "cache_unavailable".to_string(),
            reason: "flag missing".to_string(),
        };
        assert!(err.to_string().contains("cache_unavailable"));
    }

    #[test]
    fn test_config_error_conversion() {
        let source = config::ConfigError::Message("bad value".to_string());
        let err: ResilienceError = source.into();
        assert!(matches!(err, ResilienceError::Configuration(_)));
    }
}
