//! Configuration for the resilience core.
//!
//! Runtime structures carry [`Duration`] fields; the TOML/environment-facing
//! structures carry plain `*_seconds` / `*_ms` integers and convert. Loading
//! layers an optional `config/resilience.toml` under `STOCKYARD_RESILIENCE`
//! environment overrides.

use crate::errors::{ResilienceError, ResilienceResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a single circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time to wait in open state before admitting a trial call.
    pub reset_timeout: Duration,

    /// Number of trial calls admitted in half-open state; a fully successful
    /// batch closes the circuit.
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// Configuration tuned for database operations.
    pub fn for_database() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
        }
    }

    /// Configuration tuned for cache operations.
    pub fn for_cache() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(15),
            half_open_max_calls: 2,
        }
    }

    /// Configuration tuned for external API calls.
    pub fn for_external_api() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(45),
            half_open_max_calls: 3,
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::Configuration(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.failure_threshold > 100 {
            return Err(ResilienceError::Configuration(
                "failure_threshold should not exceed 100".to_string(),
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(ResilienceError::Configuration(
                "reset_timeout must be greater than 0".to_string(),
            ));
        }
        if self.reset_timeout > Duration::from_secs(300) {
            return Err(ResilienceError::Configuration(
                "reset_timeout should not exceed 300 seconds".to_string(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(ResilienceError::Configuration(
                "half_open_max_calls must be greater than 0".to_string(),
            ));
        }
        if self.half_open_max_calls > 50 {
            return Err(ResilienceError::Configuration(
                "half_open_max_calls should not exceed 50".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// TOML-facing circuit breaker configuration for one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    pub reset_timeout_seconds: u64,
    pub half_open_max_calls: u32,
}

impl CircuitBreakerComponentConfig {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_seconds),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_seconds: 30,
            half_open_max_calls: 3,
        }
    }
}

/// Breaker settings for the whole process: a default plus per-component
/// overrides keyed by service name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default)]
    pub default_config: CircuitBreakerComponentConfig,

    #[serde(default)]
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl CircuitBreakerSettings {
    /// Configuration for a named component, falling back to the default.
    pub fn config_for_component(&self, component: &str) -> &CircuitBreakerComponentConfig {
        self.component_configs
            .get(component)
            .unwrap_or(&self.default_config)
    }
}

/// Retry policy with exponential backoff and optional jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Cap applied to the computed delay.
    pub max_delay: Duration,

    /// Multiplier applied per attempt.
    pub exponential_base: f64,

    /// Perturb each delay by up to ±25% to avoid synchronized retry storms.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay before retrying after the given 0-indexed attempt:
    /// `min(base_delay * exponential_base^attempt, max_delay)`, optionally
    /// jittered by ±25% and clamped at zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let raw = self.base_delay.as_secs_f64() * multiplier;
        let capped = raw.min(self.max_delay.as_secs_f64());

        if self.jitter {
            use rand::Rng;
            let jitter_range = capped * 0.25;
            if jitter_range > 0.0 {
                let mut rng = rand::thread_rng();
                let offset = rng.gen_range(-jitter_range..=jitter_range);
                return Duration::from_secs_f64((capped + offset).max(0.0));
            }
        }

        Duration::from_secs_f64(capped)
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        if self.base_delay.is_zero() {
            return Err(ResilienceError::Configuration(
                "base_delay must be greater than 0".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ResilienceError::Configuration(
                "max_delay must not be smaller than base_delay".to_string(),
            ));
        }
        if self.exponential_base < 1.0 {
            return Err(ResilienceError::Configuration(
                "exponential_base must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// TOML-facing retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl RetryPolicyConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential_base: self.exponential_base,
            jitter: self.jitter,
        }
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Thresholds applied to component health observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthThresholds {
    pub memory_warning_pct: f64,
    pub memory_critical_pct: f64,
    pub cpu_warning_pct: f64,
    pub cpu_critical_pct: f64,
    pub disk_warning_pct: f64,
    pub disk_critical_pct: f64,
    /// Database probe slower than this is a warning.
    pub database_slow_ms: u64,
    /// Database/cache probes are abandoned after this long.
    pub probe_timeout_ms: u64,
}

impl Default for SystemHealthThresholds {
    fn default() -> Self {
        Self {
            memory_warning_pct: 85.0,
            memory_critical_pct: 95.0,
            cpu_warning_pct: 75.0,
            cpu_critical_pct: 90.0,
            disk_warning_pct: 80.0,
            disk_critical_pct: 90.0,
            database_slow_ms: 1000,
            probe_timeout_ms: 2000,
        }
    }
}

/// Settings for the self-healing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingSettings {
    /// Bound on the healing-attempt history ring.
    pub max_history_size: usize,

    /// Sliding window after which an error-pattern counter resets.
    pub pattern_window: Duration,

    /// Bound on the number of distinct tracked patterns.
    pub max_tracked_patterns: usize,

    /// Default timeout for a diagnostic check.
    pub check_timeout: Duration,

    /// Default timeout for a healing action attempt.
    pub action_timeout: Duration,

    /// Base wait between healing action retries (multiplied by the attempt
    /// number).
    pub retry_base_delay: Duration,

    #[serde(default)]
    pub thresholds: SystemHealthThresholds,
}

impl HealingSettings {
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.max_history_size == 0 {
            return Err(ResilienceError::Configuration(
                "max_history_size must be greater than 0".to_string(),
            ));
        }
        if self.max_tracked_patterns == 0 {
            return Err(ResilienceError::Configuration(
                "max_tracked_patterns must be greater than 0".to_string(),
            ));
        }
        if self.pattern_window.is_zero() {
            return Err(ResilienceError::Configuration(
                "pattern_window must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for HealingSettings {
    fn default() -> Self {
        Self {
            max_history_size: 100,
            pattern_window: Duration::from_secs(300),
            max_tracked_patterns: 500,
            check_timeout: Duration::from_secs(5),
            action_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
            thresholds: SystemHealthThresholds::default(),
        }
    }
}

/// TOML-facing healing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingSettingsConfig {
    pub max_history_size: usize,
    pub pattern_window_seconds: u64,
    pub max_tracked_patterns: usize,
    pub check_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub thresholds: SystemHealthThresholds,
}

impl HealingSettingsConfig {
    pub fn to_settings(&self) -> HealingSettings {
        HealingSettings {
            max_history_size: self.max_history_size,
            pattern_window: Duration::from_secs(self.pattern_window_seconds),
            max_tracked_patterns: self.max_tracked_patterns,
            check_timeout: Duration::from_millis(self.check_timeout_ms),
            action_timeout: Duration::from_millis(self.action_timeout_ms),
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            thresholds: self.thresholds.clone(),
        }
    }
}

impl Default for HealingSettingsConfig {
    fn default() -> Self {
        Self {
            max_history_size: 100,
            pattern_window_seconds: 300,
            max_tracked_patterns: 500,
            check_timeout_ms: 5000,
            action_timeout_ms: 30_000,
            retry_base_delay_ms: 1000,
            thresholds: SystemHealthThresholds::default(),
        }
    }
}

/// Complete runtime configuration for the resilience core.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub circuit_breakers: CircuitBreakerSettings,
    pub retry: RetryPolicy,
    pub healing: HealingSettings,
}

impl ResilienceConfig {
    /// Load from `config/resilience.toml` (optional) layered under
    /// `STOCKYARD_RESILIENCE__*` environment overrides.
    pub fn load() -> ResilienceResult<Self> {
        Self::load_from("config/resilience")
    }

    /// Load from a named config file base path (extension resolved by the
    /// config crate), plus environment overrides.
    pub fn load_from(path: &str) -> ResilienceResult<Self> {
        let raw: ResilienceTomlConfig = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("STOCKYARD_RESILIENCE").separator("__"),
            )
            .build()?
            .try_deserialize()?;

        let resolved = raw.into_runtime();
        resolved.validate()?;
        Ok(resolved)
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        self.circuit_breakers
            .default_config
            .to_breaker_config()
            .validate()?;
        for component in self.circuit_breakers.component_configs.values() {
            component.to_breaker_config().validate()?;
        }
        self.retry.validate()?;
        self.healing.validate()?;
        Ok(())
    }
}

/// TOML-facing aggregate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceTomlConfig {
    #[serde(default)]
    pub circuit_breakers: CircuitBreakerSettings,
    #[serde(default)]
    pub retry: RetryPolicyConfig,
    #[serde(default)]
    pub healing: HealingSettingsConfig,
}

impl ResilienceTomlConfig {
    pub fn into_runtime(self) -> ResilienceConfig {
        ResilienceConfig {
            circuit_breakers: self.circuit_breakers,
            retry: self.retry.to_policy(),
            healing: self.healing.to_settings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        let valid = CircuitBreakerConfig::default();
        assert!(valid.validate().is_ok());

        let invalid = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = CircuitBreakerConfig {
            reset_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = CircuitBreakerConfig {
            half_open_max_calls: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_preset_configurations() {
        let db = CircuitBreakerConfig::for_database();
        assert_eq!(db.failure_threshold, 5);
        assert!(db.validate().is_ok());

        let cache = CircuitBreakerConfig::for_cache();
        assert_eq!(cache.failure_threshold, 3);
        assert!(cache.validate().is_ok());

        let api = CircuitBreakerConfig::for_external_api();
        assert_eq!(api.reset_timeout, Duration::from_secs(45));
        assert!(api.validate().is_ok());
    }

    #[test]
    fn test_component_fallback_to_default() {
        let mut settings = CircuitBreakerSettings::default();
        settings.component_configs.insert(
            "cache".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                reset_timeout_seconds: 10,
                half_open_max_calls: 1,
            },
        );

        assert_eq!(settings.config_for_component("cache").failure_threshold, 2);
        assert_eq!(
            settings.config_for_component("unknown").failure_threshold,
            settings.default_config.failure_threshold
        );
    }

    #[test]
    fn test_retry_delay_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_delay_respects_cap() {
        let policy = RetryPolicy {
            max_retries: 20,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            exponential_base: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_jitter_stays_in_band() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        };

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0).as_secs_f64();
            assert!((0.3..=0.5).contains(&delay), "delay out of band: {delay}");
        }
    }

    #[test]
    fn test_toml_config_conversion() {
        let toml = ResilienceTomlConfig {
            retry: RetryPolicyConfig {
                max_retries: 2,
                base_delay_ms: 50,
                max_delay_ms: 10_000,
                exponential_base: 3.0,
                jitter: false,
            },
            ..Default::default()
        };

        let runtime = toml.into_runtime();
        assert_eq!(runtime.retry.max_retries, 2);
        assert_eq!(runtime.retry.base_delay, Duration::from_millis(50));
        assert!(runtime.validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ResilienceConfig::default().validate().is_ok());
    }
}
