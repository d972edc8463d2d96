//! Pattern matchers for healing rule triggers.
//!
//! Healing triggers are not coupled to a single text-matching primitive: a
//! rule carries a [`Matcher`] capability, and the engine only ever asks
//! whether a tracked pattern key matches.

use crate::errors::{ResilienceError, ResilienceResult};
use regex::Regex;

/// Decides whether an error-pattern key belongs to a healing rule.
pub trait Matcher: Send + Sync {
    fn matches(&self, input: &str) -> bool;

    /// Human-readable form for rule listings.
    fn describe(&self) -> String;
}

/// Regex-based matcher.
pub struct RegexMatcher {
    pattern: Regex,
}

impl RegexMatcher {
    pub fn new(pattern: &str) -> ResilienceResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            ResilienceError::Configuration(format!("invalid matcher pattern '{pattern}': {e}"))
        })?;
        Ok(Self { pattern })
    }
}

impl Matcher for RegexMatcher {
    fn matches(&self, input: &str) -> bool {
        self.pattern.is_match(input)
    }

    fn describe(&self) -> String {
        format!("regex:{}", self.pattern.as_str())
    }
}

/// Case-sensitive substring matcher.
pub struct SubstringMatcher {
    needle: String,
}

impl SubstringMatcher {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
        }
    }
}

impl Matcher for SubstringMatcher {
    fn matches(&self, input: &str) -> bool {
        input.contains(&self.needle)
    }

    fn describe(&self) -> String {
        format!("substring:{}", self.needle)
    }
}

/// Structured error-code matcher.
///
/// Matches when the key equals the code, or when any `:`-separated segment
/// of the key equals it (keys are commonly `component:code` pairs, e.g.
/// `database:ECONNREFUSED`).
pub struct ErrorCodeMatcher {
    code: String,
}

impl ErrorCodeMatcher {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl Matcher for ErrorCodeMatcher {
    fn matches(&self, input: &str) -> bool {
        input == self.code || input.split(':').any(|segment| segment == self.code)
    }

    fn describe(&self) -> String {
        format!("error_code:{}", self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_matcher() {
        let matcher = RegexMatcher::new(r"^database:(timeout|refused)$").unwrap();
        assert!(matcher.matches("database:timeout"));
        assert!(matcher.matches("database:refused"));
        assert!(!matcher.matches("cache:timeout"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        assert!(RegexMatcher::new("(unclosed").is_err());
    }

    #[test]
    fn test_substring_matcher() {
        let matcher = SubstringMatcher::new("timeout");
        assert!(matcher.matches("database:connection_timeout"));
        assert!(!matcher.matches("database:refused"));
    }

    #[test]
    fn test_error_code_matcher() {
        let matcher = ErrorCodeMatcher::new("ECONNREFUSED");
        assert!(matcher.matches("ECONNREFUSED"));
        assert!(matcher.matches("database:ECONNREFUSED"));
        assert!(!matcher.matches("database:ETIMEDOUT"));
        assert!(!matcher.matches("ECONNREFUSED_EXTRA"));
    }
}
