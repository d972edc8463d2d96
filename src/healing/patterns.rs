//! Sliding-window error-pattern tracking.
//!
//! Each distinct classification key gets a counter with first/last-seen
//! timestamps. Counters reset once the tracker window has elapsed since the
//! first occurrence, and the table itself is bounded: when full, the entry
//! with the oldest last-seen timestamp is evicted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Occurrence counter for one error-pattern key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPatternRecord {
    pub key: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Bounded table of error-pattern counters.
pub struct ErrorPatternTracker {
    patterns: DashMap<String, ErrorPatternRecord>,
    window: Duration,
    max_patterns: usize,
}

impl ErrorPatternTracker {
    pub fn new(window: Duration, max_patterns: usize) -> Self {
        Self {
            patterns: DashMap::new(),
            window,
            max_patterns,
        }
    }

    /// Record one occurrence of `key` and return the updated counter.
    pub fn record(&self, key: &str) -> ErrorPatternRecord {
        let now = Utc::now();

        let snapshot = {
            let mut entry = self
                .patterns
                .entry(key.to_string())
                .or_insert_with(|| ErrorPatternRecord {
                    key: key.to_string(),
                    count: 0,
                    first_seen: now,
                    last_seen: now,
                });

            let age = (now - entry.first_seen).to_std().unwrap_or_default();
            if age > self.window {
                debug!(key = key, "Error pattern window elapsed, resetting counter");
                entry.count = 0;
                entry.first_seen = now;
            }

            entry.count += 1;
            entry.last_seen = now;
            entry.clone()
        };

        self.evict_excess(key);
        snapshot
    }

    /// Drop oldest-last-seen entries until the table fits its bound, never
    /// evicting the key that was just recorded.
    fn evict_excess(&self, just_recorded: &str) {
        while self.patterns.len() > self.max_patterns {
            let oldest = self
                .patterns
                .iter()
                .filter(|entry| entry.key() != just_recorded)
                .min_by_key(|entry| entry.last_seen)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    debug!(key = %key, "Evicting oldest error pattern");
                    self.patterns.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<ErrorPatternRecord> {
        self.patterns.get(key).map(|entry| entry.clone())
    }

    pub fn snapshot(&self) -> Vec<ErrorPatternRecord> {
        self.patterns.iter().map(|entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_within_window() {
        let tracker = ErrorPatternTracker::new(Duration::from_secs(60), 10);

        let first = tracker.record("database:timeout");
        assert_eq!(first.count, 1);

        let second = tracker.record("database:timeout");
        assert_eq!(second.count, 2);
        assert_eq!(second.first_seen, first.first_seen);

        assert_eq!(tracker.record("cache:refused").count, 1);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_window_elapse_resets_counter() {
        let tracker = ErrorPatternTracker::new(Duration::ZERO, 10);

        tracker.record("database:timeout");
        std::thread::sleep(std::time::Duration::from_millis(5));

        // Zero window: the previous first_seen is always stale.
        let record = tracker.record("database:timeout");
        assert_eq!(record.count, 1);
    }

    #[test]
    fn test_bounded_table_evicts_oldest() {
        let tracker = ErrorPatternTracker::new(Duration::from_secs(60), 2);

        tracker.record("first");
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.record("second");
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.record("third");

        assert_eq!(tracker.len(), 2);
        assert!(tracker.get("first").is_none());
        assert!(tracker.get("second").is_some());
        assert!(tracker.get("third").is_some());
    }
}
