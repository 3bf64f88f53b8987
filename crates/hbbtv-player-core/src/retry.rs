//! Per-adapter retry bookkeeping
//!
//! Each adapter owns one [`RetryLedger`]. Entries are keyed by what failed
//! (a manifest URL, a fragment URL, a DASH segment) and count automatic
//! retries. The ledger dies with the adapter, so a fresh load starts clean.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::types::MediaType;

/// Retry budget and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Automatic retries per key before the failure is surfaced
    pub max_retries: u32,
    /// Backoff unit; retry `n` (0-based) waits `base_delay_ms * (n + 1)`
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt) + 1))
    }
}

/// What a ledger entry counts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RetryKey {
    /// DASH manifest
    Mpd(String),
    /// DASH media segment
    Segment { media_type: MediaType, index: u64 },
    /// HLS playlist
    Manifest(String),
    /// HLS fragment
    Fragment(String),
}

impl std::fmt::Display for RetryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryKey::Mpd(url) => write!(f, "mpd:{}", url),
            RetryKey::Segment { media_type, index } => {
                write!(f, "segment:{}:{}", media_type, index)
            }
            RetryKey::Manifest(url) => write!(f, "manifest:{}", url),
            RetryKey::Fragment(url) => write!(f, "frag:{}", url),
        }
    }
}

/// Outcome of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`; `retry_count` is 1 for the first retry
    Retry { retry_count: u32, delay: Duration },
    /// Budget exhausted after `retries` automatic retries
    GiveUp { retries: u32 },
}

/// Attempt counters for one adapter instance
#[derive(Debug, Default)]
pub struct RetryLedger {
    policy: RetryPolicy,
    attempts: HashMap<String, u32>,
}

impl RetryLedger {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: HashMap::new(),
        }
    }

    /// Count a failure for `key` and decide whether to retry
    pub fn record_failure(&mut self, key: &RetryKey) -> RetryDecision {
        let count = self.attempts.entry(key.to_string()).or_insert(0);
        if *count < self.policy.max_retries {
            let delay = self.policy.delay_for(*count);
            *count += 1;
            RetryDecision::Retry {
                retry_count: *count,
                delay,
            }
        } else {
            RetryDecision::GiveUp { retries: *count }
        }
    }

    /// Retries already spent on `key`
    pub fn attempts(&self, key: &RetryKey) -> u32 {
        self.attempts.get(&key.to_string()).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, key: &RetryKey) {
        self.attempts.remove(&key.to_string());
    }

    pub fn clear(&mut self) {
        self.attempts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(RetryKey::Mpd("a.mpd".into()).to_string(), "mpd:a.mpd");
        assert_eq!(
            RetryKey::Segment {
                media_type: MediaType::Video,
                index: 7
            }
            .to_string(),
            "segment:video:7"
        );
        assert_eq!(RetryKey::Manifest("a.m3u8".into()).to_string(), "manifest:a.m3u8");
        assert_eq!(RetryKey::Fragment("s1.ts".into()).to_string(), "frag:s1.ts");
    }

    #[test]
    fn test_three_retries_with_linear_backoff() {
        let mut ledger = RetryLedger::new(RetryPolicy::default());
        let key = RetryKey::Manifest("a.m3u8".into());

        let decisions: Vec<_> = (0..4).map(|_| ledger.record_failure(&key)).collect();
        assert_eq!(
            decisions,
            vec![
                RetryDecision::Retry {
                    retry_count: 1,
                    delay: Duration::from_millis(1000)
                },
                RetryDecision::Retry {
                    retry_count: 2,
                    delay: Duration::from_millis(2000)
                },
                RetryDecision::Retry {
                    retry_count: 3,
                    delay: Duration::from_millis(3000)
                },
                RetryDecision::GiveUp { retries: 3 },
            ]
        );
        assert_eq!(ledger.attempts(&key), 3);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut ledger = RetryLedger::new(RetryPolicy {
            max_retries: 1,
            base_delay_ms: 10,
        });
        let first = RetryKey::Fragment("s1.ts".into());
        let second = RetryKey::Fragment("s2.ts".into());

        assert!(matches!(ledger.record_failure(&first), RetryDecision::Retry { .. }));
        assert!(matches!(ledger.record_failure(&first), RetryDecision::GiveUp { .. }));
        assert!(matches!(ledger.record_failure(&second), RetryDecision::Retry { .. }));

        ledger.reset(&first);
        assert_eq!(ledger.attempts(&first), 0);
        ledger.clear();
        assert_eq!(ledger.attempts(&second), 0);
    }
}
