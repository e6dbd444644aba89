//! Retry policy parameters.
//!
//! The policy is a plain value threaded through the retry combinator in
//! `whist-flow`; attempt counters live in the combinator call, never here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default attempt ceiling for mandelbox creation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default delay between attempts in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 1000;
/// Default cap on a single delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// How the delay grows between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// `delay_ms * 2^(attempt - 1)`, capped at `max_delay_ms`.
    Exponential,
}

/// Bounded retry parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in ms (default: 1000).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
    /// Upper bound for a single delay in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Optional wall-clock ceiling across all attempts. Disabled by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_elapsed_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_DELAY_MS,
            backoff: Backoff::Fixed,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_elapsed_ms: None,
        }
    }
}

impl RetryPolicy {
    /// A fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
            ..Self::default()
        }
    }

    /// Delay to wait after the 1-based `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(31);
                self.delay_ms.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Wall-clock ceiling, if any.
    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_ms.map(Duration::from_millis)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_bounded_fixed() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.backoff, Backoff::Fixed);
        assert!(policy.max_elapsed().is_none());
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(5, 250);
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(4), Duration::from_millis(250));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            backoff: Backoff::Exponential,
            delay_ms: 100,
            max_delay_ms: 500,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn deserializes_partial_camel_case() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"maxAttempts": 3, "maxElapsedMs": 9000}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_ms, DEFAULT_DELAY_MS);
        assert_eq!(policy.max_elapsed(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn serializes_backoff_camel_case() {
        let json = serde_json::to_value(Backoff::Exponential).unwrap();
        assert_eq!(json, "exponential");
    }
}
