use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::time::Duration;

const BASE_DELAY: Duration = Duration::from_secs(5);
const MAX_DELAY: Duration = Duration::from_secs(300);

/// Consecutive failure counts keyed by object name, used by error policies
/// to back off exponentially. A successful pass clears the entry.
#[derive(Clone, Default)]
pub struct FailureCache(Arc<Mutex<HashMap<String, u32>>>);

impl FailureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure and returns the delay before the next attempt.
    pub fn record_failure(&self, key: &str) -> Duration {
        let attempts = match self.0.lock() {
            Ok(mut w) => {
                let n = w.entry(key.to_string()).or_insert(0);
                *n = n.saturating_add(1);
                *n
            }
            Err(_) => 1,
        };
        backoff_delay(attempts)
    }

    pub fn clear(&self, key: &str) {
        if let Ok(mut w) = self.0.lock() {
            w.remove(key);
        }
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.0
            .lock()
            .map(|r| r.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// `5s * 2^(attempts-1)`, capped at five minutes.
pub fn backoff_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    BASE_DELAY.saturating_mul(1 << exp).min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_cap() {
        assert_eq!(backoff_delay(1), Duration::from_secs(5));
        assert_eq!(backoff_delay(2), Duration::from_secs(10));
        assert_eq!(backoff_delay(4), Duration::from_secs(40));
        assert_eq!(backoff_delay(10), MAX_DELAY);
        assert_eq!(backoff_delay(u32::MAX), MAX_DELAY);
    }

    #[test]
    fn success_resets_attempts() {
        let c = FailureCache::new();
        c.record_failure("ws1");
        assert_eq!(c.record_failure("ws1"), Duration::from_secs(10));
        assert_eq!(c.attempts("ws1"), 2);
        c.clear("ws1");
        assert_eq!(c.attempts("ws1"), 0);
        assert_eq!(c.record_failure("ws1"), Duration::from_secs(5));
    }
}
