use std::time::Duration;

use crate::config::SessionConfig;

/// Reconnection policy: exponential backoff with a cap and an attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of reconnection attempts before giving up.
    /// Set to 0 for unlimited attempts.
    pub max_attempts: u32,

    /// Delay before the first attempt (milliseconds).
    pub base_ms: u64,

    /// Maximum delay between attempts (milliseconds).
    pub cap_ms: u64,

    /// Whether to add jitter to the delay to prevent thundering herd.
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base_ms: config.backoff_base_ms,
            cap_ms: config.backoff_cap_ms,
            jitter: config.backoff_jitter,
        }
    }

    /// Delay before attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped. Jitter, when enabled, stays within the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay = self.base_ms.saturating_mul(factor).min(self.cap_ms);

        let delay = if self.jitter {
            // Up to 25% either way
            let range = delay as f64 * 0.25;
            let jittered = (delay as f64 + rand_jitter(range)).max(0.0) as u64;
            jittered.min(self.cap_ms)
        } else {
            delay
        };

        Duration::from_millis(delay)
    }

    /// Check if another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Generate a pseudo-random jitter value using a simple LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}
