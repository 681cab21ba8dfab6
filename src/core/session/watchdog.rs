//! Keepalive and stall detection.
//!
//! The watchdog itself holds no timers. The state machine asks it for a
//! verdict on every tick and for the delay until the next deadline, which is
//! always measured from the last inbound frame.

use std::time::Duration;
use tokio::time::Instant;

/// What a watchdog tick asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Recent inbound activity; nothing to do.
    Healthy,
    /// Quiet for a full interval; probe the peer.
    Ping,
    /// Quiet for two intervals; treat the connection as lost.
    Stalled { silent_for: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchdog {
    interval: Duration,
}

impl Watchdog {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stall_threshold(&self) -> Duration {
        self.interval.saturating_mul(2)
    }

    /// Judge liveness from the time of the last inbound frame.
    pub fn check(&self, now: Instant, last_activity: Instant) -> WatchdogVerdict {
        let silent_for = now.saturating_duration_since(last_activity);
        if silent_for >= self.stall_threshold() {
            WatchdogVerdict::Stalled { silent_for }
        } else if silent_for >= self.interval {
            WatchdogVerdict::Ping
        } else {
            WatchdogVerdict::Healthy
        }
    }

    /// Delay until the next deadline (ping, then stall) after `now`.
    ///
    /// Never later than `last_activity + interval` while the peer is within
    /// its first interval, and never later than `last_activity + 2*interval`
    /// afterwards.
    pub fn next_check(&self, now: Instant, last_activity: Instant) -> Duration {
        let silent_for = now.saturating_duration_since(last_activity);
        if silent_for < self.interval {
            self.interval - silent_for
        } else {
            self.stall_threshold()
                .saturating_sub(silent_for)
                .max(Duration::from_millis(1))
        }
    }
}
