//! [`LogThrottle`] – rate-limited logging for high-rate feeds.
//!
//! Feeds such as joint states arrive at hundreds of hertz.  Logging each
//! sample would drown everything else, so the monitor asks a throttle
//! whether a given log line may be emitted.  Each key (a feed or topic
//! name) is limited independently.

use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

/// Joint-state and camera-count logging period.
pub const SLOW_LOG_PERIOD: Duration = Duration::from_secs(10);

/// Proximity, break beam and laser logging period.
pub const FAST_LOG_PERIOD: Duration = Duration::from_secs(1);

pub struct LogThrottle {
    /// `None` when throttling is disabled.
    limiter: Option<DefaultKeyedRateLimiter<String>>,
}

impl LogThrottle {
    /// At most one log line per key every `period`.  A zero period never
    /// throttles.
    pub fn every(period: Duration) -> Self {
        Self {
            limiter: Quota::with_period(period).map(RateLimiter::keyed),
        }
    }

    /// `true` if a line for `key` may be logged now.
    pub fn allow(&self, key: &str) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check_key(&key.to_string()).is_ok(),
            None => true,
        }
    }
}

impl std::fmt::Debug for LogThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogThrottle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_line_within_period_is_suppressed() {
        let throttle = LogThrottle::every(Duration::from_secs(60));
        assert!(throttle.allow("/ariac/arm1/joint_states"));
        assert!(!throttle.allow("/ariac/arm1/joint_states"));
    }

    #[test]
    fn keys_are_independent() {
        let throttle = LogThrottle::every(Duration::from_secs(60));
        assert!(throttle.allow("arm1"));
        assert!(throttle.allow("arm2"));
        assert!(!throttle.allow("arm1"));
    }

    #[test]
    fn zero_period_never_throttles() {
        let throttle = LogThrottle::every(Duration::ZERO);
        assert!((0..10).all(|_| throttle.allow("laser")));
    }
}
