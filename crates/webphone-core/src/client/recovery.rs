//! Registration retry policy
//!
//! The registration loop backs off linearly: after `k` attempts the next one
//! is scheduled `base_delay × k` later. Growth is uncapped per attempt and
//! bounded only by the attempt ceiling, favouring availability over backoff
//! aggressiveness.

use std::time::Duration;

/// Base delay of the linear backoff
pub const REGISTRATION_RETRY_BASE: Duration = Duration::from_millis(1500);

/// Configuration for the registration retry loop
///
/// # Examples
///
/// ```rust
/// use webphone_core::client::recovery::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default();
/// assert_eq!(config.max_tries, 200);
/// assert_eq!(config.delay_for(1), Duration::from_millis(1500));
/// assert_eq!(config.delay_for(4), Duration::from_millis(6000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of registration attempts per loop
    pub max_tries: u32,
    /// Delay unit multiplied by the number of attempts so far
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: crate::client::config::DEFAULT_MAX_REGISTRATION_TRIES,
            base_delay: REGISTRATION_RETRY_BASE,
        }
    }
}

impl RetryConfig {
    pub fn with_max_tries(max_tries: u32) -> Self {
        Self {
            max_tries,
            ..Default::default()
        }
    }

    /// Delay scheduled after `tries` attempts have been made
    pub fn delay_for(&self, tries: u32) -> Duration {
        self.base_delay.saturating_mul(tries)
    }

    /// Whether another attempt is allowed after `tries` attempts
    pub fn allows(&self, tries: u32) -> bool {
        tries < self.max_tries
    }
}

/// Result of one retry loop, delivered exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Whether the agent ended up registered
    pub registered: bool,
    /// Attempts made by the loop
    pub tries: u32,
}

impl RetryOutcome {
    /// Failure flag: the loop stopped without registering
    pub fn failed(&self) -> bool {
        !self.registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_in_tries() {
        let config = RetryConfig::default();
        for k in 1..=10u32 {
            assert_eq!(config.delay_for(k), Duration::from_millis(1500 * k as u64));
        }
        assert_eq!(config.delay_for(0), Duration::ZERO);
    }

    #[test]
    fn ceiling_bounds_attempts() {
        let config = RetryConfig::with_max_tries(3);
        assert!(config.allows(2));
        assert!(!config.allows(3));
        assert_eq!(config.base_delay, REGISTRATION_RETRY_BASE);
    }

    #[test]
    fn outcome_failure_flag() {
        assert!(RetryOutcome { registered: false, tries: 200 }.failed());
        assert!(!RetryOutcome { registered: true, tries: 2 }.failed());
    }
}
