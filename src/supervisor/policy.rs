// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnection backoff policy.

use std::time::Duration;

use rand::Rng;

/// Configuration for automatic reconnection.
///
/// The delay before retry `attempt` (0-based) is
/// `min(max_delay, initial_delay * multiplier^attempt)` plus a jitter drawn
/// uniformly from `[0, delay)`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bhyve_lib::supervisor::ReconnectionPolicy;
///
/// // Default policy (enabled, unlimited retries, 1 s doubling up to 30 s)
/// let policy = ReconnectionPolicy::default();
/// assert_eq!(policy.base_delay(5), Duration::from_secs(30));
///
/// // Disable reconnection
/// let policy = ReconnectionPolicy::disabled();
/// assert!(!policy.should_retry(0));
///
/// // Custom policy
/// let policy = ReconnectionPolicy::new()
///     .with_max_retries(5)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Whether automatic reconnection is enabled.
    pub enabled: bool,
    /// Maximum number of retries before giving up (None = infinite).
    pub max_retries: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap of the backoff delay, before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl ReconnectionPolicy {
    /// Creates a new reconnection policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled reconnection policy.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets infinite retries.
    #[must_use]
    pub fn with_infinite_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the cap of the backoff delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay for a retry attempt, without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let multiplier = self
            .backoff_multiplier
            .max(1.0)
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let cap = self.max_delay.as_secs_f64();
        let delay = (self.initial_delay.as_secs_f64() * multiplier).min(cap);
        Duration::try_from_secs_f64(delay).unwrap_or(self.max_delay)
    }

    /// Calculates the delay for a retry attempt, jitter included.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Like [`delay`](Self::delay) with a caller-provided random source.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        if base_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rng.gen_range(0..base_ms))
    }

    /// Returns true if another retry should be attempted.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn reconnection_policy_default() {
        let policy = ReconnectionPolicy::default();

        assert!(policy.enabled);
        assert_eq!(policy.max_retries, None);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert!(policy.should_retry(1_000));
    }

    #[test]
    fn reconnection_policy_disabled() {
        let policy = ReconnectionPolicy::disabled();
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn max_retries_bounds_attempts() {
        let policy = ReconnectionPolicy::new().with_max_retries(2);
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn base_delay_doubles_until_cap() {
        let policy = ReconnectionPolicy::default();
        let delays: Vec<u64> = (0..8).map(|n| policy.base_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn jittered_delays_stay_within_bounds() {
        let policy = ReconnectionPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..40 {
            let base = policy.base_delay(attempt);
            let delay = policy.delay_with(attempt, &mut rng);
            assert!(delay >= base);
            assert!(delay < base * 2);
            assert!(base <= policy.max_delay);
        }
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = ReconnectionPolicy::default();
        assert_eq!(policy.base_delay(u32::MAX), policy.max_delay);
    }
}
