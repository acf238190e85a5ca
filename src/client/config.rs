// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client configuration.

use std::time::Duration;

use crate::event::DEFAULT_CHANNEL_CAPACITY;
use crate::state::DEFAULT_RECENT_CAPACITY;
use crate::supervisor::ReconnectionPolicy;

/// Timeouts, liveness thresholds and queueing for a client.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bhyve_lib::ClientConfig;
/// use bhyve_lib::supervisor::ReconnectionPolicy;
///
/// let config = ClientConfig::default()
///     .with_heartbeat_interval(Duration::from_secs(5))
///     .with_ack_timeout(Duration::from_secs(3))
///     .with_reconnection(ReconnectionPolicy::new().with_max_retries(10))
///     .with_offline_queue(Duration::from_secs(60));
///
/// assert_eq!(config.degraded_after(), Duration::from_secs(10));
/// assert_eq!(config.lost_after(), Duration::from_secs(15));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Reconnection policy.
    pub reconnection: ReconnectionPolicy,
    /// Limit for a single connection attempt.
    pub connect_timeout: Duration,
    /// Interval between liveness checks.
    pub heartbeat_interval: Duration,
    /// Silent intervals before the connection is reported degraded.
    pub degraded_after_missed: u32,
    /// Silent intervals before the connection is treated as lost.
    pub lost_after_missed: u32,
    /// Limit for the post-connect resync.
    pub resync_timeout: Duration,
    /// How long commands wait for an acknowledgement.
    pub ack_timeout: Duration,
    /// How long a single send may take.
    pub send_timeout: Duration,
    /// How long one event callback may run.
    pub handler_timeout: Duration,
    /// Entries kept in the recent watering log.
    pub recent_capacity: usize,
    /// When set, commands issued while disconnected are held this long
    /// for a reconnection instead of failing.
    pub offline_queue: Option<Duration>,
    /// Buffer of the event stream.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnection: ReconnectionPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            degraded_after_missed: 2,
            lost_after_missed: 3,
            resync_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            handler_timeout: Duration::from_secs(5),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            offline_queue: None,
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Sets the connection attempt timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets how many silent intervals mark the connection degraded and lost.
    ///
    /// `lost` is raised to `degraded` when lower.
    #[must_use]
    pub fn with_missed_heartbeats(mut self, degraded: u32, lost: u32) -> Self {
        self.degraded_after_missed = degraded.max(1);
        self.lost_after_missed = lost.max(self.degraded_after_missed);
        self
    }

    /// Sets the resync timeout.
    #[must_use]
    pub fn with_resync_timeout(mut self, timeout: Duration) -> Self {
        self.resync_timeout = timeout;
        self
    }

    /// Sets the acknowledgement timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets the send timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the callback timeout.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Sets the size of the recent watering log.
    #[must_use]
    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity;
        self
    }

    /// Holds commands issued while disconnected for up to `window`.
    #[must_use]
    pub fn with_offline_queue(mut self, window: Duration) -> Self {
        self.offline_queue = Some(window);
        self
    }

    /// Sets the event stream buffer.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Silence after which the connection is reported degraded.
    #[must_use]
    pub fn degraded_after(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.degraded_after_missed)
    }

    /// Silence after which the connection is treated as lost.
    #[must_use]
    pub fn lost_after(&self) -> Duration {
        self.heartbeat_interval.saturating_mul(self.lost_after_missed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.degraded_after(), Duration::from_secs(20));
        assert_eq!(config.lost_after(), Duration::from_secs(30));
        assert_eq!(config.recent_capacity, 100);
        assert!(config.offline_queue.is_none());
        assert!(config.reconnection.enabled);
    }

    #[test]
    fn missed_heartbeats_are_ordered() {
        let config = ClientConfig::default().with_missed_heartbeats(4, 2);
        assert_eq!(config.degraded_after_missed, 4);
        assert_eq!(config.lost_after_missed, 4);

        let config = ClientConfig::default().with_missed_heartbeats(0, 0);
        assert_eq!(config.degraded_after_missed, 1);
        assert_eq!(config.lost_after_missed, 1);
    }
}
