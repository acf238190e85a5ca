// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection state of the client.

use std::fmt;

/// State of the transport connection.
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Degraded
///      ^              |             |            |
///      +--------------+-------------+------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection; a retry may be scheduled.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and hearing from the remote side.
    Connected,
    /// Connected, but heartbeats were missed.
    Degraded,
}

impl ConnectionState {
    /// Returns true while a connection is open, degraded or not.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    /// Returns the snake case name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_is_still_connected() {
        assert!(ConnectionState::Degraded.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Degraded.to_string(), "degraded");
    }
}
