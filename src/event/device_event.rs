// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed events.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::command::CorrelationToken;
use crate::state::{DeviceDetails, DeviceStatus};
use crate::supervisor::ConnectionState;
use crate::types::{DeviceId, RunMode, Schedule, ScheduleId, StationId};

/// Change to the schedules of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleChange {
    /// A schedule was created or updated.
    Saved(Schedule),
    /// A schedule was deleted.
    Deleted(ScheduleId),
    /// The complete schedule list.
    Listed(Vec<Schedule>),
}

/// Event delivered to subscribers.
///
/// Wire events decode into the variants up to [`Event::Error`]; the
/// remaining variants report bridge and connection lifecycle, and
/// [`Event::Unrecognized`] carries traffic outside the vocabulary.
///
/// # Examples
///
/// ```
/// use bhyve_lib::event::{Event, EventKind};
/// use bhyve_lib::types::{DeviceId, RunMode};
///
/// let event = Event::ModeChanged {
///     device_id: DeviceId::new("d1"),
///     mode: RunMode::Off,
///     token: None,
/// };
///
/// assert_eq!(event.kind(), EventKind::ModeChanged);
/// assert_eq!(event.device_id().map(DeviceId::as_str), Some("d1"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Status fields of a device changed.
    DeviceStatus {
        /// The device.
        device_id: DeviceId,
        /// Reported fields.
        status: DeviceStatus,
    },

    /// Full details of a device.
    DeviceDetails {
        /// The device.
        device_id: DeviceId,
        /// Reported details.
        details: Box<DeviceDetails>,
    },

    /// Raw realtime message of a device.
    DeviceMessage {
        /// The device.
        device_id: DeviceId,
        /// Event name from the envelope.
        name: String,
        /// Complete envelope.
        payload: serde_json::Value,
    },

    /// A station started watering.
    WateringStarted {
        /// The device.
        device_id: DeviceId,
        /// Station that started.
        station: Option<StationId>,
        /// Run time of the station.
        run_time: Option<Duration>,
        /// When the station started.
        started_at: Option<DateTime<Utc>>,
        /// Correlation token echoed by the remote side.
        token: Option<CorrelationToken>,
    },

    /// Watering finished or the device went idle.
    WateringCompleted {
        /// The device.
        device_id: DeviceId,
        /// Station that finished.
        station: Option<StationId>,
        /// Correlation token echoed by the remote side.
        token: Option<CorrelationToken>,
    },

    /// The run mode changed.
    ModeChanged {
        /// The device.
        device_id: DeviceId,
        /// New mode.
        mode: RunMode,
        /// Correlation token echoed by the remote side.
        token: Option<CorrelationToken>,
    },

    /// The list of devices of the account.
    DevicesList {
        /// Device ids.
        device_ids: Vec<DeviceId>,
    },

    /// Schedules of a device changed.
    ScheduleChanged {
        /// The device.
        device_id: DeviceId,
        /// What changed.
        change: ScheduleChange,
        /// Correlation token echoed by the remote side.
        token: Option<CorrelationToken>,
    },

    /// A command was accepted.
    CommandAck {
        /// Correlation token of the command.
        token: Option<CorrelationToken>,
        /// The device, when named.
        device_id: Option<DeviceId>,
    },

    /// The remote side reported an error.
    Error {
        /// Correlation token of the failed command.
        token: Option<CorrelationToken>,
        /// The device, when named.
        device_id: Option<DeviceId>,
        /// Error description.
        message: String,
    },

    /// The MQTT bridge went online or offline.
    BridgeStatus {
        /// Whether the bridge is online.
        online: bool,
    },

    /// The client connection changed state.
    ConnectionChanged {
        /// New state.
        state: ConnectionState,
        /// Reason, for failures.
        error: Option<String>,
    },

    /// A post-connect resync finished.
    ResyncCompleted {
        /// Devices in the store afterwards.
        devices: usize,
        /// `false` when the resync timed out before every device reported.
        complete: bool,
    },

    /// A message whose address is outside the vocabulary.
    Unrecognized {
        /// Wire address.
        address: String,
        /// Raw payload.
        payload: String,
    },
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceStatus { .. } => EventKind::DeviceStatus,
            Self::DeviceDetails { .. } => EventKind::DeviceDetails,
            Self::DeviceMessage { .. } => EventKind::DeviceMessage,
            Self::WateringStarted { .. } => EventKind::WateringStarted,
            Self::WateringCompleted { .. } => EventKind::WateringCompleted,
            Self::ModeChanged { .. } => EventKind::ModeChanged,
            Self::DevicesList { .. } => EventKind::DevicesList,
            Self::ScheduleChanged { .. } => EventKind::ScheduleChanged,
            Self::CommandAck { .. } => EventKind::CommandAck,
            Self::Error { .. } => EventKind::Error,
            Self::BridgeStatus { .. } => EventKind::BridgeStatus,
            Self::ConnectionChanged { .. } => EventKind::ConnectionChanged,
            Self::ResyncCompleted { .. } => EventKind::ResyncCompleted,
            Self::Unrecognized { .. } => EventKind::Unrecognized,
        }
    }

    /// Returns the device this event is about, if any.
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::DeviceStatus { device_id, .. }
            | Self::DeviceDetails { device_id, .. }
            | Self::DeviceMessage { device_id, .. }
            | Self::WateringStarted { device_id, .. }
            | Self::WateringCompleted { device_id, .. }
            | Self::ModeChanged { device_id, .. }
            | Self::ScheduleChanged { device_id, .. } => Some(device_id),
            Self::CommandAck { device_id, .. } | Self::Error { device_id, .. } => {
                device_id.as_ref()
            }
            Self::DevicesList { .. }
            | Self::BridgeStatus { .. }
            | Self::ConnectionChanged { .. }
            | Self::ResyncCompleted { .. }
            | Self::Unrecognized { .. } => None,
        }
    }

    /// Returns the correlation token carried by this event, if any.
    #[must_use]
    pub fn token(&self) -> Option<&CorrelationToken> {
        match self {
            Self::WateringStarted { token, .. }
            | Self::WateringCompleted { token, .. }
            | Self::ModeChanged { token, .. }
            | Self::ScheduleChanged { token, .. }
            | Self::CommandAck { token, .. }
            | Self::Error { token, .. } => token.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` for acknowledgement and error events.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::CommandAck { .. } | Self::Error { .. })
    }
}

/// Closed set of event kinds used as subscription keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::DeviceStatus`].
    DeviceStatus,
    /// [`Event::DeviceDetails`].
    DeviceDetails,
    /// [`Event::DeviceMessage`].
    DeviceMessage,
    /// [`Event::WateringStarted`].
    WateringStarted,
    /// [`Event::WateringCompleted`].
    WateringCompleted,
    /// [`Event::ModeChanged`].
    ModeChanged,
    /// [`Event::DevicesList`].
    DevicesList,
    /// [`Event::ScheduleChanged`].
    ScheduleChanged,
    /// [`Event::CommandAck`].
    CommandAck,
    /// [`Event::Error`].
    Error,
    /// [`Event::BridgeStatus`].
    BridgeStatus,
    /// [`Event::ConnectionChanged`].
    ConnectionChanged,
    /// [`Event::ResyncCompleted`].
    ResyncCompleted,
    /// [`Event::Unrecognized`].
    Unrecognized,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [Self; 14] = [
        Self::DeviceStatus,
        Self::DeviceDetails,
        Self::DeviceMessage,
        Self::WateringStarted,
        Self::WateringCompleted,
        Self::ModeChanged,
        Self::DevicesList,
        Self::ScheduleChanged,
        Self::CommandAck,
        Self::Error,
        Self::BridgeStatus,
        Self::ConnectionChanged,
        Self::ResyncCompleted,
        Self::Unrecognized,
    ];

    /// Returns the snake case name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceStatus => "device_status",
            Self::DeviceDetails => "device_details",
            Self::DeviceMessage => "device_message",
            Self::WateringStarted => "watering_started",
            Self::WateringCompleted => "watering_completed",
            Self::ModeChanged => "mode_changed",
            Self::DevicesList => "devices_list",
            Self::ScheduleChanged => "schedule_changed",
            Self::CommandAck => "command_ack",
            Self::Error => "error",
            Self::BridgeStatus => "bridge_status",
            Self::ConnectionChanged => "connection_changed",
            Self::ResyncCompleted => "resync_completed",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
