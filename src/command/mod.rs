// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Controller commands and their wire encoding.
//!
//! Every outbound command carries a locally generated [`CorrelationToken`].
//! The token travels as `request_id` inside JSON envelopes and is echoed by
//! acknowledgement and error events, which is how replies are matched to
//! the pending command that caused them.
//!
//! # Available Commands
//!
//! | Command | Kind | Exclusive per device |
//! |---------|------|----------------------|
//! | [`Command::StartWatering`] | start watering | yes |
//! | [`Command::StopWatering`] | stop watering | yes |
//! | [`Command::SetMode`] | set mode | yes |
//! | [`Command::CreateSchedule`] .. [`Command::DisableSchedule`] | schedule CRUD | no |
//! | [`Command::RefreshDevices`], [`Command::RefreshSchedules`] | resync | no |
//!
//! # Examples
//!
//! ```
//! use bhyve_lib::command::{Command, CommandKind, CorrelationToken};
//! use bhyve_lib::types::{DeviceId, StationId};
//!
//! let command = Command::StartWatering {
//!     device_id: DeviceId::new("d1"),
//!     station: StationId::new(1).unwrap(),
//!     minutes: 5,
//! };
//!
//! assert_eq!(command.kind(), CommandKind::StartWatering);
//! assert!(command.kind().is_exclusive());
//!
//! let token = CorrelationToken::new();
//! assert_eq!(CorrelationToken::parse(&token.to_string()), Some(token));
//! ```

pub(crate) mod pending;

pub use pending::PendingCommand;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::protocol::{DeviceChannel, OutboundMessage, Route, SystemChannel, TopicRouter, Vocabulary};
use crate::types::{DeviceId, RunMode, Schedule, ScheduleId, StationId};

/// Opaque identifier attached to an outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    /// Generates a fresh random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a token echoed by the remote side.
    ///
    /// Returns `None` for values this client could not have generated.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Start watering a station.
    StartWatering,
    /// Stop all watering.
    StopWatering,
    /// Change the run mode.
    SetMode,
    /// Create a schedule.
    CreateSchedule,
    /// Update a schedule.
    UpdateSchedule,
    /// Delete a schedule.
    DeleteSchedule,
    /// Enable a schedule.
    EnableSchedule,
    /// Disable a schedule.
    DisableSchedule,
    /// Request the device list and details.
    RefreshDevices,
    /// Request the schedule list of a device.
    RefreshSchedules,
}

impl CommandKind {
    /// Returns `true` for kinds of which at most one may be pending per
    /// device.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(
            self,
            Self::StartWatering | Self::StopWatering | Self::SetMode
        )
    }

    /// Returns the snake case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartWatering => "start_watering",
            Self::StopWatering => "stop_watering",
            Self::SetMode => "set_mode",
            Self::CreateSchedule => "create_schedule",
            Self::UpdateSchedule => "update_schedule",
            Self::DeleteSchedule => "delete_schedule",
            Self::EnableSchedule => "enable_schedule",
            Self::DisableSchedule => "disable_schedule",
            Self::RefreshDevices => "refresh_devices",
            Self::RefreshSchedules => "refresh_schedules",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a command call waits and for what.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confirmation {
    /// Return once the transport accepted the message.
    #[default]
    Sent,
    /// Wait for the correlated event (watering started, mode changed).
    Event {
        /// How long to wait before failing with `Error::Timeout`.
        timeout: Duration,
    },
}

/// A validated controller command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Water one station.
    StartWatering {
        /// Target device.
        device_id: DeviceId,
        /// Station to water.
        station: StationId,
        /// Run time in whole minutes.
        minutes: u32,
    },
    /// Stop all watering.
    StopWatering {
        /// Target device.
        device_id: DeviceId,
        /// Station the device is watering, when known.
        station: Option<StationId>,
    },
    /// Change the run mode.
    SetMode {
        /// Target device.
        device_id: DeviceId,
        /// New mode.
        mode: RunMode,
    },
    /// Create a schedule.
    CreateSchedule {
        /// Target device.
        device_id: DeviceId,
        /// Schedule without id.
        schedule: Schedule,
    },
    /// Replace an existing schedule.
    UpdateSchedule {
        /// Target device.
        device_id: DeviceId,
        /// Schedule with id.
        schedule: Schedule,
    },
    /// Delete a schedule.
    DeleteSchedule {
        /// Target device.
        device_id: DeviceId,
        /// Schedule to delete.
        schedule_id: ScheduleId,
    },
    /// Enable a schedule.
    EnableSchedule {
        /// Target device.
        device_id: DeviceId,
        /// Schedule to enable.
        schedule_id: ScheduleId,
    },
    /// Disable a schedule.
    DisableSchedule {
        /// Target device.
        device_id: DeviceId,
        /// Schedule to disable.
        schedule_id: ScheduleId,
    },
    /// Request the device list and every device's details.
    RefreshDevices,
    /// Request the schedule list of a device.
    RefreshSchedules {
        /// Target device.
        device_id: DeviceId,
    },
}

impl Command {
    /// Returns the kind of this command.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::StartWatering { .. } => CommandKind::StartWatering,
            Self::StopWatering { .. } => CommandKind::StopWatering,
            Self::SetMode { .. } => CommandKind::SetMode,
            Self::CreateSchedule { .. } => CommandKind::CreateSchedule,
            Self::UpdateSchedule { .. } => CommandKind::UpdateSchedule,
            Self::DeleteSchedule { .. } => CommandKind::DeleteSchedule,
            Self::EnableSchedule { .. } => CommandKind::EnableSchedule,
            Self::DisableSchedule { .. } => CommandKind::DisableSchedule,
            Self::RefreshDevices => CommandKind::RefreshDevices,
            Self::RefreshSchedules { .. } => CommandKind::RefreshSchedules,
        }
    }

    /// Returns the target device, if the command has one.
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::StartWatering { device_id, .. }
            | Self::StopWatering { device_id, .. }
            | Self::SetMode { device_id, .. }
            | Self::CreateSchedule { device_id, .. }
            | Self::UpdateSchedule { device_id, .. }
            | Self::DeleteSchedule { device_id, .. }
            | Self::EnableSchedule { device_id, .. }
            | Self::DisableSchedule { device_id, .. }
            | Self::RefreshSchedules { device_id } => Some(device_id),
            Self::RefreshDevices => None,
        }
    }

    /// Encodes the command for the router's vocabulary.
    ///
    /// Returns `None` when the vocabulary has no address for the command.
    #[must_use]
    pub fn encode(
        &self,
        router: &TopicRouter,
        token: &CorrelationToken,
        now: DateTime<Utc>,
    ) -> Option<OutboundMessage> {
        let (route, payload) = match (router.vocabulary(), self) {
            (_, Self::RefreshDevices) => (Route::System(SystemChannel::RefreshRequest), String::new()),
            (
                Vocabulary::Mqtt { .. },
                Self::StartWatering {
                    device_id,
                    station,
                    minutes,
                },
            ) => (
                Route::device(device_id, DeviceChannel::ZoneControl(*station)),
                json!({ "state": "ON", "time": minutes }).to_string(),
            ),
            (Vocabulary::Mqtt { .. }, Self::StopWatering { device_id, station }) => (
                Route::device(
                    device_id,
                    DeviceChannel::ZoneControl(station.unwrap_or(StationId::FIRST)),
                ),
                json!({ "state": "OFF" }).to_string(),
            ),
            (_, command) => {
                let device_id = command.device_id()?;
                (
                    Route::device(device_id, DeviceChannel::Command),
                    command.envelope(device_id, token, now).to_string(),
                )
            }
        };
        let address = router.address(&route)?;
        Some(OutboundMessage::new(address, payload))
    }

    fn envelope(&self, device_id: &DeviceId, token: &CorrelationToken, now: DateTime<Utc>) -> Value {
        let timestamp = now.format("%Y-%m-%dT%H:%M:%S.000Z").to_string();
        let mut envelope = match self {
            Self::StartWatering { station, minutes, .. } => json!({
                "event": "change_mode",
                "mode": "manual",
                "timestamp": timestamp,
                "stations": [{ "station": station, "run_time": minutes }],
            }),
            Self::StopWatering { .. } => json!({
                "event": "change_mode",
                "mode": "manual",
                "timestamp": timestamp,
                "stations": [],
            }),
            Self::SetMode { mode, .. } => json!({
                "event": "change_mode",
                "mode": mode,
                "timestamp": timestamp,
                "program": null,
                "stations": [],
            }),
            Self::CreateSchedule { schedule, .. } | Self::UpdateSchedule { schedule, .. } => json!({
                "event": "program_save",
                "program": schedule,
            }),
            Self::DeleteSchedule { schedule_id, .. } => json!({
                "event": "program_delete",
                "program_id": schedule_id,
            }),
            Self::EnableSchedule { schedule_id, .. } => json!({
                "event": "program_enable",
                "program_id": schedule_id,
            }),
            Self::DisableSchedule { schedule_id, .. } => json!({
                "event": "program_disable",
                "program_id": schedule_id,
            }),
            Self::RefreshSchedules { .. } | Self::RefreshDevices => json!({
                "event": "program_list",
            }),
        };
        if let Value::Object(fields) = &mut envelope {
            fields.insert("device_id".to_string(), json!(device_id));
            fields.insert("request_id".to_string(), json!(token.to_string()));
        }
        envelope
    }
}
