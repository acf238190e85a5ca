// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `bhyve_lib` library.
//!
//! Errors are layered: [`ValueError`] covers caller-supplied values,
//! [`TransportError`] covers the wire, [`DecodeError`] covers malformed
//! inbound payloads (logged and dropped, never surfaced), and [`Error`] is
//! what every public operation returns.

use thiserror::Error;

use crate::command::CommandKind;
use crate::types::{DeviceId, ScheduleId, StationId};

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport is unreachable, dropped, or not connected.
    #[error("connection error: {0}")]
    Connection(TransportError),

    /// The credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A caller-supplied value is out of contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValueError),

    /// The device is not present in the device store.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// The station is not a known valve of the device.
    #[error("unknown station {station} on device {device_id}")]
    UnknownStation {
        /// The device that was targeted.
        device_id: DeviceId,
        /// The station that is not known.
        station: StationId,
    },

    /// The schedule is not known for the device.
    #[error("unknown schedule {schedule_id} on device {device_id}")]
    UnknownSchedule {
        /// The device that was targeted.
        device_id: DeviceId,
        /// The schedule that is not known.
        schedule_id: ScheduleId,
    },

    /// The device is currently marked disconnected.
    #[error("device {0} is offline")]
    DeviceOffline(DeviceId),

    /// The awaited acknowledgement did not arrive in time.
    #[error("no acknowledgement received within {0} ms")]
    Timeout(u64),

    /// The remote side answered the command with an error event.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// A different command of the same exclusive kind is already pending.
    #[error("a different {kind} command is already pending for device {device_id}")]
    Conflict {
        /// The device that was targeted.
        device_id: DeviceId,
        /// The exclusive command kind.
        kind: CommandKind,
    },
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AuthenticationFailed(reason) => Self::Authentication(reason),
            other => Self::Connection(other),
        }
    }
}

/// Errors related to caller-supplied values and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A watering or run duration is zero.
    #[error("duration must be positive")]
    NonPositiveDuration,

    /// A run time exceeds what the controller accepts.
    #[error("run time of {actual} minutes exceeds the maximum of {max} minutes")]
    RunTimeTooLong {
        /// Maximum run time in minutes.
        max: u32,
        /// Requested run time in minutes.
        actual: u64,
    },

    /// An unknown run mode string was provided.
    #[error("invalid run mode: {0}")]
    InvalidMode(String),

    /// Station numbers start at 1.
    #[error("invalid station number: {0}")]
    InvalidStation(u8),

    /// Device identifiers must not be empty.
    #[error("device id must not be empty")]
    EmptyDeviceId,

    /// Schedule names must not be empty.
    #[error("schedule name must not be empty")]
    EmptyScheduleName,

    /// A schedule needs at least one station run.
    #[error("schedule must include at least one station")]
    EmptyStations,

    /// A schedule needs at least one start time.
    #[error("schedule must include at least one start time")]
    EmptyStartTimes,

    /// A schedule update was requested for a schedule without an id.
    #[error("schedule id is required for this operation")]
    MissingScheduleId,

    /// The schedule frequency is not usable.
    #[error("invalid frequency: {0}")]
    InvalidFrequency(String),

    /// A start time could not be parsed.
    #[error("invalid start time: {0}")]
    InvalidStartTime(String),
}

/// Errors raised by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// WebSocket connection or frame handling failed.
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The connection could not be established or was dropped.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation needed an open connection.
    #[error("not connected")]
    NotConnected,

    /// Connection establishment timed out.
    #[error("connection timed out after {0} ms")]
    Timeout(u64),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Errors related to decoding inbound payloads.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the payload.
    #[error("missing field in payload: {0}")]
    MissingField(String),

    /// Unexpected payload format.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),

    /// Failed to parse a specific value.
    #[error("failed to parse {field}: {message}")]
    InvalidValue {
        /// The field that failed to parse.
        field: String,
        /// Description of the parsing failure.
        message: String,
    },
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
