// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of raw payloads into [`Event`]s.
//!
//! One raw message may decode into several events (a cloud device snapshot
//! carries the device list and every device's details) or into none (echoes
//! of our own requests, bridge heartbeats).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{Event, ScheduleChange};
use crate::command::CorrelationToken;
use crate::error::DecodeError;
use crate::protocol::{DeviceChannel, Route, SystemChannel};
use crate::state::{DeviceDetails, DeviceStatus, Valve, WateringReport, WateringStatus};
use crate::types::{DeviceId, RunMode, Schedule, ScheduleId, StationId};

/// Decodes a routed payload.
///
/// # Errors
///
/// Returns `DecodeError` when the payload does not match what its route
/// carries.
pub fn decode(route: &Route, address: &str, payload: &str) -> Result<Vec<Event>, DecodeError> {
    match route {
        Route::Unrecognized => Ok(vec![Event::Unrecognized {
            address: address.to_string(),
            payload: payload.to_string(),
        }]),
        Route::System(channel) => decode_system(*channel, payload),
        Route::Device { device_id, channel } => decode_device(device_id, *channel, payload),
    }
}

fn decode_system(channel: SystemChannel, payload: &str) -> Result<Vec<Event>, DecodeError> {
    match channel {
        SystemChannel::Online => match payload.trim() {
            "true" => Ok(vec![Event::BridgeStatus { online: true }]),
            "false" => Ok(vec![Event::BridgeStatus { online: false }]),
            other => Err(DecodeError::InvalidValue {
                field: "online".to_string(),
                message: format!("expected true or false, got {other:?}"),
            }),
        },
        SystemChannel::DevicesList => {
            let ids: Vec<String> = serde_json::from_str(payload)?;
            Ok(vec![Event::DevicesList {
                device_ids: ids.into_iter().map(DeviceId::from).collect(),
            }])
        }
        SystemChannel::Snapshots => decode_snapshots(payload),
        SystemChannel::Events => decode_envelope(None, payload),
        SystemChannel::Alive | SystemChannel::RefreshRequest => Ok(Vec::new()),
    }
}

fn decode_device(
    device_id: &DeviceId,
    channel: DeviceChannel,
    payload: &str,
) -> Result<Vec<Event>, DecodeError> {
    match channel {
        DeviceChannel::Status => Ok(vec![Event::DeviceStatus {
            device_id: device_id.clone(),
            status: decode_status(payload)?,
        }]),
        DeviceChannel::Details => {
            let wire: WireDevice = serde_json::from_str(payload)?;
            Ok(vec![Event::DeviceDetails {
                device_id: device_id.clone(),
                details: Box::new(wire.into_details()?),
            }])
        }
        DeviceChannel::Message => decode_envelope(Some(device_id), payload),
        DeviceChannel::Zone(_)
        | DeviceChannel::ZoneControl(_)
        | DeviceChannel::Command
        | DeviceChannel::Refresh => Ok(Vec::new()),
    }
}

// ============================================================================
// Status and details
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireWatering {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    current_station: Option<Value>,
    #[serde(default)]
    time_remaining: Option<f64>,
    #[serde(default)]
    total_run_time_sec: Option<f64>,
    #[serde(default)]
    run_time: Option<f64>,
    #[serde(default)]
    started_watering_station_at: Option<String>,
    #[serde(default)]
    run_mode: Option<String>,
}

impl WireWatering {
    fn report(&self) -> WateringReport {
        let active = match self.status.as_deref() {
            Some(status) => status == "watering_in_progress",
            None => self.current_station.is_some(),
        };
        if !active {
            return WateringReport::Idle;
        }
        let remaining = self
            .time_remaining
            .or(self.total_run_time_sec)
            .and_then(seconds)
            .or_else(|| self.run_time.and_then(minutes));
        WateringReport::Active(WateringStatus {
            station: self.current_station.as_ref().and_then(station),
            remaining,
            started_at: self.started_watering_station_at.as_deref().and_then(timestamp),
        })
    }
}

fn decode_status(payload: &str) -> Result<DeviceStatus, DecodeError> {
    if payload.trim().is_empty() {
        return Ok(DeviceStatus {
            watering: WateringReport::Idle,
            ..DeviceStatus::default()
        });
    }
    let wire: WireWatering = serde_json::from_str(payload)?;
    Ok(DeviceStatus {
        is_connected: None,
        mode: wire.run_mode.as_deref().map(run_mode).transpose()?,
        watering: wire.report(),
    })
}

#[derive(Debug, Deserialize)]
struct WireBattery {
    #[serde(default)]
    percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireDeviceStatus {
    #[serde(default)]
    run_mode: Option<String>,
    #[serde(default)]
    watering_status: Option<WireWatering>,
}

#[derive(Debug, Deserialize)]
struct WireZone {
    station: Value,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDevice {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    device_type: Option<String>,
    #[serde(default)]
    is_connected: bool,
    #[serde(default)]
    battery: Option<WireBattery>,
    #[serde(default)]
    battery_level: Option<f64>,
    #[serde(default)]
    signal_strength: Option<f64>,
    #[serde(default)]
    status: Option<WireDeviceStatus>,
    #[serde(default)]
    zones: Vec<WireZone>,
    #[serde(default)]
    num_stations: Option<u8>,
    #[serde(default)]
    firmware_version: Option<String>,
    #[serde(default)]
    hardware_version: Option<String>,
    #[serde(default)]
    status_updated_at: Option<String>,
    #[serde(default)]
    last_connected_at: Option<String>,
}

impl WireDevice {
    fn into_details(self) -> Result<DeviceDetails, DecodeError> {
        let mut valves = self
            .zones
            .iter()
            .map(|zone| {
                let station = station(&zone.station).ok_or_else(|| DecodeError::InvalidValue {
                    field: "zones.station".to_string(),
                    message: zone.station.to_string(),
                })?;
                let name = zone
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("Station {station}"));
                Ok(Valve::new(station, name))
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;
        if valves.is_empty() {
            valves = (1..=self.num_stations.unwrap_or(0))
                .filter_map(|n| StationId::new(n).ok())
                .map(|s| Valve::new(s, format!("Station {s}")))
                .collect();
        }
        valves.sort_by_key(|v| v.station);

        let (mode, watering) = match &self.status {
            Some(status) => (
                status.run_mode.as_deref().map(run_mode).transpose()?,
                match status.watering_status.as_ref().map(WireWatering::report) {
                    Some(WateringReport::Active(w)) => Some(w),
                    _ => None,
                },
            ),
            None => (None, None),
        };

        let battery = self
            .battery
            .and_then(|b| b.percent)
            .or(self.battery_level)
            .map(percent);

        Ok(DeviceDetails {
            name: self.name.unwrap_or_default(),
            device_type: self.device_type.unwrap_or_default(),
            is_connected: self.is_connected,
            battery_level: battery,
            #[allow(clippy::cast_possible_truncation)]
            signal_strength: self.signal_strength.map(|s| s.round() as i32),
            last_seen: self
                .status_updated_at
                .as_deref()
                .or(self.last_connected_at.as_deref())
                .and_then(timestamp),
            mode,
            watering,
            valves,
            firmware_version: self.firmware_version,
            hardware_version: self.hardware_version,
        })
    }
}

fn decode_snapshots(payload: &str) -> Result<Vec<Event>, DecodeError> {
    let devices: Vec<WireDevice> = serde_json::from_str(payload)?;
    let mut ids = Vec::with_capacity(devices.len());
    let mut details = Vec::with_capacity(devices.len());
    for device in devices {
        let Some(id) = device.id.clone().filter(|id| !id.is_empty()) else {
            return Err(DecodeError::MissingField("id".to_string()));
        };
        let device_id = DeviceId::new(id);
        ids.push(device_id.clone());
        details.push(Event::DeviceDetails {
            device_id,
            details: Box::new(device.into_details()?),
        });
    }

    let mut events = Vec::with_capacity(ids.len() + 1);
    events.push(Event::DevicesList { device_ids: ids });
    events.extend(details);
    Ok(events)
}

// ============================================================================
// Realtime envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    current_station: Option<Value>,
    #[serde(default)]
    station: Option<Value>,
    #[serde(default)]
    run_time: Option<f64>,
    #[serde(default)]
    total_run_time_sec: Option<f64>,
    #[serde(default)]
    started_watering_station_at: Option<String>,
    #[serde(default)]
    program: Option<Schedule>,
    #[serde(default)]
    programs: Option<Vec<Schedule>>,
    #[serde(default)]
    program_id: Option<String>,
    #[serde(default)]
    lifecycle_phase: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn decode_envelope(device: Option<&DeviceId>, payload: &str) -> Result<Vec<Event>, DecodeError> {
    let raw: Value = serde_json::from_str(payload)?;
    if !raw.is_object() {
        return Err(DecodeError::UnexpectedFormat(
            "realtime message is not a JSON object".to_string(),
        ));
    }
    let envelope: Envelope = serde_json::from_value(raw.clone())?;

    let device_id = device
        .cloned()
        .or_else(|| envelope.device_id.clone().filter(|id| !id.is_empty()).map(DeviceId::new));
    let token = envelope.request_id.as_deref().and_then(CorrelationToken::parse);

    let mut events = Vec::with_capacity(2);
    if let Some(device_id) = &device_id {
        events.push(Event::DeviceMessage {
            device_id: device_id.clone(),
            name: envelope.event.clone(),
            payload: raw,
        });
    }

    match envelope.event.as_str() {
        "command_ack" | "ack" => {
            events.push(Event::CommandAck { token, device_id });
            return Ok(events);
        }
        "error" => {
            let message = envelope.message.unwrap_or_else(|| "unspecified error".to_string());
            events.push(Event::Error {
                token,
                device_id,
                message,
            });
            return Ok(events);
        }
        _ => {}
    }

    let Some(device_id) = device_id else {
        tracing::debug!(event = %envelope.event, "Ignoring realtime event without device");
        return Ok(events);
    };

    let typed = match envelope.event.as_str() {
        "watering_in_progress_notification" => Some(Event::WateringStarted {
            device_id,
            station: envelope
                .current_station
                .as_ref()
                .or(envelope.station.as_ref())
                .and_then(station),
            run_time: envelope
                .total_run_time_sec
                .and_then(seconds)
                .or_else(|| envelope.run_time.and_then(minutes)),
            started_at: envelope
                .started_watering_station_at
                .as_deref()
                .and_then(timestamp),
            token,
        }),
        "watering_complete" | "device_idle" => Some(Event::WateringCompleted {
            device_id,
            station: envelope
                .current_station
                .as_ref()
                .or(envelope.station.as_ref())
                .and_then(station),
            token,
        }),
        "change_mode" => {
            let mode = envelope
                .mode
                .as_deref()
                .ok_or_else(|| DecodeError::MissingField("mode".to_string()))
                .and_then(run_mode)?;
            Some(Event::ModeChanged {
                device_id,
                mode,
                token,
            })
        }
        "device_connected" | "device_disconnected" => Some(Event::DeviceStatus {
            device_id,
            status: DeviceStatus {
                is_connected: Some(envelope.event == "device_connected"),
                ..DeviceStatus::default()
            },
        }),
        "program_changed" => {
            let change = if envelope.lifecycle_phase.as_deref() == Some("destroy") {
                let id = envelope
                    .program_id
                    .map(ScheduleId::new)
                    .or_else(|| envelope.program.as_ref().and_then(|p| p.id().cloned()))
                    .ok_or_else(|| DecodeError::MissingField("program_id".to_string()))?;
                ScheduleChange::Deleted(id)
            } else {
                let program = envelope
                    .program
                    .ok_or_else(|| DecodeError::MissingField("program".to_string()))?;
                ScheduleChange::Saved(program)
            };
            Some(Event::ScheduleChanged {
                device_id,
                change,
                token,
            })
        }
        "program_list" => Some(Event::ScheduleChanged {
            device_id,
            change: ScheduleChange::Listed(envelope.programs.unwrap_or_default()),
            token,
        }),
        _ => None,
    };
    events.extend(typed);
    Ok(events)
}

// ============================================================================
// Field helpers
// ============================================================================

fn run_mode(value: &str) -> Result<RunMode, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidValue {
        field: "mode".to_string(),
        message: value.to_string(),
    })
}

fn station(value: &Value) -> Option<StationId> {
    let number = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    u8::try_from(number).ok().and_then(|n| StationId::new(n).ok())
}

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

fn minutes(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value * 60.0).ok()
}

fn timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(value: f64) -> u8 {
    value.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TopicRouter, Vocabulary};

    fn mqtt(address: &str, payload: &str) -> Result<Vec<Event>, DecodeError> {
        let router = TopicRouter::new(Vocabulary::mqtt());
        decode(&router.resolve(address, payload), address, payload)
    }

    fn cloud(address: &str, payload: &str) -> Result<Vec<Event>, DecodeError> {
        let router = TopicRouter::new(Vocabulary::Cloud);
        decode(&router.resolve(address, payload), address, payload)
    }

    fn station_id(n: u8) -> StationId {
        StationId::new(n).unwrap()
    }

    #[test]
    fn devices_list() {
        let events = mqtt("bhyve/devices", r#"["a","b"]"#).unwrap();
        assert_eq!(
            events,
            vec![Event::DevicesList {
                device_ids: vec![DeviceId::new("a"), DeviceId::new("b")]
            }]
        );
    }

    #[test]
    fn details_with_zones() {
        let payload = r#"{
            "id": "d1", "name": "Front yard", "type": "sprinkler_timer",
            "is_connected": true, "battery": {"percent": 87.4},
            "status": {"run_mode": "auto", "watering_status": null},
            "zones": [{"station": 2, "name": "Back"}, {"station": "1", "name": "Front"}],
            "firmware_version": "0040", "status_updated_at": "2026-04-02T08:00:00.000Z"
        }"#;
        let events = mqtt("bhyve/device/d1/details", payload).unwrap();
        let Event::DeviceDetails { device_id, details } = &events[0] else {
            panic!("expected details, got {events:?}");
        };
        assert_eq!(device_id.as_str(), "d1");
        assert_eq!(details.name, "Front yard");
        assert_eq!(details.battery_level, Some(87));
        assert_eq!(details.mode, Some(RunMode::Auto));
        assert!(details.watering.is_none());
        assert_eq!(
            details.valves,
            vec![
                Valve::new(station_id(1), "Front"),
                Valve::new(station_id(2), "Back")
            ]
        );
        assert!(details.last_seen.is_some());
    }

    #[test]
    fn details_synthesizes_valves_from_station_count() {
        let events = mqtt("bhyve/device/d1/details", r#"{"num_stations": 2}"#).unwrap();
        let Event::DeviceDetails { details, .. } = &events[0] else {
            panic!("expected details");
        };
        assert_eq!(details.valves.len(), 2);
        assert_eq!(details.valves[1].name, "Station 2");
    }

    #[test]
    fn empty_status_means_idle() {
        let events = mqtt("bhyve/device/d1/status", "").unwrap();
        assert_eq!(
            events,
            vec![Event::DeviceStatus {
                device_id: DeviceId::new("d1"),
                status: DeviceStatus {
                    watering: WateringReport::Idle,
                    ..DeviceStatus::default()
                }
            }]
        );
    }

    #[test]
    fn watering_status() {
        let payload = r#"{"status":"watering_in_progress","current_station":3,"time_remaining":120}"#;
        let events = mqtt("bhyve/device/d1/status", payload).unwrap();
        let Event::DeviceStatus { status, .. } = &events[0] else {
            panic!("expected status");
        };
        let WateringReport::Active(watering) = &status.watering else {
            panic!("expected active watering");
        };
        assert_eq!(watering.station, Some(station_id(3)));
        assert_eq!(watering.remaining, Some(Duration::from_secs(120)));
    }

    #[test]
    fn message_yields_raw_and_typed_events() {
        let token = CorrelationToken::new();
        let payload = format!(
            r#"{{"event":"watering_in_progress_notification","current_station":1,"total_run_time_sec":300,"request_id":"{token}"}}"#
        );
        let events = mqtt("bhyve/device/d1/message", &payload).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::DeviceMessage { name, .. } if name == "watering_in_progress_notification"));
        assert_eq!(
            events[1],
            Event::WateringStarted {
                device_id: DeviceId::new("d1"),
                station: Some(station_id(1)),
                run_time: Some(Duration::from_secs(300)),
                started_at: None,
                token: Some(token),
            }
        );
    }

    #[test]
    fn change_mode_requires_valid_mode() {
        let err = mqtt("bhyve/device/d1/message", r#"{"event":"change_mode","mode":"turbo"}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { .. }));
    }

    #[test]
    fn cloud_frame_without_device_still_carries_ack() {
        let token = CorrelationToken::new();
        let payload = format!(r#"{{"event":"command_ack","request_id":"{token}"}}"#);
        let events = cloud("events", &payload).unwrap();
        assert_eq!(
            events,
            vec![Event::CommandAck {
                token: Some(token),
                device_id: None
            }]
        );
    }

    #[test]
    fn cloud_connectivity_events() {
        let events = cloud("events", r#"{"event":"device_disconnected","device_id":"d2"}"#).unwrap();
        assert!(matches!(
            &events[1],
            Event::DeviceStatus { status, .. } if status.is_connected == Some(false)
        ));
    }

    #[test]
    fn program_destroy_yields_deleted() {
        let payload = r#"{"event":"program_changed","device_id":"d1","lifecycle_phase":"destroy","program_id":"p4"}"#;
        let events = cloud("events", payload).unwrap();
        assert!(matches!(
            &events[1],
            Event::ScheduleChanged { change: ScheduleChange::Deleted(id), .. } if id.as_str() == "p4"
        ));
    }

    #[test]
    fn snapshots_yield_list_then_details() {
        let payload = r#"[{"id":"d1","name":"A","is_connected":true},{"id":"d2","name":"B"}]"#;
        let events = cloud("devices", payload).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Event::DevicesList { device_ids } if device_ids.len() == 2));
        assert!(matches!(&events[2], Event::DeviceDetails { device_id, .. } if device_id.as_str() == "d2"));
    }

    #[test]
    fn unrecognized_address_passes_through() {
        let events = mqtt("bhyve/weather", "sunny").unwrap();
        assert_eq!(
            events,
            vec![Event::Unrecognized {
                address: "bhyve/weather".to_string(),
                payload: "sunny".to_string()
            }]
        );
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(mqtt("bhyve/devices", "not json").is_err());
        assert!(mqtt("bhyve/device/d1/message", "[1,2]").is_err());
        assert!(mqtt("bhyve/online", "maybe").is_err());
    }

    #[test]
    fn alive_and_echoes_decode_to_nothing() {
        assert!(mqtt("bhyve/alive", "2026-04-02T08:00:00Z").unwrap().is_empty());
        assert!(mqtt("bhyve/device/d1/zone/1/set", r#"{"state":"OFF"}"#).unwrap().is_empty());
    }
}
