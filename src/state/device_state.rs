// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device snapshots and the payloads that update them.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{DeviceId, RunMode, Schedule, StationId};

/// A controllable station of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valve {
    /// Station number.
    pub station: StationId,
    /// Display name.
    pub name: String,
}

impl Valve {
    /// Creates a valve.
    #[must_use]
    pub fn new(station: StationId, name: impl Into<String>) -> Self {
        Self {
            station,
            name: name.into(),
        }
    }
}

/// An active watering run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WateringStatus {
    /// Station being watered, when reported.
    pub station: Option<StationId>,
    /// Remaining or total run time, when reported.
    pub remaining: Option<Duration>,
    /// When the current station started, when reported.
    pub started_at: Option<DateTime<Utc>>,
}

/// What a status report says about watering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WateringReport {
    /// The report does not cover watering.
    #[default]
    Unreported,
    /// Nothing is watering.
    Idle,
    /// A station is watering.
    Active(WateringStatus),
}

/// Status fields reported for a device.
///
/// Fields left as `None` (or [`WateringReport::Unreported`]) were not part
/// of the report and keep their previous value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    /// Connectivity flag.
    pub is_connected: Option<bool>,
    /// Run mode.
    pub mode: Option<RunMode>,
    /// Watering state.
    pub watering: WateringReport,
}

/// Full description of a device as reported by a details message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDetails {
    /// Display name.
    pub name: String,
    /// Hardware type.
    pub device_type: String,
    /// Connectivity flag.
    pub is_connected: bool,
    /// Battery level in percent.
    pub battery_level: Option<u8>,
    /// Signal strength.
    pub signal_strength: Option<i32>,
    /// Last time the device reported.
    pub last_seen: Option<DateTime<Utc>>,
    /// Run mode.
    pub mode: Option<RunMode>,
    /// Active watering run.
    pub watering: Option<WateringStatus>,
    /// Complete valve list.
    pub valves: Vec<Valve>,
    /// Firmware version.
    pub firmware_version: Option<String>,
    /// Hardware version.
    pub hardware_version: Option<String>,
}

/// Snapshot of one device.
///
/// Snapshots are immutable; the store replaces them wholesale, so a reader
/// holding one never observes a partially applied update.
///
/// # Examples
///
/// ```
/// use bhyve_lib::state::{Device, DeviceDetails};
/// use bhyve_lib::types::DeviceId;
///
/// let device = Device::from_details(DeviceId::new("d1"), DeviceDetails {
///     name: "Front yard".to_string(),
///     is_connected: true,
///     ..DeviceDetails::default()
/// });
///
/// assert_eq!(device.name(), "Front yard");
/// assert!(!device.is_watering());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    id: DeviceId,
    name: String,
    device_type: String,
    is_connected: bool,
    battery_level: Option<u8>,
    signal_strength: Option<i32>,
    last_seen: Option<DateTime<Utc>>,
    mode: Option<RunMode>,
    watering: Option<WateringStatus>,
    valves: Vec<Valve>,
    schedules: Vec<Schedule>,
    firmware_version: Option<String>,
    hardware_version: Option<String>,
}

impl Device {
    /// Builds a snapshot from a details report.
    #[must_use]
    pub fn from_details(id: DeviceId, details: DeviceDetails) -> Self {
        Self {
            id,
            name: details.name,
            device_type: details.device_type,
            is_connected: details.is_connected,
            battery_level: details.battery_level,
            signal_strength: details.signal_strength,
            last_seen: details.last_seen,
            mode: details.mode,
            watering: details.watering,
            valves: details.valves,
            schedules: Vec::new(),
            firmware_version: details.firmware_version,
            hardware_version: details.hardware_version,
        }
    }

    /// Returns the device id.
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the hardware type.
    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Returns whether the device is connected to the cloud.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// Returns the battery level in percent.
    #[must_use]
    pub fn battery_level(&self) -> Option<u8> {
        self.battery_level
    }

    /// Returns the signal strength.
    #[must_use]
    pub fn signal_strength(&self) -> Option<i32> {
        self.signal_strength
    }

    /// Returns when the device was last heard from.
    #[must_use]
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Returns the run mode, if known.
    #[must_use]
    pub fn mode(&self) -> Option<RunMode> {
        self.mode
    }

    /// Returns the active watering run.
    #[must_use]
    pub fn watering(&self) -> Option<&WateringStatus> {
        self.watering.as_ref()
    }

    /// Returns whether a station is watering.
    #[must_use]
    pub fn is_watering(&self) -> bool {
        self.watering.is_some()
    }

    /// Returns the station being watered.
    #[must_use]
    pub fn current_station(&self) -> Option<StationId> {
        self.watering.as_ref().and_then(|w| w.station)
    }

    /// Returns the remaining run time of the active watering run.
    #[must_use]
    pub fn watering_remaining(&self) -> Option<Duration> {
        self.watering.as_ref().and_then(|w| w.remaining)
    }

    /// Returns the valves.
    #[must_use]
    pub fn valves(&self) -> &[Valve] {
        &self.valves
    }

    /// Returns the valve for a station.
    #[must_use]
    pub fn valve(&self, station: StationId) -> Option<&Valve> {
        self.valves.iter().find(|v| v.station == station)
    }

    /// Returns the known schedules.
    #[must_use]
    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Returns the firmware version.
    #[must_use]
    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    /// Returns the hardware version.
    #[must_use]
    pub fn hardware_version(&self) -> Option<&str> {
        self.hardware_version.as_deref()
    }

    // ========================================================================
    // Updates (store only)
    // ========================================================================

    /// Replaces everything a details report describes.
    ///
    /// Schedules are not part of details and survive.
    pub(crate) fn replace_details(&mut self, details: DeviceDetails) {
        let schedules = std::mem::take(&mut self.schedules);
        *self = Self::from_details(self.id.clone(), details);
        self.schedules = schedules;
    }

    pub(crate) fn apply_status(&mut self, status: &DeviceStatus) {
        if let Some(connected) = status.is_connected {
            self.is_connected = connected;
        }
        if let Some(mode) = status.mode {
            self.mode = Some(mode);
        }
        match &status.watering {
            WateringReport::Unreported => {}
            WateringReport::Idle => self.watering = None,
            WateringReport::Active(watering) => self.watering = Some(watering.clone()),
        }
    }

    pub(crate) fn set_watering(&mut self, watering: Option<WateringStatus>) {
        self.watering = watering;
    }

    pub(crate) fn set_mode(&mut self, mode: RunMode) {
        self.mode = Some(mode);
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        if self.last_seen.is_none_or(|seen| seen < at) {
            self.last_seen = Some(at);
        }
    }

    pub(crate) fn replace_schedules(&mut self, schedules: Vec<Schedule>) {
        self.schedules = schedules;
    }

    pub(crate) fn upsert_schedule(&mut self, schedule: Schedule) {
        match schedule
            .id()
            .and_then(|id| self.schedules.iter().position(|s| s.id() == Some(id)))
        {
            Some(index) => self.schedules[index] = schedule,
            None => self.schedules.push(schedule),
        }
    }

    pub(crate) fn remove_schedule(&mut self, id: &crate::types::ScheduleId) {
        self.schedules.retain(|s| s.id() != Some(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleId;

    fn station(n: u8) -> StationId {
        StationId::new(n).unwrap()
    }

    fn details(valves: Vec<Valve>) -> DeviceDetails {
        DeviceDetails {
            name: "Front".to_string(),
            is_connected: true,
            valves,
            ..DeviceDetails::default()
        }
    }

    fn schedule(id: &str, name: &str) -> Schedule {
        Schedule::builder(name)
            .start_time("06:00")
            .station(station(1), 5)
            .build()
            .unwrap()
            .with_id(ScheduleId::new(id))
    }

    #[test]
    fn replace_details_keeps_schedules() {
        let mut device = Device::from_details(DeviceId::new("d1"), details(vec![]));
        device.upsert_schedule(schedule("p1", "Morning"));

        device.replace_details(details(vec![Valve::new(station(1), "Front")]));

        assert_eq!(device.valves().len(), 1);
        assert_eq!(device.schedules().len(), 1);
    }

    #[test]
    fn status_only_changes_reported_fields() {
        let mut device = Device::from_details(DeviceId::new("d1"), details(vec![]));
        device.set_mode(RunMode::Auto);
        device.set_watering(Some(WateringStatus {
            station: Some(station(2)),
            ..WateringStatus::default()
        }));

        device.apply_status(&DeviceStatus {
            is_connected: Some(false),
            ..DeviceStatus::default()
        });

        assert!(!device.is_connected());
        assert_eq!(device.mode(), Some(RunMode::Auto));
        assert_eq!(device.current_station(), Some(station(2)));

        device.apply_status(&DeviceStatus {
            watering: WateringReport::Idle,
            ..DeviceStatus::default()
        });
        assert!(!device.is_watering());
    }

    #[test]
    fn upsert_schedule_replaces_by_id() {
        let mut device = Device::from_details(DeviceId::new("d1"), details(vec![]));
        device.upsert_schedule(schedule("p1", "Morning"));
        device.upsert_schedule(schedule("p1", "Evening"));
        device.upsert_schedule(schedule("p2", "Night"));

        assert_eq!(device.schedules().len(), 2);
        assert_eq!(device.schedules()[0].name(), "Evening");

        device.remove_schedule(&ScheduleId::new("p1"));
        assert_eq!(device.schedules().len(), 1);
    }

    #[test]
    fn touch_never_moves_backwards() {
        let mut device = Device::from_details(DeviceId::new("d1"), details(vec![]));
        let later = DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let earlier = DateTime::parse_from_rfc3339("2026-05-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        device.touch(later);
        device.touch(earlier);
        assert_eq!(device.last_seen(), Some(later));
    }
}
