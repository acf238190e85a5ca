// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Watering schedules (programs).
//!
//! A [`Schedule`] serializes to the `program` object understood by the
//! cloud service:
//!
//! ```json
//! {
//!   "id": "p1",
//!   "name": "Morning",
//!   "enabled": true,
//!   "frequency": { "type": "days", "interval": 1, "days": [0, 2, 4] },
//!   "start_times": ["06:00"],
//!   "run_times": [{ "station": 1, "run_time": 10, "enabled": true }]
//! }
//! ```

use std::fmt;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use super::station::MAX_RUN_MINUTES;
use super::StationId;
use crate::error::ValueError;

/// Identifier of a schedule, assigned by the cloud service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(String);

impl ScheduleId {
    /// Creates a schedule identifier from its wire representation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the days of a schedule are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyKind {
    /// Run on the listed days of the week.
    #[default]
    Days,
    /// Run every `interval` days.
    Interval,
    /// Run on odd days of the month.
    Odd,
    /// Run on even days of the month.
    Even,
}

/// Frequency descriptor of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    /// Frequency type.
    #[serde(rename = "type")]
    pub kind: FrequencyKind,
    /// Interval in days, used by [`FrequencyKind::Interval`].
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Days of the week, used by [`FrequencyKind::Days`].
    #[serde(default, with = "weekday_numbers")]
    pub days: Vec<Weekday>,
}

fn default_interval() -> u32 {
    1
}

impl Frequency {
    /// Runs on the given days of the week.
    #[must_use]
    pub fn days(days: impl IntoIterator<Item = Weekday>) -> Self {
        let mut days: Vec<Weekday> = days.into_iter().collect();
        days.sort_by_key(Weekday::num_days_from_monday);
        days.dedup();
        Self {
            kind: FrequencyKind::Days,
            interval: 1,
            days,
        }
    }

    /// Runs every `interval` days.
    #[must_use]
    pub fn every(interval: u32) -> Self {
        Self {
            kind: FrequencyKind::Interval,
            interval,
            days: Vec::new(),
        }
    }

    /// Runs every day.
    #[must_use]
    pub fn daily() -> Self {
        Self::every(1)
    }

    fn validate(&self) -> Result<(), ValueError> {
        match self.kind {
            FrequencyKind::Days if self.days.is_empty() => Err(ValueError::InvalidFrequency(
                "at least one day is required".to_string(),
            )),
            FrequencyKind::Interval if self.interval == 0 => Err(ValueError::InvalidFrequency(
                "interval must be at least 1 day".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self::daily()
    }
}

/// Run specification for one station within a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationRun {
    /// Station to water.
    pub station: StationId,
    /// Run time in minutes.
    #[serde(rename = "run_time")]
    pub run_minutes: u32,
    /// Whether this station takes part in the schedule.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A watering schedule.
///
/// # Examples
///
/// ```
/// use bhyve_lib::types::{Frequency, Schedule, StationId};
/// use chrono::Weekday;
///
/// let schedule = Schedule::builder("Morning")
///     .frequency(Frequency::days([Weekday::Mon, Weekday::Thu]))
///     .start_time("06:00")
///     .station(StationId::new(1).unwrap(), 10)
///     .build()
///     .unwrap();
///
/// assert_eq!(schedule.name(), "Morning");
/// assert!(schedule.id().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<ScheduleId>,
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    frequency: Frequency,
    #[serde(default, with = "start_time_format")]
    start_times: Vec<NaiveTime>,
    #[serde(default, rename = "run_times", alias = "stations")]
    runs: Vec<StationRun>,
}

impl Schedule {
    /// Starts building a schedule with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ScheduleBuilder {
        ScheduleBuilder::new(name)
    }

    /// Returns the schedule id, if the cloud service has assigned one.
    #[must_use]
    pub fn id(&self) -> Option<&ScheduleId> {
        self.id.as_ref()
    }

    /// Returns the schedule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the schedule is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the frequency descriptor.
    #[must_use]
    pub fn frequency(&self) -> &Frequency {
        &self.frequency
    }

    /// Returns the start times in order.
    #[must_use]
    pub fn start_times(&self) -> &[NaiveTime] {
        &self.start_times
    }

    /// Returns the per-station runs in order.
    #[must_use]
    pub fn runs(&self) -> &[StationRun] {
        &self.runs
    }

    /// Returns a copy of this schedule carrying the given id.
    #[must_use]
    pub fn with_id(mut self, id: ScheduleId) -> Self {
        self.id = Some(id);
        self
    }

    /// Returns a copy of this schedule with the enabled flag changed.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Checks the fields that do not depend on device state.
    ///
    /// # Errors
    ///
    /// Returns a `ValueError` for an empty name, no start times, no stations,
    /// a zero or oversized run time, or an unusable frequency.
    pub fn validate(&self) -> Result<(), ValueError> {
        if self.name.trim().is_empty() {
            return Err(ValueError::EmptyScheduleName);
        }
        if self.start_times.is_empty() {
            return Err(ValueError::EmptyStartTimes);
        }
        if self.runs.is_empty() {
            return Err(ValueError::EmptyStations);
        }
        for run in &self.runs {
            if run.run_minutes == 0 {
                return Err(ValueError::NonPositiveDuration);
            }
            if run.run_minutes > MAX_RUN_MINUTES {
                return Err(ValueError::RunTimeTooLong {
                    max: MAX_RUN_MINUTES,
                    actual: u64::from(run.run_minutes),
                });
            }
        }
        self.frequency.validate()
    }
}

/// Builder for [`Schedule`].
#[derive(Debug, Clone)]
pub struct ScheduleBuilder {
    name: String,
    enabled: bool,
    frequency: Frequency,
    start_times: Vec<String>,
    runs: Vec<StationRun>,
}

impl ScheduleBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            frequency: Frequency::default(),
            start_times: Vec::new(),
            runs: Vec::new(),
        }
    }

    /// Sets whether the schedule starts enabled (default: true).
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the frequency (default: daily).
    #[must_use]
    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Adds a start time in `HH:MM` format.
    #[must_use]
    pub fn start_time(mut self, time: impl Into<String>) -> Self {
        self.start_times.push(time.into());
        self
    }

    /// Adds a station run of `minutes` minutes.
    #[must_use]
    pub fn station(mut self, station: StationId, minutes: u32) -> Self {
        self.runs.push(StationRun {
            station,
            run_minutes: minutes,
            enabled: true,
        });
        self
    }

    /// Builds and validates the schedule.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidStartTime` for a malformed start time, or
    /// any error from [`Schedule::validate`].
    pub fn build(self) -> Result<Schedule, ValueError> {
        let start_times = self
            .start_times
            .iter()
            .map(|t| start_time_format::parse(t))
            .collect::<Result<Vec<_>, _>>()?;
        let schedule = Schedule {
            id: None,
            name: self.name,
            enabled: self.enabled,
            frequency: self.frequency,
            start_times,
            runs: self.runs,
        };
        schedule.validate()?;
        Ok(schedule)
    }
}

/// Days of the week as numbers, 0 being Monday.
mod weekday_numbers {
    use chrono::Weekday;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(days: &[Weekday], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(days.iter().map(Weekday::num_days_from_monday))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Weekday>, D::Error> {
        Vec::<u8>::deserialize(deserializer)?
            .into_iter()
            .map(|n| Weekday::try_from(n).map_err(|_| D::Error::custom(format!("invalid weekday {n}"))))
            .collect()
    }
}

/// Start times as `HH:MM` strings.
mod start_time_format {
    use chrono::NaiveTime;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::error::ValueError;

    pub fn parse(value: &str) -> Result<NaiveTime, ValueError> {
        NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .map_err(|_| ValueError::InvalidStartTime(value.to_string()))
    }

    pub fn serialize<S: Serializer>(times: &[NaiveTime], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(times.iter().map(|t| t.format("%H:%M").to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<NaiveTime>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| parse(s).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(n: u8) -> StationId {
        StationId::new(n).unwrap()
    }

    #[test]
    fn builder_produces_valid_schedule() {
        let schedule = Schedule::builder("Lawn")
            .start_time("05:30")
            .start_time("19:00")
            .station(station(1), 10)
            .station(station(2), 15)
            .build()
            .unwrap();

        assert_eq!(schedule.start_times().len(), 2);
        assert_eq!(schedule.runs()[1].run_minutes, 15);
        assert!(schedule.is_enabled());
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = Schedule::builder("  ")
            .start_time("06:00")
            .station(station(1), 5)
            .build()
            .unwrap_err();
        assert_eq!(err, ValueError::EmptyScheduleName);
    }

    #[test]
    fn zero_run_time_is_rejected() {
        let err = Schedule::builder("Beds")
            .start_time("06:00")
            .station(station(1), 0)
            .build()
            .unwrap_err();
        assert_eq!(err, ValueError::NonPositiveDuration);
    }

    #[test]
    fn malformed_start_time_is_rejected() {
        let err = Schedule::builder("Beds")
            .start_time("6 o'clock")
            .station(station(1), 5)
            .build()
            .unwrap_err();
        assert!(matches!(err, ValueError::InvalidStartTime(_)));
    }

    #[test]
    fn days_frequency_requires_a_day() {
        let err = Schedule::builder("Beds")
            .frequency(Frequency::days([]))
            .start_time("06:00")
            .station(station(1), 5)
            .build()
            .unwrap_err();
        assert!(matches!(err, ValueError::InvalidFrequency(_)));
    }

    #[test]
    fn serializes_to_program_object() {
        let schedule = Schedule::builder("Morning")
            .frequency(Frequency::days([Weekday::Wed, Weekday::Mon]))
            .start_time("06:00")
            .station(station(1), 10)
            .build()
            .unwrap()
            .with_id(ScheduleId::new("p1"));

        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["id"], "p1");
        assert_eq!(json["frequency"]["type"], "days");
        assert_eq!(json["frequency"]["days"], serde_json::json!([0, 2]));
        assert_eq!(json["start_times"], serde_json::json!(["06:00"]));
        assert_eq!(json["run_times"][0]["run_time"], 10);
    }

    #[test]
    fn deserializes_cloud_program_with_stations_alias() {
        let json = r#"{
            "id": "p9",
            "name": "Back yard",
            "enabled": false,
            "frequency": {"type": "interval", "interval": 3},
            "start_times": ["21:15"],
            "stations": [{"station": 2, "run_time": 7}]
        }"#;
        let schedule: Schedule = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.id(), Some(&ScheduleId::new("p9")));
        assert!(!schedule.is_enabled());
        assert_eq!(schedule.frequency().kind, FrequencyKind::Interval);
        assert_eq!(schedule.frequency().interval, 3);
        assert_eq!(schedule.runs()[0].station, station(2));
        assert!(schedule.runs()[0].enabled);
    }
}
