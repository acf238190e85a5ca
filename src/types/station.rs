// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Station numbers and run times.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Longest run time the controllers accept for a single station, in minutes.
pub const MAX_RUN_MINUTES: u32 = 999;

/// Number of a station (valve or zone) on a controller.
///
/// Stations are numbered from 1.
///
/// # Examples
///
/// ```
/// use bhyve_lib::types::StationId;
///
/// let station = StationId::new(2).unwrap();
/// assert_eq!(station.value(), 2);
///
/// assert!(StationId::new(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StationId(u8);

impl StationId {
    /// Station 1.
    pub const FIRST: Self = Self(1);

    /// Creates a station number.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidStation` for 0.
    pub fn new(station: u8) -> Result<Self, ValueError> {
        if station == 0 {
            return Err(ValueError::InvalidStation(station));
        }
        Ok(Self(station))
    }

    /// Returns the station number.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for StationId {
    type Error = ValueError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StationId> for u8 {
    fn from(station: StationId) -> Self {
        station.0
    }
}

/// Converts a watering duration into the whole minutes the controller expects.
///
/// Partial minutes round up, so any positive duration runs for at least one
/// minute.
///
/// # Errors
///
/// Returns `ValueError::NonPositiveDuration` for a zero duration and
/// `ValueError::RunTimeTooLong` above [`MAX_RUN_MINUTES`].
pub fn run_minutes(duration: Duration) -> Result<u32, ValueError> {
    if duration.is_zero() {
        return Err(ValueError::NonPositiveDuration);
    }
    let minutes = duration.as_secs().div_ceil(60).max(1);
    match u32::try_from(minutes) {
        Ok(m) if m <= MAX_RUN_MINUTES => Ok(m),
        _ => Err(ValueError::RunTimeTooLong {
            max: MAX_RUN_MINUTES,
            actual: minutes,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_zero_is_rejected() {
        assert_eq!(StationId::new(0), Err(ValueError::InvalidStation(0)));
        assert!(StationId::try_from(12).is_ok());
    }

    #[test]
    fn station_deserialize_validates() {
        let ok: StationId = serde_json::from_str("4").unwrap();
        assert_eq!(ok.value(), 4);
        assert!(serde_json::from_str::<StationId>("0").is_err());
    }

    #[test]
    fn run_minutes_rounds_up() {
        assert_eq!(run_minutes(Duration::from_secs(300)).unwrap(), 5);
        assert_eq!(run_minutes(Duration::from_secs(301)).unwrap(), 6);
        assert_eq!(run_minutes(Duration::from_millis(10)).unwrap(), 1);
    }

    #[test]
    fn run_minutes_rejects_zero() {
        assert_eq!(
            run_minutes(Duration::ZERO),
            Err(ValueError::NonPositiveDuration)
        );
    }

    #[test]
    fn run_minutes_rejects_too_long() {
        let err = run_minutes(Duration::from_secs(1000 * 60)).unwrap_err();
        assert_eq!(
            err,
            ValueError::RunTimeTooLong {
                max: 999,
                actual: 1000
            }
        );
    }
}
