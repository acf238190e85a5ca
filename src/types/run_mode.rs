// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device run mode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Device-level operating policy.
///
/// # Examples
///
/// ```
/// use bhyve_lib::types::RunMode;
///
/// let mode: RunMode = "manual".parse().unwrap();
/// assert_eq!(mode, RunMode::Manual);
/// assert_eq!(mode.as_str(), "manual");
///
/// assert!("sprinkle".parse::<RunMode>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Programs run on their schedules.
    Auto,
    /// Only manually started watering runs.
    Manual,
    /// Nothing runs.
    Off,
}

impl RunMode {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "off" => Ok(Self::Off),
            _ => Err(ValueError::InvalidMode(s.to_string())),
        }
    }
}

/// Conversion into a [`RunMode`], accepting either the enum or its wire name.
pub trait IntoRunMode {
    /// Converts the value, rejecting names outside the enumerated set.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidMode` for unknown names.
    fn into_run_mode(self) -> Result<RunMode, ValueError>;
}

impl IntoRunMode for RunMode {
    fn into_run_mode(self) -> Result<RunMode, ValueError> {
        Ok(self)
    }
}

impl IntoRunMode for &str {
    fn into_run_mode(self) -> Result<RunMode, ValueError> {
        self.parse()
    }
}

impl IntoRunMode for String {
    fn into_run_mode(self) -> Result<RunMode, ValueError> {
        self.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("AUTO".parse::<RunMode>().unwrap(), RunMode::Auto);
        assert_eq!(" Off ".parse::<RunMode>().unwrap(), RunMode::Off);
    }

    #[test]
    fn parse_rejects_unknown_mode() {
        let err = "rain_delay".parse::<RunMode>().unwrap_err();
        assert_eq!(err, ValueError::InvalidMode("rain_delay".to_string()));
    }

    #[test]
    fn into_run_mode_from_str() {
        assert_eq!("manual".into_run_mode().unwrap(), RunMode::Manual);
        assert!("".into_run_mode().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&RunMode::Off).unwrap(), "\"off\"");
        let mode: RunMode = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(mode, RunMode::Auto);
    }
}
