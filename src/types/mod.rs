// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for irrigation control.
//!
//! Each type checks its invariants at construction time so that command
//! methods never put an out-of-contract value on the wire.
//!
//! # Types
//!
//! - [`DeviceId`] - Opaque controller identifier
//! - [`RunMode`] - Device operating policy (auto, manual, off)
//! - [`StationId`] - Station (valve/zone) number, starting at 1
//! - [`Schedule`] - Watering program with frequency, start times and runs

mod device_id;
mod run_mode;
mod schedule;
mod station;

pub use device_id::DeviceId;
pub use run_mode::{IntoRunMode, RunMode};
pub use schedule::{Frequency, FrequencyKind, Schedule, ScheduleBuilder, ScheduleId, StationRun};
pub use station::{MAX_RUN_MINUTES, StationId, run_minutes};
