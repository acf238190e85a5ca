// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state tracking.
//!
//! The [`DeviceStore`] holds one immutable [`Device`] snapshot per device and
//! is updated only by inbound events. Queries hand out `Arc` snapshots, so a
//! reader never observes a half-applied update.
//!
//! # Examples
//!
//! ```
//! use bhyve_lib::state::{Device, DeviceDetails, Valve};
//! use bhyve_lib::types::{DeviceId, StationId};
//!
//! let station = StationId::new(1).unwrap();
//! let device = Device::from_details(DeviceId::new("d1"), DeviceDetails {
//!     name: "Front yard".to_string(),
//!     valves: vec![Valve::new(station, "Lawn")],
//!     ..DeviceDetails::default()
//! });
//!
//! assert_eq!(device.valve(station).map(|v| v.name.as_str()), Some("Lawn"));
//! ```

mod device_state;
mod store;

pub use device_state::{Device, DeviceDetails, DeviceStatus, Valve, WateringReport, WateringStatus};
pub use store::{DEFAULT_RECENT_CAPACITY, DeviceStore, WateringRecord};
