// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed events and their distribution.
//!
//! Raw transport messages are decoded into [`Event`]s, applied to the device
//! store and then delivered twice: to callbacks registered per [`EventKind`]
//! and to every [`EventBus`] receiver.
//!
//! # Examples
//!
//! ```
//! use bhyve_lib::event::{Event, EventBus, EventKind};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(Event::BridgeStatus { online: true });
//! assert_eq!(rx.try_recv().unwrap().kind(), EventKind::BridgeStatus);
//! ```

pub(crate) mod decoder;
mod device_event;
mod event_bus;

pub use device_event::{Event, EventKind, ScheduleChange};
pub use event_bus::EventBus;
pub(crate) use event_bus::DEFAULT_CHANNEL_CAPACITY;
