// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback subscriptions for events.
//!
//! # Overview
//!
//! The subscription system consists of:
//!
//! - [`SubscriptionId`] - A unique identifier for a subscription, used to unsubscribe
//! - [`CallbackRegistry`] - Registry that stores callbacks per event kind and dispatches events
//! - [`Subscribable`] - Trait for types that support event subscriptions
//!
//! Callbacks are synchronous closures. They run in registration order on the
//! blocking pool, one at a time, each bounded by the client's handler
//! timeout. A callback that fails, panics or times out is logged and skipped;
//! the remaining callbacks still receive the event.
//!
//! # Usage
//!
//! ```no_run
//! use bhyve_lib::BhyveClient;
//! use bhyve_lib::event::{Event, EventKind};
//! use bhyve_lib::protocol::MemoryTransport;
//! use bhyve_lib::subscription::Subscribable;
//!
//! # async fn example() -> bhyve_lib::Result<()> {
//! let client = BhyveClient::builder(MemoryTransport::mqtt()).open().await?;
//!
//! let sub_id = client.on_event(EventKind::DeviceStatus, |event| {
//!     if let Event::DeviceStatus { device_id, .. } = event {
//!         println!("status of {device_id} changed");
//!     }
//!     Ok(())
//! });
//!
//! // Later, unsubscribe
//! client.off_event(EventKind::DeviceStatus, sub_id);
//! # Ok(())
//! # }
//! ```

mod callback;
mod subscribable;

pub use callback::{CallbackRegistry, DispatchReport, HandlerResult, SubscriptionId};
pub use subscribable::Subscribable;
