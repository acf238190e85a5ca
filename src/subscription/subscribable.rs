// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscribable trait for types that deliver events to callbacks.

use crate::event::{Event, EventKind};
use crate::subscription::{HandlerResult, SubscriptionId};
use crate::supervisor::ConnectionState;
use crate::types::{DeviceId, RunMode, StationId};

/// Trait for types that support event subscriptions.
///
/// Only [`on_event`](Subscribable::on_event) and
/// [`off_event`](Subscribable::off_event) are required; the typed helpers
/// register an `on_event` callback that unpacks the matching variant.
///
/// # Examples
///
/// ```no_run
/// use bhyve_lib::BhyveClient;
/// use bhyve_lib::protocol::MemoryTransport;
/// use bhyve_lib::subscription::Subscribable;
///
/// # async fn example() -> bhyve_lib::Result<()> {
/// let client = BhyveClient::builder(MemoryTransport::mqtt()).open().await?;
///
/// let sub_id = client.on_watering_started(|device_id, station| {
///     println!("{device_id} started watering station {station:?}");
/// });
///
/// // Unsubscribe when no longer needed
/// client.off_event(bhyve_lib::event::EventKind::WateringStarted, sub_id);
/// # Ok(())
/// # }
/// ```
pub trait Subscribable {
    /// Registers a callback for one event kind.
    fn on_event<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static;

    /// Removes a callback registered for `kind`.
    ///
    /// Returns `true` if the callback was found.
    fn off_event(&self, kind: EventKind, id: SubscriptionId) -> bool;

    /// Subscribes to watering starts.
    fn on_watering_started<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceId, Option<StationId>) + Send + Sync + 'static,
    {
        self.on_event(EventKind::WateringStarted, move |event| {
            if let Event::WateringStarted {
                device_id, station, ..
            } = event
            {
                callback(device_id, *station);
            }
            Ok(())
        })
    }

    /// Subscribes to watering completions.
    fn on_watering_completed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceId, Option<StationId>) + Send + Sync + 'static,
    {
        self.on_event(EventKind::WateringCompleted, move |event| {
            if let Event::WateringCompleted {
                device_id, station, ..
            } = event
            {
                callback(device_id, *station);
            }
            Ok(())
        })
    }

    /// Subscribes to run mode changes.
    fn on_mode_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceId, RunMode) + Send + Sync + 'static,
    {
        self.on_event(EventKind::ModeChanged, move |event| {
            if let Event::ModeChanged {
                device_id, mode, ..
            } = event
            {
                callback(device_id, *mode);
            }
            Ok(())
        })
    }

    /// Subscribes to connection state changes.
    fn on_connection_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ConnectionState, Option<&str>) + Send + Sync + 'static,
    {
        self.on_event(EventKind::ConnectionChanged, move |event| {
            if let Event::ConnectionChanged { state, error } = event {
                callback(*state, error.as_deref());
            }
            Ok(())
        })
    }
}
