// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broadcast channel for events.

use tokio::sync::broadcast;

use super::Event;

/// Default channel capacity for the event bus.
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event bus broadcasting every processed event to stream subscribers.
///
/// The bus complements the callback registry: callbacks are invoked in
/// registration order by the dispatch loop, while bus receivers consume
/// events at their own pace.
///
/// # Capacity
///
/// The event bus has a fixed capacity (default 256). If a receiver falls
/// behind, older events are dropped for that receiver, which then observes
/// `RecvError::Lagged`.
///
/// # Examples
///
/// ```
/// use bhyve_lib::event::{Event, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(Event::BridgeStatus { online: true });
/// assert_eq!(rx.try_recv().unwrap(), Event::BridgeStatus { online: true });
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Returns the number of active receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event to all receivers.
    ///
    /// Returns the number of receivers that got the event; 0 without
    /// receivers.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_count_follows_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn publish_delivers_to_every_receiver() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let delivered = bus.publish(Event::BridgeStatus { online: false });

        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap(), Event::BridgeStatus { online: false });
        assert_eq!(rx2.recv().await.unwrap(), Event::BridgeStatus { online: false });
    }

    #[test]
    fn publish_without_receivers_is_discarded() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Event::BridgeStatus { online: true }), 0);
    }

    #[test]
    fn clone_shares_same_channel() {
        let bus1 = EventBus::with_capacity(8);
        let bus2 = bus1.clone();

        let _rx = bus1.subscribe();
        assert_eq!(bus2.subscriber_count(), 1);
    }
}
