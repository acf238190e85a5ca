// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback management for event subscriptions.
//!
//! This module provides the core types for managing subscription callbacks:
//!
//! - [`SubscriptionId`] - Unique identifier for unsubscribing
//! - [`CallbackRegistry`] - Registry storing callbacks per [`EventKind`] and
//!   dispatching events to them

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::event::{Event, EventKind};

/// Unique identifier for a subscription.
///
/// This ID is returned when registering a callback and can be used to
/// unsubscribe later. IDs are unique within a client's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a new subscription ID with the given value.
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// What a callback returns. An `Err` is logged and does not affect other
/// callbacks.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Type alias for event callbacks.
type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned `Ok`.
    pub delivered: usize,
    /// Callbacks that returned `Err` or panicked.
    pub failed: usize,
    /// Callbacks skipped after exceeding the handler timeout.
    pub timed_out: usize,
}

/// Registry of event callbacks keyed by event kind.
///
/// Callbacks for a kind run in registration order. Each callback runs on the
/// blocking pool under a timeout, so a failing, panicking or slow callback
/// only affects itself.
///
/// # Thread Safety
///
/// The registry uses `parking_lot::RwLock`; callbacks may be added or
/// removed from any task, including from inside a running callback.
pub struct CallbackRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
}

impl CallbackRegistry {
    /// Creates a new empty callback registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a callback for one event kind.
    pub fn on_event<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Unregisters a callback from one event kind.
    ///
    /// Returns `true` if a callback was found and removed.
    pub fn off_event(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        before != list.len()
    }

    /// Unregisters a callback whatever kind it was registered for.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= before != list.len();
        }
        removed
    }

    /// Clears all callbacks.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Delivers an event to every callback registered for its kind.
    ///
    /// The callback list is snapshotted first; changes made while the event
    /// is being delivered apply to the next event.
    pub async fn dispatch(&self, event: &Event, timeout: Duration) -> DispatchReport {
        let kind = event.kind();
        let handlers = self.handlers.read().get(&kind).cloned().unwrap_or_default();
        let mut report = DispatchReport::default();
        if handlers.is_empty() {
            return report;
        }

        let shared = Arc::new(event.clone());
        for (id, handler) in handlers {
            let event = Arc::clone(&shared);
            let task = tokio::task::spawn_blocking(move || handler(&event));
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(Ok(()))) => report.delivered += 1,
                Ok(Ok(Err(e))) => {
                    tracing::warn!(subscription = %id, kind = %kind, error = %e, "Event callback failed");
                    report.failed += 1;
                }
                Ok(Err(e)) => {
                    tracing::error!(subscription = %id, kind = %kind, error = %e, "Event callback panicked");
                    report.failed += 1;
                }
                Err(_) => {
                    tracing::warn!(
                        subscription = %id,
                        kind = %kind,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "Event callback timed out, skipped"
                    );
                    report.timed_out += 1;
                }
            }
        }
        report
    }

    /// Returns the total number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    /// Returns `true` if there are no registered callbacks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callback_count() == 0
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callback_count", &self.callback_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use crate::types::DeviceId;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn completed() -> Event {
        Event::WateringCompleted {
            device_id: DeviceId::new("d1"),
            station: None,
            token: None,
        }
    }

    fn counting(counter: &Arc<AtomicU32>) -> impl Fn(&Event) -> HandlerResult + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn subscription_id_display() {
        let id = SubscriptionId::new(42);
        assert_eq!(id.to_string(), "Sub(42)");
    }

    #[test]
    fn registry_new_is_empty() {
        let registry = CallbackRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.callback_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_only_reaches_matching_kind() {
        let registry = CallbackRegistry::new();
        let completed_count = Arc::new(AtomicU32::new(0));
        let mode_count = Arc::new(AtomicU32::new(0));
        registry.on_event(EventKind::WateringCompleted, counting(&completed_count));
        registry.on_event(EventKind::ModeChanged, counting(&mode_count));

        let report = registry.dispatch(&completed(), TIMEOUT).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(completed_count.load(Ordering::SeqCst), 1);
        assert_eq!(mode_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callbacks_run_in_registration_order() {
        let registry = CallbackRegistry::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for n in 1..=3 {
            let order = Arc::clone(&order);
            registry.on_event(EventKind::WateringCompleted, move |_| {
                order.lock().push(n);
                Ok(())
            });
        }

        registry.dispatch(&completed(), TIMEOUT).await;
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failing_and_panicking_callbacks_are_isolated() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        registry.on_event(EventKind::WateringCompleted, |_| Err("boom".into()));
        registry.on_event(EventKind::WateringCompleted, |_| panic!("callback panic"));
        registry.on_event(EventKind::WateringCompleted, counting(&counter));

        let report = registry.dispatch(&completed(), TIMEOUT).await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_callback_is_skipped() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        registry.on_event(EventKind::WateringCompleted, |_| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        registry.on_event(EventKind::WateringCompleted, counting(&counter));

        let report = registry.dispatch(&completed(), Duration::from_millis(20)).await;

        assert_eq!(report.timed_out, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_event_removes_callback() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let id = registry.on_event(EventKind::WateringCompleted, counting(&counter));

        assert!(!registry.off_event(EventKind::ModeChanged, id));
        assert!(registry.off_event(EventKind::WateringCompleted, id));
        assert!(registry.is_empty());

        registry.dispatch(&completed(), TIMEOUT).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_searches_every_kind() {
        let registry = CallbackRegistry::new();
        let id = registry.on_event(EventKind::ModeChanged, |_| Ok(()));
        registry.on_event(EventKind::Error, |_| Ok(()));

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.callback_count(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}
