// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process transport.
//!
//! [`MemoryTransport`] stands in for a broker or the cloud socket: tests and
//! demos inject inbound messages, inspect what was sent, drop the connection
//! and make connection attempts fail.
//!
//! # Examples
//!
//! ```
//! use bhyve_lib::protocol::{MemoryTransport, Transport};
//!
//! # async fn example() {
//! let transport = MemoryTransport::mqtt();
//! let mut inbound = transport.connect(&[]).await.unwrap();
//!
//! transport.inject("bhyve/devices", r#"["d1"]"#);
//! assert!(inbound.recv().await.is_some());
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::{
    INBOUND_CHANNEL_CAPACITY, OutboundMessage, RawMessage, Transport, TransportEvent, Vocabulary,
};
use crate::error::TransportError;

/// Produces inbound replies for an outbound message.
type Responder = Arc<dyn Fn(&OutboundMessage) -> Vec<RawMessage> + Send + Sync>;

/// Transport that keeps everything in memory.
///
/// Cheaply cloneable; clones share the same connection.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    vocabulary: Vocabulary,
    state: Mutex<MemoryState>,
    sent_count: watch::Sender<usize>,
    connect_count: watch::Sender<usize>,
}

#[derive(Default)]
struct MemoryState {
    inbound: Option<mpsc::Sender<TransportEvent>>,
    sent: Vec<OutboundMessage>,
    subscriptions: Vec<String>,
    connect_failures: VecDeque<TransportError>,
    fail_sends: bool,
    heartbeats: usize,
    responder: Option<Responder>,
}

impl MemoryTransport {
    /// Creates a transport speaking the given vocabulary.
    #[must_use]
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                vocabulary,
                state: Mutex::new(MemoryState::default()),
                sent_count: watch::Sender::new(0),
                connect_count: watch::Sender::new(0),
            }),
        }
    }

    /// Creates a transport speaking the MQTT bridge vocabulary.
    #[must_use]
    pub fn mqtt() -> Self {
        Self::new(Vocabulary::mqtt())
    }

    /// Creates a transport speaking the cloud vocabulary.
    #[must_use]
    pub fn cloud() -> Self {
        Self::new(Vocabulary::Cloud)
    }

    /// Delivers an inbound message. Returns `false` when not connected.
    pub fn inject(&self, address: impl Into<String>, payload: impl Into<String>) -> bool {
        self.deliver(TransportEvent::Message(RawMessage::new(address, payload)))
    }

    /// Delivers a heartbeat. Returns `false` when not connected.
    pub fn inject_heartbeat(&self) -> bool {
        self.deliver(TransportEvent::Heartbeat)
    }

    fn deliver(&self, event: TransportEvent) -> bool {
        let state = self.inner.state.lock();
        state
            .inbound
            .as_ref()
            .is_some_and(|tx| tx.try_send(event).is_ok())
    }

    /// Drops the open connection, ending the inbound sequence.
    pub fn drop_connection(&self) {
        self.inner.state.lock().inbound = None;
    }

    /// Makes the next connection attempt fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.inner.state.lock().connect_failures.push_back(error);
    }

    /// Makes every send fail while `fail` is set.
    pub fn set_send_failure(&self, fail: bool) {
        self.inner.state.lock().fail_sends = fail;
    }

    /// Installs a function whose replies are injected after each send.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&OutboundMessage) -> Vec<RawMessage> + Send + Sync + 'static,
    {
        self.inner.state.lock().responder = Some(Arc::new(responder));
    }

    /// Returns whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner
            .state
            .lock()
            .inbound
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Returns every message sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.inner.state.lock().sent.clone()
    }

    /// Forgets the messages sent so far.
    pub fn clear_sent(&self) {
        self.inner.state.lock().sent.clear();
    }

    /// Returns the subscriptions of the last connection.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.state.lock().subscriptions.clone()
    }

    /// Returns the number of successful connections.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        *self.inner.connect_count.borrow()
    }

    /// Returns the number of heartbeat pings sent.
    #[must_use]
    pub fn heartbeat_count(&self) -> usize {
        self.inner.state.lock().heartbeats
    }

    /// Waits until at least `count` messages have been sent in total.
    pub async fn wait_for_sent(&self, count: usize) {
        let mut rx = self.inner.sent_count.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    /// Waits until at least `count` connections have been made in total.
    pub async fn wait_for_connects(&self, count: usize) {
        let mut rx = self.inner.connect_count.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::mqtt()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("vocabulary", &self.inner.vocabulary)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Transport for MemoryTransport {
    fn vocabulary(&self) -> Vocabulary {
        self.inner.vocabulary.clone()
    }

    async fn connect(
        &self,
        subscriptions: &[String],
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        {
            let mut state = self.inner.state.lock();
            if let Some(err) = state.connect_failures.pop_front() {
                return Err(err);
            }
            state.inbound = Some(tx);
            state.subscriptions = subscriptions.to_vec();
        }
        self.inner.connect_count.send_modify(|n| *n += 1);
        Ok(rx)
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let responder = {
            let mut state = self.inner.state.lock();
            if state.inbound.is_none() {
                return Err(TransportError::NotConnected);
            }
            if state.fail_sends {
                return Err(TransportError::ConnectionFailed("send refused".to_string()));
            }
            state.sent.push(message.clone());
            state.responder.clone()
        };
        self.inner.sent_count.send_modify(|n| *n += 1);

        if let Some(responder) = responder {
            for reply in responder(&message) {
                self.deliver(TransportEvent::Message(reply));
            }
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), TransportError> {
        self.inner.state.lock().heartbeats += 1;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.drop_connection();
        Ok(())
    }
}
