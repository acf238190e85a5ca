// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport adapters and wire addressing.
//!
//! A [`Transport`] only reflects the wire: it connects, sends raw messages
//! and yields raw inbound messages until the connection ends. Retrying,
//! decoding and correlation live above it.
//!
//! # Transports
//!
//! - [`MqttTransport`]: MQTT bridge connection (feature `mqtt`)
//! - [`WebSocketTransport`]: cloud WebSocket connection (feature `websocket`)
//! - [`MemoryTransport`]: in-process transport for tests and demos
//!
//! The [`TopicRouter`] is the only place that knows concrete topic strings
//! and envelope layouts.

mod memory;
#[cfg(feature = "mqtt")]
mod mqtt;
#[cfg(feature = "http")]
mod session;
mod topic_router;
#[cfg(feature = "websocket")]
mod websocket;

pub use memory::MemoryTransport;
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttTransport, MqttTransportBuilder};
#[cfg(feature = "http")]
pub use session::Session;
pub use topic_router::{DeviceChannel, Route, SystemChannel, TopicRouter, Vocabulary};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketTransport, WebSocketTransportBuilder};

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Capacity of the inbound channel handed out by transports.
pub(crate) const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// A raw message received from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Wire address (MQTT topic or WebSocket channel).
    pub address: String,
    /// Message body.
    pub payload: String,
}

impl RawMessage {
    /// Creates a raw message.
    #[must_use]
    pub fn new(address: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            payload: payload.into(),
        }
    }
}

/// A raw message to put on the wire.
pub type OutboundMessage = RawMessage;

/// Something the transport observed on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An inbound message.
    Message(RawMessage),
    /// A liveness signal without payload (ping response, pong frame).
    Heartbeat,
}

/// A connection to the message transport.
///
/// Implementations hold their own endpoint and credentials. The receiver
/// returned by [`connect`](Transport::connect) yields inbound traffic and
/// ends when the connection is lost or closed; a new call to `connect`
/// starts a fresh sequence.
pub trait Transport: Send + Sync + 'static {
    /// Returns the wire vocabulary this transport speaks.
    fn vocabulary(&self) -> Vocabulary;

    /// Opens the connection and subscribes to `subscriptions`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AuthenticationFailed` when the credentials
    /// are rejected, and another `TransportError` when the endpoint cannot
    /// be reached.
    fn connect(
        &self,
        subscriptions: &[String],
    ) -> impl Future<Output = Result<mpsc::Receiver<TransportEvent>, TransportError>> + Send;

    /// Sends a raw message.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotConnected` when no connection is open.
    fn send(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends a liveness ping, for transports that need one.
    ///
    /// # Errors
    ///
    /// Returns error if the ping cannot be sent.
    fn heartbeat(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        async { Ok(()) }
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns error if the close request cannot be delivered.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
