// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT bridge transport.
//!
//! Connects to the broker that the B-hyve MQTT bridge publishes to. Each call
//! to [`Transport::connect`] creates a fresh client and event loop and
//! re-issues every subscription, so a reconnect never depends on broker-side
//! session state.
//!
//! # Examples
//!
//! ```no_run
//! use bhyve_lib::protocol::MqttTransport;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), bhyve_lib::error::TransportError> {
//! let transport = MqttTransport::builder()
//!     .host("192.168.1.20")
//!     .port(1883)
//!     .credentials("bhyve", "secret")
//!     .keep_alive(Duration::from_secs(10))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, EventLoop, MqttOptions, QoS};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::topic_router::DEFAULT_MQTT_PREFIX;
use super::{
    INBOUND_CHANNEL_CAPACITY, OutboundMessage, RawMessage, Transport, TransportEvent, Vocabulary,
};
use crate::error::TransportError;

/// Capacity of the rumqttc request queue.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Configuration for the MQTT bridge connection.
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    client_id: Option<String>,
    prefix: String,
    keep_alive: Duration,
    connection_timeout: Duration,
    use_tls: bool,
    clean_session: bool,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            client_id: None,
            prefix: DEFAULT_MQTT_PREFIX.to_string(),
            keep_alive: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(30),
            use_tls: false,
            clean_session: true,
        }
    }
}

/// Transport over an MQTT broker.
///
/// `MqttTransport` is cheaply cloneable (via `Arc`).
#[derive(Clone)]
pub struct MqttTransport {
    inner: Arc<MqttInner>,
}

struct MqttInner {
    config: MqttTransportConfig,
    client: Mutex<Option<AsyncClient>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Creates a new builder for configuring the transport.
    #[must_use]
    pub fn builder() -> MqttTransportBuilder {
        MqttTransportBuilder::default()
    }

    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the topic prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.inner.config.prefix
    }

    fn mqtt_options(&self) -> MqttOptions {
        let config = &self.inner.config;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("bhyve_{}", Uuid::new_v4().simple()));

        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(config.clean_session);
        if let Some((ref username, ref password)) = config.credentials {
            options.set_credentials(username, password);
        }
        if config.use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        options
    }

    fn abort_event_task(&self) {
        if let Some(task) = self.inner.event_task.lock().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("prefix", &self.inner.config.prefix)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Transport for MqttTransport {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Mqtt {
            prefix: self.inner.config.prefix.clone(),
        }
    }

    async fn connect(
        &self,
        subscriptions: &[String],
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.abort_event_task();

        let (client, event_loop) = AsyncClient::new(self.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();

        let connected = Arc::clone(&self.inner.connected);
        let task = tokio::spawn(async move {
            handle_broker_events(event_loop, inbound_tx, connack_tx, connected).await;
        });

        let timeout = self.inner.config.connection_timeout;
        let outcome = match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => Err(TransportError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };
        if let Err(e) = outcome {
            task.abort();
            return Err(e);
        }

        for topic in subscriptions {
            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                task.abort();
                return Err(e.into());
            }
        }

        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            subscriptions = subscriptions.len(),
            "Connected to MQTT broker"
        );

        *self.inner.client.lock() = Some(client);
        *self.inner.event_task.lock() = Some(task);
        Ok(inbound_rx)
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let client = self
            .inner
            .client
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        tracing::debug!(topic = %message.address, "Publishing MQTT message");
        client
            .publish(
                message.address,
                QoS::AtLeastOnce,
                false,
                message.payload.into_bytes(),
            )
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        let client = self.inner.client.lock().take();
        self.inner.connected.store(false, Ordering::Release);
        let result = match client {
            Some(client) => client.disconnect().await.map_err(TransportError::from),
            None => Ok(()),
        };
        if result.is_err() {
            self.abort_event_task();
        }
        result
    }
}

/// Maps a connection failure, singling out rejected credentials.
fn map_connection_error(err: &ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => TransportError::AuthenticationFailed(format!("broker refused connection: {code:?}")),
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

/// Drives the MQTT event loop until the connection ends.
async fn handle_broker_events(
    mut event_loop: EventLoop,
    inbound: mpsc::Sender<TransportEvent>,
    connack_tx: oneshot::Sender<Result<(), TransportError>>,
    connected: Arc<AtomicBool>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = Some(connack_tx);

    loop {
        let event = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Ok(()));
                }
                continue;
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
                continue;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(payload) => {
                        tracing::trace!(topic = %publish.topic, "MQTT message received");
                        TransportEvent::Message(RawMessage::new(publish.topic, payload))
                    }
                    Err(_) => {
                        tracing::warn!(topic = %publish.topic, "Dropping non UTF-8 MQTT payload");
                        continue;
                    }
                }
            }
            Ok(Event::Incoming(Packet::PingResp)) => TransportEvent::Heartbeat,
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Err(map_connection_error(&e)));
                } else {
                    tracing::error!(error = %e, "MQTT event loop error");
                }
                break;
            }
        };

        if inbound.send(event).await.is_err() {
            tracing::debug!("Inbound receiver dropped, stopping MQTT event loop");
            break;
        }
    }

    connected.store(false, Ordering::Release);
}

/// Builder for [`MqttTransport`].
///
/// # Examples
///
/// ```
/// use bhyve_lib::protocol::MqttTransport;
///
/// let transport = MqttTransport::builder()
///     .host("broker.local")
///     .prefix("garden")
///     .build()
///     .unwrap();
///
/// assert_eq!(transport.prefix(), "garden");
/// ```
#[derive(Debug, Default)]
pub struct MqttTransportBuilder {
    config: MqttTransportConfig,
}

impl MqttTransportBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets a fixed client id (default: unique per connection).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Sets the bridge topic prefix (default: `bhyve`).
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Sets the keep-alive interval (default: 10 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 30 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Connects over TLS (default: plain TCP).
    #[must_use]
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.config.use_tls = use_tls;
        self
    }

    /// Sets the clean-session flag (default: true).
    #[must_use]
    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.config.clean_session = clean_session;
        self
    }

    /// Builds the transport without connecting.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` if the host or prefix is empty.
    pub fn build(self) -> Result<MqttTransport, TransportError> {
        if self.config.host.is_empty() {
            return Err(TransportError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }
        if self.config.prefix.is_empty() || self.config.prefix.contains(['+', '#']) {
            return Err(TransportError::InvalidAddress(format!(
                "invalid topic prefix: {:?}",
                self.config.prefix
            )));
        }

        Ok(MqttTransport {
            inner: Arc::new(MqttInner {
                config: self.config,
                client: Mutex::new(None),
                event_task: Mutex::new(None),
                connected: Arc::new(AtomicBool::new(false)),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_values() {
        let builder = MqttTransportBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert_eq!(builder.config.prefix, "bhyve");
        assert_eq!(builder.config.keep_alive, Duration::from_secs(10));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(30));
        assert!(builder.config.clean_session);
        assert!(!builder.config.use_tls);
    }

    #[test]
    fn default_client_ids_are_unique() {
        let transport = MqttTransport::builder().host("10.0.0.2").build().unwrap();
        let first = transport.mqtt_options().client_id();
        let second = transport.mqtt_options().client_id();
        assert!(first.starts_with("bhyve_"));
        assert_ne!(first, second);

        let named = MqttTransport::builder()
            .host("10.0.0.2")
            .client_id("garden-client")
            .build()
            .unwrap();
        assert_eq!(named.mqtt_options().client_id(), "garden-client");
    }

    #[test]
    fn builder_chain() {
        let builder = MqttTransportBuilder::default()
            .host("10.0.0.2")
            .port(8883)
            .credentials("admin", "secret")
            .client_id("garden-client")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(15))
            .use_tls(true);

        assert_eq!(builder.config.host, "10.0.0.2");
        assert_eq!(builder.config.port, 8883);
        assert_eq!(builder.config.client_id.as_deref(), Some("garden-client"));
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
        assert!(builder.config.use_tls);
    }

    #[test]
    fn build_missing_host_fails() {
        let err = MqttTransportBuilder::default().build().unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
    }

    #[test]
    fn build_rejects_wildcard_prefix() {
        let err = MqttTransport::builder()
            .host("broker")
            .prefix("bhyve/#")
            .build()
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
    }

    #[test]
    fn vocabulary_carries_prefix() {
        let transport = MqttTransport::builder()
            .host("broker")
            .prefix("yard")
            .build()
            .unwrap();
        assert_eq!(
            transport.vocabulary(),
            Vocabulary::Mqtt {
                prefix: "yard".to_string()
            }
        );
        assert!(!transport.is_connected());
    }

    #[test]
    fn refused_credentials_map_to_authentication_failure() {
        let err = map_connection_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword,
        ));
        assert!(matches!(err, TransportError::AuthenticationFailed(_)));

        let err = map_connection_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable,
        ));
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let transport = MqttTransport::builder().host("broker").build().unwrap();
        let err = transport
            .send(RawMessage::new("bhyve/device/refresh", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
