// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud WebSocket transport.
//!
//! Frames are JSON envelopes exchanged on the `events` channel. A send to
//! the `devices` channel pulls device snapshots over REST and feeds the
//! response back into the inbound sequence, which is how a resync works on
//! this transport.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message, http::StatusCode};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::session::Session;
use super::topic_router::{CLOUD_DEVICES, CLOUD_EVENTS};
use super::{
    INBOUND_CHANNEL_CAPACITY, OutboundMessage, RawMessage, Transport, TransportEvent, Vocabulary,
};
use crate::error::TransportError;

/// Production realtime endpoint.
pub const DEFAULT_EVENTS_URL: &str = "wss://api.orbitbhyve.com/v1/events";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Transport over the cloud WebSocket.
///
/// `WebSocketTransport` is cheaply cloneable (via `Arc`).
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    events_url: String,
    session: Session,
    connection_timeout: Duration,
    http: reqwest::Client,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    inbound: parking_lot::Mutex<Option<mpsc::WeakSender<TransportEvent>>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Creates a new builder for configuring the transport.
    #[must_use]
    pub fn builder() -> WebSocketTransportBuilder {
        WebSocketTransportBuilder::default()
    }

    /// Returns the realtime endpoint.
    #[must_use]
    pub fn events_url(&self) -> &str {
        &self.inner.events_url
    }

    fn stop_reader(&self) {
        if let Some(task) = self.inner.reader.lock().take() {
            task.abort();
        }
    }

    /// Fetches snapshots and queues them inbound without waiting for room.
    ///
    /// The caller is usually the task that drains `inbound`, so a full
    /// channel is handed to a separate delivery task.
    async fn pull_snapshots(&self) -> Result<(), TransportError> {
        let inbound = self
            .inner
            .inbound
            .lock()
            .as_ref()
            .and_then(mpsc::WeakSender::upgrade)
            .ok_or(TransportError::NotConnected)?;

        let body = self.inner.session.fetch_devices(&self.inner.http).await?;
        deliver(&inbound, TransportEvent::Message(RawMessage::new(CLOUD_DEVICES, body)))
    }

    async fn send_frame(&self, frame: Message) -> Result<(), TransportError> {
        let mut sink = self.inner.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(frame).await?;
        Ok(())
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("events_url", &self.inner.events_url)
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

impl Transport for WebSocketTransport {
    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Cloud
    }

    async fn connect(
        &self,
        _subscriptions: &[String],
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.stop_reader();

        let timeout = self.inner.connection_timeout;
        let (stream, _response) =
            tokio::time::timeout(timeout, connect_async(self.inner.events_url.as_str()))
                .await
                .map_err(|_| {
                    TransportError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
                })?
                .map_err(handshake_error)?;
        let (mut sink, stream) = stream.split();

        let hello = serde_json::json!({
            "event": "app_connection",
            "orbit_session_token": self.inner.session.token(),
        });
        sink.send(Message::Text(hello.to_string())).await?;

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        *self.inner.inbound.lock() = Some(tx.downgrade());
        *self.inner.sink.lock().await = Some(sink);
        *self.inner.reader.lock() = Some(tokio::spawn(read_frames(stream, tx)));

        tracing::info!(url = %self.inner.events_url, "Connected to cloud WebSocket");
        Ok(rx)
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        match message.address.as_str() {
            CLOUD_DEVICES => self.pull_snapshots().await,
            CLOUD_EVENTS => {
                tracing::debug!("Sending cloud event frame");
                self.send_frame(Message::Text(message.payload)).await
            }
            other => Err(TransportError::InvalidAddress(other.to_string())),
        }
    }

    async fn heartbeat(&self) -> Result<(), TransportError> {
        self.send_frame(Message::Ping(Vec::new())).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        tracing::info!(url = %self.inner.events_url, "Disconnecting from cloud WebSocket");
        let sink = self.inner.sink.lock().await.take();
        *self.inner.inbound.lock() = None;
        let result = match sink {
            Some(mut sink) => sink.close().await.map_err(TransportError::from),
            None => Ok(()),
        };
        self.stop_reader();
        result
    }
}

/// Queues `event` on `inbound`, spawning the wait when the channel is full.
fn deliver(
    inbound: &mpsc::Sender<TransportEvent>,
    event: TransportEvent,
) -> Result<(), TransportError> {
    match inbound.try_send(event) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::debug!("Inbound channel full, delivering snapshots in background");
            let inbound = inbound.clone();
            tokio::spawn(async move {
                if inbound.send(event).await.is_err() {
                    tracing::warn!("Connection closed before snapshots were delivered");
                }
            });
            Ok(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            Err(TransportError::ChannelClosed("inbound".to_string()))
        }
    }
}

/// Maps a handshake rejection of the session token to an authentication
/// failure so that reconnecting stops.
fn handshake_error(err: tungstenite::Error) -> TransportError {
    if let tungstenite::Error::Http(response) = &err {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return TransportError::AuthenticationFailed(format!(
                "WebSocket handshake rejected with HTTP {}",
                status.as_u16()
            ));
        }
    }
    err.into()
}

/// Forwards frames until the socket closes.
async fn read_frames(mut stream: SplitStream<WsStream>, inbound: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => {
                TransportEvent::Message(RawMessage::new(CLOUD_EVENTS, text))
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => TransportEvent::Heartbeat,
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "Cloud WebSocket closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(error = %e, "Cloud WebSocket read error");
                break;
            }
        };
        if inbound.send(event).await.is_err() {
            break;
        }
    }
}

/// Builder for [`WebSocketTransport`].
#[derive(Debug)]
pub struct WebSocketTransportBuilder {
    events_url: String,
    session: Option<Session>,
    connection_timeout: Duration,
}

impl Default for WebSocketTransportBuilder {
    fn default() -> Self {
        Self {
            events_url: DEFAULT_EVENTS_URL.to_string(),
            session: None,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl WebSocketTransportBuilder {
    /// Sets the realtime endpoint (default: production).
    #[must_use]
    pub fn events_url(mut self, url: impl Into<String>) -> Self {
        self.events_url = url.into();
        self
    }

    /// Sets the authenticated session.
    #[must_use]
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Sets the connection timeout (default: 30 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = duration;
        self
    }

    /// Builds the transport without connecting.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` for a non-WebSocket URL,
    /// `TransportError::AuthenticationFailed` without a session, and
    /// `TransportError::Http` if the REST client cannot be created.
    pub fn build(self) -> Result<WebSocketTransport, TransportError> {
        if !(self.events_url.starts_with("ws://") || self.events_url.starts_with("wss://")) {
            return Err(TransportError::InvalidAddress(self.events_url));
        }
        let session = self.session.ok_or_else(|| {
            TransportError::AuthenticationFailed("a session is required".to_string())
        })?;
        let http = reqwest::Client::builder()
            .timeout(self.connection_timeout)
            .build()?;

        Ok(WebSocketTransport {
            inner: Arc::new(WsInner {
                events_url: self.events_url,
                session,
                connection_timeout: self.connection_timeout,
                http,
                sink: tokio::sync::Mutex::new(None),
                inbound: parking_lot::Mutex::new(None),
                reader: parking_lot::Mutex::new(None),
            }),
        })
    }
}
