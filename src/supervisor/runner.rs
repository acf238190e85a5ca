// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The supervisor task.
//!
//! One task per open client owns the transport connection. It is the only
//! place that applies inbound events to the store, resolves pending
//! commands from events and puts commands on the wire, so all of these
//! happen in the order the transport delivered or the callers issued them.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use super::ConnectionState;
use crate::client::ClientConfig;
use crate::command::pending::{Outcome, PendingTable};
use crate::command::{Command, CorrelationToken};
use crate::error::TransportError;
use crate::event::{Event, EventBus, decoder};
use crate::protocol::{RawMessage, TopicRouter, Transport, TransportEvent};
use crate::state::DeviceStore;
use crate::subscription::CallbackRegistry;
use crate::types::DeviceId;

/// State shared between the client handle and its supervisor.
pub(crate) struct Core {
    pub(crate) config: ClientConfig,
    pub(crate) store: DeviceStore,
    pub(crate) pending: PendingTable,
    pub(crate) registry: CallbackRegistry,
    pub(crate) bus: EventBus,
    pub(crate) state: watch::Sender<ConnectionState>,
    /// Connected and resynced; commands go straight to the wire.
    pub(crate) ready: AtomicBool,
}

impl Core {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            store: DeviceStore::new(config.recent_capacity),
            pending: PendingTable::new(),
            registry: CallbackRegistry::new(),
            bus: EventBus::with_capacity(config.event_capacity),
            state: watch::Sender::new(ConnectionState::Disconnected),
            ready: AtomicBool::new(false),
            config,
        }
    }

    /// Delivers an event to callbacks, then to stream receivers.
    pub(crate) async fn emit(&self, event: Event) {
        let report = self
            .registry
            .dispatch(&event, self.config.handler_timeout)
            .await;
        tracing::trace!(
            kind = %event.kind(),
            delivered = report.delivered,
            failed = report.failed,
            timed_out = report.timed_out,
            "Event dispatched"
        );
        self.bus.publish(event);
    }

    pub(crate) async fn set_state(&self, state: ConnectionState, error: Option<String>) {
        let previous = self.state.send_replace(state);
        if previous == state {
            return;
        }
        match &error {
            Some(reason) => {
                tracing::warn!(from = %previous, to = %state, error = %reason, "Connection state changed");
            }
            None => tracing::info!(from = %previous, to = %state, "Connection state changed"),
        }
        self.emit(Event::ConnectionChanged { state, error }).await;
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Progress of the post-connect resync.
struct Resync {
    deadline: Instant,
    listed: Option<HashSet<DeviceId>>,
    detailed: HashSet<DeviceId>,
}

impl Resync {
    fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            listed: None,
            detailed: HashSet::new(),
        }
    }

    fn observe(&mut self, event: &Event) {
        match event {
            Event::DevicesList { device_ids } => {
                self.listed = Some(device_ids.iter().cloned().collect());
            }
            Event::DeviceDetails { device_id, .. } => {
                self.detailed.insert(device_id.clone());
            }
            _ => {}
        }
    }

    fn is_complete(&self) -> bool {
        self.listed
            .as_ref()
            .is_some_and(|listed| listed.is_subset(&self.detailed))
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Owns the transport connection for one open client.
pub(crate) struct Supervisor<T: Transport> {
    transport: Arc<T>,
    router: TopicRouter,
    core: Arc<Core>,
    commands: mpsc::Receiver<CorrelationToken>,
    shutdown: watch::Receiver<bool>,
    backlog: VecDeque<CorrelationToken>,
    attempt: u32,
}

impl<T: Transport> Supervisor<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        router: TopicRouter,
        core: Arc<Core>,
        commands: mpsc::Receiver<CorrelationToken>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            router,
            core,
            commands,
            shutdown,
            backlog: VecDeque::new(),
            attempt: 0,
        }
    }

    /// Runs sessions until shutdown or until reconnection gives up.
    ///
    /// `first` is the inbound sequence of the connection `open` made, or
    /// `None` when that attempt failed and the backoff starts right away.
    pub(crate) async fn run(mut self, first: Option<mpsc::Receiver<TransportEvent>>) {
        let mut inbound = first;
        loop {
            let rx = match inbound.take() {
                Some(rx) => rx,
                None => match self.reconnect().await {
                    Some(rx) => rx,
                    None => break,
                },
            };
            match self.session(rx).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(reason) => self.connection_lost(reason).await,
            }
        }
        self.stop().await;
    }

    async fn session(&mut self, mut rx: mpsc::Receiver<TransportEvent>) -> SessionEnd {
        self.attempt = 0;
        self.core.set_state(ConnectionState::Connected, None).await;

        let config = &self.core.config;
        let interval = config.heartbeat_interval;
        let degraded_after = config.degraded_after();
        let lost_after = config.lost_after();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_heard = Instant::now();

        let mut resync = Some(Resync::new(Instant::now() + config.resync_timeout));
        self.request_refresh().await;

        loop {
            let resync_deadline = resync.as_ref().map_or_else(Instant::now, |r| r.deadline);
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => return SessionEnd::Shutdown,

                inbound = rx.recv() => {
                    let Some(inbound) = inbound else {
                        return SessionEnd::Lost("connection closed".to_string());
                    };
                    last_heard = Instant::now();
                    if self.core.state() == ConnectionState::Degraded {
                        self.core.set_state(ConnectionState::Connected, None).await;
                    }
                    if let TransportEvent::Message(raw) = inbound {
                        self.process(raw, resync.as_mut()).await;
                    }
                    if resync.as_ref().is_some_and(Resync::is_complete) {
                        resync = None;
                        self.resync_finished(true).await;
                    }
                }

                token = self.commands.recv() => {
                    let Some(token) = token else {
                        return SessionEnd::Shutdown;
                    };
                    if resync.is_some() {
                        tracing::debug!(token = %token, "Command queued until resync completes");
                        self.backlog.push_back(token);
                    } else {
                        self.send_command(token).await;
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = self.transport.heartbeat().await {
                        tracing::debug!(error = %e, "Heartbeat failed");
                    }
                    let silent = last_heard.elapsed();
                    if silent >= lost_after {
                        return SessionEnd::Lost(format!(
                            "no traffic for {} ms",
                            silent.as_millis()
                        ));
                    }
                    if silent >= degraded_after && self.core.state() == ConnectionState::Connected {
                        self.core.set_state(ConnectionState::Degraded, None).await;
                    }
                }

                () = tokio::time::sleep_until(resync_deadline), if resync.is_some() => {
                    resync = None;
                    self.resync_finished(false).await;
                }
            }
        }
    }

    /// Decodes one inbound message and delivers its events.
    async fn process(&mut self, raw: RawMessage, mut resync: Option<&mut Resync>) {
        let route = self.router.resolve(&raw.address, &raw.payload);
        let events = match decoder::decode(&route, &raw.address, &raw.payload) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(address = %raw.address, error = %e, "Dropping malformed payload");
                return;
            }
        };

        for event in events {
            self.core.store.apply(&event);
            if let Some(resync) = resync.as_deref_mut() {
                resync.observe(&event);
            }
            if let Some(token) = self.core.pending.observe(&event) {
                tracing::debug!(token = %token, kind = %event.kind(), "Pending command resolved");
            }
            self.core.emit(event).await;
        }
    }

    async fn request_refresh(&self) {
        let Some(message) =
            Command::RefreshDevices.encode(&self.router, &CorrelationToken::new(), Utc::now())
        else {
            return;
        };
        tracing::debug!(address = %message.address, "Requesting resync");
        match tokio::time::timeout(self.core.config.send_timeout, self.transport.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Resync request failed"),
            Err(_) => tracing::warn!("Resync request timed out"),
        }
    }

    async fn resync_finished(&mut self, complete: bool) {
        let devices = self.core.store.len();
        if complete {
            tracing::info!(devices, "Resync completed");
        } else {
            tracing::warn!(devices, queued = self.backlog.len(), "Resync timed out");
            let waited = millis(self.core.config.resync_timeout);
            for token in self.backlog.drain(..) {
                self.core.pending.fail(&token, &Outcome::TimedOut(waited));
            }
        }
        self.core.ready.store(true, Ordering::Release);
        self.core
            .emit(Event::ResyncCompleted { devices, complete })
            .await;

        while let Some(token) = self.backlog.pop_front() {
            self.send_command(token).await;
        }
    }

    async fn send_command(&self, token: CorrelationToken) {
        let Some(command) = self.core.pending.command(&token) else {
            tracing::trace!(token = %token, "Skipping cancelled command");
            return;
        };
        let Some(message) = command.encode(&self.router, &token, Utc::now()) else {
            self.core.pending.fail(
                &token,
                &Outcome::Rejected(format!("{} has no address on this transport", command.kind())),
            );
            return;
        };

        tracing::debug!(
            token = %token,
            kind = %command.kind(),
            address = %message.address,
            "Sending command"
        );
        let send_timeout = self.core.config.send_timeout;
        match tokio::time::timeout(send_timeout, self.transport.send(message)).await {
            Ok(Ok(())) => self.core.pending.mark_sent(&token),
            Ok(Err(e)) => {
                tracing::warn!(token = %token, error = %e, "Command send failed");
                self.core
                    .pending
                    .fail(&token, &Outcome::ConnectionLost(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(token = %token, "Command send timed out");
                self.core
                    .pending
                    .fail(&token, &Outcome::TimedOut(millis(send_timeout)));
            }
        }
    }

    async fn connection_lost(&mut self, reason: String) {
        if let Err(e) = self.transport.disconnect().await {
            tracing::debug!(error = %e, "Disconnect after connection loss failed");
        }
        self.core.ready.store(false, Ordering::Release);

        if self.core.config.offline_queue.is_some() {
            self.backlog = self.core.pending.requeue().into();
            tracing::info!(queued = self.backlog.len(), "Holding pending commands for reconnection");
        } else {
            self.backlog.clear();
            let failed = self
                .core
                .pending
                .fail_all(&Outcome::ConnectionLost(reason.clone()));
            if failed > 0 {
                tracing::warn!(count = failed, "Failed pending commands after connection loss");
            }
        }
        self.core
            .set_state(ConnectionState::Disconnected, Some(reason))
            .await;
    }

    /// Waits out the backoff and reconnects.
    ///
    /// Returns `None` on shutdown, on rejected credentials, and when the
    /// policy gives up.
    async fn reconnect(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        let policy = self.core.config.reconnection.clone();
        let subscriptions = self.router.subscriptions();
        loop {
            if !policy.should_retry(self.attempt) {
                tracing::warn!(attempts = self.attempt, "Giving up reconnecting");
                return None;
            }
            let delay = policy.delay(self.attempt);
            self.attempt += 1;
            tracing::info!(
                attempt = self.attempt,
                delay_ms = millis(delay),
                "Reconnecting after backoff"
            );

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.changed() => return None,
                    token = self.commands.recv() => match token {
                        Some(token) => self.hold_or_fail(token),
                        None => return None,
                    },
                    () = &mut sleep => break,
                }
            }

            self.core.set_state(ConnectionState::Connecting, None).await;
            let connect_timeout = self.core.config.connect_timeout;
            let error = match tokio::time::timeout(
                connect_timeout,
                self.transport.connect(&subscriptions),
            )
            .await
            {
                Ok(Ok(rx)) => return Some(rx),
                Ok(Err(TransportError::AuthenticationFailed(reason))) => {
                    tracing::error!(reason = %reason, "Credentials rejected, not retrying");
                    self.core
                        .set_state(
                            ConnectionState::Disconnected,
                            Some(format!("authentication failed: {reason}")),
                        )
                        .await;
                    return None;
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout(millis(connect_timeout)),
            };
            self.core
                .set_state(ConnectionState::Disconnected, Some(error.to_string()))
                .await;
        }
    }

    /// Handles a command issued while no connection is open.
    fn hold_or_fail(&mut self, token: CorrelationToken) {
        if self.core.config.offline_queue.is_some() {
            tracing::debug!(token = %token, "Command held until reconnection");
            self.backlog.push_back(token);
        } else {
            self.core.pending.fail(
                &token,
                &Outcome::ConnectionLost(TransportError::NotConnected.to_string()),
            );
        }
    }

    async fn stop(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            tracing::debug!(error = %e, "Disconnect failed");
        }
        self.core.ready.store(false, Ordering::Release);
        self.backlog.clear();
        let failed = self
            .core
            .pending
            .fail_all(&Outcome::ConnectionLost("client closed".to_string()));
        if failed > 0 {
            tracing::debug!(count = failed, "Failed pending commands on close");
        }
        self.core
            .set_state(ConnectionState::Disconnected, None)
            .await;
        tracing::info!("Supervisor stopped");
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
