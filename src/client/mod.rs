// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The realtime client.
//!
//! [`BhyveClient`] ties a [`Transport`] to the device store, the pending
//! command table and the event dispatcher. Commands validate their input
//! against the store before anything reaches the wire; queries read the
//! store directly.
//!
//! Dropping the future of a command that waits for confirmation cancels the
//! caller's interest: the pending entry is released and a late reply is
//! dropped as unmatched.

mod config;

pub use config::ClientConfig;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::command::pending::Expectation;
use crate::command::{Command, Confirmation, CorrelationToken, PendingCommand};
use crate::error::{Error, Result, TransportError};
use crate::event::{Event, EventKind};
use crate::protocol::{TopicRouter, Transport, TransportEvent};
use crate::state::{Device, Valve, WateringRecord};
use crate::subscription::{HandlerResult, Subscribable, SubscriptionId};
use crate::supervisor::{ConnectionState, Core, ReconnectionPolicy, Supervisor};
use crate::types::{
    DeviceId, IntoRunMode, RunMode, Schedule, ScheduleId, StationId, run_minutes,
};

/// Capacity of the command queue between callers and the supervisor.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Realtime client for B-hyve controllers.
///
/// Cheaply cloneable; clones share the connection, the store and the
/// subscriptions.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use bhyve_lib::BhyveClient;
/// use bhyve_lib::protocol::MqttTransport;
/// use bhyve_lib::types::{DeviceId, StationId};
///
/// # async fn example() -> bhyve_lib::Result<()> {
/// let transport = MqttTransport::builder().host("192.168.1.20").build()?;
/// let client = BhyveClient::builder(transport).open().await?;
///
/// for device in client.list_devices() {
///     println!("{} ({})", device.name(), device.id());
/// }
///
/// let device_id = DeviceId::new("5c8b0d4e");
/// client
///     .start_watering(&device_id, StationId::new(1)?, Duration::from_secs(300))
///     .await?;
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct BhyveClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T: Transport> {
    transport: Arc<T>,
    router: TopicRouter,
    core: Arc<Core>,
    link: Mutex<Option<Link>>,
}

/// Handles to a running supervisor.
struct Link {
    commands: mpsc::Sender<CorrelationToken>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<T: Transport> Drop for ClientInner<T> {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            let _ = link.shutdown.send(true);
        }
    }
}

impl<T: Transport> Clone for BhyveClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for BhyveClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BhyveClient")
            .field("vocabulary", self.inner.router.vocabulary())
            .field("state", &self.connection_state())
            .field("devices", &self.inner.core.store.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> BhyveClient<T> {
    /// Creates a client with the default configuration.
    ///
    /// The client is closed until [`open`](Self::open) is called.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Creates a client with a configuration.
    #[must_use]
    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        let router = TopicRouter::new(transport.vocabulary());
        Self {
            inner: Arc::new(ClientInner {
                transport: Arc::new(transport),
                router,
                core: Arc::new(Core::new(config)),
                link: Mutex::new(None),
            }),
        }
    }

    /// Starts building a client.
    #[must_use]
    pub fn builder(transport: T) -> ClientBuilder<T> {
        ClientBuilder::new(transport)
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.core.config
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    // ========== Lifecycle ==========

    /// Connects and starts supervising the connection.
    ///
    /// The first connection attempt is made here and its failure is
    /// returned. Unless the credentials were rejected, the client keeps
    /// retrying in the background after such a failure, the same way it
    /// does after a lost connection; `close` stops it. Opening an open
    /// client does nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` when the credentials are rejected and
    /// `Error::Connection` when the endpoint cannot be reached in time.
    pub async fn open(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let core = &self.inner.core;
        core.set_state(ConnectionState::Connecting, None).await;

        let subscriptions = self.inner.router.subscriptions();
        let connect_timeout = core.config.connect_timeout;
        let connected = match tokio::time::timeout(
            connect_timeout,
            self.inner.transport.connect(&subscriptions),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(
                u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };
        match connected {
            Ok(inbound) => {
                core.ready.store(false, Ordering::Release);
                core.set_state(ConnectionState::Connected, None).await;
                self.supervise(Some(inbound));
                tracing::info!(subscriptions = subscriptions.len(), "Client opened");
                Ok(())
            }
            Err(e @ TransportError::AuthenticationFailed(_)) => {
                core.set_state(ConnectionState::Disconnected, Some(e.to_string()))
                    .await;
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!(error = %e, "First connection failed, retrying in background");
                core.set_state(ConnectionState::Disconnected, Some(e.to_string()))
                    .await;
                self.supervise(None);
                Err(e.into())
            }
        }
    }

    fn supervise(&self, first: Option<mpsc::Receiver<TransportEvent>>) {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(
            Arc::clone(&self.inner.transport),
            self.inner.router.clone(),
            Arc::clone(&self.inner.core),
            command_rx,
            shutdown_rx,
        );
        let task = tokio::spawn(supervisor.run(first));

        let previous = self.inner.link.lock().replace(Link {
            commands,
            shutdown,
            task,
        });
        if let Some(previous) = previous {
            let _ = previous.shutdown.send(true);
        }
    }

    /// Disconnects and stops reconnecting.
    ///
    /// Pending commands fail with `Error::Connection`. The device store and
    /// the subscriptions are kept; the client can be opened again.
    pub async fn close(&self) {
        let link = self.inner.link.lock().take();
        let Some(link) = link else {
            return;
        };
        let _ = link.shutdown.send(true);
        drop(link.commands);
        if let Err(e) = link.task.await {
            tracing::error!(error = %e, "Supervisor task failed");
        }
        tracing::info!("Client closed");
    }

    /// Returns whether the supervisor is running.
    ///
    /// An open client may still be reconnecting; see
    /// [`connection_state`](Self::connection_state).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner
            .link
            .lock()
            .as_ref()
            .is_some_and(|link| !link.task.is_finished())
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.core.state.borrow()
    }

    /// Returns a receiver that observes connection state changes.
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.core.state.subscribe()
    }

    /// Subscribes to every event.
    ///
    /// Receivers that fall behind by more than the configured event
    /// capacity lose the oldest events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.core.bus.subscribe()
    }

    // ========== Queries ==========

    /// Returns a snapshot of every known device, ordered by id.
    #[must_use]
    pub fn list_devices(&self) -> Vec<Arc<Device>> {
        self.inner.core.store.list()
    }

    /// Returns a snapshot of a device.
    #[must_use]
    pub fn get_device(&self, device_id: &DeviceId) -> Option<Arc<Device>> {
        self.inner.core.store.get(device_id)
    }

    /// Returns whether the device is watering. Unknown devices are not.
    #[must_use]
    pub fn is_device_watering(&self, device_id: &DeviceId) -> bool {
        self.inner.core.store.is_watering(device_id)
    }

    /// Returns the run mode of the device, if reported.
    #[must_use]
    pub fn get_device_mode(&self, device_id: &DeviceId) -> Option<RunMode> {
        self.inner.core.store.current_mode(device_id)
    }

    /// Returns the station the device is watering, if any.
    #[must_use]
    pub fn get_watering_station(&self, device_id: &DeviceId) -> Option<StationId> {
        self.inner.core.store.current_station(device_id)
    }

    /// Returns the valves of the device.
    #[must_use]
    pub fn get_valves(&self, device_id: &DeviceId) -> Option<Vec<Valve>> {
        self.get_device(device_id)
            .map(|device| device.valves().to_vec())
    }

    /// Returns the schedules of the device.
    #[must_use]
    pub fn get_schedules(&self, device_id: &DeviceId) -> Option<Vec<Schedule>> {
        self.inner.core.store.schedules(device_id)
    }

    /// Returns the recent watering log, oldest first.
    #[must_use]
    pub fn recent_events(&self) -> Vec<WateringRecord> {
        self.inner.core.store.recent_events()
    }

    /// Returns the commands still waiting for resolution, in issue order.
    #[must_use]
    pub fn pending_commands(&self) -> Vec<PendingCommand> {
        self.inner.core.pending.snapshot()
    }

    // ========== Watering ==========

    /// Starts watering a station.
    ///
    /// Returns once the transport accepted the command.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a zero or oversized duration,
    /// `Error::UnknownDevice`, `Error::DeviceOffline`,
    /// `Error::UnknownStation`, and `Error::Connection` when the command
    /// cannot be sent.
    pub async fn start_watering(
        &self,
        device_id: &DeviceId,
        station: StationId,
        duration: Duration,
    ) -> Result<()> {
        self.start_watering_with(device_id, station, duration, Confirmation::Sent)
            .await
    }

    /// Starts watering a station, optionally waiting for the device to
    /// report that watering started.
    ///
    /// # Errors
    ///
    /// As [`start_watering`](Self::start_watering), plus `Error::Timeout`
    /// when the confirmation does not arrive in time and `Error::Conflict`
    /// when a start with different parameters is already pending.
    pub async fn start_watering_with(
        &self,
        device_id: &DeviceId,
        station: StationId,
        duration: Duration,
        confirmation: Confirmation,
    ) -> Result<()> {
        let minutes = run_minutes(duration)?;
        let device = self.online_device(device_id)?;
        if device.valve(station).is_none() {
            return Err(Error::UnknownStation {
                device_id: device_id.clone(),
                station,
            });
        }

        let command = Command::StartWatering {
            device_id: device_id.clone(),
            station,
            minutes,
        };
        let (expectation, wait) = match confirmation {
            Confirmation::Sent => (Expectation::Sent, self.config().send_timeout),
            Confirmation::Event { timeout } => (Expectation::WateringStarted { station }, timeout),
        };
        self.execute(command, expectation, wait).await
    }

    /// Stops watering.
    ///
    /// Succeeds when nothing is watering.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownDevice` and `Error::Connection` when the
    /// command cannot be sent.
    pub async fn stop_watering(&self, device_id: &DeviceId) -> Result<()> {
        let device = self.known_device(device_id)?;
        let command = Command::StopWatering {
            device_id: device_id.clone(),
            station: device.current_station(),
        };
        let wait = self.config().send_timeout;
        self.execute(command, Expectation::Sent, wait).await
    }

    // ========== Mode ==========

    /// Sets the run mode.
    ///
    /// Accepts a [`RunMode`] or its name (`"auto"`, `"manual"`, `"off"`).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for an unknown mode name,
    /// `Error::UnknownDevice`, `Error::DeviceOffline`, and
    /// `Error::Connection` when the command cannot be sent.
    pub async fn set_device_mode(&self, device_id: &DeviceId, mode: impl IntoRunMode) -> Result<()> {
        self.set_device_mode_with(device_id, mode, Confirmation::Sent)
            .await
    }

    /// Sets the run mode, optionally waiting for the device to report it.
    ///
    /// # Errors
    ///
    /// As [`set_device_mode`](Self::set_device_mode), plus `Error::Timeout`
    /// and `Error::Conflict`.
    pub async fn set_device_mode_with(
        &self,
        device_id: &DeviceId,
        mode: impl IntoRunMode,
        confirmation: Confirmation,
    ) -> Result<()> {
        let mode = mode.into_run_mode()?;
        self.online_device(device_id)?;

        let command = Command::SetMode {
            device_id: device_id.clone(),
            mode,
        };
        let (expectation, wait) = match confirmation {
            Confirmation::Sent => (Expectation::Sent, self.config().send_timeout),
            Confirmation::Event { timeout } => (Expectation::ModeChanged { mode }, timeout),
        };
        self.execute(command, expectation, wait).await
    }

    // ========== Refresh ==========

    /// Requests the device list and the details of every device.
    ///
    /// The replies update the store as they arrive.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` when the request cannot be sent.
    pub async fn refresh_devices(&self) -> Result<()> {
        let wait = self.config().send_timeout;
        self.execute(Command::RefreshDevices, Expectation::Sent, wait)
            .await
    }

    /// Requests the schedules of a device.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownDevice` and `Error::Connection` when the
    /// request cannot be sent.
    pub async fn refresh_schedules(&self, device_id: &DeviceId) -> Result<()> {
        self.known_device(device_id)?;
        let command = Command::RefreshSchedules {
            device_id: device_id.clone(),
        };
        let wait = self.config().send_timeout;
        self.execute(command, Expectation::Sent, wait).await
    }

    // ========== Schedules ==========

    /// Creates a schedule.
    ///
    /// Resolves when the service acknowledges the request. The store picks
    /// up the schedule from the change event that follows.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for an invalid schedule,
    /// `Error::UnknownDevice`, `Error::UnknownStation` for a run on a
    /// station the device does not have, `Error::Rejected`,
    /// `Error::Timeout`, and `Error::Connection`.
    pub async fn create_schedule(&self, device_id: &DeviceId, schedule: Schedule) -> Result<()> {
        schedule.validate()?;
        let device = self.known_device(device_id)?;
        check_stations(&device, &schedule)?;

        let command = Command::CreateSchedule {
            device_id: device_id.clone(),
            schedule,
        };
        self.execute_acknowledged(command).await
    }

    /// Updates a schedule.
    ///
    /// # Errors
    ///
    /// As [`create_schedule`](Self::create_schedule), plus
    /// `Error::InvalidArgument` when the schedule has no id and
    /// `Error::UnknownSchedule` when the device has no schedule with it.
    pub async fn update_schedule(&self, device_id: &DeviceId, schedule: Schedule) -> Result<()> {
        schedule.validate()?;
        let schedule_id = schedule
            .id()
            .cloned()
            .ok_or(crate::error::ValueError::MissingScheduleId)?;
        let device = self.known_device(device_id)?;
        check_schedule(&device, &schedule_id)?;
        check_stations(&device, &schedule)?;

        let command = Command::UpdateSchedule {
            device_id: device_id.clone(),
            schedule,
        };
        self.execute_acknowledged(command).await
    }

    /// Deletes a schedule.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownDevice`, `Error::UnknownSchedule`,
    /// `Error::Rejected`, `Error::Timeout`, and `Error::Connection`.
    pub async fn delete_schedule(&self, device_id: &DeviceId, schedule_id: &ScheduleId) -> Result<()> {
        let device = self.known_device(device_id)?;
        check_schedule(&device, schedule_id)?;
        let command = Command::DeleteSchedule {
            device_id: device_id.clone(),
            schedule_id: schedule_id.clone(),
        };
        self.execute_acknowledged(command).await
    }

    /// Enables a schedule.
    ///
    /// # Errors
    ///
    /// As [`delete_schedule`](Self::delete_schedule).
    pub async fn enable_schedule(&self, device_id: &DeviceId, schedule_id: &ScheduleId) -> Result<()> {
        let device = self.known_device(device_id)?;
        check_schedule(&device, schedule_id)?;
        let command = Command::EnableSchedule {
            device_id: device_id.clone(),
            schedule_id: schedule_id.clone(),
        };
        self.execute_acknowledged(command).await
    }

    /// Disables a schedule.
    ///
    /// # Errors
    ///
    /// As [`delete_schedule`](Self::delete_schedule).
    pub async fn disable_schedule(&self, device_id: &DeviceId, schedule_id: &ScheduleId) -> Result<()> {
        let device = self.known_device(device_id)?;
        check_schedule(&device, schedule_id)?;
        let command = Command::DisableSchedule {
            device_id: device_id.clone(),
            schedule_id: schedule_id.clone(),
        };
        self.execute_acknowledged(command).await
    }

    // ========== Internals ==========

    fn known_device(&self, device_id: &DeviceId) -> Result<Arc<Device>> {
        self.get_device(device_id)
            .ok_or_else(|| Error::UnknownDevice(device_id.clone()))
    }

    fn online_device(&self, device_id: &DeviceId) -> Result<Arc<Device>> {
        let device = self.known_device(device_id)?;
        if !device.is_connected() {
            return Err(Error::DeviceOffline(device_id.clone()));
        }
        Ok(device)
    }

    async fn execute_acknowledged(&self, command: Command) -> Result<()> {
        let wait = self.config().ack_timeout;
        self.execute(command, Expectation::Ack, wait).await
    }

    /// Registers a command, hands it to the supervisor and waits for it.
    async fn execute(&self, command: Command, expectation: Expectation, wait: Duration) -> Result<()> {
        let commands = self
            .inner
            .link
            .lock()
            .as_ref()
            .map(|link| link.commands.clone())
            .ok_or(Error::Connection(TransportError::NotConnected))?;

        let core = &self.inner.core;
        let allowance = match self.connection_state() {
            ConnectionState::Disconnected | ConnectionState::Connecting => core
                .config
                .offline_queue
                .ok_or(Error::Connection(TransportError::NotConnected))?,
            ConnectionState::Connected | ConnectionState::Degraded => {
                if core.ready.load(Ordering::Acquire) {
                    Duration::ZERO
                } else {
                    core.config.resync_timeout
                }
            }
        };

        let kind = command.kind();
        let deadline = Instant::now() + allowance + wait;
        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        let ticket = core.pending.register(command, expectation, deadline, wait_ms)?;

        if ticket.is_new() {
            tracing::debug!(token = %ticket.token(), kind = %kind, "Issuing command");
            commands
                .send(ticket.token().clone())
                .await
                .map_err(|_| Error::Connection(TransportError::ChannelClosed("supervisor".to_string())))?;
        } else {
            tracing::debug!(token = %ticket.token(), kind = %kind, "Joined identical pending command");
        }
        ticket.wait().await
    }
}

impl<T: Transport> Subscribable for BhyveClient<T> {
    fn on_event<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.core.registry.on_event(kind, callback)
    }

    fn off_event(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.inner.core.registry.off_event(kind, id)
    }
}

fn check_stations(device: &Device, schedule: &Schedule) -> Result<()> {
    match schedule
        .runs()
        .iter()
        .find(|run| device.valve(run.station).is_none())
    {
        Some(run) => Err(Error::UnknownStation {
            device_id: device.id().clone(),
            station: run.station,
        }),
        None => Ok(()),
    }
}

fn check_schedule(device: &Device, schedule_id: &ScheduleId) -> Result<()> {
    if device
        .schedules()
        .iter()
        .any(|s| s.id() == Some(schedule_id))
    {
        Ok(())
    } else {
        Err(Error::UnknownSchedule {
            device_id: device.id().clone(),
            schedule_id: schedule_id.clone(),
        })
    }
}

/// Builder for [`BhyveClient`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bhyve_lib::BhyveClient;
/// use bhyve_lib::protocol::MemoryTransport;
/// use bhyve_lib::supervisor::ReconnectionPolicy;
///
/// let client = BhyveClient::builder(MemoryTransport::mqtt())
///     .reconnection(ReconnectionPolicy::new().with_max_retries(3))
///     .ack_timeout(Duration::from_secs(5))
///     .build();
///
/// assert!(!client.is_open());
/// assert!(client.list_devices().is_empty());
/// ```
#[derive(Debug)]
pub struct ClientBuilder<T: Transport> {
    transport: T,
    config: ClientConfig,
}

impl<T: Transport> ClientBuilder<T> {
    fn new(transport: T) -> Self {
        Self {
            transport,
            config: ClientConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.config.reconnection = policy;
        self
    }

    /// Sets the connection attempt timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Sets the resync timeout.
    #[must_use]
    pub fn resync_timeout(mut self, timeout: Duration) -> Self {
        self.config.resync_timeout = timeout;
        self
    }

    /// Sets the acknowledgement timeout for schedule commands.
    #[must_use]
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Sets the callback timeout.
    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = timeout;
        self
    }

    /// Holds commands issued while disconnected for up to `window`.
    #[must_use]
    pub fn offline_queue(mut self, window: Duration) -> Self {
        self.config.offline_queue = Some(window);
        self
    }

    /// Builds a closed client.
    #[must_use]
    pub fn build(self) -> BhyveClient<T> {
        BhyveClient::with_config(self.transport, self.config)
    }

    /// Builds the client and opens it.
    ///
    /// The client is dropped when the first attempt fails, which also stops
    /// its background retries. Use [`build`](Self::build) and
    /// [`BhyveClient::open`] to keep retrying after such a failure.
    ///
    /// # Errors
    ///
    /// Returns the error of [`BhyveClient::open`].
    pub async fn open(self) -> Result<BhyveClient<T>> {
        let client = self.build();
        client.open().await?;
        Ok(client)
    }
}
