// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Bhyve` Lib - A Rust library for Orbit B-hyve irrigation controllers.
//!
//! This library keeps a persistent realtime connection to either a local
//! MQTT bridge or the B-hyve cloud WebSocket, mirrors every device in an
//! in-memory store, and issues watering, mode and schedule commands whose
//! replies are correlated with the request that caused them.
//!
//! # Supported Features
//!
//! - **Device state**: connectivity, battery, signal, run mode, active station
//! - **Watering control**: start and stop stations, switch run mode
//! - **Schedules**: create, update, delete, enable and disable programs
//! - **Events**: typed callbacks per event kind and a broadcast event stream
//! - **Resilience**: heartbeat liveness, jittered backoff reconnection and a
//!   full resync after every connect
//!
//! # Transports
//!
//! - MQTT bridge (feature `mqtt`, enabled by default)
//! - Cloud WebSocket with REST login (feature `websocket`, enabled by default)
//! - In-memory transport for tests and demos (always available)
//!
//! # Quick Start
//!
//! ## MQTT Bridge
//!
//! ```no_run
//! use std::time::Duration;
//! use bhyve_lib::{BhyveClient, Confirmation};
//! use bhyve_lib::protocol::MqttTransport;
//! use bhyve_lib::types::{DeviceId, StationId};
//!
//! #[tokio::main]
//! async fn main() -> bhyve_lib::Result<()> {
//!     let transport = MqttTransport::builder()
//!         .host("192.168.1.20")
//!         .credentials("bhyve", "secret")
//!         .build()?;
//!
//!     let client = BhyveClient::builder(transport).open().await?;
//!
//!     // Wait for the device to report that watering started
//!     client
//!         .start_watering_with(
//!             &DeviceId::new("5c8b0d4e"),
//!             StationId::new(1)?,
//!             Duration::from_secs(300),
//!             Confirmation::Event { timeout: Duration::from_secs(5) },
//!         )
//!         .await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Cloud WebSocket
//!
//! ```no_run
//! use bhyve_lib::BhyveClient;
//! use bhyve_lib::protocol::{Session, WebSocketTransport};
//! use bhyve_lib::types::DeviceId;
//!
//! #[tokio::main]
//! async fn main() -> bhyve_lib::Result<()> {
//!     let session = Session::login(Session::DEFAULT_API_BASE, "me@example.com", "secret").await?;
//!     let transport = WebSocketTransport::builder().session(session).build()?;
//!
//!     let client = BhyveClient::builder(transport).open().await?;
//!     client.set_device_mode(&DeviceId::new("5c8b0d4e"), "off").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Callbacks (Event Subscriptions)
//!
//! ```no_run
//! use bhyve_lib::{BhyveClient, ConnectionState, subscription::Subscribable};
//! use bhyve_lib::protocol::MemoryTransport;
//!
//! #[tokio::main]
//! async fn main() -> bhyve_lib::Result<()> {
//!     let client = BhyveClient::builder(MemoryTransport::mqtt()).open().await?;
//!
//!     client.on_watering_started(|device_id, station| {
//!         println!("{device_id} started station {station:?}");
//!     });
//!
//!     client.on_connection_changed(|state, error| {
//!         if state == ConnectionState::Disconnected {
//!             println!("connection lost: {error:?}");
//!         }
//!     });
//!
//!     Ok(())
//! }
//! ```

mod client;
pub mod command;
pub mod error;
pub mod event;
pub mod protocol;
pub mod state;
pub mod subscription;
pub mod supervisor;
pub mod types;

pub use client::{BhyveClient, ClientBuilder, ClientConfig};
pub use command::{Command, CommandKind, Confirmation, CorrelationToken, PendingCommand};
pub use error::{DecodeError, Error, Result, TransportError, ValueError};
pub use event::{Event, EventBus, EventKind, ScheduleChange};
pub use protocol::{MemoryTransport, RawMessage, TopicRouter, Transport, Vocabulary};
pub use state::{Device, DeviceStore, Valve, WateringRecord};
pub use subscription::{CallbackRegistry, Subscribable, SubscriptionId};
pub use supervisor::{ConnectionState, ReconnectionPolicy};
pub use types::{DeviceId, RunMode, Schedule, ScheduleId, StationId};
