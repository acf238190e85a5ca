// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mapping between logical channels and wire addresses.
//!
//! # Architecture
//!
//! ```text
//! MQTT: bhyve/device/abc123/status → {"status":"watering_in_progress",...}
//!                     ↓
//!           TopicRouter.resolve()
//!                     ↓
//!   Route::Device { device_id: abc123, channel: Status }
//!                     ↓
//!             decoder → Event
//! ```
//!
//! The cloud WebSocket carries every frame on one channel; the device is
//! named inside the envelope, so resolving a cloud address peeks at the
//! payload's `device_id`.

use serde::Deserialize;

use crate::types::{DeviceId, StationId};

/// Default MQTT topic prefix used by the bridge.
pub const DEFAULT_MQTT_PREFIX: &str = "bhyve";

/// Cloud channel carrying realtime event frames.
pub(crate) const CLOUD_EVENTS: &str = "events";

/// Cloud channel carrying REST device snapshots.
pub(crate) const CLOUD_DEVICES: &str = "devices";

/// Concrete wire vocabulary of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vocabulary {
    /// MQTT bridge topics under a prefix.
    Mqtt {
        /// Topic prefix, `bhyve` by default.
        prefix: String,
    },
    /// Cloud WebSocket envelopes.
    Cloud,
}

impl Vocabulary {
    /// MQTT vocabulary with the default prefix.
    #[must_use]
    pub fn mqtt() -> Self {
        Self::Mqtt {
            prefix: DEFAULT_MQTT_PREFIX.to_string(),
        }
    }
}

/// Per-device logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceChannel {
    /// Watering status.
    Status,
    /// Full device details.
    Details,
    /// Realtime event messages.
    Message,
    /// Per-station information.
    Zone(StationId),
    /// Per-station control.
    ZoneControl(StationId),
    /// Generic command envelope.
    Command,
    /// Refresh request for one device.
    Refresh,
}

/// Channel that is not tied to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemChannel {
    /// Bridge online flag.
    Online,
    /// Bridge heartbeat.
    Alive,
    /// List of device ids.
    DevicesList,
    /// Request for a full device refresh.
    RefreshRequest,
    /// Cloud event frame without a device.
    Events,
    /// Cloud device snapshots.
    Snapshots,
}

/// Logical destination or origin of a wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A per-device channel.
    Device {
        /// The device.
        device_id: DeviceId,
        /// The channel.
        channel: DeviceChannel,
    },
    /// A channel not tied to a device.
    System(SystemChannel),
    /// The address is not part of the vocabulary.
    Unrecognized,
}

impl Route {
    /// Shorthand for a device route.
    #[must_use]
    pub fn device(device_id: &DeviceId, channel: DeviceChannel) -> Self {
        Self::Device {
            device_id: device_id.clone(),
            channel,
        }
    }
}

/// Head of a cloud envelope; only the device is needed to route it.
#[derive(Deserialize)]
struct EnvelopeHead {
    #[serde(default)]
    device_id: Option<String>,
}

/// Maps logical routes to wire addresses and back for one vocabulary.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    vocabulary: Vocabulary,
}

impl TopicRouter {
    /// Creates a router for the given vocabulary.
    #[must_use]
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    /// Returns the vocabulary.
    #[must_use]
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Returns the addresses a transport must subscribe to.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        match &self.vocabulary {
            Vocabulary::Mqtt { prefix } => vec![
                format!("{prefix}/online"),
                format!("{prefix}/alive"),
                format!("{prefix}/devices"),
                format!("{prefix}/device/+/status"),
                format!("{prefix}/device/+/details"),
                format!("{prefix}/device/+/message"),
            ],
            Vocabulary::Cloud => Vec::new(),
        }
    }

    /// Returns the wire address of a route, or `None` when the vocabulary
    /// has no such channel.
    #[must_use]
    pub fn address(&self, route: &Route) -> Option<String> {
        match &self.vocabulary {
            Vocabulary::Mqtt { prefix } => mqtt_address(prefix, route),
            Vocabulary::Cloud => cloud_address(route),
        }
    }

    /// Resolves a wire address to its route.
    ///
    /// The payload is only consulted for cloud envelopes.
    #[must_use]
    pub fn resolve(&self, address: &str, payload: &str) -> Route {
        let route = match &self.vocabulary {
            Vocabulary::Mqtt { prefix } => resolve_mqtt(prefix, address),
            Vocabulary::Cloud => resolve_cloud(address, payload),
        };
        if route == Route::Unrecognized {
            tracing::trace!(address = %address, "Address outside vocabulary");
        }
        route
    }
}

fn mqtt_address(prefix: &str, route: &Route) -> Option<String> {
    let address = match route {
        Route::Device { device_id, channel } => {
            let base = format!("{prefix}/device/{device_id}");
            match channel {
                DeviceChannel::Status => format!("{base}/status"),
                DeviceChannel::Details => format!("{base}/details"),
                DeviceChannel::Message => format!("{base}/message"),
                DeviceChannel::Zone(station) => format!("{base}/zone/{station}"),
                DeviceChannel::ZoneControl(station) => format!("{base}/zone/{station}/set"),
                DeviceChannel::Command => format!("{base}/command"),
                DeviceChannel::Refresh => format!("{base}/refresh"),
            }
        }
        Route::System(SystemChannel::Online) => format!("{prefix}/online"),
        Route::System(SystemChannel::Alive) => format!("{prefix}/alive"),
        Route::System(SystemChannel::DevicesList) => format!("{prefix}/devices"),
        Route::System(SystemChannel::RefreshRequest) => format!("{prefix}/device/refresh"),
        Route::System(SystemChannel::Events | SystemChannel::Snapshots) | Route::Unrecognized => {
            return None;
        }
    };
    Some(address)
}

fn cloud_address(route: &Route) -> Option<String> {
    match route {
        Route::Device { .. } | Route::System(SystemChannel::Events) => Some(CLOUD_EVENTS.to_string()),
        Route::System(
            SystemChannel::Snapshots | SystemChannel::RefreshRequest | SystemChannel::DevicesList,
        ) => Some(CLOUD_DEVICES.to_string()),
        Route::System(SystemChannel::Online | SystemChannel::Alive) | Route::Unrecognized => None,
    }
}

fn resolve_mqtt(prefix: &str, address: &str) -> Route {
    let Some(rest) = address
        .strip_prefix(prefix)
        .and_then(|r| r.strip_prefix('/'))
    else {
        return Route::Unrecognized;
    };

    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        ["online"] => Route::System(SystemChannel::Online),
        ["alive"] => Route::System(SystemChannel::Alive),
        ["devices"] => Route::System(SystemChannel::DevicesList),
        ["device", "refresh"] => Route::System(SystemChannel::RefreshRequest),
        ["device", id, tail @ ..] if !id.is_empty() => {
            let channel = match tail {
                ["status"] => Some(DeviceChannel::Status),
                ["details"] => Some(DeviceChannel::Details),
                ["message"] => Some(DeviceChannel::Message),
                ["command"] => Some(DeviceChannel::Command),
                ["refresh"] => Some(DeviceChannel::Refresh),
                ["zone", n] => parse_station(n).map(DeviceChannel::Zone),
                ["zone", n, "set"] => parse_station(n).map(DeviceChannel::ZoneControl),
                _ => None,
            };
            channel.map_or(Route::Unrecognized, |channel| Route::Device {
                device_id: DeviceId::new(*id),
                channel,
            })
        }
        _ => Route::Unrecognized,
    }
}

fn parse_station(segment: &str) -> Option<StationId> {
    segment.parse::<u8>().ok().and_then(|n| StationId::new(n).ok())
}

fn resolve_cloud(address: &str, payload: &str) -> Route {
    match address {
        CLOUD_EVENTS => match serde_json::from_str::<EnvelopeHead>(payload) {
            Ok(EnvelopeHead {
                device_id: Some(id),
            }) if !id.is_empty() => Route::Device {
                device_id: DeviceId::new(id),
                channel: DeviceChannel::Message,
            },
            _ => Route::System(SystemChannel::Events),
        },
        CLOUD_DEVICES => Route::System(SystemChannel::Snapshots),
        _ => Route::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mqtt() -> TopicRouter {
        TopicRouter::new(Vocabulary::mqtt())
    }

    fn station(n: u8) -> StationId {
        StationId::new(n).unwrap()
    }

    #[test]
    fn mqtt_resolves_device_channels() {
        let router = mqtt();
        assert_eq!(
            router.resolve("bhyve/device/abc/status", ""),
            Route::device(&DeviceId::new("abc"), DeviceChannel::Status)
        );
        assert_eq!(
            router.resolve("bhyve/device/abc/zone/2/set", ""),
            Route::device(&DeviceId::new("abc"), DeviceChannel::ZoneControl(station(2)))
        );
        assert_eq!(
            router.resolve("bhyve/device/abc/zone/3", ""),
            Route::device(&DeviceId::new("abc"), DeviceChannel::Zone(station(3)))
        );
    }

    #[test]
    fn mqtt_resolves_system_channels() {
        let router = mqtt();
        assert_eq!(
            router.resolve("bhyve/devices", "[]"),
            Route::System(SystemChannel::DevicesList)
        );
        assert_eq!(
            router.resolve("bhyve/device/refresh", ""),
            Route::System(SystemChannel::RefreshRequest)
        );
        assert_eq!(
            router.resolve("bhyve/alive", ""),
            Route::System(SystemChannel::Alive)
        );
    }

    #[test]
    fn mqtt_unknown_topics_are_unrecognized() {
        let router = mqtt();
        assert_eq!(router.resolve("other/devices", ""), Route::Unrecognized);
        assert_eq!(router.resolve("bhyve/device/abc/battery", ""), Route::Unrecognized);
        assert_eq!(router.resolve("bhyve/device/abc/zone/0", ""), Route::Unrecognized);
        assert_eq!(router.resolve("bhyve/device//status", ""), Route::Unrecognized);
        assert_eq!(router.resolve("bhyvex/devices", ""), Route::Unrecognized);
    }

    #[test]
    fn mqtt_address_round_trips_through_resolve() {
        let router = mqtt();
        let route = Route::device(&DeviceId::new("d1"), DeviceChannel::ZoneControl(station(4)));
        let address = router.address(&route).unwrap();
        assert_eq!(address, "bhyve/device/d1/zone/4/set");
        assert_eq!(router.resolve(&address, ""), route);
    }

    #[test]
    fn mqtt_custom_prefix() {
        let router = TopicRouter::new(Vocabulary::Mqtt {
            prefix: "garden".to_string(),
        });
        assert_eq!(
            router.address(&Route::System(SystemChannel::RefreshRequest)),
            Some("garden/device/refresh".to_string())
        );
        assert!(router.subscriptions().iter().all(|t| t.starts_with("garden/")));
    }

    #[test]
    fn mqtt_has_no_cloud_channels() {
        assert_eq!(mqtt().address(&Route::System(SystemChannel::Snapshots)), None);
    }

    #[test]
    fn cloud_routes_envelopes_by_device() {
        let router = TopicRouter::new(Vocabulary::Cloud);
        assert_eq!(
            router.resolve("events", r#"{"event":"watering_complete","device_id":"d7"}"#),
            Route::device(&DeviceId::new("d7"), DeviceChannel::Message)
        );
        assert_eq!(
            router.resolve("events", r#"{"event":"app_connection"}"#),
            Route::System(SystemChannel::Events)
        );
        assert_eq!(
            router.resolve("devices", "[]"),
            Route::System(SystemChannel::Snapshots)
        );
        assert_eq!(router.resolve("telemetry", "{}"), Route::Unrecognized);
    }

    #[test]
    fn cloud_addresses() {
        let router = TopicRouter::new(Vocabulary::Cloud);
        let d = DeviceId::new("d1");
        assert_eq!(
            router.address(&Route::device(&d, DeviceChannel::Command)),
            Some("events".to_string())
        );
        assert_eq!(
            router.address(&Route::System(SystemChannel::RefreshRequest)),
            Some("devices".to_string())
        );
        assert!(router.subscriptions().is_empty());
    }
}
