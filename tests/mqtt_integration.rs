// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT transport using mockforge-mqtt.

#![cfg(feature = "mqtt")]

use std::time::Duration;

use bhyve_lib::protocol::{MqttTransport, RawMessage, TopicRouter, Transport};
use bhyve_lib::{BhyveClient, ConnectionState, Error};
use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use tokio::time::sleep;

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to start, bind to port, and be ready to accept connections
    sleep(Duration::from_millis(500)).await;
}

fn transport(port: u16) -> MqttTransport {
    MqttTransport::builder()
        .host("127.0.0.1")
        .port(port)
        .connection_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

// ============================================================================
// Transport Tests
// ============================================================================

mod mqtt_transport {
    use super::*;

    #[tokio::test]
    async fn connect_and_subscribe() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let transport = transport(port);
        let router = TopicRouter::new(transport.vocabulary());
        let result = transport.connect(&router.subscriptions()).await;

        assert!(result.is_ok(), "Failed to connect: {:?}", result.err());
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn publish_after_connect() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let transport = transport(port);
        let _inbound = transport.connect(&[]).await.unwrap();

        let result = transport
            .send(RawMessage::new(
                "bhyve/device/d1/zone/1/set",
                r#"{"state":"ON","time":5}"#,
            ))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn disconnect_ends_connection() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let transport = transport(port);
        let _inbound = transport.connect(&[]).await.unwrap();
        transport.disconnect().await.unwrap();

        assert!(!transport.is_connected());
        let result = transport.send(RawMessage::new("bhyve/device/refresh", "")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_broker_fails() {
        // Nothing listens on this port
        let transport = transport(get_test_port());
        let result = transport.connect(&[]).await;
        assert!(result.is_err());
        assert!(!transport.is_connected());
    }
}

// ============================================================================
// Client Tests
// ============================================================================

mod mqtt_client {
    use super::*;

    #[tokio::test]
    async fn open_and_close_client() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let client = BhyveClient::builder(transport(port)).open().await.unwrap();
        assert!(client.is_open());
        assert!(client.connection_state().is_connected());

        client.close().await;
        assert!(!client.is_open());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn open_fails_without_broker() {
        let client = BhyveClient::new(transport(get_test_port()));
        let result = client.open().await;

        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        // Still retrying in the background until closed.
        assert!(client.is_open());
        client.close().await;
        assert!(!client.is_open());
    }
}

// ============================================================================
// Notes
// ============================================================================
//
// The mockforge-mqtt broker does not forward messages between clients, so
// inbound routing and decoding are covered by the unit tests of the topic
// router and the decoder, and end to end by the client scenarios that run
// over the in-memory transport.
