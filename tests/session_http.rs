// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the cloud REST session using wiremock.

#![cfg(feature = "websocket")]

use bhyve_lib::error::{Error, TransportError};
use bhyve_lib::protocol::{Session, WebSocketTransport};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Login
// ============================================================================

mod login {
    use super::*;

    #[tokio::test]
    async fn login_returns_token_and_user() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/session"))
            .and(body_json(serde_json::json!({
                "session": { "email": "me@example.com", "password": "secret" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orbit_session_token": "tok-123",
                "user_id": "u-42"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let session = Session::login(mock_server.uri(), "me@example.com", "secret")
            .await
            .unwrap();

        assert_eq!(session.token(), "tok-123");
        assert_eq!(session.user_id(), "u-42");
        assert_eq!(session.api_base(), mock_server.uri());
    }

    #[tokio::test]
    async fn numeric_user_id_is_accepted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orbit_session_token": "tok",
                "user_id": 1234
            })))
            .mount(&mock_server)
            .await;

        let session = Session::login(format!("{}/", mock_server.uri()), "a@b.c", "pw")
            .await
            .unwrap();
        assert_eq!(session.user_id(), "1234");
    }

    #[tokio::test]
    async fn rejected_credentials() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/session"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let err = Session::login(mock_server.uri(), "me@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AuthenticationFailed(_)));

        // Surfaces as an authentication error, not a connection error
        let err: Error = err.into();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn missing_token_is_an_authentication_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user_id": "u-42"
            })))
            .mount(&mock_server)
            .await;

        let err = Session::login(mock_server.uri(), "me@example.com", "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn server_error_is_a_connection_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/session"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let err = Session::login(mock_server.uri(), "me@example.com", "secret")
            .await
            .unwrap_err();
        match err {
            TransportError::ConnectionFailed(message) => assert!(message.contains("503")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

// ============================================================================
// WebSocket Transport Configuration
// ============================================================================

mod websocket_transport {
    use super::*;

    #[test]
    fn builds_with_session() {
        let transport = WebSocketTransport::builder()
            .events_url("ws://127.0.0.1:9/v1/events")
            .session(Session::new("http://127.0.0.1:9", "tok", "u1"))
            .build()
            .unwrap();
        assert_eq!(transport.events_url(), "ws://127.0.0.1:9/v1/events");
    }

    #[tokio::test]
    async fn unreachable_socket_fails_to_open_client() {
        let transport = WebSocketTransport::builder()
            .events_url("ws://127.0.0.1:9/v1/events")
            .session(Session::new("http://127.0.0.1:9", "tok", "u1"))
            .build()
            .unwrap();

        let result = bhyve_lib::BhyveClient::builder(transport).open().await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
