// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud REST session.
//!
//! The cloud WebSocket authenticates with a session token obtained from the
//! REST API. The same token is used to pull device snapshots during resync.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::TransportError;

/// Default REST request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    orbit_session_token: Option<String>,
    #[serde(default)]
    user_id: Option<serde_json::Value>,
}

/// An authenticated cloud session.
///
/// # Examples
///
/// ```no_run
/// use bhyve_lib::protocol::Session;
///
/// # async fn example() -> Result<(), bhyve_lib::error::TransportError> {
/// let session = Session::login(Session::DEFAULT_API_BASE, "me@example.com", "secret").await?;
/// println!("logged in as {}", session.user_id());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    api_base: String,
    token: String,
    user_id: String,
}

impl Session {
    /// Production REST endpoint.
    pub const DEFAULT_API_BASE: &'static str = "https://api.orbitbhyve.com";

    /// Creates a session from an existing token.
    #[must_use]
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            user_id: user_id.into(),
        }
    }

    /// Logs in with account credentials.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AuthenticationFailed` when the credentials are
    /// rejected or no token is returned, and `TransportError::Http` or
    /// `TransportError::ConnectionFailed` when the API cannot be reached.
    pub async fn login(
        api_base: impl Into<String>,
        email: &str,
        password: &str,
    ) -> Result<Self, TransportError> {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        tracing::debug!(api = %api_base, "Logging in to cloud API");
        let response = client
            .post(format!("{api_base}/v1/session"))
            .json(&serde_json::json!({
                "session": { "email": email, "password": password }
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::AuthenticationFailed(format!(
                "login rejected with HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "login failed with HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body: LoginResponse = response.json().await?;
        let token = body.orbit_session_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            TransportError::AuthenticationFailed("no session token in login response".to_string())
        })?;
        let user_id = match body.user_id {
            Some(serde_json::Value::String(id)) => id,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(TransportError::AuthenticationFailed(
                    "no user id in login response".to_string(),
                ));
            }
        };

        tracing::info!(api = %api_base, user_id = %user_id, "Logged in to cloud API");
        Ok(Self {
            api_base,
            token,
            user_id,
        })
    }

    /// Returns the REST endpoint.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Returns the session token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the account user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Fetches the raw JSON array of devices for this account.
    pub(crate) async fn fetch_devices(&self, client: &Client) -> Result<String, TransportError> {
        let url = format!(
            "{}/v1/devices?user_id={}",
            self.api_base,
            urlencoding::encode(&self.user_id)
        );
        let response = client
            .get(url)
            .header("orbit-session-token", &self.token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::AuthenticationFailed(format!(
                "device list rejected with HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "device list failed with HTTP {}",
                status.as_u16()
            )));
        }
        Ok(response.text().await?)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("api_base", &self.api_base)
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}
