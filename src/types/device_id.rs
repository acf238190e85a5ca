// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identifier type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an irrigation controller, as assigned by the cloud service.
///
/// The value is opaque to this library; it is only compared and echoed back
/// on the wire.
///
/// # Examples
///
/// ```
/// use bhyve_lib::types::DeviceId;
///
/// let id = DeviceId::new("5f4a1c2b9e");
/// assert_eq!(id.as_str(), "5f4a1c2b9e");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier from its wire representation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_raw_value() {
        let id = DeviceId::new("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(format!("{id:?}"), "DeviceId(abc123)");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = DeviceId::new("abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
        let back: DeviceId = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(back, id);
    }
}
