// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection supervision.
//!
//! While a client is open, a single background task owns the transport. It
//! tracks liveness from heartbeats, resyncs the device store after every
//! connect, and reconnects with jittered exponential backoff when the
//! connection is lost.

mod connection;
mod policy;
mod runner;

pub use connection::ConnectionState;
pub use policy::ReconnectionPolicy;
pub(crate) use runner::{Core, Supervisor};
