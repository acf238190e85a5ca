// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud WebSocket example.
//!
//! Logs in with account credentials, follows the realtime event stream and
//! optionally switches a device's run mode.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example cloud -- <email> <password> [device_id] [mode]
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Print events for two minutes
//! cargo run --example cloud -- me@example.com secret
//!
//! # Turn a device off
//! cargo run --example cloud -- me@example.com secret 5c8b0d4e off
//! ```

use std::env;
use std::time::Duration;

use bhyve_lib::protocol::{Session, WebSocketTransport};
use bhyve_lib::subscription::Subscribable;
use bhyve_lib::types::DeviceId;
use bhyve_lib::{BhyveClient, ConnectionState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    println!("Logging in as {}...", args[1]);
    let session = Session::login(Session::DEFAULT_API_BASE, &args[1], &args[2]).await?;
    let transport = WebSocketTransport::builder().session(session).build()?;
    let client = BhyveClient::builder(transport).build();

    client.on_connection_changed(|state, error| {
        if state == ConnectionState::Disconnected {
            println!("Connection lost: {error:?}");
        } else {
            println!("Connection: {state}");
        }
    });
    client.on_watering_started(|device_id, station| {
        println!("{device_id} started station {station:?}");
    });
    client.on_watering_completed(|device_id, station| {
        println!("{device_id} finished station {station:?}");
    });
    client.on_mode_changed(|device_id, mode| {
        println!("{device_id} switched to {mode}");
    });

    client.open().await?;

    if let (Some(device_id), Some(mode)) = (args.get(3), args.get(4)) {
        client
            .set_device_mode(&DeviceId::new(device_id.as_str()), mode.as_str())
            .await?;
        println!("Mode set to {mode}");
    } else {
        println!("Listening for 2 minutes...");
        tokio::time::sleep(Duration::from_secs(120)).await;
        for device in client.list_devices() {
            println!("{} ({}) watering={}", device.name(), device.id(), device.is_watering());
        }
    }

    client.close().await;
    Ok(())
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {program} <email> <password> [device_id] [mode]");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {program} me@example.com secret");
    eprintln!("  {program} me@example.com secret 5c8b0d4e off");
}
