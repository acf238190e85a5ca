// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT bridge example.
//!
//! Connects to a local bridge, lists the mirrored devices, then waters one
//! station and waits for the device to confirm it.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example mqtt_bridge -- <broker_host> [device_id] [station] [username] [password]
//! ```
//!
//! # Examples
//!
//! ```bash
//! # List devices only
//! cargo run --example mqtt_bridge -- 192.168.1.20
//!
//! # Water station 1 of a device for 5 minutes
//! cargo run --example mqtt_bridge -- 192.168.1.20 5c8b0d4e 1 bhyve secret
//! ```

use std::env;
use std::time::Duration;

use bhyve_lib::protocol::MqttTransport;
use bhyve_lib::subscription::Subscribable;
use bhyve_lib::types::{DeviceId, StationId};
use bhyve_lib::{BhyveClient, Confirmation, Event};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let mut builder = MqttTransport::builder().host(&args[1]);
    if let (Some(username), Some(password)) = (args.get(4), args.get(5)) {
        builder = builder.credentials(username, password);
    }
    let transport = builder.build()?;

    println!("Connecting to {}...", args[1]);
    let client = BhyveClient::builder(transport).build();
    let mut events = client.subscribe();
    client.open().await?;

    // The store is filled by the first resync
    loop {
        if let Event::ResyncCompleted { .. } = events.recv().await? {
            break;
        }
    }

    for device in client.list_devices() {
        println!(
            "{} ({}) connected={} mode={:?} watering={}",
            device.name(),
            device.id(),
            device.is_connected(),
            device.mode(),
            device.is_watering()
        );
        for valve in device.valves() {
            println!("  station {}: {}", valve.station, valve.name);
        }
    }

    if let Some(device_id) = args.get(2) {
        let device_id = DeviceId::new(device_id.as_str());
        let station: u8 = args.get(3).map_or(Ok(1), |s| s.parse())?;

        client.on_watering_completed(|device_id, station| {
            println!("{device_id} finished station {station:?}");
        });

        println!("Starting station {station} on {device_id}...");
        client
            .start_watering_with(
                &device_id,
                StationId::new(station)?,
                Duration::from_secs(300),
                Confirmation::Event {
                    timeout: Duration::from_secs(5),
                },
            )
            .await?;
        println!("Watering confirmed");
    }

    client.close().await;
    Ok(())
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {program} <broker_host> [device_id] [station] [username] [password]");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {program} 192.168.1.20");
    eprintln!("  {program} 192.168.1.20 5c8b0d4e 1 bhyve secret");
}
