//! Scan for a controller board, press and release button 1, then disconnect.
//!
//! Run with: cargo run --example scan_and_send

use ble_session::{BleSession, Result, ScanEvent, SessionConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_session=debug".parse().unwrap()),
        )
        .init();

    let session = BleSession::with_btleplug(SessionConfig::default()).await?;

    if !session.request_permissions().await {
        println!("Bluetooth permissions were not granted");
        return Ok(());
    }

    let mut events = session.subscribe_scan();
    session.start_scan().await?;

    println!("Scanning for Arduino, Feather, or ESP32 boards (10s)...");

    let scan = async {
        loop {
            match events.recv().await {
                Ok(ScanEvent::DeviceDiscovered(device)) => {
                    println!(
                        "  {} - {} (RSSI: {:?})",
                        device.id,
                        device.display_name().unwrap_or("?"),
                        device.rssi
                    );
                }
                Ok(ScanEvent::Error { reason }) => println!("  scan error: {}", reason),
                Ok(ScanEvent::StreamEnded) | Err(_) => break,
            }
        }
    };

    tokio::select! {
        _ = scan => {}
        _ = tokio::time::sleep(Duration::from_secs(10)) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted!");
        }
    }

    let device = match session.devices().into_iter().next() {
        Some(device) => device,
        None => {
            println!("No devices found");
            session.shutdown().await?;
            return Ok(());
        }
    };

    let handle = session.connect(&device.id).await?;
    println!("Connected to {} ({:?})", handle.id, handle.name);

    session.send_button(1, true)?.await.ok();
    tokio::time::sleep(Duration::from_millis(250)).await;
    session.send_button(1, false)?.await.ok();

    session.shutdown().await?;
    println!("Done!");

    Ok(())
}
