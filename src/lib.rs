// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-session
//!
//! A Rust library for discovering, connecting to, and writing to Bluetooth
//! Low Energy peripherals such as Arduino, Adafruit Feather, and ESP32 boards
//! running a UART service.
//!
//! ## Features
//!
//! - **Device Discovery**: Unfiltered scan narrowed to devices whose name
//!   matches an allow-list, deduplicated by identity
//! - **Single Connection**: Connect, discover services, and halt the scan
//! - **Characteristic Writes**: Send text payloads to the UART RX
//!   characteristic, fire-and-forget or awaited
//! - **Permission Preflight**: Android runtime permission aggregation
//! - **Pluggable Backend**: btleplug by default, any [`BleBackend`] in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_session::{BleSession, Result, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = BleSession::with_btleplug(SessionConfig::default()).await?;
//!     session.request_permissions().await;
//!     session.start_scan().await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     if let Some(device) = session.devices().first() {
//!         session.connect(&device.id).await?;
//!         session.write("hello").await?;
//!         session.disconnect().await?;
//!     }
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod permissions;
pub mod protocol;
pub mod session;

// Re-exports for convenience
pub use config::{RetryPolicy, SessionConfig};
pub use error::{Error, Result};
pub use session::BleSession;

// Re-export commonly used types from submodules
pub use ble::{
    BleBackend, ConnectionHandle, ConnectionState, DeviceFilter, DeviceId, GattTarget,
    OutboundPayload, PeripheralAdvertisement, ScanEvent, WriteKind,
};
pub use permissions::{Permission, PermissionRequester, PermissionStatus, Platform};
pub use protocol::ButtonPacket;
