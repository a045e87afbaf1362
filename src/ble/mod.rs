//! BLE communication module.
//!
//! This module provides the scan, connection, and write sessions along with
//! the platform backend they run on.

pub mod advertisement;
pub mod backend;
pub mod btleplug_backend;
pub mod connection;
pub mod filter;
pub mod scanner;
pub mod uuids;
pub mod writer;

pub use advertisement::{DeviceId, PeripheralAdvertisement};
pub use backend::{AdvertisementStream, BleBackend, WriteKind};
pub use btleplug_backend::BtleplugBackend;
pub use connection::{ConnectionEvent, ConnectionHandle, ConnectionSession, ConnectionState};
pub use filter::DeviceFilter;
pub use scanner::{DeviceList, ScanEvent, ScanGuard, ScanSession};
pub use uuids::*;
pub use writer::{CharacteristicWriter, OutboundPayload};
