//! Platform BLE capability set.
//!
//! Sessions talk to the Bluetooth stack only through [`BleBackend`], so the
//! same scan/connect/write logic runs on btleplug or on a test double.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::ble::advertisement::{DeviceId, PeripheralAdvertisement};
use crate::ble::uuids::GattTarget;
use crate::ble::writer::OutboundPayload;
use crate::error::Result;

/// Stream of advertisements produced by an active scan.
///
/// An `Err` item is a scan-level error for that event only; the stream keeps
/// going afterwards.
pub type AdvertisementStream = BoxStream<'static, Result<PeripheralAdvertisement>>;

/// Characteristic write mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Write and wait for the peripheral's acknowledgement.
    WithResponse,
    /// Write without acknowledgement.
    WithoutResponse,
}

/// Operations the platform Bluetooth stack must provide.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleBackend: Send + Sync {
    /// Start an unfiltered scan and return the advertisement stream.
    async fn start_scan(&self) -> Result<AdvertisementStream>;

    /// Stop the running scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a connection to a peripheral.
    async fn connect(&self, id: &DeviceId) -> Result<()>;

    /// Discover all services and characteristics of a connected peripheral.
    async fn discover_services(&self, id: &DeviceId) -> Result<()>;

    /// Cancel the connection to a peripheral.
    async fn disconnect(&self, id: &DeviceId) -> Result<()>;

    /// Write a base64-encoded payload to a characteristic.
    async fn write(
        &self,
        id: &DeviceId,
        target: GattTarget,
        payload: &OutboundPayload,
        kind: WriteKind,
    ) -> Result<()>;
}
