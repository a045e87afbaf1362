//! Session owner for scanning, connecting, and writing.
//!
//! A [`BleSession`] is created explicitly and owns every piece of BLE state
//! for its lifetime; dropping it stops the scan event loop.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::ble::advertisement::{DeviceId, PeripheralAdvertisement};
use crate::ble::backend::BleBackend;
use crate::ble::btleplug_backend::BtleplugBackend;
use crate::ble::connection::{ConnectionEvent, ConnectionHandle, ConnectionSession, ConnectionState};
use crate::ble::scanner::{ScanEvent, ScanGuard, ScanSession};
use crate::ble::writer::CharacteristicWriter;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::permissions::{AlwaysGranted, PermissionRequester, Platform};
use crate::protocol::ButtonPacket;

/// Central handle for one BLE session.
pub struct BleSession {
    /// Scan session.
    scanner: Arc<ScanSession>,
    /// Connection session.
    connection: Arc<ConnectionSession>,
    /// Characteristic writer.
    writer: CharacteristicWriter,
    /// Configuration the session was built with.
    config: SessionConfig,
}

impl BleSession {
    /// Create a session around a backend.
    pub fn new(
        backend: Arc<dyn BleBackend>,
        platform: Platform,
        permissions: Arc<dyn PermissionRequester>,
        config: SessionConfig,
    ) -> Self {
        let scanner = Arc::new(ScanSession::with_capacity(
            backend.clone(),
            config.filter(),
            config.event_capacity,
        ));

        let mut connection =
            ConnectionSession::new(backend.clone(), scanner.clone(), platform, permissions);
        connection.set_connect_retry(config.connect_retry.clone());
        connection.set_force_clear_on_disconnect_error(config.force_clear_on_disconnect_error);
        let connection = Arc::new(connection);

        let writer = CharacteristicWriter::new(backend, connection.clone(), config.target)
            .with_retry(config.write_retry.clone());

        Self {
            scanner,
            connection,
            writer,
            config,
        }
    }

    /// Create a session on the first system Bluetooth adapter.
    ///
    /// Permissions are treated as granted; use [`BleSession::new`] with a
    /// real [`PermissionRequester`] on platforms with runtime prompts.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_btleplug(config: SessionConfig) -> Result<Self> {
        let backend = BtleplugBackend::new().await?;
        Ok(Self::new(
            Arc::new(backend),
            Platform::current(),
            Arc::new(AlwaysGranted),
            config,
        ))
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The scan session.
    pub fn scanner(&self) -> &Arc<ScanSession> {
        &self.scanner
    }

    /// The connection session.
    pub fn connection(&self) -> &Arc<ConnectionSession> {
        &self.connection
    }

    /// The characteristic writer.
    pub fn writer(&self) -> &CharacteristicWriter {
        &self.writer
    }

    /// Request the runtime permissions BLE needs.
    pub async fn request_permissions(&self) -> bool {
        self.connection.request_permissions().await
    }

    /// Start scanning for allowed devices.
    pub async fn start_scan(&self) -> Result<()> {
        self.scanner.start().await
    }

    /// Start scanning until the returned guard is dropped.
    pub async fn scan_scoped(&self) -> Result<ScanGuard> {
        self.scanner.scoped().await
    }

    /// Stop scanning.
    pub async fn stop_scan(&self) -> Result<()> {
        self.scanner.stop().await
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Devices discovered so far, in discovery order.
    pub fn devices(&self) -> Vec<PeripheralAdvertisement> {
        self.scanner.devices()
    }

    /// Subscribe to scan events.
    pub fn subscribe_scan(&self) -> broadcast::Receiver<ScanEvent> {
        self.scanner.subscribe()
    }

    /// Connect to a discovered device.
    pub async fn connect(&self, id: &DeviceId) -> Result<ConnectionHandle> {
        self.connection.connect(id).await
    }

    /// Disconnect from the connected device, if any.
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The connected device, if any.
    pub fn connected_device(&self) -> Option<ConnectionHandle> {
        self.connection.connected_device()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    /// Send a payload without waiting for the write to finish.
    pub fn send(&self, payload: &str) -> Result<tokio::task::JoinHandle<()>> {
        self.writer.send(payload)
    }

    /// Write a payload and wait for the result.
    pub async fn write(&self, payload: &str) -> Result<()> {
        self.writer.write(payload).await
    }

    /// Send a controller button press or release.
    pub fn send_button(&self, button: u8, pressed: bool) -> Result<tokio::task::JoinHandle<()>> {
        let packet = ButtonPacket::new(button, pressed)?;
        info!("Sending button packet {}", packet);
        self.writer.send(&packet.encode())
    }

    /// Stop scanning and disconnect.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down BLE session");

        self.scanner.stop().await?;

        if let Err(e) = self.connection.disconnect().await {
            warn!("Error disconnecting during shutdown: {}", e);
        }

        Ok(())
    }
}
