//! BLE connection management.
//!
//! Handles the single active connection: permission preflight, connect with
//! service discovery, and disconnect.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::ble::advertisement::DeviceId;
use crate::ble::backend::BleBackend;
use crate::ble::scanner::ScanSession;
use crate::config::{RetryPolicy, DEFAULT_EVENT_CAPACITY};
use crate::error::{Error, Result};
use crate::permissions::{self, PermissionRequester, Platform};

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No device connected.
    #[default]
    Idle,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to a device.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Reference to the connected device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionHandle {
    /// Identity of the connected device.
    pub id: DeviceId,
    /// Name the device advertised when it was discovered.
    pub name: Option<String>,
    /// When the connection was established.
    pub connected_at: DateTime<Utc>,
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The identifier of the peripheral.
    pub identifier: DeviceId,
    /// The new connection state.
    pub state: ConnectionState,
}

/// State and reference are always updated together.
#[derive(Debug, Default)]
struct Slot {
    state: ConnectionState,
    handle: Option<ConnectionHandle>,
}

/// Manages the single active connection.
pub struct ConnectionSession {
    /// Platform backend.
    backend: Arc<dyn BleBackend>,
    /// Scan to halt once a connection is up.
    scanner: Arc<ScanSession>,
    /// Platform the permission preflight runs on.
    platform: Platform,
    /// OS permission prompts.
    permissions: Arc<dyn PermissionRequester>,
    /// Current state and connected device.
    slot: RwLock<Slot>,
    /// Channel for connection events.
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Retry policy for the connect step.
    connect_retry: RetryPolicy,
    /// Clear the reference even when the platform disconnect fails.
    force_clear_on_disconnect_error: bool,
}

impl ConnectionSession {
    /// Create a connection session.
    pub fn new(
        backend: Arc<dyn BleBackend>,
        scanner: Arc<ScanSession>,
        platform: Platform,
        permissions: Arc<dyn PermissionRequester>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);

        Self {
            backend,
            scanner,
            platform,
            permissions,
            slot: RwLock::new(Slot::default()),
            event_tx,
            connect_retry: RetryPolicy::none(),
            force_clear_on_disconnect_error: false,
        }
    }

    /// Set the retry policy for the connect step.
    pub fn set_connect_retry(&mut self, retry: RetryPolicy) {
        self.connect_retry = retry;
    }

    /// Clear the connection reference when disconnect fails.
    pub fn set_force_clear_on_disconnect_error(&mut self, force: bool) {
        self.force_clear_on_disconnect_error = force;
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.slot.read().state
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The connected device, if any.
    pub fn connected_device(&self) -> Option<ConnectionHandle> {
        self.slot.read().handle.clone()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Ask the OS for the runtime permissions BLE needs on this platform.
    pub async fn request_permissions(&self) -> bool {
        permissions::request_permissions(self.platform, self.permissions.as_ref()).await
    }

    /// Connect to a device and discover its services.
    ///
    /// The active scan is stopped only after both steps succeed. On failure
    /// the session is back to [`ConnectionState::Idle`] and the scan is left
    /// as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] or [`Error::ConnectionInProgress`]
    /// if the session is not idle, [`Error::ConnectionFailed`] if the link
    /// cannot be opened, and [`Error::DiscoveryFailed`] if discovery fails.
    pub async fn connect(&self, id: &DeviceId) -> Result<ConnectionHandle> {
        {
            let mut slot = self.slot.write();
            if let Some(handle) = &slot.handle {
                return Err(Error::AlreadyConnected {
                    identifier: handle.id.to_string(),
                });
            }
            if slot.state.is_transitioning() {
                return Err(Error::ConnectionInProgress);
            }
            slot.state = ConnectionState::Connecting;
        }
        self.notify(id, ConnectionState::Idle, ConnectionState::Connecting);

        info!("Connecting to {}", id);

        if let Err(e) = self.establish(id).await {
            error!("Failed to connect to {}: {}", id, e);
            self.set_state(id, ConnectionState::Idle, None);
            return Err(e);
        }

        let handle = ConnectionHandle {
            id: id.clone(),
            name: self
                .scanner
                .device(id)
                .and_then(|d| d.display_name().map(str::to_string)),
            connected_at: Utc::now(),
        };
        self.set_state(id, ConnectionState::Connected, Some(handle.clone()));

        info!("Connected to {}", id);

        if let Err(e) = self.scanner.stop().await {
            warn!("Connected to {} but failed to stop scan: {}", id, e);
        }

        Ok(handle)
    }

    /// Disconnect from the connected device.
    ///
    /// Does nothing when no device is connected. A connect that is still in
    /// flight is not cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DisconnectFailed`] if the platform refuses. The
    /// connection reference is kept in that case unless
    /// `force_clear_on_disconnect_error` is set.
    pub async fn disconnect(&self) -> Result<()> {
        let handle = {
            let mut slot = self.slot.write();
            match (slot.state, slot.handle.clone()) {
                (ConnectionState::Connected, Some(handle)) => {
                    slot.state = ConnectionState::Disconnecting;
                    handle
                }
                (ConnectionState::Connecting, _) => {
                    debug!("Connect in flight, disconnect does not cancel it");
                    return Ok(());
                }
                _ => return Ok(()),
            }
        };
        self.notify(
            &handle.id,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
        );

        match self.backend.disconnect(&handle.id).await {
            Ok(()) => {
                info!("Disconnected from {}", handle.id);
                self.set_state(&handle.id, ConnectionState::Idle, None);
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect from {}: {}", handle.id, e);
                if self.force_clear_on_disconnect_error {
                    self.set_state(&handle.id, ConnectionState::Idle, None);
                } else {
                    let id = handle.id.clone();
                    self.set_state(&id, ConnectionState::Connected, Some(handle));
                }
                Err(Error::DisconnectFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Open the link and discover services.
    async fn establish(&self, id: &DeviceId) -> Result<()> {
        self.connect_retry
            .run("connect", |_| self.backend.connect(id))
            .await
            .map_err(|e| match e {
                Error::ConnectionFailed { .. } => e,
                other => Error::ConnectionFailed {
                    reason: other.to_string(),
                },
            })?;

        if let Err(e) = self.backend.discover_services(id).await {
            if let Err(cleanup) = self.backend.disconnect(id).await {
                warn!(
                    "Failed to drop link to {} after discovery error: {}",
                    id, cleanup
                );
            }
            return Err(Error::DiscoveryFailed {
                reason: e.to_string(),
            });
        }

        Ok(())
    }

    /// Update state and reference together and emit an event.
    fn set_state(
        &self,
        id: &DeviceId,
        new_state: ConnectionState,
        handle: Option<ConnectionHandle>,
    ) {
        let old_state = {
            let mut slot = self.slot.write();
            let old = slot.state;
            slot.state = new_state;
            slot.handle = handle;
            old
        };

        self.notify(id, old_state, new_state);
    }

    fn notify(&self, id: &DeviceId, old_state: ConnectionState, new_state: ConnectionState) {
        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);

            let _ = self.event_tx.send(ConnectionEvent {
                identifier: id.clone(),
                state: new_state,
            });
        }
    }
}
