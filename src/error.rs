//! Error types for the ble-session crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The specified device is not known to the platform.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but no device is connected.
    #[error("No device connected")]
    NotConnected,

    /// A device is already connected; it must be disconnected first.
    #[error("Already connected to {identifier}")]
    AlreadyConnected {
        /// The identifier of the connected device.
        identifier: String,
    },

    /// A connect or disconnect is already running.
    #[error("Connection transition already in progress")]
    ConnectionInProgress,

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Service/characteristic discovery failed after connecting.
    #[error("Service discovery failed: {reason}")]
    DiscoveryFailed {
        /// Description of why discovery failed.
        reason: String,
    },

    /// The platform refused to cancel the connection.
    #[error("Disconnect failed: {reason}")]
    DisconnectFailed {
        /// Description of why the disconnect failed.
        reason: String,
    },

    /// A scan-level error, such as the adapter powering off.
    #[error("Scan error: {reason}")]
    Scan {
        /// Description of the scan failure.
        reason: String,
    },

    /// A scan was started while another one is still running.
    #[error("Scan already active")]
    ScanAlreadyActive,

    /// A characteristic write failed.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Description of why the write failed.
        reason: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An outbound payload could not be decoded back into bytes.
    #[error("Invalid payload: {context}")]
    InvalidPayload {
        /// Description of what was invalid about the payload.
        context: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
