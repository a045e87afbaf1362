//! BLE Service and Characteristic UUIDs.
//!
//! The peripherals this crate talks to expose the Nordic UART profile used by
//! Adafruit Bluefruit and most Arduino/ESP32 UART bridges.

use uuid::Uuid;

/// Nordic UART Service UUID.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (central writes to the peripheral).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (notifications from the peripheral).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

/// A service/characteristic pair addressed by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattTarget {
    /// Service UUID.
    pub service: Uuid,
    /// Characteristic UUID within the service.
    pub characteristic: Uuid,
}

impl GattTarget {
    /// Create a new target.
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// The UART RX characteristic, where outbound payloads are written.
    pub const fn uart_rx() -> Self {
        Self::new(UART_SERVICE_UUID, UART_RX_UUID)
    }
}

impl Default for GattTarget {
    fn default() -> Self {
        Self::uart_rx()
    }
}

impl std::fmt::Display for GattTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}
