//! Peripheral advertisements seen during a scan.

use chrono::{DateTime, Utc};

/// Platform-assigned identity of a peripheral, stable for one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single advertisement from a discovered peripheral.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralAdvertisement {
    /// Platform identity of the peripheral.
    pub id: DeviceId,
    /// Local name from the advertising packet.
    pub local_name: Option<String>,
    /// Device (GAP) name, when the platform reports one separately.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// When this advertisement was received.
    pub seen_at: DateTime<Utc>,
}

impl PeripheralAdvertisement {
    /// Create an advertisement with no name fields.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            local_name: None,
            name: None,
            rssi: None,
            seen_at: Utc::now(),
        }
    }

    /// Set the local name.
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Set the device name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the RSSI.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Name fields that are present and non-empty, local name first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        [self.local_name.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|n| !n.is_empty())
    }

    /// Best name for display, if any.
    pub fn display_name(&self) -> Option<&str> {
        self.names().next()
    }
}
