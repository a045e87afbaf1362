//! Device filtering by advertised name.

use crate::ble::advertisement::PeripheralAdvertisement;

/// Name fragments accepted by default.
pub const DEFAULT_ALLOW_LIST: [&str; 3] = ["Arduino", "Feather", "ESP32"];

/// Decides whether an advertisement belongs to an allowed peripheral class.
///
/// A device is allowed when its local name or device name contains one of the
/// allow-list fragments. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    allow_list: Vec<String>,
}

impl DeviceFilter {
    /// Create a filter from a list of name fragments.
    pub fn new<I, S>(allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_list: allow_list.into_iter().map(Into::into).collect(),
        }
    }

    /// The configured fragments.
    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }

    /// Check whether the advertisement is allowed.
    pub fn is_allowed(&self, advertisement: &PeripheralAdvertisement) -> bool {
        self.matching_fragment(advertisement).is_some()
    }

    /// The first allow-list fragment found in either name field.
    pub fn matching_fragment(&self, advertisement: &PeripheralAdvertisement) -> Option<&str> {
        self.allow_list
            .iter()
            .filter(|fragment| !fragment.is_empty())
            .find(|fragment| advertisement.names().any(|name| name.contains(fragment.as_str())))
            .map(String::as_str)
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOW_LIST)
    }
}
