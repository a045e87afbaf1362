//! Runtime permission preflight.
//!
//! Android 12 (API 31) split Bluetooth access into separate scan and connect
//! grants; earlier releases gate BLE scanning behind location access alone.
//! Other platforms have no runtime prompt for BLE.

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// First Android API level with the `BLUETOOTH_SCAN`/`BLUETOOTH_CONNECT` grants.
pub const ANDROID_BLUETOOTH_PERMISSIONS_API_LEVEL: u32 = 31;

/// Platform the session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Platform {
    /// Android, with its API level if known.
    Android {
        /// The OS API level.
        api_level: Option<u32>,
    },
    /// iOS; Bluetooth access is declared in the app bundle.
    Ios,
    /// Desktop operating systems.
    Desktop,
}

impl Platform {
    /// The platform this crate was compiled for, with no API level.
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Self::Android { api_level: None }
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else {
            Self::Desktop
        }
    }
}

/// A runtime permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Scan for nearby devices.
    BluetoothScan,
    /// Connect to paired or discovered devices.
    BluetoothConnect,
    /// Precise location.
    FineLocation,
}

impl Permission {
    /// The Android manifest name of the permission.
    pub fn android_name(&self) -> &'static str {
        match self {
            Self::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            Self::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
            Self::FineLocation => "android.permission.ACCESS_FINE_LOCATION",
        }
    }
}

/// Outcome of a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionStatus {
    /// The user granted the permission.
    Granted,
    /// The user denied the permission.
    Denied,
    /// The user denied the permission and asked not to be prompted again.
    NeverAskAgain,
}

impl PermissionStatus {
    /// Check if granted.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Text shown alongside a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rationale {
    /// Dialog title.
    pub title: &'static str,
    /// Dialog body.
    pub message: &'static str,
    /// Label of the single affirmative button.
    pub button_positive: &'static str,
}

/// Rationale shown for every BLE permission prompt.
pub const BLE_RATIONALE: Rationale = Rationale {
    title: "Location Permission",
    message: "Bluetooth Low Energy requires Location",
    button_positive: "OK",
};

/// Prompts the user for runtime permissions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionRequester: Send + Sync {
    /// Request a single permission.
    async fn request(&self, permission: Permission, rationale: &Rationale) -> PermissionStatus;
}

/// Requester for platforms without runtime prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionRequester for AlwaysGranted {
    async fn request(&self, _permission: Permission, _rationale: &Rationale) -> PermissionStatus {
        PermissionStatus::Granted
    }
}

/// Permissions BLE needs on the given platform.
///
/// An Android device with an unknown API level is treated as pre-31.
pub fn required_permissions(platform: Platform) -> &'static [Permission] {
    match platform {
        Platform::Android { api_level }
            if api_level.unwrap_or(0) >= ANDROID_BLUETOOTH_PERMISSIONS_API_LEVEL =>
        {
            &[
                Permission::BluetoothScan,
                Permission::BluetoothConnect,
                Permission::FineLocation,
            ]
        }
        Platform::Android { .. } => &[Permission::FineLocation],
        Platform::Ios | Platform::Desktop => &[],
    }
}

/// Request every permission BLE needs and report whether all were granted.
///
/// Each permission is an independent grant, so all of them are requested
/// even after one is denied.
pub async fn request_permissions(platform: Platform, requester: &dyn PermissionRequester) -> bool {
    let required = required_permissions(platform);
    if required.is_empty() {
        debug!("No runtime permissions required on {:?}", platform);
        return true;
    }

    let mut all_granted = true;
    for &permission in required {
        let status = requester.request(permission, &BLE_RATIONALE).await;
        if !status.is_granted() {
            warn!("Permission {} not granted: {:?}", permission.android_name(), status);
            all_granted = false;
        }
    }

    if all_granted {
        info!("All BLE permissions granted");
    }

    all_granted
}
