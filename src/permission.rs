//! # Permission Matrix Module
//!
//! Maps the platform's capability tier to the set of runtime permissions a
//! BLE scan needs. Pure functions only: no I/O, no state, no failure modes.
//!
//! ## Tiers
//! - `Legacy`: fine location only, Bluetooth is granted by the manifest
//! - `BackgroundLocation`: fine + background location (API 29+)
//! - `RuntimeBluetooth`: location plus Bluetooth scan/connect (API 31+)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// API level at which background location became a separate permission
pub const BACKGROUND_LOCATION_API_LEVEL: u32 = 29;

/// API level at which Bluetooth scan/connect became runtime permissions
pub const RUNTIME_BLUETOOTH_API_LEVEL: u32 = 31;

/// A single OS-granted capability.
///
/// Variant order is the order in which missing permissions are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionKind {
    FineLocation,
    BackgroundLocation,
    BluetoothScan,
    BluetoothConnect,
}

impl PermissionKind {
    pub fn all() -> [PermissionKind; 4] {
        [
            PermissionKind::FineLocation,
            PermissionKind::BackgroundLocation,
            PermissionKind::BluetoothScan,
            PermissionKind::BluetoothConnect,
        ]
    }

    /// Human readable name for dialogs and logs
    pub fn label(&self) -> &'static str {
        match self {
            PermissionKind::FineLocation => "Fine location",
            PermissionKind::BackgroundLocation => "Background location",
            PermissionKind::BluetoothScan => "Bluetooth scan",
            PermissionKind::BluetoothConnect => "Bluetooth connect",
        }
    }

    /// Bluetooth scan and connect are always requested together
    pub fn is_bluetooth(&self) -> bool {
        matches!(self, PermissionKind::BluetoothScan | PermissionKind::BluetoothConnect)
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Permission state of one kind, re-derived on every check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
    Pending,
}

/// Capability tier of the platform, computed once from its API level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlatformTier {
    Legacy,
    BackgroundLocation,
    RuntimeBluetooth,
}

impl PlatformTier {
    pub fn from_api_level(api_level: u32) -> Self {
        if api_level >= RUNTIME_BLUETOOTH_API_LEVEL {
            PlatformTier::RuntimeBluetooth
        } else if api_level >= BACKGROUND_LOCATION_API_LEVEL {
            PlatformTier::BackgroundLocation
        } else {
            PlatformTier::Legacy
        }
    }
}

/// Required permissions, iterated in request priority order
pub type PermissionRequirement = BTreeSet<PermissionKind>;

/// Returns the permissions a scan needs on the given tier
pub fn required_permissions(tier: PlatformTier) -> PermissionRequirement {
    let mut required = BTreeSet::new();
    required.insert(PermissionKind::FineLocation);

    if tier >= PlatformTier::BackgroundLocation {
        required.insert(PermissionKind::BackgroundLocation);
    }

    if tier >= PlatformTier::RuntimeBluetooth {
        required.insert(PermissionKind::BluetoothScan);
        required.insert(PermissionKind::BluetoothConnect);
    }

    required
}
