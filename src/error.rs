//! # Error Types Module
//!
//! Centralized error handling for feather-scan.
//!
//! ## Error Types
//! - `ScanError`: reasons a toggle did not change the session state
//! - `DeliveryError`: discovery payloads that could not be forwarded
//! - `ConfigError`: Configuration file I/O and parsing errors
//!
//! None of these are fatal. Permission errors resolve on the next user
//! intent, radio and delivery errors are logged and the operation is dropped.

use crate::permission::PermissionKind;
use std::fmt;

/// Errors that keep a toggle from changing the session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The user denied a required permission
    PermissionDenied(PermissionKind),
    /// A required permission has not been answered yet
    PermissionPending(PermissionKind),
    /// Bluetooth adapter missing, disabled or refusing to scan
    RadioUnavailable(String),
    /// The radio already runs a session for this delivery target
    AlreadyScanning,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::PermissionDenied(kind) => {
                write!(f, "{} permission was denied", kind)
            }
            ScanError::PermissionPending(kind) => {
                write!(f, "Waiting for {} permission", kind)
            }
            ScanError::RadioUnavailable(msg) => {
                write!(f, "Bluetooth radio unavailable: {}", msg)
            }
            ScanError::AlreadyScanning => {
                write!(f, "A scan is already running for this delivery target")
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Errors raised while validating an inbound discovery payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Payload was missing the data needed to build an event
    MalformedPayload(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::MalformedPayload(msg) => {
                write!(f, "Malformed discovery payload: {}", msg)
            }
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::PermissionDenied(PermissionKind::BluetoothScan);
        assert!(err.to_string().contains("Bluetooth scan"));

        let err = ScanError::RadioUnavailable("no adapter".to_string());
        assert!(err.to_string().contains("no adapter"));
    }

    #[test]
    fn test_delivery_error_display() {
        let err = DeliveryError::MalformedPayload("missing device id".to_string());
        assert!(err.to_string().contains("missing device id"));
    }

    #[test]
    fn test_config_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }
}
