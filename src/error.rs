//! # Error Types Module
//!
//! Centralized error handling for the motion capture client.
//!
//! ## Error Types
//! - `LinkError`: discovery, connection and characteristic I/O failures
//! - `SessionError`: recording session failures
//! - `ExportError`: CSV export failures
//! - `ConfigError`: configuration file I/O and parsing errors
//!
//! Per-frame decoding failures live next to the decoder as
//! [`crate::codec::ParseError`] because they never leave the notification pump.

use std::fmt;

/// Errors raised by the link manager and radio transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The device chooser was dismissed without a selection
    UserCancelled,
    /// Bluetooth adapter not found or not available
    NoAdapter,
    /// No advertising device matched the selector
    NotFound,
    /// Connected, but the expected service/characteristic is missing
    IncompatibleDevice,
    /// The channel belongs to a connection that is gone
    LinkClosed,
    /// A connection attempt is already in progress or established
    Busy,
    /// The platform radio stack reported a failure
    Transport(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::UserCancelled => write!(f, "Device selection was cancelled"),
            LinkError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            LinkError::NotFound => write!(f, "No matching device found"),
            LinkError::IncompatibleDevice => {
                write!(f, "Device does not expose the sensor service and characteristic")
            }
            LinkError::LinkClosed => write!(f, "Device is not connected"),
            LinkError::Busy => write!(f, "A device is already connecting or connected"),
            LinkError::Transport(msg) => write!(f, "Bluetooth transport error: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

/// Errors that can occur while recording a motion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    InvalidLabel,
    NotCalibrated,
    AlreadyRecording,
    NotRecording,
    EmptyRecording,
    SessionAborted,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidLabel => write!(f, "Please enter a motion name"),
            SessionError::NotCalibrated => {
                write!(f, "Please calibrate the sensor before recording")
            }
            SessionError::AlreadyRecording => write!(f, "A recording is already in progress"),
            SessionError::NotRecording => write!(f, "No recording in progress"),
            SessionError::EmptyRecording => {
                write!(f, "No data was received during the recording; nothing was saved")
            }
            SessionError::SessionAborted => {
                write!(f, "Recording aborted because the device disconnected")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors that can occur while exporting recordings
#[derive(Debug)]
pub enum ExportError {
    NothingToExport,
    WriteFailed(std::io::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::NothingToExport => write!(f, "No recordings to export"),
            ExportError::WriteFailed(e) => write!(f, "Failed to write export file: {}", e),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::NothingToExport => None,
            ExportError::WriteFailed(e) => Some(e),
        }
    }
}

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
