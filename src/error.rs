//! # Error Types
//!
//! Custom error types for FTMS Bridge using `thiserror`.
//!
//! Frame decoding and connection management fail in disjoint ways, so each
//! has its own error type. [`FtmsBridgeError`] wraps both for callers that
//! only need a single error to propagate.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Indoor Bike Data frame decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame ended before a field the flags announced
    #[error("buffer too short for {field}: need {needed} bytes, {available} remaining")]
    BufferTooShort {
        /// Name of the field that could not be read
        field: &'static str,
        /// Width of that field in bytes
        needed: usize,
        /// Bytes left in the frame at that point
        available: usize,
    },
}

/// Connection lifecycle errors, returned from `ConnectionManager::connect`
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Peripheral selection was abandoned before a device was chosen
    #[error("device selection was cancelled")]
    Cancelled,

    /// No Bluetooth adapter at the configured index
    #[error("no Bluetooth adapter available at index {0}")]
    AdapterUnavailable(usize),

    /// Scanning finished without finding a matching device
    #[error("no FTMS device found: {0}")]
    NoDeviceFound(String),

    /// Transport-level connect failed
    #[error("failed to connect to {device}: {reason}")]
    ConnectFailed { device: String, reason: String },

    /// The peripheral does not expose the requested service
    #[error("service {0} not found on device")]
    ServiceNotFound(uuid::Uuid),

    /// The service does not expose the requested characteristic
    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(uuid::Uuid),

    /// Enabling notifications failed
    #[error("failed to subscribe to notifications: {0}")]
    SubscribeFailed(String),

    /// `connect()` called while a connection attempt or session is active
    #[error("connection already active (state: {0:?})")]
    AlreadyActive(ConnectionState),

    /// Errors raised by the Bluetooth stack outside a specific step
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
}

/// Main error type for FTMS Bridge
#[derive(Debug, Error)]
pub enum FtmsBridgeError {
    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Frame decoding errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Telemetry serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for FTMS Bridge
pub type Result<T> = std::result::Result<T, FtmsBridgeError>;
