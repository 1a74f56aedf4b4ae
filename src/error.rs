use thiserror::Error;

use crate::transport::adapter::AdapterState;

/// Structural failures of the sampling side.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    #[error("Motion sensors are not available on this device")]
    SensorUnavailable,

    #[error("Motion sensor access not authorized")]
    PermissionDenied,

    #[error("Sampler already running")]
    AlreadyRunning,

    #[error("Sensor error: {0}")]
    Sensor(String),
}

/// Failures surfaced by either link role.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Adapter powered off, unauthorized or unsupported. Not retried.
    #[error("Wireless link unavailable: {0}")]
    LinkUnavailable(AdapterState),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Disconnected unexpectedly: {0}")]
    DisconnectedUnexpectedly(String),

    #[error("Outbound queue full")]
    SendBackpressure,

    #[error("{operation} failed after {attempts} attempt(s)")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
    },

    #[error("Link not connected")]
    NotConnected,

    #[error("Link closed")]
    Closed,

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// A received payload that does not parse. The frame is dropped, the link stays up.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("Malformed payload: bad magic {0:#06x}")]
    BadMagic(u16),

    #[error("Malformed payload: unsupported version {0}")]
    UnsupportedVersion(u8),

    #[error("Malformed payload: expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("Malformed payload: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Malformed payload: non-finite value in field {0}")]
    NonFinite(usize),

    #[error("Malformed payload: declared length {0} exceeds frame limit")]
    Oversized(usize),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid setting {field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("Invalid screen bounds {width}x{height}")]
    InvalidBounds { width: f64, height: f64 },

    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Settings IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MotionResult<T> = Result<T, MotionError>;
pub type LinkResult<T> = Result<T, LinkError>;
