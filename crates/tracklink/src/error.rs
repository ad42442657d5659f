//! Error types for tracklink.
//!
//! This module defines all error types used throughout the tracklink crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::autopilot::{ActionError, FlightStep, TelemetryError};

/// The main error type for tracklink operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Channel Errors ===
    /// The detection channel could not be opened.
    #[error("failed to connect to channel {path}: {message}")]
    ChannelConnect {
        /// Resolved channel path.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// Reading from an open channel failed.
    #[error("failed to read from channel {path}: {source}")]
    ChannelRead {
        /// Resolved channel path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be decoded from its bytes.
    #[error("cannot decode record: expected {expected} bytes, got {actual}")]
    Decode {
        /// Record size in bytes.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Autopilot Errors ===
    /// The connection URL could not be parsed.
    #[error("invalid connection URL '{url}': {message}")]
    InvalidUrl {
        /// The URL as given.
        url: String,
        /// Description of what is wrong with it.
        message: String,
    },

    /// Connecting to the autopilot failed.
    #[error("connection failed: {message}")]
    AutopilotConnect {
        /// Description of what went wrong.
        message: String,
    },

    /// No autopilot showed up on the connection in time.
    #[error("timed out waiting for system after {0:?}")]
    DiscoveryTimeout(Duration),

    /// Setting the telemetry rate was rejected.
    #[error("setting rate failed: {0}")]
    SetRate(#[source] TelemetryError),

    /// An arm, takeoff or land command failed.
    #[error("{step} failed: {source}")]
    Action {
        /// Which step of the sequence failed.
        step: FlightStep,
        /// Why the autopilot rejected it.
        #[source]
        source: ActionError,
    },

    /// The operation was stopped by a shutdown request.
    #[error("cancelled")]
    Cancelled,

    // === Platform Errors ===
    /// Platform-specific operation failed.
    #[error("platform error: {0}")]
    Platform(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for tracklink operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

#[cfg(target_os = "linux")]
impl From<tracklink_linux::PipeError> for Error {
    fn from(err: tracklink_linux::PipeError) -> Self {
        use tracklink_linux::PipeError;

        let path = match &err {
            PipeError::ServerNotAvailable { path }
            | PipeError::Request { path, .. }
            | PipeError::Timeout { path, .. }
            | PipeError::Open { path, .. }
            | PipeError::Info { path, .. } => path.clone(),
            PipeError::InvalidClientName(_) => PathBuf::new(),
        };
        Self::ChannelConnect {
            path,
            message: err.to_string(),
        }
    }
}

impl Error {
    /// Create a new channel connection error.
    #[must_use]
    pub fn channel_connect(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ChannelConnect {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new platform error.
    #[must_use]
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an action error for the given step.
    #[must_use]
    pub fn action(step: FlightStep, source: ActionError) -> Self {
        Self::Action { step, source }
    }

    /// Check if this error means the channel could not be opened.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ChannelConnect { .. })
    }

    /// Check if this error was caused by a shutdown request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
