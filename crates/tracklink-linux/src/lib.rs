//! Linux-specific implementation for tracklink
//!
//! This crate provides the modal pipe FIFO handshake used to subscribe to
//! channels published under `/run/mpa/`.

#![cfg(target_os = "linux")]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod modal_pipe;

pub use modal_pipe::{PipeError, PipeInfo, PIPE_ROOT};

/// Initialize Linux-specific components
///
/// # Errors
///
/// Returns an error if initialization fails
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!(root = PIPE_ROOT, "Initializing Linux platform components");
    Ok(())
}

/// Get platform name
#[must_use]
pub fn platform_name() -> &'static str {
    "Linux"
}
