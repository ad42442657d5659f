//! Autopilot client interface.
//!
//! The flight controller itself is external. This module defines the
//! operations the takeoff-and-land sequence needs from it, the reasons those
//! operations can fail, and [`connect`], which resolves a connection URL to
//! an implementation: MAVLink for `tcp`, `udp` and `serial`, the in-process
//! simulator for `sim`.

pub mod mav;
pub mod mission;
pub mod sim;
pub mod url;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub use mav::{MavTransport, MavlinkAutopilot};
pub use mission::{takeoff_and_land, FlightPlan, FlightReport};
pub use sim::{SimConfig, SimulatedAutopilot};
pub use url::ConnectionUrl;

/// Why the autopilot rejected an arm, takeoff or land command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ActionError {
    /// No system is connected.
    #[error("no system")]
    NoSystem,
    /// The link dropped while sending the command.
    #[error("connection error")]
    ConnectionError,
    /// The vehicle is busy with another command.
    #[error("busy")]
    Busy,
    /// The vehicle refused the command.
    #[error("command denied")]
    CommandDenied,
    /// The vehicle refused because it is not on the ground.
    #[error("command denied, not landed")]
    CommandDeniedNotLanded,
    /// The vehicle refused because it does not know if it is on the ground.
    #[error("command denied, landed state unknown")]
    CommandDeniedLandedStateUnknown,
    /// No acknowledgement arrived in time.
    #[error("timeout")]
    Timeout,
    /// The vehicle does not support the command.
    #[error("unsupported")]
    Unsupported,
    /// The command was accepted but failed.
    #[error("failed")]
    Failed,
    /// Anything else.
    #[error("unknown")]
    Unknown,
}

/// Why the autopilot rejected a telemetry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TelemetryError {
    /// No system is connected.
    #[error("no system")]
    NoSystem,
    /// The link dropped while sending the request.
    #[error("connection error")]
    ConnectionError,
    /// The vehicle is busy.
    #[error("busy")]
    Busy,
    /// The vehicle refused the request.
    #[error("command denied")]
    CommandDenied,
    /// No acknowledgement arrived in time.
    #[error("timeout")]
    Timeout,
    /// The vehicle does not support the request.
    #[error("unsupported")]
    Unsupported,
    /// Anything else.
    #[error("unknown")]
    Unknown,
}

/// A step of the flight sequence that sends a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStep {
    /// Arming the motors.
    Arm,
    /// Taking off.
    Takeoff,
    /// Landing.
    Land,
}

impl std::fmt::Display for FlightStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arm => write!(f, "Arming"),
            Self::Takeoff => write!(f, "Takeoff"),
            Self::Land => write!(f, "Land"),
        }
    }
}

/// Global position estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Position {
    /// Latitude in degrees.
    pub latitude_deg: f64,
    /// Longitude in degrees.
    pub longitude_deg: f64,
    /// Altitude above mean sea level in meters.
    pub absolute_altitude_m: f32,
    /// Altitude above the takeoff point in meters.
    pub relative_altitude_m: f32,
}

/// Aborts the wrapped task when dropped.
pub(crate) struct AbortOnDrop(pub(crate) JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Operations the flight sequence uses.
#[async_trait::async_trait]
pub trait Autopilot: Send + Sync {
    /// Request position updates at `rate_hz`.
    async fn set_rate_position(&self, rate_hz: f64) -> std::result::Result<(), TelemetryError>;

    /// Subscribe to position updates.
    fn subscribe_position(&self) -> watch::Receiver<Position>;

    /// Whether every health check passes (ready to arm).
    async fn health_all_ok(&self) -> bool;

    /// Arm the motors.
    async fn arm(&self) -> std::result::Result<(), ActionError>;

    /// Take off to the vehicle's configured takeoff altitude.
    async fn takeoff(&self) -> std::result::Result<(), ActionError>;

    /// Land at the current position.
    async fn land(&self) -> std::result::Result<(), ActionError>;

    /// Whether the vehicle is airborne.
    async fn in_air(&self) -> bool;
}

/// Connect to the autopilot at `url` and wait for it to appear.
///
/// # Errors
///
/// Returns [`Error::AutopilotConnect`] if the link cannot be opened or the
/// simulator profile is unknown, or [`Error::DiscoveryTimeout`] if no
/// autopilot shows up within `discovery_timeout`.
pub async fn connect(url: &ConnectionUrl, discovery_timeout: Duration) -> Result<Box<dyn Autopilot>> {
    debug!(url = %url, "Connecting to autopilot");

    let ConnectionUrl::Sim { profile } = url else {
        let autopilot = MavlinkAutopilot::connect(url, discovery_timeout).await?;
        info!(url = %url, "Autopilot connected");
        return Ok(Box::new(autopilot));
    };

    let config = SimConfig::from_profile(profile).ok_or_else(|| Error::AutopilotConnect {
        message: format!("unknown simulator profile '{profile}'"),
    })?;

    if !config.discoverable {
        // Nothing ever answers on this link.
        let _ = tokio::time::timeout(discovery_timeout, std::future::pending::<()>()).await;
        return Err(Error::DiscoveryTimeout(discovery_timeout));
    }

    info!(url = %url, "Autopilot discovered");
    Ok(Box::new(SimulatedAutopilot::new(config)))
}
