//! In-process simulated vehicle.
//!
//! Good enough to exercise the flight sequence: health comes up after a few
//! checks, takeoff jumps to a fixed altitude, landing descends over a few
//! `in_air` polls and the vehicle disarms itself on touchdown. Any command
//! can be made to fail.

use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

use super::{ActionError, Autopilot, Position, TelemetryError};

/// Behavior of a [`SimulatedAutopilot`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Whether the vehicle answers on its link at all.
    pub discoverable: bool,
    /// `health_all_ok` calls that return false before the vehicle is ready.
    pub health_checks_until_ready: u32,
    /// `in_air` calls that still return true after a land command.
    pub landing_checks: u32,
    /// Altitude reached by takeoff.
    pub takeoff_altitude_m: f32,
    /// Home position.
    pub home: Position,
    /// Make `set_rate_position` fail.
    pub fail_set_rate: Option<TelemetryError>,
    /// Make `arm` fail.
    pub fail_arm: Option<ActionError>,
    /// Make `takeoff` fail.
    pub fail_takeoff: Option<ActionError>,
    /// Make `land` fail.
    pub fail_land: Option<ActionError>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            discoverable: true,
            health_checks_until_ready: 2,
            landing_checks: 3,
            takeoff_altitude_m: 2.5,
            home: Position {
                latitude_deg: 47.397_742,
                longitude_deg: 8.545_594,
                absolute_altitude_m: 488.0,
                relative_altitude_m: 0.0,
            },
            fail_set_rate: None,
            fail_arm: None,
            fail_takeoff: None,
            fail_land: None,
        }
    }
}

impl SimConfig {
    /// Look up a named profile (`sim://<profile>`).
    ///
    /// Known profiles: `""`/`default`, `offline`, `rate-denied`,
    /// `arm-denied`, `takeoff-denied`, `land-denied`.
    #[must_use]
    pub fn from_profile(profile: &str) -> Option<Self> {
        let base = Self::default();
        let config = match profile {
            "" | "default" => base,
            "offline" => Self {
                discoverable: false,
                ..base
            },
            "rate-denied" => Self {
                fail_set_rate: Some(TelemetryError::CommandDenied),
                ..base
            },
            "arm-denied" => Self {
                fail_arm: Some(ActionError::CommandDenied),
                ..base
            },
            "takeoff-denied" => Self {
                fail_takeoff: Some(ActionError::CommandDenied),
                ..base
            },
            "land-denied" => Self {
                fail_land: Some(ActionError::CommandDenied),
                ..base
            },
            _ => return None,
        };
        Some(config)
    }
}

#[derive(Debug, Default)]
struct SimState {
    health_checks_left: u32,
    armed: bool,
    in_air: bool,
    landing_checks_left: Option<u32>,
    position_rate_hz: Option<f64>,
}

/// A vehicle that lives in memory.
#[derive(Debug)]
pub struct SimulatedAutopilot {
    config: SimConfig,
    state: Mutex<SimState>,
    position: watch::Sender<Position>,
}

impl SimulatedAutopilot {
    /// Create a vehicle sitting disarmed at home.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let (position, _) = watch::channel(config.home);
        let state = SimState {
            health_checks_left: config.health_checks_until_ready,
            ..SimState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
            position,
        }
    }

    /// Whether the motors are armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    /// The position rate last accepted, if any.
    #[must_use]
    pub fn position_rate_hz(&self) -> Option<f64> {
        self.lock().position_rate_hz
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn publish_altitude(&self, relative_altitude_m: f32) {
        let home = self.config.home;
        self.position.send_replace(Position {
            absolute_altitude_m: home.absolute_altitude_m + relative_altitude_m,
            relative_altitude_m,
            ..home
        });
    }
}

impl Default for SimulatedAutopilot {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[async_trait::async_trait]
impl Autopilot for SimulatedAutopilot {
    async fn set_rate_position(&self, rate_hz: f64) -> Result<(), TelemetryError> {
        if let Some(err) = self.config.fail_set_rate {
            return Err(err);
        }
        if !(rate_hz > 0.0 && rate_hz.is_finite()) {
            return Err(TelemetryError::CommandDenied);
        }
        self.lock().position_rate_hz = Some(rate_hz);
        Ok(())
    }

    fn subscribe_position(&self) -> watch::Receiver<Position> {
        self.position.subscribe()
    }

    async fn health_all_ok(&self) -> bool {
        let mut state = self.lock();
        if state.health_checks_left == 0 {
            return true;
        }
        state.health_checks_left -= 1;
        false
    }

    async fn arm(&self) -> Result<(), ActionError> {
        if let Some(err) = self.config.fail_arm {
            return Err(err);
        }
        let mut state = self.lock();
        if state.health_checks_left > 0 {
            return Err(ActionError::CommandDenied);
        }
        state.armed = true;
        debug!("Simulated vehicle armed");
        Ok(())
    }

    async fn takeoff(&self) -> Result<(), ActionError> {
        if let Some(err) = self.config.fail_takeoff {
            return Err(err);
        }
        {
            let mut state = self.lock();
            if !state.armed {
                return Err(ActionError::CommandDenied);
            }
            state.in_air = true;
        }
        self.publish_altitude(self.config.takeoff_altitude_m);
        Ok(())
    }

    async fn land(&self) -> Result<(), ActionError> {
        if let Some(err) = self.config.fail_land {
            return Err(err);
        }
        let mut state = self.lock();
        if !state.in_air {
            return Err(ActionError::CommandDenied);
        }
        state.landing_checks_left = Some(self.config.landing_checks);
        Ok(())
    }

    async fn in_air(&self) -> bool {
        let altitude = {
            let mut state = self.lock();
            match state.landing_checks_left {
                Some(0) => {
                    state.in_air = false;
                    state.armed = false;
                    state.landing_checks_left = None;
                    debug!("Simulated vehicle touched down and disarmed");
                    Some(0.0)
                }
                Some(left) => {
                    state.landing_checks_left = Some(left - 1);
                    #[allow(clippy::cast_precision_loss)]
                    let fraction = left as f32 / (self.config.landing_checks.max(1)) as f32;
                    Some(self.config.takeoff_altitude_m * fraction)
                }
                None => None,
            }
        };
        if let Some(altitude) = altitude {
            self.publish_altitude(altitude);
        }
        self.lock().in_air
    }
}
