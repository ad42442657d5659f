//! Takeoff, hover and land.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AbortOnDrop, Autopilot, FlightStep, Position};
use crate::error::{Error, Result};
use crate::lifecycle::ShutdownToken;

/// Timing of the flight sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightPlan {
    /// Position telemetry rate requested from the vehicle.
    pub position_rate_hz: f64,
    /// Delay between health and in-air polls.
    pub poll_interval: Duration,
    /// Time spent airborne before landing.
    pub hover: Duration,
    /// Time spent watching telemetry after touchdown.
    pub settle: Duration,
}

impl Default for FlightPlan {
    fn default() -> Self {
        Self {
            position_rate_hz: 1.0,
            poll_interval: Duration::from_secs(1),
            hover: Duration::from_secs(10),
            settle: Duration::from_secs(3),
        }
    }
}

/// What happened during a completed flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightReport {
    /// False if a shutdown request cut the hover short.
    pub hover_completed: bool,
    /// Wall time from the rate request to "Finished".
    pub elapsed: Duration,
    /// Last position seen.
    pub final_position: Position,
}

fn log_positions(mut positions: watch::Receiver<Position>) -> AbortOnDrop {
    AbortOnDrop(tokio::spawn(async move {
        while positions.changed().await.is_ok() {
            let position = *positions.borrow_and_update();
            info!("Altitude: {} m", position.relative_altitude_m);
        }
        debug!("Position stream closed");
    }))
}

/// Fly the vehicle up, hover, and bring it back down.
///
/// Every failed step ends the sequence; nothing is undone. A vehicle that
/// fails to take off stays armed and one that fails to land stays in the air.
///
/// # Errors
///
/// - [`Error::SetRate`] if the telemetry rate is rejected
/// - [`Error::Action`] if arming, takeoff or landing is rejected
/// - [`Error::Cancelled`] if `shutdown` fires before the vehicle is armed
pub async fn takeoff_and_land(
    autopilot: &dyn Autopilot,
    plan: &FlightPlan,
    shutdown: &ShutdownToken,
) -> Result<FlightReport> {
    let start = Instant::now();

    autopilot
        .set_rate_position(plan.position_rate_hz)
        .await
        .map_err(Error::SetRate)?;

    let positions = autopilot.subscribe_position();
    let _logger = log_positions(positions.clone());

    loop {
        if shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if autopilot.health_all_ok().await {
            break;
        }
        info!("Vehicle is getting ready to arm");
        if !shutdown.sleep(plan.poll_interval).await {
            return Err(Error::Cancelled);
        }
    }

    info!("Arming...");
    autopilot
        .arm()
        .await
        .map_err(|e| Error::action(FlightStep::Arm, e))?;

    info!("Taking off...");
    autopilot
        .takeoff()
        .await
        .map_err(|e| Error::action(FlightStep::Takeoff, e))?;

    let hover_completed = shutdown.sleep(plan.hover).await;
    if !hover_completed {
        warn!("Shutdown requested while airborne, landing now");
    }

    info!("Landing...");
    autopilot
        .land()
        .await
        .map_err(|e| Error::action(FlightStep::Land, e))?;

    // Once landing is commanded it runs to completion.
    while autopilot.in_air().await {
        info!("Vehicle is landing...");
        tokio::time::sleep(plan.poll_interval).await;
    }
    info!("Landed!");

    shutdown.sleep(plan.settle).await;
    info!("Finished...");

    let final_position = *positions.borrow();
    Ok(FlightReport {
        hover_completed,
        elapsed: start.elapsed(),
        final_position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autopilot::{ActionError, SimConfig, SimulatedAutopilot, TelemetryError};
    use crate::logging::init_test_logging;

    fn sim(config: SimConfig) -> SimulatedAutopilot {
        SimulatedAutopilot::new(config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path() {
        init_test_logging();
        let vehicle = SimulatedAutopilot::default();
        let report = takeoff_and_land(&vehicle, &FlightPlan::default(), &ShutdownToken::new())
            .await
            .unwrap();

        // 2s health warm-up, 10s hover, 3s landing, 3s settle.
        assert_eq!(report.elapsed, Duration::from_secs(18));
        assert!(report.hover_completed);
        assert!(report.final_position.relative_altitude_m.abs() < f32::EPSILON);
        assert!(!vehicle.is_armed());
        assert!(!vehicle.in_air().await);
        assert_eq!(vehicle.position_rate_hz(), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_failure_is_fatal() {
        init_test_logging();
        let vehicle = sim(SimConfig {
            fail_set_rate: Some(TelemetryError::Busy),
            ..SimConfig::default()
        });
        let err = takeoff_and_land(&vehicle, &FlightPlan::default(), &ShutdownToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SetRate(TelemetryError::Busy)));
        assert!(!vehicle.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_failure_is_fatal() {
        init_test_logging();
        let vehicle = sim(SimConfig::from_profile("arm-denied").unwrap());
        let err = takeoff_and_land(&vehicle, &FlightPlan::default(), &ShutdownToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Arming failed: command denied");
        assert!(!vehicle.in_air().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_takeoff_failure_leaves_vehicle_armed() {
        init_test_logging();
        let vehicle = sim(SimConfig::from_profile("takeoff-denied").unwrap());
        let err = takeoff_and_land(&vehicle, &FlightPlan::default(), &ShutdownToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Action {
                step: FlightStep::Takeoff,
                source: ActionError::CommandDenied
            }
        ));
        assert!(vehicle.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_land_failure_leaves_vehicle_airborne() {
        init_test_logging();
        let vehicle = sim(SimConfig {
            fail_land: Some(ActionError::Timeout),
            ..SimConfig::default()
        });
        let err = takeoff_and_land(&vehicle, &FlightPlan::default(), &ShutdownToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Land failed: timeout");
        assert!(vehicle.in_air().await);
        assert!(vehicle.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_arming() {
        init_test_logging();
        let vehicle = SimulatedAutopilot::default();
        let shutdown = ShutdownToken::new();
        shutdown.cancel();

        let err = takeoff_and_land(&vehicle, &FlightPlan::default(), &shutdown)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!vehicle.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_health() {
        init_test_logging();
        let vehicle = sim(SimConfig {
            health_checks_until_ready: u32::MAX,
            ..SimConfig::default()
        });
        let shutdown = ShutdownToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4500)).await;
            canceller.cancel();
        });

        let err = takeoff_and_land(&vehicle, &FlightPlan::default(), &shutdown)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!vehicle.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_hover_still_lands() {
        init_test_logging();
        let vehicle = SimulatedAutopilot::default();
        let shutdown = ShutdownToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let report = takeoff_and_land(&vehicle, &FlightPlan::default(), &shutdown)
            .await
            .unwrap();

        assert!(!report.hover_completed);
        assert!(report.elapsed < Duration::from_secs(18));
        assert!(!vehicle.in_air().await);
        assert!(!vehicle.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_plan() {
        init_test_logging();
        let vehicle = sim(SimConfig {
            health_checks_until_ready: 0,
            landing_checks: 0,
            ..SimConfig::default()
        });
        let plan = FlightPlan {
            hover: Duration::from_secs(1),
            settle: Duration::ZERO,
            ..FlightPlan::default()
        };

        let report = takeoff_and_land(&vehicle, &plan, &ShutdownToken::new())
            .await
            .unwrap();
        assert_eq!(report.elapsed, Duration::from_secs(1));
    }
}
