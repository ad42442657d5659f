//! MAVLink autopilot over UDP, TCP or serial.
//!
//! A receiver thread folds heartbeats, status and position messages from the
//! vehicle into shared state. Commands go out as `COMMAND_LONG` and wait for
//! the matching `COMMAND_ACK`, retrying a few times before giving up. While
//! the autopilot is alive a ground station heartbeat goes out once a second.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mavlink::common::{
    MavAutopilot, MavCmd, MavLandedState, MavMessage, MavModeFlag, MavResult, MavState,
    MavSysStatusSensor, MavType, COMMAND_LONG_DATA, GLOBAL_POSITION_INT_DATA, HEARTBEAT_DATA,
    SYS_STATUS_DATA,
};
use mavlink::error::MessageReadError;
use mavlink::{MavConnection, MavHeader, MavlinkVersion};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{AbortOnDrop, ActionError, Autopilot, ConnectionUrl, Position, TelemetryError};
use crate::error::{Error, Result};

/// Our identity on the link (ground station).
const GCS_SYSTEM_ID: u8 = 245;
const GCS_COMPONENT_ID: u8 = 190;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// How long to wait for each `COMMAND_ACK`.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends of one command before reporting a timeout.
const COMMAND_ATTEMPTS: u8 = 3;

const GLOBAL_POSITION_INT_ID: u16 = 33;
const EXTENDED_SYS_STATE_ID: u16 = 245;

/// Rate requested for `EXTENDED_SYS_STATE`, which drives `in_air`.
const LANDED_STATE_RATE_HZ: f64 = 2.0;

/// Blocking message link to a vehicle.
pub trait MavTransport: Send + Sync {
    /// Wait for the next message; `None` once the link is gone.
    fn recv(&self) -> Option<(MavHeader, MavMessage)>;

    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn send(&self, header: &MavHeader, message: &MavMessage) -> io::Result<()>;
}

/// A link opened by the `mavlink` crate.
struct MavlinkConnection(Box<dyn MavConnection<MavMessage> + Send + Sync>);

impl MavlinkConnection {
    fn open(address: &str) -> io::Result<Self> {
        let mut connection = mavlink::connect::<MavMessage>(address)?;
        connection.set_protocol_version(MavlinkVersion::V2);
        Ok(Self(connection))
    }
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

impl MavTransport for MavlinkConnection {
    fn recv(&self) -> Option<(MavHeader, MavMessage)> {
        loop {
            match self.0.recv() {
                Ok(frame) => return Some(frame),
                Err(MessageReadError::Io(e)) if is_closed(&e) => {
                    debug!(error = %e, "MAVLink link closed");
                    return None;
                }
                Err(e) => trace!(error = ?e, "Skipping unreadable MAVLink frame"),
            }
        }
    }

    fn send(&self, header: &MavHeader, message: &MavMessage) -> io::Result<()> {
        self.0
            .send(header, message)
            .map(|_| ())
            .map_err(|e| io::Error::other(format!("{e:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    system: u8,
    component: u8,
}

#[derive(Debug, Default)]
struct LinkState {
    target: Option<Target>,
    armed: bool,
    landed_state: Option<MavLandedState>,
    sensors_healthy: bool,
    has_position: bool,
}

impl LinkState {
    fn in_air(&self) -> bool {
        match self.landed_state {
            Some(MavLandedState::MAV_LANDED_STATE_ON_GROUND) => false,
            Some(
                MavLandedState::MAV_LANDED_STATE_IN_AIR
                | MavLandedState::MAV_LANDED_STATE_TAKEOFF
                | MavLandedState::MAV_LANDED_STATE_LANDING,
            ) => true,
            // No landed state streamed yet.
            _ => self.armed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CommandAck {
    command: MavCmd,
    result: MavResult,
}

/// State written by the receiver thread.
struct Shared {
    state: Mutex<LinkState>,
    position: watch::Sender<Position>,
    discovered: watch::Sender<bool>,
    acks: broadcast::Sender<CommandAck>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, header: &MavHeader, message: &MavMessage) {
        if let MavMessage::HEARTBEAT(heartbeat) = message {
            self.on_heartbeat(header, heartbeat);
            return;
        }

        let mut state = self.lock();
        if state.target.map(|t| t.system) != Some(header.system_id) {
            return;
        }
        match message {
            MavMessage::GLOBAL_POSITION_INT(data) => {
                state.has_position = true;
                drop(state);
                self.position.send_replace(position_from(data));
            }
            MavMessage::EXTENDED_SYS_STATE(data) => state.landed_state = Some(data.landed_state),
            MavMessage::SYS_STATUS(data) => state.sensors_healthy = sensors_healthy(data),
            MavMessage::COMMAND_ACK(data) => {
                drop(state);
                trace!(command = ?data.command, result = ?data.result, "Command acknowledged");
                // No receivers when nothing is waiting.
                let _ = self.acks.send(CommandAck {
                    command: data.command,
                    result: data.result,
                });
            }
            _ => {}
        }
    }

    fn on_heartbeat(&self, header: &MavHeader, heartbeat: &HEARTBEAT_DATA) {
        if heartbeat.mavtype == MavType::MAV_TYPE_GCS
            || heartbeat.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID
        {
            return;
        }

        let mut state = self.lock();
        let known = state.target;
        match known {
            Some(target) if target.system != header.system_id => return,
            Some(_) => {}
            None => {
                let target = Target {
                    system: header.system_id,
                    component: header.component_id,
                };
                info!(
                    system = target.system,
                    component = target.component,
                    autopilot = ?heartbeat.autopilot,
                    "Autopilot discovered"
                );
                state.target = Some(target);
                self.discovered.send_replace(true);
            }
        }
        state.armed = heartbeat
            .base_mode
            .contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
    }
}

#[allow(clippy::cast_precision_loss)]
fn position_from(data: &GLOBAL_POSITION_INT_DATA) -> Position {
    Position {
        latitude_deg: f64::from(data.lat) / 1e7,
        longitude_deg: f64::from(data.lon) / 1e7,
        absolute_altitude_m: data.alt as f32 / 1000.0,
        relative_altitude_m: data.relative_alt as f32 / 1000.0,
    }
}

/// Inertial sensors that are present must all report healthy.
fn sensors_healthy(status: &SYS_STATUS_DATA) -> bool {
    let inertial = MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO
        | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL
        | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG;
    let expected = inertial & status.onboard_control_sensors_present;
    !expected.is_empty() && status.onboard_control_sensors_health.contains(expected)
}

fn action_result(result: MavResult) -> std::result::Result<(), ActionError> {
    match result {
        MavResult::MAV_RESULT_ACCEPTED => Ok(()),
        MavResult::MAV_RESULT_TEMPORARILY_REJECTED => Err(ActionError::Busy),
        MavResult::MAV_RESULT_DENIED => Err(ActionError::CommandDenied),
        MavResult::MAV_RESULT_UNSUPPORTED => Err(ActionError::Unsupported),
        MavResult::MAV_RESULT_FAILED => Err(ActionError::Failed),
        _ => Err(ActionError::Unknown),
    }
}

fn telemetry_error(e: ActionError) -> TelemetryError {
    match e {
        ActionError::NoSystem => TelemetryError::NoSystem,
        ActionError::ConnectionError => TelemetryError::ConnectionError,
        ActionError::Busy => TelemetryError::Busy,
        ActionError::CommandDenied
        | ActionError::CommandDeniedNotLanded
        | ActionError::CommandDeniedLandedStateUnknown => TelemetryError::CommandDenied,
        ActionError::Timeout => TelemetryError::Timeout,
        ActionError::Unsupported => TelemetryError::Unsupported,
        ActionError::Failed | ActionError::Unknown => TelemetryError::Unknown,
    }
}

fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

/// Sending half of the link, shared with the heartbeat task.
struct Outbox {
    link: Arc<dyn MavTransport>,
    sequence: AtomicU8,
}

impl Outbox {
    fn send(&self, message: &MavMessage) -> io::Result<()> {
        let header = MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.link.send(&header, message)
    }
}

fn spawn_receiver(link: Arc<dyn MavTransport>, shared: Arc<Shared>) -> Result<()> {
    std::thread::Builder::new()
        .name("mavlink-rx".to_string())
        .spawn(move || {
            while let Some((header, message)) = link.recv() {
                shared.handle(&header, &message);
                if Arc::strong_count(&shared) == 1 {
                    break;
                }
            }
            debug!("MAVLink receiver stopped");
        })?;
    Ok(())
}

fn spawn_heartbeat(outbox: Arc<Outbox>) -> AbortOnDrop {
    AbortOnDrop(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = outbox.send(&gcs_heartbeat()) {
                debug!(error = %e, "Failed to send heartbeat");
            }
        }
    }))
}

/// Wait for the final acknowledgement of `command`; `None` on timeout.
async fn wait_for_ack(
    acks: &mut broadcast::Receiver<CommandAck>,
    command: MavCmd,
    timeout: Duration,
) -> Option<MavResult> {
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, acks.recv()).await {
            Ok(Ok(ack))
                if ack.command == command && ack.result != MavResult::MAV_RESULT_IN_PROGRESS =>
            {
                return Some(ack.result);
            }
            Ok(Ok(_) | Err(broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}

/// A vehicle reached over MAVLink.
pub struct MavlinkAutopilot {
    shared: Arc<Shared>,
    outbox: Arc<Outbox>,
    command_timeout: Duration,
    _heartbeat: AbortOnDrop,
}

impl MavlinkAutopilot {
    /// Open the link described by `url` and wait for an autopilot heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AutopilotConnect`] if the link cannot be opened or
    /// [`Error::DiscoveryTimeout`] if no autopilot speaks within
    /// `discovery_timeout`.
    pub async fn connect(url: &ConnectionUrl, discovery_timeout: Duration) -> Result<Self> {
        let address = url.mavlink_address().ok_or_else(|| Error::AutopilotConnect {
            message: format!("{url} is not a MAVLink connection"),
        })?;

        debug!(address = %address, "Opening MAVLink link");
        let link = tokio::task::spawn_blocking(move || MavlinkConnection::open(&address))
            .await
            .map_err(|e| Error::internal(format!("link task failed: {e}")))?
            .map_err(|e| Error::AutopilotConnect {
                message: format!("{url}: {e}"),
            })?;

        let autopilot = Self::start(Arc::new(link), discovery_timeout).await?;
        if let Err(e) = autopilot
            .request_message_interval(EXTENDED_SYS_STATE_ID, LANDED_STATE_RATE_HZ)
            .await
        {
            warn!(error = %e, "Landed state rate rejected, in-air falls back to armed state");
        }
        Ok(autopilot)
    }

    /// Drive an already-open link and wait for an autopilot heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DiscoveryTimeout`] if no autopilot speaks within
    /// `discovery_timeout`, or [`Error::Io`] if the receiver thread cannot
    /// be started.
    pub async fn start(link: Arc<dyn MavTransport>, discovery_timeout: Duration) -> Result<Self> {
        let (position, _) = watch::channel(Position::default());
        let (discovered, mut discovered_rx) = watch::channel(false);
        let (acks, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState::default()),
            position,
            discovered,
            acks,
        });

        spawn_receiver(Arc::clone(&link), Arc::clone(&shared))?;
        let outbox = Arc::new(Outbox {
            link,
            sequence: AtomicU8::new(0),
        });
        let heartbeat = spawn_heartbeat(Arc::clone(&outbox));

        let found = tokio::time::timeout(discovery_timeout, discovered_rx.wait_for(|found| *found))
            .await
            .is_ok_and(|r| r.is_ok());
        if !found {
            return Err(Error::DiscoveryTimeout(discovery_timeout));
        }

        Ok(Self {
            shared,
            outbox,
            command_timeout: COMMAND_TIMEOUT,
            _heartbeat: heartbeat,
        })
    }

    /// Change how long each command send waits for its acknowledgement.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn command_long(
        &self,
        command: MavCmd,
        params: [f32; 7],
    ) -> std::result::Result<(), ActionError> {
        let target = self.shared.lock().target.ok_or(ActionError::NoSystem)?;
        let mut acks = self.shared.acks.subscribe();

        for confirmation in 0..COMMAND_ATTEMPTS {
            let message = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
                param1: params[0],
                param2: params[1],
                param3: params[2],
                param4: params[3],
                param5: params[4],
                param6: params[5],
                param7: params[6],
                command,
                target_system: target.system,
                target_component: target.component,
                confirmation,
            });
            self.outbox.send(&message).map_err(|e| {
                warn!(error = %e, command = ?command, "Failed to send command");
                ActionError::ConnectionError
            })?;

            if let Some(result) = wait_for_ack(&mut acks, command, self.command_timeout).await {
                debug!(command = ?command, result = ?result, "Command answered");
                return action_result(result);
            }
            debug!(command = ?command, confirmation, "No acknowledgement");
        }
        Err(ActionError::Timeout)
    }

    async fn request_message_interval(
        &self,
        message_id: u16,
        rate_hz: f64,
    ) -> std::result::Result<(), ActionError> {
        #[allow(clippy::cast_possible_truncation)]
        let interval_us = (1_000_000.0 / rate_hz) as f32;
        self.command_long(
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [f32::from(message_id), interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }
}

impl fmt::Debug for MavlinkAutopilot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MavlinkAutopilot")
            .field("target", &self.shared.lock().target)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

/// Keep the current position and altitude; let the vehicle pick the rest.
const HERE: [f32; 7] = [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, f32::NAN];

#[async_trait::async_trait]
impl Autopilot for MavlinkAutopilot {
    async fn set_rate_position(&self, rate_hz: f64) -> std::result::Result<(), TelemetryError> {
        if !(rate_hz > 0.0 && rate_hz.is_finite()) {
            return Err(TelemetryError::CommandDenied);
        }
        self.request_message_interval(GLOBAL_POSITION_INT_ID, rate_hz)
            .await
            .map_err(telemetry_error)
    }

    fn subscribe_position(&self) -> watch::Receiver<Position> {
        self.shared.position.subscribe()
    }

    async fn health_all_ok(&self) -> bool {
        let state = self.shared.lock();
        state.sensors_healthy && state.has_position
    }

    async fn arm(&self) -> std::result::Result<(), ActionError> {
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn takeoff(&self) -> std::result::Result<(), ActionError> {
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, HERE).await
    }

    async fn land(&self) -> std::result::Result<(), ActionError> {
        self.command_long(MavCmd::MAV_CMD_NAV_LAND, HERE).await
    }

    async fn in_air(&self) -> bool {
        self.shared.lock().in_air()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use mavlink::common::{COMMAND_ACK_DATA, EXTENDED_SYS_STATE_DATA};

    use super::*;
    use crate::logging::init_test_logging;

    const VEHICLE: MavHeader = MavHeader {
        system_id: 1,
        component_id: 1,
        sequence: 0,
    };

    struct FakeLink {
        inbound: Mutex<mpsc::Receiver<(MavHeader, MavMessage)>>,
        outbound: mpsc::Sender<MavMessage>,
    }

    impl MavTransport for FakeLink {
        fn recv(&self) -> Option<(MavHeader, MavMessage)> {
            self.inbound.lock().unwrap().recv().ok()
        }

        fn send(&self, _header: &MavHeader, message: &MavMessage) -> io::Result<()> {
            self.outbound
                .send(message.clone())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    /// Far end of a [`FakeLink`]: records commands and answers each one.
    struct Vehicle {
        tx: mpsc::Sender<(MavHeader, MavMessage)>,
        commands: Arc<Mutex<Vec<COMMAND_LONG_DATA>>>,
    }

    impl Vehicle {
        /// Acknowledge every command with `reply`, or never when `None`.
        fn new(reply: Option<MavResult>) -> (Self, Arc<dyn MavTransport>) {
            let (tx, inbound) = mpsc::channel();
            let (outbound, rx) = mpsc::channel::<MavMessage>();
            let commands = Arc::new(Mutex::new(Vec::new()));

            let acks = tx.clone();
            let seen = Arc::clone(&commands);
            std::thread::spawn(move || {
                for message in rx {
                    let MavMessage::COMMAND_LONG(command) = message else {
                        continue;
                    };
                    let id = command.command;
                    seen.lock().unwrap().push(command);
                    if let Some(result) = reply {
                        let ack = MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                            command: id,
                            result,
                            ..Default::default()
                        });
                        if acks.send((VEHICLE, ack)).is_err() {
                            break;
                        }
                    }
                }
            });

            let link: Arc<dyn MavTransport> = Arc::new(FakeLink {
                inbound: Mutex::new(inbound),
                outbound,
            });
            (Self { tx, commands }, link)
        }

        fn push_from(&self, header: MavHeader, message: MavMessage) {
            self.tx.send((header, message)).unwrap();
        }

        fn push(&self, message: MavMessage) {
            self.push_from(VEHICLE, message);
        }

        fn heartbeat(&self, base_mode: MavModeFlag) {
            self.push(MavMessage::HEARTBEAT(HEARTBEAT_DATA {
                custom_mode: 0,
                mavtype: MavType::MAV_TYPE_QUADROTOR,
                autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
                base_mode,
                system_status: MavState::MAV_STATE_STANDBY,
                mavlink_version: 3,
            }));
        }

        fn commands(&self) -> Vec<COMMAND_LONG_DATA> {
            self.commands.lock().unwrap().clone()
        }
    }

    fn position(lat: i32, lon: i32, alt: i32, relative_alt: i32) -> MavMessage {
        MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            lat,
            lon,
            alt,
            relative_alt,
            ..Default::default()
        })
    }

    fn landed(landed_state: MavLandedState) -> MavMessage {
        MavMessage::EXTENDED_SYS_STATE(EXTENDED_SYS_STATE_DATA {
            landed_state,
            ..Default::default()
        })
    }

    fn sys_status(health: MavSysStatusSensor) -> MavMessage {
        let sensors = MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG;
        MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            onboard_control_sensors_present: sensors,
            onboard_control_sensors_enabled: sensors,
            onboard_control_sensors_health: health,
            ..Default::default()
        })
    }

    async fn connected(reply: Option<MavResult>) -> (Vehicle, MavlinkAutopilot) {
        init_test_logging();
        let (vehicle, link) = Vehicle::new(reply);
        vehicle.heartbeat(MavModeFlag::empty());
        let autopilot = MavlinkAutopilot::start(link, Duration::from_secs(2))
            .await
            .unwrap()
            .with_command_timeout(Duration::from_millis(200));
        (vehicle, autopilot)
    }

    /// Push a position fix and wait for it, so everything sent before it
    /// has been applied.
    async fn sync(vehicle: &Vehicle, autopilot: &MavlinkAutopilot) {
        let mut positions = autopilot.subscribe_position();
        vehicle.push(position(473_977_420, 85_455_940, 488_000, 0));
        tokio::time::timeout(Duration::from_secs(2), positions.changed())
            .await
            .unwrap()
            .unwrap();
    }

    async fn deliver(vehicle: &Vehicle, autopilot: &MavlinkAutopilot, message: MavMessage) {
        vehicle.push(message);
        sync(vehicle, autopilot).await;
    }

    #[tokio::test]
    async fn test_discovers_autopilot_from_heartbeat() {
        let (_vehicle, autopilot) = connected(Some(MavResult::MAV_RESULT_ACCEPTED)).await;
        let debug = format!("{autopilot:?}");
        assert!(debug.contains("system: 1"), "{debug}");
    }

    #[tokio::test]
    async fn test_discovery_ignores_ground_stations() {
        init_test_logging();
        let (vehicle, link) = Vehicle::new(None);
        vehicle.push(gcs_heartbeat());

        let err = MavlinkAutopilot::start(link, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DiscoveryTimeout(_)));
    }

    #[tokio::test]
    async fn test_arm_sends_command_long() {
        let (vehicle, autopilot) = connected(Some(MavResult::MAV_RESULT_ACCEPTED)).await;
        assert_eq!(autopilot.arm().await, Ok(()));

        let commands = vehicle.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, MavCmd::MAV_CMD_COMPONENT_ARM_DISARM);
        assert!((commands[0].param1 - 1.0).abs() < f32::EPSILON);
        assert_eq!(commands[0].target_system, 1);
        assert_eq!(commands[0].target_component, 1);
    }

    #[tokio::test]
    async fn test_takeoff_and_land_commands() {
        let (vehicle, autopilot) = connected(Some(MavResult::MAV_RESULT_ACCEPTED)).await;
        assert_eq!(autopilot.takeoff().await, Ok(()));
        assert_eq!(autopilot.land().await, Ok(()));

        let sent: Vec<MavCmd> = vehicle.commands().iter().map(|c| c.command).collect();
        assert_eq!(
            sent,
            vec![MavCmd::MAV_CMD_NAV_TAKEOFF, MavCmd::MAV_CMD_NAV_LAND]
        );
        assert!(vehicle.commands()[0].param7.is_nan());
    }

    #[tokio::test]
    async fn test_rejections_map_to_action_errors() {
        for (result, expected) in [
            (MavResult::MAV_RESULT_DENIED, ActionError::CommandDenied),
            (MavResult::MAV_RESULT_TEMPORARILY_REJECTED, ActionError::Busy),
            (MavResult::MAV_RESULT_UNSUPPORTED, ActionError::Unsupported),
            (MavResult::MAV_RESULT_FAILED, ActionError::Failed),
        ] {
            let (_vehicle, autopilot) = connected(Some(result)).await;
            assert_eq!(autopilot.takeoff().await, Err(expected), "{result:?}");
        }
    }

    #[tokio::test]
    async fn test_unanswered_command_retries_then_times_out() {
        let (vehicle, autopilot) = connected(None).await;
        assert_eq!(autopilot.land().await, Err(ActionError::Timeout));

        let confirmations: Vec<u8> = vehicle.commands().iter().map(|c| c.confirmation).collect();
        assert_eq!(confirmations, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_set_rate_requests_message_interval() {
        let (vehicle, autopilot) = connected(Some(MavResult::MAV_RESULT_ACCEPTED)).await;
        assert_eq!(autopilot.set_rate_position(2.0).await, Ok(()));

        let command = &vehicle.commands()[0];
        assert_eq!(command.command, MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL);
        assert!((command.param1 - 33.0).abs() < f32::EPSILON);
        assert!((command.param2 - 500_000.0).abs() < f32::EPSILON);

        assert_eq!(
            autopilot.set_rate_position(0.0).await,
            Err(TelemetryError::CommandDenied)
        );
    }

    #[tokio::test]
    async fn test_set_rate_rejection_is_telemetry_error() {
        let (_vehicle, autopilot) = connected(Some(MavResult::MAV_RESULT_DENIED)).await;
        assert_eq!(
            autopilot.set_rate_position(1.0).await,
            Err(TelemetryError::CommandDenied)
        );
    }

    #[tokio::test]
    async fn test_global_position_feeds_watch() {
        let (vehicle, autopilot) = connected(None).await;
        let mut positions = autopilot.subscribe_position();

        vehicle.push(position(473_977_420, 85_455_940, 490_500, 2_500));
        tokio::time::timeout(Duration::from_secs(2), positions.changed())
            .await
            .unwrap()
            .unwrap();

        let position = *positions.borrow();
        assert!((position.latitude_deg - 47.397_742).abs() < 1e-9);
        assert!((position.longitude_deg - 8.545_594).abs() < 1e-9);
        assert!((position.absolute_altitude_m - 490.5).abs() < 1e-3);
        assert!((position.relative_altitude_m - 2.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_in_air_follows_landed_state() {
        let (vehicle, autopilot) = connected(None).await;
        assert!(!autopilot.in_air().await);

        deliver(&vehicle, &autopilot, landed(MavLandedState::MAV_LANDED_STATE_TAKEOFF)).await;
        assert!(autopilot.in_air().await);

        deliver(&vehicle, &autopilot, landed(MavLandedState::MAV_LANDED_STATE_ON_GROUND)).await;
        assert!(!autopilot.in_air().await);
    }

    #[tokio::test]
    async fn test_in_air_without_landed_state_uses_armed_flag() {
        let (vehicle, autopilot) = connected(None).await;
        vehicle.heartbeat(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
        sync(&vehicle, &autopilot).await;
        assert!(autopilot.in_air().await);
    }

    #[tokio::test]
    async fn test_health_needs_sensors_and_position() {
        let (vehicle, autopilot) = connected(None).await;
        assert!(!autopilot.health_all_ok().await);

        let all = MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG;
        deliver(&vehicle, &autopilot, sys_status(all)).await;
        assert!(autopilot.health_all_ok().await);

        let no_mag = MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL;
        deliver(&vehicle, &autopilot, sys_status(no_mag)).await;
        assert!(!autopilot.health_all_ok().await);
    }

    #[tokio::test]
    async fn test_other_systems_are_ignored() {
        let (vehicle, autopilot) = connected(None).await;
        let other = MavHeader {
            system_id: 2,
            ..VEHICLE
        };
        vehicle.push_from(other, landed(MavLandedState::MAV_LANDED_STATE_IN_AIR));
        sync(&vehicle, &autopilot).await;
        assert!(!autopilot.in_air().await);
    }

    #[test]
    fn test_action_result_mapping() {
        assert_eq!(action_result(MavResult::MAV_RESULT_ACCEPTED), Ok(()));
        assert_eq!(
            action_result(MavResult::MAV_RESULT_DENIED),
            Err(ActionError::CommandDenied)
        );
        assert_eq!(
            action_result(MavResult::MAV_RESULT_IN_PROGRESS),
            Err(ActionError::Unknown)
        );
    }

    #[test]
    fn test_telemetry_error_mapping() {
        assert_eq!(telemetry_error(ActionError::Busy), TelemetryError::Busy);
        assert_eq!(
            telemetry_error(ActionError::CommandDeniedNotLanded),
            TelemetryError::CommandDenied
        );
        assert_eq!(telemetry_error(ActionError::Failed), TelemetryError::Unknown);
    }
}
