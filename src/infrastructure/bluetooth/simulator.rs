//! Simulated Mount
//!
//! An in-process [`BleTransport`] that behaves like the tracker firmware:
//! it advertises the tracker service, answers discovery, drives a virtual
//! stepper and pushes status lines through the state characteristic.
//! Clones share the same mount, so one clone can be handed to the service
//! while another is kept to power the adapter, drop the link or inspect
//! the motor.

use crate::infrastructure::bluetooth::error::{TrackerError, TrackerResult};
use crate::infrastructure::bluetooth::protocol::{
    decode_command, decode_speed, encode_state_text, IntentCode, REWIND_COMPLETED, SPEED_PREFIX,
};
use crate::infrastructure::bluetooth::session::TrackerIds;
use crate::infrastructure::bluetooth::transport::{BleTransport, PeripheralId, TransportEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Speed the firmware boots with, in steps per second
pub const DEFAULT_TRACKING_SPEED: f64 = 271.71;

/// Speed used for rewind and backward movement, in steps per second
pub const MOVING_SPEED: f64 = 900.0;

/// Name the firmware advertises
pub const MOUNT_NAME: &str = "RealisStartrackerBluetoothController";

/// Shortest stepper update period; shorter ticks are raised to this
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// What the virtual stepper is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Idle,
    Tracking,
    Rewinding,
    Backward,
    Forward,
}

#[derive(Debug, Clone)]
pub struct MountConfig {
    pub peripheral: PeripheralId,
    pub ids: TrackerIds,
    /// Whether the mount shows up in scans at all
    pub discoverable: bool,
    /// Services reported after connecting
    pub services: Vec<Uuid>,
    /// Characteristics reported for the tracker service
    pub characteristics: Vec<Uuid>,
    /// Stepper update period
    pub tick: Duration,
    /// How often the position is pushed while moving
    pub report_interval: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        let ids = TrackerIds::default();
        Self {
            peripheral: PeripheralId::new(MOUNT_NAME),
            services: vec![ids.service],
            characteristics: vec![ids.command, ids.state, ids.tracking_speed],
            ids,
            discoverable: true,
            tick: Duration::from_millis(100),
            report_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct MountState {
    link: Option<PeripheralId>,
    notifying: bool,
    motion: Motion,
    position: f64,
    tracking_speed: f64,
    state_line: String,
    since_report: Duration,
    commands: Vec<IntentCode>,
    write_failure: Option<String>,
    ticker: Option<JoinHandle<()>>,
}

impl MountState {
    fn new() -> Self {
        Self {
            link: None,
            notifying: false,
            motion: Motion::Idle,
            position: 0.0,
            tracking_speed: DEFAULT_TRACKING_SPEED,
            state_line: speed_line(DEFAULT_TRACKING_SPEED),
            since_report: Duration::ZERO,
            commands: Vec::new(),
            write_failure: None,
            ticker: None,
        }
    }

    /// Apply a command the way the firmware loop does
    fn command(&mut self, code: IntentCode) -> Vec<String> {
        self.commands.push(code);
        self.since_report = Duration::ZERO;
        match code {
            IntentCode::Start => {
                self.motion = Motion::Tracking;
                vec![speed_line(self.tracking_speed)]
            }
            IntentCode::Stop => {
                self.motion = Motion::Idle;
                // Backing past the start point makes that the new start point
                if self.position < 0.0 {
                    self.position = 0.0;
                }
                Vec::new()
            }
            IntentCode::Rewind => {
                self.motion = Motion::Rewinding;
                Vec::new()
            }
            IntentCode::Backward => {
                self.motion = Motion::Backward;
                Vec::new()
            }
            IntentCode::Forward => {
                self.motion = Motion::Forward;
                Vec::new()
            }
        }
    }

    /// Move the stepper by one tick and collect the lines it reports
    fn advance(&mut self, dt: Duration, report_interval: Duration) -> Vec<String> {
        let secs = dt.as_secs_f64();
        let mut lines = Vec::new();

        match self.motion {
            Motion::Idle => return lines,
            Motion::Tracking => self.position += self.tracking_speed * secs,
            Motion::Forward => self.position += MOVING_SPEED * secs,
            Motion::Backward => self.position -= MOVING_SPEED * secs,
            Motion::Rewinding => {
                let step = MOVING_SPEED * secs;
                if self.position.abs() <= step {
                    self.position = 0.0;
                    self.motion = Motion::Idle;
                    lines.push("0".to_string());
                    lines.push(REWIND_COMPLETED.to_string());
                    return lines;
                }
                self.position -= step * self.position.signum();
            }
        }

        self.since_report += dt;
        if self.since_report >= report_interval {
            self.since_report = Duration::ZERO;
            lines.push(format!("{}", self.position.round() as i64));
        }
        lines
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

fn speed_line(speed: f64) -> String {
    format!("{}{:.2}", SPEED_PREFIX, speed)
}

/// Firmware stand-in for demos and integration tests
#[derive(Debug, Clone)]
pub struct SimulatedMount {
    config: Arc<MountConfig>,
    state: Arc<Mutex<MountState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SimulatedMount {
    /// Create a mount and the queue its transport events arrive on
    pub fn new(mut config: MountConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        if config.tick < MIN_TICK {
            warn!("Stepper tick {:?} too short, using {:?}", config.tick, MIN_TICK);
            config.tick = MIN_TICK;
        }
        let (events, receiver) = mpsc::unbounded_channel();
        let mount = Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(MountState::new())),
            events,
        };
        (mount, receiver)
    }

    fn state(&self) -> MutexGuard<'_, MountState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Simulated mount has no listener");
        }
    }

    /// Push lines through the state characteristic
    fn publish(&self, lines: Vec<String>) {
        let notifying = {
            let mut state = self.state();
            if let Some(last) = lines.last() {
                state.state_line = last.clone();
            }
            state.notifying
        };
        if !notifying {
            return;
        }
        for line in lines {
            self.send(TransportEvent::CharacteristicValueUpdated {
                characteristic: self.config.ids.state,
                value: encode_state_text(&line),
            });
        }
    }

    fn ensure_linked(&self) -> TrackerResult<()> {
        if self.state().link.is_some() {
            Ok(())
        } else {
            Err(TrackerError::Transport("mount is not connected".into()))
        }
    }

    fn start_ticker(&self) {
        let mount = self.clone();
        let tick = self.config.tick;
        let report_interval = self.config.report_interval;
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            loop {
                interval.tick().await;
                let lines = mount.state().advance(tick, report_interval);
                if !lines.is_empty() {
                    mount.publish(lines);
                }
            }
        });

        let mut state = self.state();
        state.stop_ticker();
        state.ticker = Some(ticker);
    }

    fn release_link(&self) -> Option<PeripheralId> {
        let mut state = self.state();
        state.stop_ticker();
        state.notifying = false;
        state.motion = Motion::Idle;
        state.link.take()
    }

    /// Report the adapter as powered on
    pub fn power_on(&self) {
        self.send(TransportEvent::BluetoothPoweredOn);
    }

    /// Report the adapter as unusable, dropping any link
    pub fn power_off(&self, reason: &str) {
        self.release_link();
        self.send(TransportEvent::BluetoothUnavailable(reason.to_string()));
    }

    /// Drop the link as if the mount went out of range
    pub fn drop_link(&self, reason: &str) {
        if let Some(id) = self.release_link() {
            warn!("Simulated mount dropping link: {}", reason);
            self.send(TransportEvent::Disconnected {
                id,
                error: Some(reason.to_string()),
            });
        }
    }

    /// Fail the next command write asynchronously with `reason`
    pub fn fail_next_write(&self, reason: &str) {
        self.state().write_failure = Some(reason.to_string());
    }

    pub fn is_connected(&self) -> bool {
        self.state().link.is_some()
    }

    pub fn motion(&self) -> Motion {
        self.state().motion
    }

    /// Current stepper position in steps
    pub fn position(&self) -> i64 {
        self.state().position.round() as i64
    }

    pub fn tracking_speed(&self) -> f64 {
        self.state().tracking_speed
    }

    /// Every command the mount accepted, in order
    pub fn received_commands(&self) -> Vec<IntentCode> {
        self.state().commands.clone()
    }
}

impl BleTransport for SimulatedMount {
    fn start_scan(&mut self, service: Uuid) -> TrackerResult<()> {
        debug!("Simulated scan for {}", service);
        if self.config.discoverable {
            self.send(TransportEvent::PeripheralDiscovered {
                id: self.config.peripheral.clone(),
                services: vec![self.config.ids.service],
            });
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> TrackerResult<()> {
        debug!("Simulated scan stopped");
        Ok(())
    }

    fn connect(&mut self, peripheral: &PeripheralId) -> TrackerResult<()> {
        if *peripheral != self.config.peripheral {
            self.send(TransportEvent::ConnectFailed {
                id: peripheral.clone(),
                error: "unknown peripheral".to_string(),
            });
            return Ok(());
        }

        self.state().link = Some(peripheral.clone());
        self.start_ticker();
        info!("Simulated mount connected to {}", peripheral);
        self.send(TransportEvent::Connected(peripheral.clone()));
        Ok(())
    }

    fn discover_services(&mut self, peripheral: &PeripheralId, _service: Uuid) -> TrackerResult<()> {
        self.ensure_linked()?;
        self.send(TransportEvent::ServicesDiscovered {
            id: peripheral.clone(),
            services: self.config.services.clone(),
        });
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        _peripheral: &PeripheralId,
        service: Uuid,
    ) -> TrackerResult<()> {
        self.ensure_linked()?;
        self.send(TransportEvent::CharacteristicsDiscovered {
            service,
            characteristics: self.config.characteristics.clone(),
        });
        Ok(())
    }

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> TrackerResult<()> {
        self.ensure_linked()?;
        if characteristic != self.config.ids.state {
            return Err(TrackerError::Transport(format!(
                "{} does not support notifications",
                characteristic
            )));
        }
        self.state().notifying = enabled;
        Ok(())
    }

    fn read(&mut self, characteristic: Uuid) -> TrackerResult<()> {
        self.ensure_linked()?;
        let value = if characteristic == self.config.ids.state {
            encode_state_text(&self.state().state_line)
        } else {
            Vec::new()
        };
        self.send(TransportEvent::CharacteristicValueUpdated {
            characteristic,
            value,
        });
        Ok(())
    }

    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> TrackerResult<()> {
        self.ensure_linked()?;
        let ids = &self.config.ids;

        if characteristic == ids.command {
            if let Some(reason) = self.state().write_failure.take() {
                self.send(TransportEvent::WriteCompleted {
                    characteristic,
                    error: Some(reason),
                });
                return Ok(());
            }

            let lines = match decode_command(value) {
                Some(code) => {
                    debug!("Simulated mount received {:?}", code);
                    self.state().command(code)
                }
                None => {
                    debug!("Simulated mount ignoring command {:?}", value);
                    Vec::new()
                }
            };
            self.send(TransportEvent::WriteCompleted {
                characteristic,
                error: None,
            });
            self.publish(lines);
        } else if characteristic == ids.tracking_speed {
            let error = match decode_speed(value) {
                Some(speed) => {
                    debug!("Simulated mount tracking speed = {}", speed);
                    self.state().tracking_speed = speed;
                    None
                }
                None => Some(format!("expected 8 bytes, got {}", value.len())),
            };
            self.send(TransportEvent::WriteCompleted {
                characteristic,
                error,
            });
        } else {
            self.send(TransportEvent::WriteCompleted {
                characteristic,
                error: Some("write not permitted".to_string()),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self, peripheral: &PeripheralId) -> TrackerResult<()> {
        if self.release_link().is_some() {
            self.send(TransportEvent::Disconnected {
                id: peripheral.clone(),
                error: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_reports_position_periodically() {
        let mut state = MountState::new();
        state.command(IntentCode::Start);

        let mut reported = Vec::new();
        for _ in 0..50 {
            reported.extend(state.advance(Duration::from_millis(100), Duration::from_secs(5)));
        }

        assert_eq!(reported, vec!["1359".to_string()]);
    }

    #[test]
    fn test_rewind_ends_at_zero() {
        let mut state = MountState::new();
        state.position = 450.0;
        state.command(IntentCode::Rewind);

        let first = state.advance(Duration::from_millis(250), Duration::from_secs(5));
        assert!(first.is_empty());
        let second = state.advance(Duration::from_millis(250), Duration::from_secs(5));

        assert_eq!(second, vec!["0".to_string(), REWIND_COMPLETED.to_string()]);
        assert_eq!(state.motion, Motion::Idle);
    }

    #[test]
    fn test_stop_after_backward_resets_origin() {
        let mut state = MountState::new();
        state.command(IntentCode::Backward);
        state.advance(Duration::from_secs(1), Duration::from_secs(5));
        assert!(state.position < 0.0);

        state.command(IntentCode::Stop);
        assert_eq!(state.position, 0.0);
    }

    #[test]
    fn test_start_echoes_speed() {
        let mut state = MountState::new();
        state.tracking_speed = 3.5;
        assert_eq!(state.command(IntentCode::Start), vec!["CMD:SPEED:3.50"]);
    }

    #[tokio::test]
    async fn test_read_returns_last_state_line() {
        let (mut mount, mut events) = SimulatedMount::new(MountConfig::default());
        let ids = TrackerIds::default();
        let id = PeripheralId::new(MOUNT_NAME);

        mount.connect(&id).unwrap();
        mount.read(ids.state).unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Connected(id)));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::CharacteristicValueUpdated {
                characteristic: ids.state,
                value: b"CMD:SPEED:271.71".to_vec(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_tick_is_raised_to_minimum() {
        let (mut mount, _events) = SimulatedMount::new(MountConfig {
            tick: Duration::ZERO,
            ..MountConfig::default()
        });
        assert_eq!(mount.config.tick, MIN_TICK);

        let ids = TrackerIds::default();
        mount.connect(&PeripheralId::new(MOUNT_NAME)).unwrap();
        mount.write(ids.command, &[1, 0, 0, 0]).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(mount.motion(), Motion::Tracking);
        assert!(mount.position() > 0);
    }

    #[tokio::test]
    async fn test_write_requires_link() {
        let (mut mount, _events) = SimulatedMount::new(MountConfig::default());
        let ids = TrackerIds::default();
        assert!(mount.write(ids.command, &[1, 0, 0, 0]).is_err());
    }
}
