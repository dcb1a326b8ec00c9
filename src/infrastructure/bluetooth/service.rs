//! Tracker Service Module
//!
//! Main service that owns the session, the dispatcher and the transport,
//! and handles every input one at a time: transport events, caller
//! commands and scan timer expiry.

use crate::domain::models::{Command, TrackerCommand, TrackerEvent};
use crate::infrastructure::bluetooth::{
    dispatcher::CommandDispatcher,
    error::{TrackerError, TrackerResult},
    interpreter,
    scanner::BleScanner,
    session::{CharacteristicRole, DeviceSession, Phase, TrackerIds},
    transport::{BleTransport, PeripheralId, TransportEvent},
};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default scan window in seconds
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 15;

/// Construction-time configuration of a [`TrackerService`]
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub ids: TrackerIds,
    pub scan_timeout: Duration,
    /// Refuse SetSpeed until the mount has reported its speed
    pub require_speed_sync: bool,
    /// Start scanning as soon as the adapter powers on
    pub auto_scan_on_power_on: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ids: TrackerIds::default(),
            scan_timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
            require_speed_sync: true,
            auto_scan_on_power_on: true,
        }
    }
}

/// Messages on the service inbox
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMessage {
    Command(TrackerCommand),
    /// Scan window expired for the given scan generation
    ScanTimeout(u64),
}

/// Cloneable sender for caller commands
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    sender: mpsc::UnboundedSender<ServiceMessage>,
}

impl TrackerHandle {
    pub fn send(&self, command: TrackerCommand) -> Result<()> {
        self.sender
            .send(ServiceMessage::Command(command))
            .map_err(|_| anyhow::anyhow!("Tracker service is not running"))
    }

    pub fn issue(&self, command: Command) -> Result<()> {
        self.send(TrackerCommand::Issue(command))
    }
}

/// Main service coordinating all tracker operations
pub struct TrackerService<T: BleTransport> {
    transport: T,
    session: DeviceSession,
    dispatcher: CommandDispatcher,
    scanner: BleScanner,
    config: TrackerConfig,
    event_sender: mpsc::UnboundedSender<TrackerEvent>,
    inbox_sender: mpsc::UnboundedSender<ServiceMessage>,
    inbox: Option<mpsc::UnboundedReceiver<ServiceMessage>>,
    reported_phase: Phase,
}

impl<T: BleTransport> TrackerService<T> {
    pub fn new(
        transport: T,
        config: TrackerConfig,
        event_sender: mpsc::UnboundedSender<TrackerEvent>,
    ) -> Self {
        let (inbox_sender, inbox) = mpsc::unbounded_channel();
        let scanner = BleScanner::new(
            config.ids.service,
            config.scan_timeout,
            inbox_sender.clone(),
        );

        Self {
            transport,
            session: DeviceSession::new(config.ids.clone()),
            dispatcher: CommandDispatcher::new(config.require_speed_sync),
            scanner,
            config,
            event_sender,
            inbox_sender,
            inbox: Some(inbox),
            reported_phase: Phase::Idle,
        }
    }

    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            sender: self.inbox_sender.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Run until [`TrackerCommand::Shutdown`] arrives
    pub async fn run(mut self, mut transport_events: mpsc::UnboundedReceiver<TransportEvent>) {
        let Some(mut inbox) = self.inbox.take() else {
            error!("Tracker service inbox already taken");
            return;
        };

        info!("Tracker service started");
        loop {
            tokio::select! {
                Some(message) = inbox.recv() => {
                    if !self.handle_message(message) {
                        break;
                    }
                }
                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                else => break,
            }
        }

        self.scanner.cancel_timer();
        info!("Tracker service stopped");
    }

    /// Handle one inbox message. Returns false on shutdown.
    ///
    /// Must be called from within a tokio runtime, since a scan start arms
    /// the scan timer task.
    pub fn handle_message(&mut self, message: ServiceMessage) -> bool {
        match message {
            ServiceMessage::ScanTimeout(generation) => self.handle_scan_timeout(generation),
            ServiceMessage::Command(command) => match command {
                TrackerCommand::StartScan => {
                    let _ = self.start_scanning();
                }
                TrackerCommand::Issue(command) => {
                    let _ = self.issue(command);
                }
                TrackerCommand::ResetMovement => self.reset_movement(),
                TrackerCommand::Disconnect => {
                    let _ = self.disconnect();
                }
                TrackerCommand::Shutdown => {
                    let _ = self.disconnect();
                    return false;
                }
            },
        }
        true
    }

    /// Start scanning for the tracker.
    ///
    /// Must be called from within a tokio runtime; the scan window timer is
    /// a spawned task.
    pub fn start_scanning(&mut self) -> TrackerResult<()> {
        let result = self.try_start_scanning();
        if let Err(err) = &result {
            self.report(err);
        }
        self.sync_phase();
        result
    }

    fn try_start_scanning(&mut self) -> TrackerResult<()> {
        self.session.begin_scan()?;
        if let Err(err) = self.scanner.start(&mut self.transport) {
            self.session.scan_timed_out();
            return Err(err);
        }
        self.status("Start Scanning ...");
        Ok(())
    }

    /// Issue a caller intent; failures are also reported as error events
    pub fn issue(&mut self, command: Command) -> TrackerResult<()> {
        let result = self
            .dispatcher
            .issue(command, &mut self.session, &mut self.transport);
        let outcome = match result {
            Ok(events) => {
                self.emit_all(events);
                Ok(())
            }
            Err(err) => {
                warn!("{:?} rejected: {}", command, err);
                self.report(&err);
                Err(err)
            }
        };
        self.sync_phase();
        outcome
    }

    /// Clear the movement lock after a failed write
    pub fn reset_movement(&mut self) {
        if let Some(event) = self.dispatcher.reset_movement() {
            self.emit(event);
        }
        self.session.finish_command();
        self.sync_phase();
    }

    /// Disconnect from the tracker, or stop a scan in progress
    pub fn disconnect(&mut self) -> TrackerResult<()> {
        let mut result = Ok(());
        if self.scanner.is_scanning() {
            if let Err(err) = self.scanner.stop(&mut self.transport) {
                warn!("Failed to stop scan: {}", err);
            }
        }

        if self.session.phase() != Phase::Idle {
            if let Some(peripheral) = self.session.disconnect() {
                result = self.transport.disconnect(&peripheral);
                if let Err(err) = &result {
                    self.report(err);
                }
                self.status("Disconnected.");
            }
            if let Some(event) = self.dispatcher.reset_session() {
                self.emit(event);
            }
        }

        self.sync_phase();
        result
    }

    /// Scan window expired; a no-op unless it belongs to the running scan
    pub fn handle_scan_timeout(&mut self, generation: u64) {
        if !self.scanner.is_current(generation) || self.session.phase() != Phase::Scanning {
            debug!("Ignoring stale scan timeout #{}", generation);
            return;
        }

        if let Err(err) = self.scanner.stop(&mut self.transport) {
            warn!("Failed to stop scan: {}", err);
        }
        if self.session.scan_timed_out() {
            let err = TrackerError::Timeout {
                secs: self.scanner.timeout().as_secs(),
            };
            info!("Scan timed out");
            self.status("Stop Scanning ...");
            self.report(&err);
        }
        self.sync_phase();
    }

    /// Apply one transport event.
    ///
    /// Must be called from within a tokio runtime: a power-on event may start
    /// a scan, which spawns the scan window timer.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::BluetoothPoweredOn => {
                info!("Bluetooth powered on");
                let idle = matches!(self.session.phase(), Phase::Idle | Phase::Disconnected);
                if self.config.auto_scan_on_power_on && idle {
                    let _ = self.start_scanning();
                }
            }
            TransportEvent::BluetoothUnavailable(reason) => {
                warn!("Bluetooth unavailable: {}", reason);
                self.scanner.cancel_timer();
                if self.session.phase() != Phase::Idle {
                    self.session.disconnect();
                    if let Some(event) = self.dispatcher.reset_session() {
                        self.emit(event);
                    }
                }
                self.report(&TrackerError::BluetoothUnavailable(reason));
            }
            TransportEvent::PeripheralDiscovered { id, services } => {
                self.peripheral_discovered(id, &services);
            }
            TransportEvent::Connected(id) => self.connected(id),
            TransportEvent::ConnectFailed { id, error } => {
                if self.session.phase() == Phase::Connecting
                    && self.session.peripheral() == Some(&id)
                {
                    error!("Connection to {} failed: {}", id, error);
                    self.session.disconnect();
                    self.report(&TrackerError::Transport(format!(
                        "Connection to {} failed: {}",
                        id, error
                    )));
                } else {
                    debug!("Ignoring connect failure of {}", id);
                }
            }
            TransportEvent::ServicesDiscovered { id, services } => {
                match self.session.services_discovered(&id, &services) {
                    Ok(true) => {
                        let service = self.config.ids.service;
                        if let Err(err) = self.transport.discover_characteristics(&id, service) {
                            self.tear_down(err);
                        }
                    }
                    Ok(false) => {}
                    Err(err) => self.tear_down(err),
                }
            }
            TransportEvent::CharacteristicsDiscovered {
                service,
                characteristics,
            } => self.characteristics_discovered(service, &characteristics),
            TransportEvent::CharacteristicValueUpdated {
                characteristic,
                value,
            } => self.value_updated(characteristic, &value),
            TransportEvent::WriteCompleted {
                characteristic,
                error,
            } => self.write_completed(characteristic, error),
            TransportEvent::Disconnected { id, error } => self.disconnected(id, error),
        }
        self.sync_phase();
    }

    fn peripheral_discovered(&mut self, id: PeripheralId, services: &[Uuid]) {
        if !self.session.peripheral_discovered(&id, services) {
            return;
        }

        if let Err(err) = self.scanner.stop(&mut self.transport) {
            warn!("Failed to stop scan: {}", err);
        }
        self.status("Stop Scanning ...");
        self.status(&format!("Connecting to {} ...", id));

        if let Err(err) = self.transport.connect(&id) {
            self.tear_down(err);
        }
    }

    fn connected(&mut self, id: PeripheralId) {
        match self.session.connected(&id) {
            Ok(true) => {
                self.status(&format!("Connected to {}.", id));
                let service = self.config.ids.service;
                if let Err(err) = self.transport.discover_services(&id, service) {
                    self.tear_down(err);
                }
            }
            Ok(false) => {}
            Err(err) => self.tear_down(err),
        }
    }

    fn characteristics_discovered(&mut self, service: Uuid, characteristics: &[Uuid]) {
        match self.session.characteristics_discovered(service, characteristics) {
            Ok(true) => {
                let state = self.config.ids.state;
                let subscribed = self
                    .transport
                    .set_notify(state, true)
                    .and_then(|_| self.transport.read(state));
                match subscribed {
                    Ok(()) => {
                        info!("Tracker ready");
                        self.status("Tracker ready.");
                    }
                    Err(err) => self.tear_down(err),
                }
            }
            Ok(false) => {}
            Err(err) => self.tear_down(err),
        }
    }

    fn value_updated(&mut self, characteristic: Uuid, value: &[u8]) {
        if self.session.role_of(characteristic) != Some(CharacteristicRole::State) {
            debug!("Ignoring update from {}", characteristic);
            return;
        }

        match interpreter::interpret(value) {
            Ok(notification) => {
                let events = interpreter::apply(notification, &mut self.dispatcher);
                self.emit_all(events);
            }
            Err(err) => {
                warn!("Undecodable state notification: {}", err);
                self.report(&err);
            }
        }
    }

    fn write_completed(&mut self, characteristic: Uuid, error: Option<String>) {
        match self.session.role_of(characteristic) {
            Some(CharacteristicRole::Command) => {
                let events = self
                    .dispatcher
                    .command_write_completed(error, &mut self.session);
                self.emit_all(events);
            }
            Some(CharacteristicRole::TrackingSpeed) => {
                if let Some(error) = error {
                    warn!("Tracking speed write failed: {}", error);
                    self.report(&TrackerError::Transport(format!(
                        "Tracking speed write failed: {}",
                        error
                    )));
                }
            }
            _ => debug!("Ignoring write completion on {}", characteristic),
        }
    }

    fn disconnected(&mut self, id: PeripheralId, error: Option<String>) {
        if self.session.peripheral() != Some(&id) {
            debug!("Ignoring disconnect of {}", id);
            return;
        }

        self.session.disconnect();
        self.scanner.cancel_timer();
        if let Some(event) = self.dispatcher.reset_session() {
            self.emit(event);
        }

        match error {
            Some(error) => {
                warn!("Link to {} lost: {}", id, error);
                self.report(&TrackerError::Transport(format!("Link lost: {}", error)));
            }
            None => info!("Disconnected from {}", id),
        }
        self.status("Disconnected.");
    }

    /// Report a failure and drop the link
    fn tear_down(&mut self, err: TrackerError) {
        error!("Connection setup failed: {}", err);
        self.report(&err);

        if let Some(peripheral) = self.session.disconnect() {
            if let Err(err) = self.transport.disconnect(&peripheral) {
                warn!("Failed to disconnect {}: {}", peripheral, err);
            }
        }
        if let Some(event) = self.dispatcher.reset_session() {
            self.emit(event);
        }
    }

    fn sync_phase(&mut self) {
        let phase = self.session.phase();
        if phase != self.reported_phase {
            self.reported_phase = phase;
            self.emit(TrackerEvent::PhaseChanged(phase));
        }
    }

    fn status(&self, message: &str) {
        self.emit(TrackerEvent::Status(message.to_string()));
    }

    fn report(&self, err: &TrackerError) {
        self.emit(TrackerEvent::from(err));
    }

    fn emit_all(&self, events: Vec<TrackerEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn emit(&self, event: TrackerEvent) {
        let _ = self.event_sender.send(event);
    }
}
