use star_tracker_control::infrastructure::bluetooth::protocol::IntentCode;
use star_tracker_control::infrastructure::bluetooth::simulator::Motion;
use star_tracker_control::{
    ActiveMovement, Command, ErrorKind, MountConfig, Phase, SimulatedMount, TrackerCommand,
    TrackerConfig, TrackerEvent, TrackerHandle, TrackerService,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Rig {
    mount: SimulatedMount,
    handle: TrackerHandle,
    events: mpsc::UnboundedReceiver<TrackerEvent>,
    task: JoinHandle<()>,
}

impl Rig {
    fn start(mount_config: MountConfig) -> Self {
        let (mount, transport_rx) = SimulatedMount::new(mount_config);
        let (event_tx, events) = mpsc::unbounded_channel();
        let service = TrackerService::new(mount.clone(), TrackerConfig::default(), event_tx);
        let handle = service.handle();
        let task = tokio::spawn(service.run(transport_rx));
        Self {
            mount,
            handle,
            events,
            task,
        }
    }

    /// Collect events up to and including the first one matching `pred`
    async fn until(&mut self, pred: impl Fn(&TrackerEvent) -> bool) -> Vec<TrackerEvent> {
        let mut seen = Vec::new();
        let wait = async {
            while let Some(event) = self.events.recv().await {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return;
                }
            }
            panic!("event stream closed");
        };
        tokio::time::timeout(Duration::from_secs(120), wait)
            .await
            .unwrap_or_else(|_| panic!("no matching event"));
        seen
    }

    async fn until_phase(&mut self, phase: Phase) -> Vec<TrackerEvent> {
        self.until(|event| *event == TrackerEvent::PhaseChanged(phase))
            .await
    }

    async fn until_movement(&mut self, movement: ActiveMovement) -> Vec<TrackerEvent> {
        self.until(|event| *event == TrackerEvent::MovementStateChanged(movement))
            .await
    }

    /// Power on and wait until the mount reported its speed
    async fn connect(&mut self) {
        self.mount.power_on();
        self.until_phase(Phase::Ready).await;
        self.until(|event| matches!(event, TrackerEvent::SpeedAvailable(_)))
            .await;
    }

    fn drain(&mut self) -> Vec<TrackerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn shutdown(self) {
        self.handle.send(TrackerCommand::Shutdown).unwrap();
        self.task.await.unwrap();
    }
}

fn error_kinds(events: &[TrackerEvent]) -> Vec<ErrorKind> {
    events
        .iter()
        .filter_map(|event| match event {
            TrackerEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn power_on_reaches_ready_and_reports_speed() {
    let mut rig = Rig::start(MountConfig::default());
    rig.mount.power_on();

    let events = rig.until_phase(Phase::Ready).await;
    let phases: Vec<&TrackerEvent> = events
        .iter()
        .filter(|event| matches!(event, TrackerEvent::PhaseChanged(_)))
        .collect();
    assert_eq!(
        phases,
        vec![
            &TrackerEvent::PhaseChanged(Phase::Scanning),
            &TrackerEvent::PhaseChanged(Phase::Connecting),
            &TrackerEvent::PhaseChanged(Phase::DiscoveringServices),
            &TrackerEvent::PhaseChanged(Phase::DiscoveringCharacteristics),
            &TrackerEvent::PhaseChanged(Phase::Ready),
        ]
    );

    let events = rig
        .until(|event| matches!(event, TrackerEvent::SpeedAvailable(_)))
        .await;
    assert_eq!(
        events.last(),
        Some(&TrackerEvent::SpeedAvailable("271.71".to_string()))
    );
    assert!(rig.mount.is_connected());

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn tracking_session_with_rewind() {
    let mut rig = Rig::start(MountConfig::default());
    rig.connect().await;

    rig.handle.issue(Command::SetSpeed(300.0)).unwrap();
    rig.handle.issue(Command::Start).unwrap();
    rig.until_movement(ActiveMovement::Tracking).await;
    let echo = rig
        .until(|event| matches!(event, TrackerEvent::SpeedAvailable(_)))
        .await;
    assert_eq!(
        echo.last(),
        Some(&TrackerEvent::SpeedAvailable("300.00".to_string()))
    );
    assert_eq!(rig.mount.tracking_speed(), 300.0);
    assert_eq!(rig.mount.motion(), Motion::Tracking);

    // One position report every five seconds
    tokio::time::sleep(Duration::from_secs(10)).await;
    let reports = rig.drain();
    assert!(reports
        .iter()
        .any(|event| matches!(event, TrackerEvent::Status(text) if text.parse::<i64>().is_ok())));

    rig.handle.issue(Command::Start).unwrap();
    rig.until_movement(ActiveMovement::None).await;
    rig.until_phase(Phase::Ready).await;
    assert_eq!(rig.mount.motion(), Motion::Idle);
    assert!(rig.mount.position() > 0);

    rig.handle.issue(Command::Rewind).unwrap();
    rig.until_movement(ActiveMovement::Rewinding).await;
    let events = rig.until_movement(ActiveMovement::None).await;

    assert_eq!(rig.mount.position(), 0);
    assert!(!events
        .iter()
        .any(|event| matches!(event, TrackerEvent::Status(text) if text.starts_with("CMD:"))));
    assert_eq!(
        rig.mount.received_commands(),
        vec![IntentCode::Start, IntentCode::Stop, IntentCode::Rewind]
    );

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rewind_while_tracking_conflicts() {
    let mut rig = Rig::start(MountConfig::default());
    rig.connect().await;

    rig.handle.issue(Command::Start).unwrap();
    rig.until_phase(Phase::Ready).await;

    rig.handle.issue(Command::Rewind).unwrap();
    let events = rig
        .until(|event| matches!(event, TrackerEvent::Error { .. }))
        .await;

    assert_eq!(error_kinds(&events), vec![ErrorKind::Conflict]);
    assert_eq!(rig.mount.received_commands(), vec![IntentCode::Start]);
    assert_eq!(rig.mount.motion(), Motion::Tracking);

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn non_finite_speed_is_rejected() {
    let mut rig = Rig::start(MountConfig::default());
    rig.mount.power_on();
    rig.until_phase(Phase::Ready).await;
    rig.drain();

    rig.handle.issue(Command::SetSpeed(f64::NAN)).unwrap();
    let events = rig
        .until(|event| matches!(event, TrackerEvent::Error { .. }))
        .await;
    assert_eq!(error_kinds(&events), vec![ErrorKind::InvalidSpeed]);

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scan_times_out_without_mount() {
    let mut rig = Rig::start(MountConfig {
        discoverable: false,
        ..MountConfig::default()
    });
    rig.mount.power_on();
    rig.until_phase(Phase::Scanning).await;

    let started = tokio::time::Instant::now();
    let events = rig.until_phase(Phase::Idle).await;

    assert!(started.elapsed() >= Duration::from_secs(15));
    assert_eq!(error_kinds(&events), vec![ErrorKind::Timeout]);

    // Scanning again works after a timeout
    rig.handle.send(TrackerCommand::StartScan).unwrap();
    rig.until_phase(Phase::Scanning).await;

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scan_timeout_is_noop_after_connecting() {
    let mut rig = Rig::start(MountConfig::default());
    rig.connect().await;

    tokio::time::sleep(Duration::from_secs(30)).await;

    let events = rig.drain();
    assert!(error_kinds(&events).is_empty());
    assert!(!events.contains(&TrackerEvent::PhaseChanged(Phase::Idle)));
    assert!(rig.mount.is_connected());

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn link_loss_resets_and_rescan_reconnects() {
    let mut rig = Rig::start(MountConfig::default());
    rig.connect().await;
    rig.handle.issue(Command::Backward).unwrap();
    rig.until_phase(Phase::Ready).await;

    rig.mount.drop_link("out of range");
    let events = rig.until_phase(Phase::Disconnected).await;
    assert!(events.contains(&TrackerEvent::MovementStateChanged(ActiveMovement::None)));
    assert_eq!(error_kinds(&events), vec![ErrorKind::Transport]);

    rig.handle.issue(Command::Start).unwrap();
    let events = rig
        .until(|event| matches!(event, TrackerEvent::Error { .. }))
        .await;
    assert_eq!(error_kinds(&events), vec![ErrorKind::NotConnected]);

    rig.handle.send(TrackerCommand::StartScan).unwrap();
    rig.until_phase(Phase::Ready).await;
    rig.until(|event| matches!(event, TrackerEvent::SpeedAvailable(_)))
        .await;

    rig.handle.issue(Command::Start).unwrap();
    rig.until_movement(ActiveMovement::Tracking).await;

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_write_keeps_lock_until_reset() {
    let mut rig = Rig::start(MountConfig::default());
    rig.connect().await;

    rig.mount.fail_next_write("insufficient authentication");
    rig.handle.issue(Command::Rewind).unwrap();
    let events = rig
        .until(|event| matches!(event, TrackerEvent::Error { .. }))
        .await;
    assert!(events.contains(&TrackerEvent::MovementStateChanged(ActiveMovement::Rewinding)));
    assert_eq!(error_kinds(&events), vec![ErrorKind::Transport]);
    assert_eq!(rig.mount.motion(), Motion::Idle);

    rig.handle.issue(Command::Start).unwrap();
    let events = rig
        .until(|event| matches!(event, TrackerEvent::Error { .. }))
        .await;
    assert_eq!(error_kinds(&events), vec![ErrorKind::Conflict]);

    rig.handle.send(TrackerCommand::ResetMovement).unwrap();
    rig.until_movement(ActiveMovement::None).await;

    rig.handle.issue(Command::Start).unwrap();
    rig.until_movement(ActiveMovement::Tracking).await;
    assert_eq!(rig.mount.received_commands(), vec![IntentCode::Start]);

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_characteristic_tears_down() {
    let ids = TrackerConfig::default().ids;
    let mut rig = Rig::start(MountConfig {
        characteristics: vec![ids.command, ids.state],
        ..MountConfig::default()
    });
    rig.mount.power_on();

    let events = rig.until_phase(Phase::Disconnected).await;

    assert_eq!(error_kinds(&events), vec![ErrorKind::MissingCharacteristic]);
    assert!(!rig.mount.is_connected());

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bluetooth_off_drops_session() {
    let mut rig = Rig::start(MountConfig::default());
    rig.connect().await;

    rig.mount.power_off("adapter powered off");
    let events = rig.until_phase(Phase::Disconnected).await;

    assert_eq!(error_kinds(&events), vec![ErrorKind::BluetoothUnavailable]);

    rig.shutdown().await;
}
