use star_tracker_control::domain::settings::SettingsService;
use star_tracker_control::infrastructure::logging;
use star_tracker_control::{
    ActiveMovement, Command, MountConfig, Phase, SimulatedMount, TrackerCommand, TrackerConfig,
    TrackerEvent, TrackerService,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How long the demo waits for any single step
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Star Tracker Control");
    info!("Settings file: {}", settings_service.path().display());

    let config = settings.tracker.to_config()?;

    let worker = std::thread::spawn(move || -> anyhow::Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        rt.block_on(run_demo(config))
    });

    match worker.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("Tracker thread panicked"),
    }
}

/// Drive a scripted session against the simulated mount
async fn run_demo(config: TrackerConfig) -> anyhow::Result<()> {
    let mount_config = MountConfig {
        ids: config.ids.clone(),
        services: vec![config.ids.service],
        characteristics: vec![config.ids.command, config.ids.state, config.ids.tracking_speed],
        ..MountConfig::default()
    };
    let auto_scan = config.auto_scan_on_power_on;
    let (mount, transport_rx) = SimulatedMount::new(mount_config);
    let (event_tx, mut events) = mpsc::unbounded_channel();

    let service = TrackerService::new(mount.clone(), config, event_tx);
    let handle = service.handle();
    let service_task = tokio::spawn(service.run(transport_rx));

    mount.power_on();
    if !auto_scan {
        handle.send(TrackerCommand::StartScan)?;
    }

    let speed = wait_for(&mut events, |event| match event {
        TrackerEvent::SpeedAvailable(speed) => Some(speed.clone()),
        _ => None,
    })
    .await?;
    info!("Mount tracks at {} steps/s", speed);

    let speed: f64 = speed.trim().parse()?;
    handle.issue(Command::SetSpeed(speed))?;
    handle.issue(Command::Start)?;
    wait_for_movement(&mut events, ActiveMovement::Tracking).await?;

    // Let the mount report a position or two
    tokio::time::sleep(Duration::from_secs(6)).await;
    drain(&mut events);

    handle.issue(Command::Start)?;
    wait_for_movement(&mut events, ActiveMovement::None).await?;
    wait_for_ready(&mut events).await?;

    handle.issue(Command::Rewind)?;
    wait_for_movement(&mut events, ActiveMovement::Rewinding).await?;
    wait_for_movement(&mut events, ActiveMovement::None).await?;
    info!("Mount back at position {}", mount.position());

    handle.send(TrackerCommand::Disconnect)?;
    handle.send(TrackerCommand::Shutdown)?;
    service_task.await?;
    drain(&mut events);

    info!("Demo finished");
    Ok(())
}

fn log_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::Status(text) => info!("[mount] {}", text),
        TrackerEvent::SpeedAvailable(speed) => info!("[speed] {}", speed),
        TrackerEvent::MovementStateChanged(movement) => info!("[movement] {}", movement),
        TrackerEvent::PhaseChanged(phase) => info!("[phase] {:?}", phase),
        TrackerEvent::Error { kind, detail } => warn!("[error] {:?}: {}", kind, detail),
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<TrackerEvent>) {
    while let Ok(event) = events.try_recv() {
        log_event(&event);
    }
}

/// Log events until `pick` matches one, failing on timeout or a closed stream
async fn wait_for<T>(
    events: &mut mpsc::UnboundedReceiver<TrackerEvent>,
    mut pick: impl FnMut(&TrackerEvent) -> Option<T>,
) -> anyhow::Result<T> {
    let wait = async {
        while let Some(event) = events.recv().await {
            log_event(&event);
            if let TrackerEvent::Error { detail, .. } = &event {
                error!("Demo step failed: {}", detail);
            }
            if let Some(found) = pick(&event) {
                return Some(found);
            }
        }
        None
    };

    match tokio::time::timeout(STEP_TIMEOUT, wait).await {
        Ok(Some(found)) => Ok(found),
        Ok(None) => anyhow::bail!("Tracker service stopped"),
        Err(_) => anyhow::bail!("Timed out waiting for the mount"),
    }
}

async fn wait_for_movement(
    events: &mut mpsc::UnboundedReceiver<TrackerEvent>,
    wanted: ActiveMovement,
) -> anyhow::Result<()> {
    wait_for(events, |event| {
        matches!(event, TrackerEvent::MovementStateChanged(m) if *m == wanted).then_some(())
    })
    .await
}

async fn wait_for_ready(events: &mut mpsc::UnboundedReceiver<TrackerEvent>) -> anyhow::Result<()> {
    wait_for(events, |event| {
        matches!(event, TrackerEvent::PhaseChanged(Phase::Ready)).then_some(())
    })
    .await
}
