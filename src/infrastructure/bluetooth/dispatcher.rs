//! Command Dispatcher
//!
//! Turns caller intents into writes on the command and tracking speed
//! characteristics while holding the movement lock: tracking, rewind and
//! backward movement exclude each other, and only one movement write may be
//! in flight at a time.

use crate::domain::models::{ActiveMovement, Command, MovementKind, TrackerEvent};
use crate::infrastructure::bluetooth::error::{TrackerError, TrackerResult};
use crate::infrastructure::bluetooth::protocol::{encode_command, encode_speed, IntentCode};
use crate::infrastructure::bluetooth::session::{CharacteristicRole, DeviceSession};
use crate::infrastructure::bluetooth::transport::BleTransport;
use tracing::{debug, info, warn};

/// What a movement request turns into
struct MovementPlan {
    code: IntentCode,
    next: ActiveMovement,
    status: &'static str,
}

#[derive(Debug)]
pub struct CommandDispatcher {
    moving_forward: bool,
    rewinding: bool,
    backing: bool,
    /// Movement write awaiting completion
    pending: Option<IntentCode>,
    /// The mount has echoed its speed this session
    speed_synced: bool,
    require_speed_sync: bool,
}

impl CommandDispatcher {
    pub fn new(require_speed_sync: bool) -> Self {
        Self {
            moving_forward: false,
            rewinding: false,
            backing: false,
            pending: None,
            speed_synced: false,
            require_speed_sync,
        }
    }

    pub fn active(&self) -> ActiveMovement {
        if self.moving_forward {
            ActiveMovement::Tracking
        } else if self.rewinding {
            ActiveMovement::Rewinding
        } else if self.backing {
            ActiveMovement::Backing
        } else {
            ActiveMovement::None
        }
    }

    /// Raw lock flags as (moving_forward, rewinding, backing)
    pub fn flags(&self) -> (bool, bool, bool) {
        (self.moving_forward, self.rewinding, self.backing)
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_speed_synced(&self) -> bool {
        self.speed_synced
    }

    /// Issue a caller intent.
    ///
    /// On success the write has been handed to the transport and the
    /// returned events describe the change. On error nothing changed.
    pub fn issue(
        &mut self,
        command: Command,
        session: &mut DeviceSession,
        transport: &mut dyn BleTransport,
    ) -> TrackerResult<Vec<TrackerEvent>> {
        session.ensure_writable()?;

        match command {
            Command::SetSpeed(value) => self.apply_speed(value, session, transport),
            Command::Start => self.move_with(MovementKind::Tracking, session, transport),
            Command::Rewind => self.move_with(MovementKind::Rewind, session, transport),
            Command::Backward => self.move_with(MovementKind::Backward, session, transport),
            Command::Stop => self.move_with(MovementKind::Stop, session, transport),
        }
    }

    fn plan(&self, requested: MovementKind) -> TrackerResult<MovementPlan> {
        let active = self.active();
        let conflict = || TrackerError::Conflict {
            requested,
            active: active.to_string(),
        };

        let plan = match requested {
            MovementKind::Tracking => match active {
                ActiveMovement::Tracking => MovementPlan {
                    code: IntentCode::Stop,
                    next: ActiveMovement::None,
                    status: "Stop tracking.",
                },
                ActiveMovement::None => MovementPlan {
                    code: IntentCode::Start,
                    next: ActiveMovement::Tracking,
                    status: "Start tracking the stars!!.",
                },
                _ => return Err(conflict()),
            },
            MovementKind::Rewind => match active {
                ActiveMovement::Rewinding => MovementPlan {
                    code: IntentCode::Stop,
                    next: ActiveMovement::None,
                    status: "Stop rewind.",
                },
                ActiveMovement::None => MovementPlan {
                    code: IntentCode::Rewind,
                    next: ActiveMovement::Rewinding,
                    status: "Start a rewind.",
                },
                _ => return Err(conflict()),
            },
            MovementKind::Backward => match active {
                ActiveMovement::Backing => MovementPlan {
                    code: IntentCode::Stop,
                    next: ActiveMovement::None,
                    status: "Stop backward.",
                },
                ActiveMovement::None => MovementPlan {
                    code: IntentCode::Backward,
                    next: ActiveMovement::Backing,
                    status: "Start backward.",
                },
                _ => return Err(conflict()),
            },
            MovementKind::Stop => MovementPlan {
                code: IntentCode::Stop,
                next: ActiveMovement::None,
                status: match active {
                    ActiveMovement::Tracking => "Stop tracking.",
                    ActiveMovement::Rewinding => "Stop rewind.",
                    ActiveMovement::Backing => "Stop backward.",
                    ActiveMovement::None => "Stop.",
                },
            },
        };
        Ok(plan)
    }

    fn move_with(
        &mut self,
        requested: MovementKind,
        session: &mut DeviceSession,
        transport: &mut dyn BleTransport,
    ) -> TrackerResult<Vec<TrackerEvent>> {
        if let Some(pending) = self.pending {
            return Err(TrackerError::Conflict {
                requested,
                active: format!("{:?} command is still pending", pending),
            });
        }

        let plan = self.plan(requested)?;
        let characteristic = session
            .characteristic(CharacteristicRole::Command)
            .ok_or(TrackerError::NotConnected {
                phase: session.phase(),
            })?;

        transport.write(characteristic, &encode_command(plan.code))?;
        info!("Sent {:?} command", plan.code);

        session.begin_command()?;
        self.pending = Some(plan.code);

        let before = self.active();
        self.set_active(plan.next);

        let mut events = vec![TrackerEvent::Status(plan.status.to_string())];
        if before != plan.next {
            events.push(TrackerEvent::MovementStateChanged(plan.next));
        }
        Ok(events)
    }

    fn apply_speed(
        &mut self,
        value: f64,
        session: &mut DeviceSession,
        transport: &mut dyn BleTransport,
    ) -> TrackerResult<Vec<TrackerEvent>> {
        if !value.is_finite() {
            return Err(TrackerError::InvalidSpeed(value));
        }
        if self.require_speed_sync && !self.speed_synced {
            return Err(TrackerError::SpeedNotSynced);
        }

        let characteristic = session
            .characteristic(CharacteristicRole::TrackingSpeed)
            .ok_or(TrackerError::NotConnected {
                phase: session.phase(),
            })?;
        transport.write(characteristic, &encode_speed(value))?;
        info!("Sent tracking speed {}", value);

        Ok(vec![TrackerEvent::Status(format!(
            "Tracking speed applied: {}",
            value
        ))])
    }

    fn set_active(&mut self, next: ActiveMovement) {
        self.moving_forward = next == ActiveMovement::Tracking;
        self.rewinding = next == ActiveMovement::Rewinding;
        self.backing = next == ActiveMovement::Backing;
    }

    /// A write on the command characteristic finished.
    ///
    /// A failure is surfaced but the lock is left as it is; the caller
    /// decides whether to retry or [`reset_movement`](Self::reset_movement).
    pub fn command_write_completed(
        &mut self,
        error: Option<String>,
        session: &mut DeviceSession,
    ) -> Vec<TrackerEvent> {
        let pending = self.pending.take();
        session.finish_command();

        match (pending, error) {
            (Some(code), Some(error)) => {
                warn!("{:?} command write failed: {}", code, error);
                let err = TrackerError::Transport(format!("{:?} command failed: {}", code, error));
                vec![TrackerEvent::from(&err)]
            }
            (None, Some(error)) => {
                let err = TrackerError::Transport(error);
                vec![TrackerEvent::from(&err)]
            }
            (Some(code), None) => {
                debug!("{:?} command acknowledged", code);
                Vec::new()
            }
            (None, None) => Vec::new(),
        }
    }

    /// Clear the lock and any pending write
    pub fn reset_movement(&mut self) -> Option<TrackerEvent> {
        self.pending = None;
        let before = self.active();
        self.set_active(ActiveMovement::None);
        (before != ActiveMovement::None)
            .then_some(TrackerEvent::MovementStateChanged(ActiveMovement::None))
    }

    /// The mount finished its rewind
    pub fn rewind_completed(&mut self) -> Vec<TrackerEvent> {
        if !self.rewinding {
            debug!("Rewind completion received while not rewinding");
            return Vec::new();
        }
        self.rewinding = false;
        info!("Rewind completed");
        vec![
            TrackerEvent::MovementStateChanged(self.active()),
            TrackerEvent::Status("Rewind completed.".to_string()),
        ]
    }

    /// The mount reported its speed; applying a speed is now allowed
    pub fn mark_speed_synced(&mut self) {
        self.speed_synced = true;
    }

    /// Forget everything tied to the link that just went away
    pub fn reset_session(&mut self) -> Option<TrackerEvent> {
        self.speed_synced = false;
        self.reset_movement()
    }
}
