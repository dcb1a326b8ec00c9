use crate::infrastructure::bluetooth::error::{ErrorKind, TrackerError};
use crate::infrastructure::bluetooth::session::Phase;
use std::fmt;

/// A caller intent for the mount
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Toggle sidereal tracking (a second press stops it)
    Start,
    /// Stop whatever movement is active
    Stop,
    /// Toggle the rewind back to the start position
    Rewind,
    /// Toggle backward movement
    Backward,
    /// Apply a tracking speed
    SetSpeed(f64),
}

/// Movement-class requests: the three mutually exclusive toggles plus Stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    Tracking,
    Rewind,
    Backward,
    Stop,
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tracking => write!(f, "start tracking"),
            Self::Rewind => write!(f, "rewind"),
            Self::Backward => write!(f, "move backward"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Which movement currently holds the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveMovement {
    #[default]
    None,
    Tracking,
    Rewinding,
    Backing,
}

impl ActiveMovement {
    pub fn kind(&self) -> Option<MovementKind> {
        match self {
            Self::None => None,
            Self::Tracking => Some(MovementKind::Tracking),
            Self::Rewinding => Some(MovementKind::Rewind),
            Self::Backing => Some(MovementKind::Backward),
        }
    }

    /// Controls that may be pressed in this state. The active toggle stays
    /// enabled so it can be pressed again to stop.
    pub fn enabled_controls(&self) -> EnabledControls {
        match self {
            Self::None => EnabledControls {
                start: true,
                rewind: true,
                backward: true,
            },
            Self::Tracking => EnabledControls {
                start: true,
                rewind: false,
                backward: false,
            },
            Self::Rewinding => EnabledControls {
                start: false,
                rewind: true,
                backward: false,
            },
            Self::Backing => EnabledControls {
                start: false,
                rewind: false,
                backward: true,
            },
        }
    }
}

impl fmt::Display for ActiveMovement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "idle"),
            Self::Tracking => write!(f, "tracking"),
            Self::Rewinding => write!(f, "rewinding"),
            Self::Backing => write!(f, "moving backward"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledControls {
    pub start: bool,
    pub rewind: bool,
    pub backward: bool,
}

/// A line received on the state characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Full `CMD:SPEED:<value>` line
    SpeedSync(String),
    RewindCompleted,
    /// Any other text, including unrecognized `CMD:` lines
    StatusText(String),
}

/// Events delivered to the caller (UI or CLI)
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// Console text
    Status(String),
    /// The mount reported its speed; raw text, parsing is up to the caller
    SpeedAvailable(String),
    MovementStateChanged(ActiveMovement),
    PhaseChanged(Phase),
    Error { kind: ErrorKind, detail: String },
}

impl From<&TrackerError> for TrackerEvent {
    fn from(err: &TrackerError) -> Self {
        TrackerEvent::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

/// Requests from the caller to the tracker service
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerCommand {
    StartScan,
    Issue(Command),
    /// Clear the movement lock after a failed write
    ResetMovement,
    Disconnect,
    Shutdown,
}
