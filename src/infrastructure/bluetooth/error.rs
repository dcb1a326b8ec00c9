//! Tracker error types.
//!
//! Every variant is recoverable: the caller re-issues the lifecycle call
//! (scan, connect, command) that failed. Only [`TrackerError::Timeout`] is
//! handled inside the core, which returns the session to `Idle` by itself.

use crate::domain::models::MovementKind;
use crate::infrastructure::bluetooth::session::Phase;
use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// A write was attempted while the session is not ready for commands
    #[error("Not connected: cannot send commands while {phase:?}")]
    NotConnected { phase: Phase },

    /// Movement mutual exclusion was violated
    #[error("Cannot {requested} while {active}")]
    Conflict {
        requested: MovementKind,
        active: String,
    },

    /// The underlying transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The state characteristic delivered bytes that are not UTF-8
    #[error("Notification is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),

    /// Scanning ended without finding the mount
    #[error("No tracker found after scanning for {secs}s")]
    Timeout { secs: u64 },

    /// A speed was applied before the mount reported its current speed
    #[error("Tracking speed is not available yet - wait for the mount to report it")]
    SpeedNotSynced,

    /// The speed is NaN or infinite
    #[error("Invalid tracking speed: {0}")]
    InvalidSpeed(f64),

    /// The state machine refused a phase change
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    /// The connected peripheral does not expose the tracker service
    #[error("Tracker service not found on peripheral {0}")]
    ServiceNotFound(String),

    /// The tracker service lacks one of the required characteristics
    #[error("{0} characteristic not found")]
    MissingCharacteristic(String),

    /// Bluetooth is off, unsupported or not authorized
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    /// A configured identifier is not a UUID
    #[error("Invalid UUID '{value}': {reason}")]
    InvalidUuid { value: String, reason: String },
}

/// Copyable classification of [`TrackerError`], reported with error events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConnected,
    Conflict,
    Transport,
    Decode,
    Timeout,
    SpeedNotSynced,
    InvalidSpeed,
    InvalidTransition,
    ServiceNotFound,
    MissingCharacteristic,
    BluetoothUnavailable,
    InvalidUuid,
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected { .. } => ErrorKind::NotConnected,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::SpeedNotSynced => ErrorKind::SpeedNotSynced,
            Self::InvalidSpeed(_) => ErrorKind::InvalidSpeed,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            Self::MissingCharacteristic(_) => ErrorKind::MissingCharacteristic,
            Self::BluetoothUnavailable(_) => ErrorKind::BluetoothUnavailable,
            Self::InvalidUuid { .. } => ErrorKind::InvalidUuid,
        }
    }
}
