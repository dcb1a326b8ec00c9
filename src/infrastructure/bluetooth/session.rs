//! Device Session State Machine
//!
//! Tracks the connection phase of the single mount we talk to and owns the
//! identifiers discovered along the way.
//!
//! ```text
//!   ┌──────┐ start_scanning ┌──────────┐ tracker found ┌────────────┐
//!   │ Idle │───────────────►│ Scanning │──────────────►│ Connecting │
//!   └──────┘◄───────────────└──────────┘               └─────┬──────┘
//!      ▲      scan timeout                                   │ connected
//!      │                                          ┌──────────▼──────────┐
//!      │                                          │ DiscoveringServices │
//!      │                                          └──────────┬──────────┘
//!      │                                                     │ service verified
//!      │                                       ┌─────────────▼──────────────┐
//!      │                                       │ DiscoveringCharacteristics │
//!      │                                       └─────────────┬──────────────┘
//!      │                                                     │ all three roles
//!      │                 write completed  ┌───────┐◄─────────┘
//!      │               ┌─────────────────►│ Ready │
//!      │          ┌────┴───────┐          └───┬───┘
//!      │          │ Commanding │◄─────────────┘ movement write
//!      │          └────────────┘
//!      │
//!   ┌──┴───────────┐  (any phase) disconnect / link loss
//!   │ Disconnected │◄──────────────────────────────────────
//!   └──────────────┘──► Scanning on start_scanning
//! ```

use crate::infrastructure::bluetooth::error::{TrackerError, TrackerResult};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::PeripheralId;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection phase of a [`DeviceSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    /// Ready, with a movement write awaiting its completion
    Commanding,
    Disconnected,
}

impl Phase {
    /// Validate if a transition to `next` is allowed from this phase
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;

        match (self, next) {
            (_, Disconnected) => true,

            (Idle, Scanning) => true,
            (Disconnected, Scanning) => true,

            (Scanning, Connecting) => true,
            (Scanning, Idle) => true, // scan timeout

            (Connecting, DiscoveringServices) => true,
            (DiscoveringServices, DiscoveringCharacteristics) => true,
            (DiscoveringCharacteristics, Ready) => true,

            (Ready, Commanding) => true,
            (Commanding, Ready) => true,

            _ => false,
        }
    }

    /// Whether command writes are legal
    pub fn is_writable(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Commanding)
    }

    /// Whether a link to the peripheral exists or is being set up
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            Phase::Connecting
                | Phase::DiscoveringServices
                | Phase::DiscoveringCharacteristics
                | Phase::Ready
                | Phase::Commanding
        )
    }
}

/// The part a characteristic plays in the tracker service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    Command,
    State,
    TrackingSpeed,
}

impl CharacteristicRole {
    pub const ALL: [CharacteristicRole; 3] = [
        CharacteristicRole::Command,
        CharacteristicRole::State,
        CharacteristicRole::TrackingSpeed,
    ];
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "Command"),
            Self::State => write!(f, "State"),
            Self::TrackingSpeed => write!(f, "Tracking speed"),
        }
    }
}

/// Identifiers the session looks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerIds {
    pub service: Uuid,
    pub command: Uuid,
    pub state: Uuid,
    pub tracking_speed: Uuid,
}

impl Default for TrackerIds {
    fn default() -> Self {
        Self {
            service: protocol::SERVICE_ID,
            command: protocol::COMMAND_CHAR_ID,
            state: protocol::STATE_CHAR_ID,
            tracking_speed: protocol::TRACKING_SPEED_CHAR_ID,
        }
    }
}

impl TrackerIds {
    pub fn for_role(&self, role: CharacteristicRole) -> Uuid {
        match role {
            CharacteristicRole::Command => self.command,
            CharacteristicRole::State => self.state,
            CharacteristicRole::TrackingSpeed => self.tracking_speed,
        }
    }
}

/// One connection attempt to one peripheral
#[derive(Debug)]
pub struct DeviceSession {
    ids: TrackerIds,
    phase: Phase,
    peripheral: Option<PeripheralId>,
    characteristics: HashMap<CharacteristicRole, Uuid>,
}

impl DeviceSession {
    pub fn new(ids: TrackerIds) -> Self {
        Self {
            ids,
            phase: Phase::Idle,
            peripheral: None,
            characteristics: HashMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ids(&self) -> &TrackerIds {
        &self.ids
    }

    pub fn peripheral(&self) -> Option<&PeripheralId> {
        self.peripheral.as_ref()
    }

    /// Resolved characteristic for a role, if discovery got that far
    pub fn characteristic(&self, role: CharacteristicRole) -> Option<Uuid> {
        self.characteristics.get(&role).copied()
    }

    /// Role of a resolved characteristic
    pub fn role_of(&self, characteristic: Uuid) -> Option<CharacteristicRole> {
        self.characteristics
            .iter()
            .find(|(_, uuid)| **uuid == characteristic)
            .map(|(role, _)| *role)
    }

    fn transition(&mut self, next: Phase) -> TrackerResult<Phase> {
        let previous = self.phase;
        if !previous.can_transition_to(next) {
            warn!("Rejected transition {:?} -> {:?}", previous, next);
            return Err(TrackerError::InvalidTransition {
                from: previous,
                to: next,
            });
        }
        if previous != next {
            debug!("Session phase {:?} -> {:?}", previous, next);
        }
        self.phase = next;
        Ok(previous)
    }

    /// Enter `Scanning`, forgetting any earlier peripheral
    pub fn begin_scan(&mut self) -> TrackerResult<()> {
        self.transition(Phase::Scanning)?;
        self.peripheral = None;
        self.characteristics.clear();
        Ok(())
    }

    /// Scan window expired. Returns false if scanning already ended.
    pub fn scan_timed_out(&mut self) -> bool {
        if self.phase != Phase::Scanning {
            return false;
        }
        self.transition(Phase::Idle).is_ok()
    }

    /// Accept the first advertiser of the tracker service.
    ///
    /// Returns true when this peripheral is now being pursued.
    pub fn peripheral_discovered(&mut self, id: &PeripheralId, services: &[Uuid]) -> bool {
        if self.phase != Phase::Scanning {
            debug!("Ignoring discovery of {} while {:?}", id, self.phase);
            return false;
        }
        if !services.contains(&self.ids.service) {
            debug!("Ignoring {}: tracker service not advertised", id);
            return false;
        }

        if self.transition(Phase::Connecting).is_err() {
            return false;
        }
        self.peripheral = Some(id.clone());
        info!("Tracker discovered: {}", id);
        true
    }

    /// Returns true if this is the link we asked for
    pub fn connected(&mut self, id: &PeripheralId) -> TrackerResult<bool> {
        if self.phase != Phase::Connecting || self.peripheral.as_ref() != Some(id) {
            debug!("Ignoring connect of {} while {:?}", id, self.phase);
            return Ok(false);
        }
        self.transition(Phase::DiscoveringServices)?;
        Ok(true)
    }

    /// Verify the tracker service is among the discovered services.
    ///
    /// Ok(false) means the event did not belong to this session.
    pub fn services_discovered(
        &mut self,
        id: &PeripheralId,
        services: &[Uuid],
    ) -> TrackerResult<bool> {
        if self.phase != Phase::DiscoveringServices || self.peripheral.as_ref() != Some(id) {
            debug!("Ignoring services of {} while {:?}", id, self.phase);
            return Ok(false);
        }
        if !services.contains(&self.ids.service) {
            return Err(TrackerError::ServiceNotFound(id.to_string()));
        }
        self.transition(Phase::DiscoveringCharacteristics)?;
        Ok(true)
    }

    /// Match characteristics by identifier; `Ready` once all roles resolve.
    ///
    /// Ok(false) means the event did not belong to this session.
    pub fn characteristics_discovered(
        &mut self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> TrackerResult<bool> {
        if self.phase != Phase::DiscoveringCharacteristics || service != self.ids.service {
            debug!(
                "Ignoring characteristics of {} while {:?}",
                service, self.phase
            );
            return Ok(false);
        }

        for role in CharacteristicRole::ALL {
            let wanted = self.ids.for_role(role);
            if characteristics.contains(&wanted) {
                self.characteristics.insert(role, wanted);
            }
        }

        let missing: Vec<String> = CharacteristicRole::ALL
            .iter()
            .filter(|role| !self.characteristics.contains_key(role))
            .map(|role| role.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TrackerError::MissingCharacteristic(missing.join(", ")));
        }

        self.transition(Phase::Ready)?;
        Ok(true)
    }

    /// Fail unless command writes are legal right now
    pub fn ensure_writable(&self) -> TrackerResult<()> {
        if self.phase.is_writable() {
            Ok(())
        } else {
            Err(TrackerError::NotConnected { phase: self.phase })
        }
    }

    /// Ready -> Commanding while a movement write is in flight
    pub fn begin_command(&mut self) -> TrackerResult<()> {
        if self.phase == Phase::Commanding {
            return Ok(());
        }
        self.transition(Phase::Commanding).map(|_| ())
    }

    /// Commanding -> Ready once the write completed
    pub fn finish_command(&mut self) {
        if self.phase == Phase::Commanding {
            let _ = self.transition(Phase::Ready);
        }
    }

    /// Enter `Disconnected` and drop all handles.
    ///
    /// Returns the peripheral that was linked, if any.
    pub fn disconnect(&mut self) -> Option<PeripheralId> {
        let previous = self.phase;
        // Every phase may drop to Disconnected
        let _ = self.transition(Phase::Disconnected);
        self.characteristics.clear();
        let peripheral = self.peripheral.take();
        if previous != Phase::Disconnected {
            info!("Session disconnected (was {:?})", previous);
        }
        peripheral
    }
}
