//! BLE Transport Boundary
//!
//! The tracker core never touches a radio. A platform layer implements
//! [`BleTransport`] for the outbound GATT operations and feeds everything the
//! stack reports back as [`TransportEvent`]s, in order, through one queue.

use crate::infrastructure::bluetooth::error::TrackerResult;
use std::fmt;
use uuid::Uuid;

/// Opaque peripheral handle assigned by the platform stack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the platform stack reports to the core
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    BluetoothPoweredOn,
    /// Adapter is off, unsupported or unauthorized
    BluetoothUnavailable(String),
    PeripheralDiscovered {
        id: PeripheralId,
        services: Vec<Uuid>,
    },
    Connected(PeripheralId),
    ConnectFailed {
        id: PeripheralId,
        error: String,
    },
    ServicesDiscovered {
        id: PeripheralId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    CharacteristicValueUpdated {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    WriteCompleted {
        characteristic: Uuid,
        error: Option<String>,
    },
    Disconnected {
        id: PeripheralId,
        error: Option<String>,
    },
}

/// Outbound GATT operations.
///
/// Calls only start an operation; results arrive later as
/// [`TransportEvent`]s. An `Err` means the stack refused to start it.
pub trait BleTransport: Send {
    fn start_scan(&mut self, service: Uuid) -> TrackerResult<()>;

    fn stop_scan(&mut self) -> TrackerResult<()>;

    fn connect(&mut self, peripheral: &PeripheralId) -> TrackerResult<()>;

    fn discover_services(&mut self, peripheral: &PeripheralId, service: Uuid)
        -> TrackerResult<()>;

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> TrackerResult<()>;

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> TrackerResult<()>;

    /// Request the current value; it arrives as `CharacteristicValueUpdated`
    fn read(&mut self, characteristic: Uuid) -> TrackerResult<()>;

    /// Write with response; completion arrives as `WriteCompleted`
    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> TrackerResult<()>;

    fn disconnect(&mut self, peripheral: &PeripheralId) -> TrackerResult<()>;
}
