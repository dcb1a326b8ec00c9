//! Command and control for a BLE star tracker mount.
//!
//! [`TrackerService`] owns the connection to the mount and turns caller
//! commands into writes on its command and tracking speed characteristics.
//! A platform layer supplies the radio through [`BleTransport`]; the
//! [`SimulatedMount`] stands in for real hardware.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{ActiveMovement, Command, TrackerCommand, TrackerEvent};
pub use infrastructure::bluetooth::error::{ErrorKind, TrackerError, TrackerResult};
pub use infrastructure::bluetooth::service::{TrackerConfig, TrackerHandle, TrackerService};
pub use infrastructure::bluetooth::session::Phase;
pub use infrastructure::bluetooth::simulator::{MountConfig, SimulatedMount};
pub use infrastructure::bluetooth::transport::{BleTransport, PeripheralId, TransportEvent};
