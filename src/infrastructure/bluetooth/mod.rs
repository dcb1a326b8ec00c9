//! Bluetooth Module
//!
//! Provides BLE command and control for the star tracker mount.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    TrackerService                        │
//! │  (single owner - one event at a time, caller events out) │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!      ┌────────────┬───┴────────┬─────────────┐
//!      │            │            │             │
//!      ▼            ▼            ▼             ▼
//! ┌─────────┐ ┌───────────┐ ┌────────────┐ ┌─────────────┐
//! │ Scanner │ │  Session  │ │ Dispatcher │ │ Interpreter │
//! │         │ │           │ │            │ │             │
//! │ - scan  │ │ - phases  │ │ - movement │ │ - CMD: lines│
//! │   window│ │ - GATT ids│ │   lock     │ │ - status    │
//! └────┬────┘ └───────────┘ └─────┬──────┘ └─────────────┘
//!      │                          │
//!      └─────────┐   ┌────────────┘
//!                ▼   ▼
//!          ┌──────────────┐      ┌──────────┐
//!          │ BleTransport │      │ Protocol │
//!          │ (platform or │      │ - UUIDs  │
//!          │  simulator)  │      │ - codecs │
//!          └──────────────┘      └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers, command codes and value codecs
//! - [`transport`] - The boundary a platform BLE stack implements
//! - [`session`] - Connection phase state machine
//! - [`dispatcher`] - Movement commands and the movement lock
//! - [`interpreter`] - State characteristic notifications
//! - [`scanner`] - Scan start/stop and the scan window
//! - [`service`] - Main service coordinator
//! - [`simulator`] - In-process mount for demos and tests

pub mod dispatcher;
pub mod error;
pub mod interpreter;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod session;
pub mod simulator;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main service for convenience
pub use service::TrackerService;
