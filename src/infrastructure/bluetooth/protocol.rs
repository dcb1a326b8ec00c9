//! Star Tracker Mount Protocol
//!
//! Wire-level definitions for talking to the tracker mount: the GATT
//! identifiers, the command codes written to the command characteristic and
//! the text lines the mount pushes through the state characteristic.

use crate::infrastructure::bluetooth::error::{TrackerError, TrackerResult};
use crate::infrastructure::logging::WIRE_TARGET;
use tracing::trace;
use uuid::Uuid;

/// Tracker BLE Service UUID
pub const SERVICE_UUID: &str = "4587b400-28df-4da5-b617-bc2b58ce7930";

/// Command Characteristic UUID - movement commands are written here (u32)
pub const COMMAND_CHAR_UUID: &str = "4587b401-28df-4da5-b617-bc2b58ce7930";

/// State Characteristic UUID - status text arrives here (read/notify)
pub const STATE_CHAR_UUID: &str = "4587b402-28df-4da5-b617-bc2b58ce7930";

/// Tracking Speed Characteristic UUID - speed is written here (f64)
pub const TRACKING_SPEED_CHAR_UUID: &str = "4587b403-28df-4da5-b617-bc2b58ce7930";

/// Tracker service identifier
pub const SERVICE_ID: Uuid = Uuid::from_u128(0x4587b400_28df_4da5_b617_bc2b58ce7930);
pub const COMMAND_CHAR_ID: Uuid = Uuid::from_u128(0x4587b401_28df_4da5_b617_bc2b58ce7930);
pub const STATE_CHAR_ID: Uuid = Uuid::from_u128(0x4587b402_28df_4da5_b617_bc2b58ce7930);
pub const TRACKING_SPEED_CHAR_ID: Uuid = Uuid::from_u128(0x4587b403_28df_4da5_b617_bc2b58ce7930);

/// Prefix reserved for machine-readable lines on the state characteristic
pub const COMMAND_PREFIX: &str = "CMD:";

/// Prefix of the speed echo line, followed by the speed as text
pub const SPEED_PREFIX: &str = "CMD:SPEED:";

/// Line sent by the mount once a rewind reached the start position
pub const REWIND_COMPLETED: &str = "CMD:COMPLETED_REWIND";

/// Size of an encoded command value
pub const COMMAND_LEN: usize = 4;

/// Size of an encoded tracking speed value
pub const SPEED_LEN: usize = 8;

/// Command codes understood by the mount firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IntentCode {
    /// Track at the configured speed
    Start = 1,
    /// Halt any movement
    Stop = 2,
    /// Drive back to the start position
    Rewind = 3,
    /// Drive backwards at moving speed
    Backward = 4,
    /// Drive forwards at moving speed (firmware only, never issued here)
    Forward = 5,
}

impl IntentCode {
    /// Get the raw code for this command
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Look up a command by its raw code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Start),
            2 => Some(Self::Stop),
            3 => Some(Self::Rewind),
            4 => Some(Self::Backward),
            5 => Some(Self::Forward),
            _ => None,
        }
    }
}

/// Encode a command for the command characteristic.
///
/// The mount declares this characteristic as an unsigned int, read as a
/// little-endian `u32`.
pub fn encode_command(intent: IntentCode) -> [u8; COMMAND_LEN] {
    let bytes = intent.code().to_le_bytes();
    trace!(target: WIRE_TARGET, "Command {:?}: {:02X?}", intent, bytes);
    bytes
}

/// Decode a command value as the mount sees it
pub fn decode_command(bytes: &[u8]) -> Option<IntentCode> {
    let raw: [u8; COMMAND_LEN] = bytes.try_into().ok()?;
    IntentCode::from_code(u32::from_le_bytes(raw))
}

/// Encode a tracking speed as a little-endian IEEE-754 double
pub fn encode_speed(value: f64) -> [u8; SPEED_LEN] {
    let bytes = value.to_le_bytes();
    trace!(target: WIRE_TARGET, "Speed {}: {:02X?}", value, bytes);
    bytes
}

/// Decode a tracking speed value as the mount sees it
pub fn decode_speed(bytes: &[u8]) -> Option<f64> {
    let raw: [u8; SPEED_LEN] = bytes.try_into().ok()?;
    Some(f64::from_le_bytes(raw))
}

/// Encode a status line the way the mount writes its string characteristic
pub fn encode_state_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Decode a state characteristic value into text.
///
/// Trailing NUL padding is dropped. Anything that is not UTF-8 is reported
/// as [`TrackerError::Decode`] instead of being swallowed.
pub fn decode_state_text(bytes: &[u8]) -> TrackerResult<String> {
    trace!(target: WIRE_TARGET, "State value: {:02X?}", bytes);

    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    let text = std::str::from_utf8(&bytes[..end])?;
    Ok(text.to_string())
}

/// Parse a UUID string (hyphenated or simple, any case)
pub fn parse_uuid(uuid_str: &str) -> TrackerResult<Uuid> {
    Uuid::parse_str(uuid_str.trim()).map_err(|e| TrackerError::InvalidUuid {
        value: uuid_str.to_string(),
        reason: e.to_string(),
    })
}
