//! Notification Interpreter
//!
//! Classifies lines from the state characteristic and turns them into
//! caller events. Lines carrying the reserved `CMD:` prefix are protocol
//! traffic and never reach the console.

use crate::domain::models::{Notification, TrackerEvent};
use crate::infrastructure::bluetooth::dispatcher::CommandDispatcher;
use crate::infrastructure::bluetooth::error::TrackerResult;
use crate::infrastructure::bluetooth::protocol::{
    decode_state_text, COMMAND_PREFIX, REWIND_COMPLETED, SPEED_PREFIX,
};
use tracing::debug;

impl Notification {
    /// Classify a decoded state line
    pub fn classify(text: &str) -> Self {
        if text == REWIND_COMPLETED {
            Notification::RewindCompleted
        } else if text.starts_with(SPEED_PREFIX) {
            Notification::SpeedSync(text.to_string())
        } else {
            Notification::StatusText(text.to_string())
        }
    }
}

/// Decode and classify a raw state characteristic value
pub fn interpret(raw: &[u8]) -> TrackerResult<Notification> {
    let text = decode_state_text(raw)?;
    Ok(Notification::classify(&text))
}

/// Route a notification to the dispatcher and collect the caller events
pub fn apply(notification: Notification, dispatcher: &mut CommandDispatcher) -> Vec<TrackerEvent> {
    match notification {
        Notification::RewindCompleted => dispatcher.rewind_completed(),
        Notification::SpeedSync(line) => {
            dispatcher.mark_speed_synced();
            let speed = line
                .strip_prefix(SPEED_PREFIX)
                .unwrap_or_default()
                .to_string();
            debug!("Mount reports tracking speed {}", speed);
            vec![TrackerEvent::SpeedAvailable(speed)]
        }
        Notification::StatusText(text) => {
            if text.starts_with(COMMAND_PREFIX) {
                debug!("Dropping unrecognized command line: {}", text);
                Vec::new()
            } else {
                vec![TrackerEvent::Status(text)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ActiveMovement, Command};
    use crate::infrastructure::bluetooth::protocol::encode_state_text;
    use crate::infrastructure::bluetooth::session::DeviceSession;
    use crate::infrastructure::bluetooth::testing::{tracker_ids, RecordingTransport};
    use crate::infrastructure::bluetooth::transport::PeripheralId;

    #[test]
    fn test_classify() {
        assert_eq!(
            Notification::classify("CMD:COMPLETED_REWIND"),
            Notification::RewindCompleted
        );
        assert_eq!(
            Notification::classify("CMD:SPEED:3.5"),
            Notification::SpeedSync("CMD:SPEED:3.5".into())
        );
        assert_eq!(
            Notification::classify("Ready!!"),
            Notification::StatusText("Ready!!".into())
        );
        assert_eq!(
            Notification::classify("CMD:COMPLETED_REWIND "),
            Notification::StatusText("CMD:COMPLETED_REWIND ".into())
        );
    }

    #[test]
    fn test_interpret_rejects_invalid_utf8() {
        assert!(interpret(&[0xFF, 0x00, 0x41]).is_err());
    }

    #[test]
    fn test_speed_sync_emits_raw_value() {
        let mut dispatcher = CommandDispatcher::new(true);
        let notification = interpret(&encode_state_text("CMD:SPEED:3.5")).unwrap();

        let events = apply(notification, &mut dispatcher);

        assert_eq!(events, vec![TrackerEvent::SpeedAvailable("3.5".into())]);
        assert!(dispatcher.is_speed_synced());
    }

    #[test]
    fn test_status_text_passes_through() {
        let mut dispatcher = CommandDispatcher::new(true);
        let events = apply(interpret(b"12800").unwrap(), &mut dispatcher);
        assert_eq!(events, vec![TrackerEvent::Status("12800".into())]);
    }

    #[test]
    fn test_unknown_command_lines_are_dropped() {
        let mut dispatcher = CommandDispatcher::new(true);
        for line in ["CMD:", "CMD:FOO", "CMD:COMPLETED_REWIND_X"] {
            assert!(apply(interpret(line.as_bytes()).unwrap(), &mut dispatcher).is_empty());
        }
    }

    #[test]
    fn test_rewind_completed_clears_lock_without_raw_text() {
        let ids = tracker_ids();
        let p1 = PeripheralId::new("P1");
        let mut session = DeviceSession::new(ids.clone());
        session.begin_scan().unwrap();
        session.peripheral_discovered(&p1, &[ids.service]);
        session.connected(&p1).unwrap();
        session.services_discovered(&p1, &[ids.service]).unwrap();
        session
            .characteristics_discovered(ids.service, &[ids.command, ids.state, ids.tracking_speed])
            .unwrap();

        let mut transport = RecordingTransport::new();
        let mut dispatcher = CommandDispatcher::new(true);
        dispatcher
            .issue(Command::Rewind, &mut session, &mut transport)
            .unwrap();
        dispatcher.command_write_completed(None, &mut session);

        let events = apply(interpret(b"CMD:COMPLETED_REWIND").unwrap(), &mut dispatcher);

        assert_eq!(dispatcher.active(), ActiveMovement::None);
        assert!(events.contains(&TrackerEvent::MovementStateChanged(ActiveMovement::None)));
        assert!(!events.iter().any(|event| matches!(
            event,
            TrackerEvent::Status(text) if text.contains("CMD:")
        )));
    }
}
