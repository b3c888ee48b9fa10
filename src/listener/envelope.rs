//! The wire format written to a listener's stdin: a one-line header
//! followed by a byte-counted payload, exactly as the original source's
//! `EventListenerProtocol` serializers produce.
//!
//! ```text
//! SUPERVISORD3.0 <EVENT_NAME> <LEN>\n<payload>
//! ```

use crate::error::DispatchError;
use crate::event::{Channel, Event, EventKind};

const PROTOCOL_VERSION: &str = "SUPERVISORD3.0";

/// Builds the payload body for `event`'s class. [`Event::EventRejected`] has
/// no wire representation of its own, it exists to notify in-process
/// subscribers, never the listener it was rejected by.
fn serialize_payload(event: &Event) -> Result<String, DispatchError> {
    match event {
        Event::ProcessCommunication {
            process_name,
            channel,
            data,
        } => {
            let channel = match channel {
                Channel::Stdout => "stdout",
                Channel::Stderr => "stderr",
            };
            Ok(format!("process_name: {process_name}\nchannel: {channel}\n{data}"))
        }
        Event::EventBufferOverflow {
            group_name,
            discarded_event_name,
        } => Ok(format!("group_name: {group_name}\nevent_type: {discarded_event_name}")),
        Event::ProcessStateChange { process_name, .. } => Ok(format!("process_name: {process_name}\n")),
        Event::SupervisorStateChange => Ok(String::new()),
        Event::EventRejected { .. } => Err(DispatchError::NoSerializer(EventKind::EventRejected)),
    }
}

/// Builds the full envelope ready to be written to a listener process's stdin.
pub fn build_envelope(event: &Event) -> Result<String, DispatchError> {
    let payload = serialize_payload(event)?;
    let name = event.name();
    Ok(format!(
        "{PROTOCOL_VERSION} {name} {len}\n{payload}",
        len = payload.len()
    ))
}

/// Splits a received envelope back into `(event_name, payload)`, used by
/// tests and by `handle_rejected`'s parsing of a listener's `RESULT` ack.
pub fn parse_envelope(raw: &str) -> Option<(&str, &str)> {
    let (header, rest) = raw.split_once('\n')?;
    let mut parts = header.split(' ');
    let version = parts.next()?;
    if version != PROTOCOL_VERSION {
        return None;
    }
    let name = parts.next()?;
    let len: usize = parts.next()?.parse().ok()?;
    if rest.len() < len {
        return None;
    }
    Some((name, &rest[..len]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;

    #[test]
    fn process_state_change_envelope_round_trips() {
        let event = Event::ProcessStateChange {
            process_name: "web".into(),
            from: ProcessState::Starting,
            to: ProcessState::Running,
        };
        let envelope = build_envelope(&event).unwrap();
        assert!(envelope.starts_with("SUPERVISORD3.0 RunningFromStartingEvent "));
        let (name, payload) = parse_envelope(&envelope).unwrap();
        assert_eq!(name, "RunningFromStartingEvent");
        assert_eq!(payload, "process_name: web\n");
    }

    #[test]
    fn process_communication_envelope_carries_channel_and_data() {
        let event = Event::ProcessCommunication {
            process_name: "web".into(),
            channel: Channel::Stderr,
            data: "boom\n".into(),
        };
        let envelope = build_envelope(&event).unwrap();
        let (name, payload) = parse_envelope(&envelope).unwrap();
        assert_eq!(name, "ProcessCommunicationStderrEvent");
        assert_eq!(payload, "process_name: web\nchannel: stderr\nboom\n");
    }

    #[test]
    fn event_buffer_overflow_envelope() {
        let event = Event::EventBufferOverflow {
            group_name: "listeners".into(),
            discarded_event_name: "TICK_60".into(),
        };
        let envelope = build_envelope(&event).unwrap();
        let (name, payload) = parse_envelope(&envelope).unwrap();
        assert_eq!(name, "EventBufferOverflowEvent");
        assert_eq!(payload, "group_name: listeners\nevent_type: TICK_60");
    }

    #[test]
    fn supervisor_state_change_has_empty_payload() {
        let envelope = build_envelope(&Event::SupervisorStateChange).unwrap();
        assert_eq!(envelope, "SUPERVISORD3.0 SupervisorStateChangeEvent 0\n");
    }

    #[test]
    fn event_rejected_has_no_wire_serializer() {
        let event = Event::EventRejected {
            process_name: "listener1".into(),
            event: Box::new(Event::SupervisorStateChange),
        };
        assert!(matches!(
            build_envelope(&event),
            Err(DispatchError::NoSerializer(EventKind::EventRejected))
        ));
    }
}
