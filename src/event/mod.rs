//! The event bus and the event taxonomy it carries.
//!
//! Modeled as an explicit [`EventBus`] value passed to groups at
//! construction, rather than a module-level global subscriber list.

mod bus;

pub use bus::EventBus;

use crate::process::ProcessState;
use serde::{Deserialize, Serialize};

/// Tag identifying an event's class, including the parent/subclass
/// relationships subscription matching must respect (a subscriber to
/// `ProcessCommunication` also receives `Stdout`/`Stderr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ProcessStateChange,
    ProcessCommunication,
    ProcessCommunicationStdout,
    ProcessCommunicationStderr,
    EventBufferOverflow,
    EventRejected,
    SupervisorStateChange,
}

impl EventKind {
    /// Immediate parent class, if any. Only `ProcessCommunication`'s two
    /// channel-specific variants have one.
    fn parent(self) -> Option<EventKind> {
        match self {
            EventKind::ProcessCommunicationStdout | EventKind::ProcessCommunicationStderr => {
                Some(EventKind::ProcessCommunication)
            }
            _ => None,
        }
    }

    /// True if `self` is `ancestor` or a (possibly transitive) subclass of it.
    pub fn is_a(self, ancestor: EventKind) -> bool {
        self == ancestor || self.parent().is_some_and(|p| p.is_a(ancestor))
    }
}

/// Which standard stream a [`Event::ProcessCommunication`] event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

/// A notified event. Carries enough data for both observers and the
/// listener pool's envelope serializer.
#[derive(Debug, Clone)]
pub enum Event {
    ProcessStateChange {
        process_name: String,
        from: ProcessState,
        to: ProcessState,
    },
    ProcessCommunication {
        process_name: String,
        channel: Channel,
        data: String,
    },
    EventBufferOverflow {
        group_name: String,
        discarded_event_name: String,
    },
    EventRejected {
        process_name: String,
        event: Box<Event>,
    },
    SupervisorStateChange,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ProcessStateChange { .. } => EventKind::ProcessStateChange,
            Event::ProcessCommunication {
                channel: Channel::Stdout,
                ..
            } => EventKind::ProcessCommunicationStdout,
            Event::ProcessCommunication {
                channel: Channel::Stderr,
                ..
            } => EventKind::ProcessCommunicationStderr,
            Event::EventBufferOverflow { .. } => EventKind::EventBufferOverflow,
            Event::EventRejected { .. } => EventKind::EventRejected,
            Event::SupervisorStateChange => EventKind::SupervisorStateChange,
        }
    }

    /// The canonical event-class name used both for logging and, for
    /// `ProcessStateChange`, for the listener wire envelope's `<EVENT_NAME>`.
    pub fn name(&self) -> String {
        match self {
            Event::ProcessStateChange { from, to, .. } => {
                crate::process::state_change_event_name(*from, *to).to_string()
            }
            Event::ProcessCommunication {
                channel: Channel::Stdout,
                ..
            } => "ProcessCommunicationStdoutEvent".to_string(),
            Event::ProcessCommunication {
                channel: Channel::Stderr,
                ..
            } => "ProcessCommunicationStderrEvent".to_string(),
            Event::EventBufferOverflow { .. } => "EventBufferOverflowEvent".to_string(),
            Event::EventRejected { .. } => "EventRejectedEvent".to_string(),
            Event::SupervisorStateChange => "SupervisorStateChangeEvent".to_string(),
        }
    }
}
