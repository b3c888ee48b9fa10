use serde::{Deserialize, Serialize};

/// The nine-member process state machine. Only the transitions
/// enumerated there are legal; [`crate::process::Subprocess`] enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
    Unknown,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Stopped => "STOPPED",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Backoff => "BACKOFF",
            ProcessState::Stopping => "STOPPING",
            ProcessState::Exited => "EXITED",
            ProcessState::Fatal => "FATAL",
            ProcessState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Maps a legal `(from, to)` transition to its canonical event-class name,
/// used both for logging and for the listener wire envelope's `<EVENT_NAME>`
/// field. Mirrors `getProcessStateChangeEventType` in the original source.
///
/// Panics on a pair that isn't a legal transition.
/// [`crate::process::Subprocess::change_state`] is the only caller and it
/// never requests an illegal pair.
pub fn state_change_event_name(from: ProcessState, to: ProcessState) -> &'static str {
    use ProcessState::*;
    match (from, to) {
        (Stopped, Starting) => "StartingFromStoppedEvent",
        (Exited, Starting) => "StartingFromExitedEvent",
        (Fatal, Starting) => "StartingFromFatalEvent",
        (Backoff, Starting) => "StartingFromBackoffEvent",
        (Starting, Running) => "RunningFromStartingEvent",
        (Starting, Backoff) => "BackoffFromStartingEvent",
        (Starting, Stopping) => "StoppingFromStartingEvent",
        (Running, Stopping) => "StoppingFromRunningEvent",
        (Running, Exited) => "ExitedFromRunningEvent",
        (Stopping, Stopped) => "StoppedFromStoppingEvent",
        (Backoff, Fatal) => "FatalFromBackoffEvent",
        (Stopping, Unknown) => "UnknownFromStoppingEvent",
        (from, to) => unreachable!("illegal process state transition {from} -> {to}"),
    }
}
