mod state;
mod subprocess;

pub use state::{state_change_event_name, ProcessState};
pub use subprocess::{ExitStatus, Subprocess};
