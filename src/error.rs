use std::fmt::Debug;
use thiserror::Error;

/// Errors that can occur while bringing a child process up.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("program not found: `{0}`")]
    ProgramNotFound(String),

    #[error("program is not executable: `{0}`")]
    NotExecutable(String),

    #[error("too many open files to spawn `{0}`")]
    TooManyOpenFiles(String),

    #[error("process table full while spawning `{0}`")]
    ProcessTableFull(String),

    #[error("unknown error while spawning `{0}`: {1}")]
    Unknown(String, String),
}

/// Errors surfaced by [`crate::process::Subprocess::kill`].
#[derive(Error, Debug)]
pub enum KillError {
    #[error("attempted to kill `{0}` but it wasn't running")]
    NotRunning(String),

    #[error("unknown problem killing `{0}` (pid {1}): {2}")]
    Unknown(String, u32, String),
}

/// Errors raised when writing to, or serializing for, a listener's stdin.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("process already closed")]
    PipeClosed,

    #[error("no serializer registered for event kind {0:?}")]
    NoSerializer(crate::event::EventKind),
}

/// Errors raised by the [`crate::host::Host`] implementation.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(target_family = "unix")]
    #[error("system error: {0}")]
    Nix(#[from] nix::Error),
}
