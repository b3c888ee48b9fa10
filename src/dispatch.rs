//! The I/O-dispatch reactor that drives these file descriptors
//! non-blockingly lives outside this crate. What the core does own is the
//! *shape* of that capability, the pipe set created on spawn, and a
//! sum-typed [`Dispatcher`] in place of one open interface.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use crate::error::HostError;

/// The four channels held open on a running `Subprocess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ChildStdin,
    ChildStdout,
    ChildStderr,
    /// Parent-side write end of the child's stdin pipe.
    Stdin,
}

/// Parent-owned file descriptors for one [`crate::process::Subprocess`],
/// created by [`make_pipes`] on every `spawn()` and closed exactly once on
/// `finish()`.
pub type Pipes = HashMap<Channel, RawFd>;

/// `Dispatcher = Input{input_buffer} | Output{..}`, per the redesign note in
/// input dispatchers buffer bytes for a non-blocking writer to
/// drain, output dispatchers represent the (externally owned) readable side
/// of stdout/stderr.
pub enum Dispatcher {
    Input(InputDispatcher),
    Output(OutputDispatcher),
}

/// The stdin dispatcher: an append-only buffer drained by the external
/// reactor's `handle_write_event`.
#[derive(Default)]
pub struct InputDispatcher {
    pub input_buffer: Vec<u8>,
}

impl InputDispatcher {
    pub fn append(&mut self, bytes: &[u8]) {
        self.input_buffer.extend_from_slice(bytes);
    }
}

/// The stdout/stderr dispatcher: read side, owned by the external reactor.
/// The core never reads from it directly; it only opens/closes the fd and
/// forwards `removelogs`/`reopenlogs` housekeeping calls.
pub struct OutputDispatcher {
    pub fd: RawFd,
}

/// Creates the pipe pairs for the four channels on spawn, mirroring
/// `make_dispatchers` in the original source. Parent-side and child-side fds for
/// `child_stdin`/`child_stdout`/`child_stderr` are distinct ends of the same
/// pipe; `Stdin` is the parent's write end (the pair's read end becomes
/// `ChildStdin` after the fork).
pub fn make_pipes() -> Result<(Pipes, Dispatcher, Dispatcher, Dispatcher), HostError> {
    use nix::unistd::pipe;

    let (child_stdin_r, stdin_w) = pipe()?;
    let (stdout_r, child_stdout_w) = pipe()?;
    let (stderr_r, child_stderr_w) = pipe()?;

    let mut pipes = Pipes::new();
    pipes.insert(Channel::ChildStdin, child_stdin_r);
    pipes.insert(Channel::ChildStdout, child_stdout_w);
    pipes.insert(Channel::ChildStderr, child_stderr_w);
    pipes.insert(Channel::Stdin, stdin_w);

    Ok((
        pipes,
        Dispatcher::Input(InputDispatcher::default()),
        Dispatcher::Output(OutputDispatcher { fd: stdout_r }),
        Dispatcher::Output(OutputDispatcher { fd: stderr_r }),
    ))
}

/// Closes the parent-owned ends of `pipes` (`Stdin`'s write end, and the
/// read ends of stdout/stderr, tracked separately by the caller since they
/// are handed off into `Dispatcher::Output` rather than kept in `Pipes`).
pub fn close_parent_pipes(pipes: &Pipes) {
    use nix::unistd::close;
    if let Some(fd) = pipes.get(&Channel::Stdin) {
        let _ = close(*fd);
    }
}

/// Closes the child-owned ends of `pipes` from the parent side, done right
/// after fork so the parent doesn't hold the child's read end of its stdin
/// pipe open.
pub fn close_child_pipes(pipes: &Pipes) {
    use nix::unistd::close;
    if let Some(fd) = pipes.get(&Channel::ChildStdin) {
        let _ = close(*fd);
    }
}
