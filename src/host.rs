//! The capability surface a [`crate::process::Subprocess`] needs from its
//! host OS. The policy-bearing parts (`$PATH` lookup, `stat`, `kill`,
//! privilege drop) are behind the [`Host`] trait so tests can mock them;
//! the mechanical fork/exec sequence is below as free functions since there
//! is no meaningful way to mock an actual `fork(2)` in a unit test, it's
//! exercised with real commands (`echo`, `sleep`, a deliberately wrong
//! binary) instead.

use std::collections::HashMap;
use std::ffi::CString;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::dispatch::{Channel, Pipes};
use crate::error::HostError;

/// Minimum fd number closed up to in the child branch after dup2'ing the
/// standard streams ("close all fds in [3, minfds)" before exec).
pub const DEFAULT_MINFDS: i32 = 1024;

/// Policy hooks a [`crate::process::Subprocess`] consults while spawning.
/// Object-safe so it can be held as `Arc<dyn Host>` and mocked in tests.
#[cfg_attr(test, mockall::automock)]
pub trait Host: Send + Sync {
    /// Returns `true` if `path` exists and is executable.
    fn is_executable(&self, path: &str) -> bool;
    /// The directories to search when `command`'s program has no path separator.
    fn get_path(&self) -> Vec<String>;
    /// Sends `sig` to `pid`.
    fn kill(&self, pid: u32, sig: Signal) -> Result<(), HostError>;
    /// Drops privileges to `uid`; returns a diagnostic message on failure, `None` on success.
    fn drop_privileges(&self, uid: u32) -> Option<String>;
    /// Closes every fd in `[3, minfds)`, called from the child branch after dup2.
    fn close_fds_from(&self, from: i32, minfds: i32);
    /// `[3, minfds)`, see `DEFAULT_MINFDS`.
    fn minfds(&self) -> i32 {
        DEFAULT_MINFDS
    }
}

/// Default [`Host`] backed by `nix`/libc syscalls.
pub struct UnixHost;

impl Host for UnixHost {
    fn is_executable(&self, path: &str) -> bool {
        use nix::unistd::{access, AccessFlags};
        access(path, AccessFlags::X_OK).is_ok()
    }

    fn get_path(&self) -> Vec<String> {
        std::env::var("PATH")
            .map(|p| p.split(':').map(str::to_owned).collect())
            .unwrap_or_default()
    }

    fn kill(&self, pid: u32, sig: Signal) -> Result<(), HostError> {
        nix::sys::signal::kill(Pid::from_raw(pid as i32), sig).map_err(HostError::from)
    }

    fn drop_privileges(&self, uid: u32) -> Option<String> {
        use nix::unistd::{setuid, Uid};
        setuid(Uid::from_raw(uid))
            .err()
            .map(|errno| errno.to_string())
    }

    fn close_fds_from(&self, from: i32, minfds: i32) {
        use nix::unistd::close;
        for fd in from..minfds {
            let _ = close(fd);
        }
    }
}

/// Splits a shell-style command string into `(program, args)`, the way
/// `shlex.split` does in the original source: whitespace-separated tokens,
/// with single/double quoted spans kept intact.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Resolves `program` to an absolute, executable path: used directly if it
/// contains a path separator, otherwise searched for on `$PATH`. This is
/// Mirrors the original source's `get_execv_args` path-resolution step,
/// minus argv construction (the caller already has the tokenized argv).
pub fn resolve_program(host: &dyn Host, program: &str) -> Option<String> {
    if program.contains('/') {
        return host.is_executable(program).then(|| program.to_string());
    }
    for dir in host.get_path() {
        let candidate = format!("{dir}/{program}");
        if host.is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// The fork/exec sequence. Must only be called after pipes have been
/// created (`crate::dispatch::make_pipes`).
///
/// # Safety
/// Calls `fork(2)`. Between fork and exec the child performs only
/// async-signal-safe operations (dup2, close, setuid, execve).
pub unsafe fn fork_exec(
    host: &dyn Host,
    filename: &str,
    argv: &[String],
    env: &HashMap<String, String>,
    pipes: &Pipes,
    redirect_stderr: bool,
    uid: Option<u32>,
) -> Result<i32, HostError> {
    use nix::unistd::{close, dup2, fork, setpgid, ForkResult};

    match fork()? {
        ForkResult::Parent { child } => Ok(child.as_raw()),
        ForkResult::Child => {
            // New process group: detaches from the supervisor's signal-reception group.
            let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));

            let child_stdin = pipes[&Channel::ChildStdin];
            let child_stdout = pipes[&Channel::ChildStdout];
            let child_stderr = pipes[&Channel::ChildStderr];

            let _ = dup2(child_stdin, 0);
            let _ = dup2(child_stdout, 1);
            if redirect_stderr {
                let _ = dup2(child_stdout, 2);
            } else {
                let _ = dup2(child_stderr, 2);
            }

            host.close_fds_from(3, host.minfds());

            if let Some(uid) = uid {
                if let Some(msg) = host.drop_privileges(uid) {
                    let warning = format!("supervisor: error trying to setuid to {uid} ({msg})\n");
                    let _ = nix::unistd::write(1, warning.as_bytes());
                }
            }

            let path = CString::new(filename).unwrap_or_default();
            let c_argv: Vec<CString> = argv
                .iter()
                .map(|a| CString::new(a.as_str()).unwrap_or_default())
                .collect();

            let mut full_env = std::env::vars().collect::<HashMap<_, _>>();
            full_env.extend(env.clone());
            let c_env: Vec<CString> = full_env
                .iter()
                .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap_or_default())
                .collect();

            let err = nix::unistd::execve(&path, &c_argv, &c_env);
            if let Err(errno) = err {
                let msg = format!("couldn't exec {filename}: {errno}\n");
                let _ = nix::unistd::write(1, msg.as_bytes());
            }
            let _ = close(child_stdin);
            nix::unistd::_exit(127);
        }
    }
}
