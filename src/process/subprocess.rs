//! The single-process state machine: spawn, administrative stop, child-exit
//! handling, and the cooperative `transition()` tick that drives
//! STARTING→RUNNING promotion and BACKOFF retries without a background
//! thread.

use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::Config;
use crate::dispatch::{self, Dispatcher, Pipes};
use crate::error::{DispatchError, KillError, SpawnError};
use crate::event::{Event, EventBus};
use crate::host::{self, Host};
use crate::process::state::ProcessState;

/// How a child went away, passed in to [`Subprocess::finish`] by whatever
/// external reactor reaped it with `waitpid`.
#[derive(Debug, Clone, Copy)]
pub enum ExitStatus {
    Code(i32),
    Signaled(i32),
}

/// One supervised child process and its state machine.
pub struct Subprocess {
    config: Config,
    state: ProcessState,
    pid: Option<i32>,
    pipes: Option<Pipes>,
    stdin: Option<Dispatcher>,
    stdout: Option<Dispatcher>,
    stderr: Option<Dispatcher>,
    backoff: Backoff,
    laststart: Option<Instant>,
    delay: Option<Instant>,
    /// Set when `stop()` was called, so `finish()` knows an EXITED
    /// transition was administratively requested rather than a crash.
    administrative_stop: bool,
    /// When STOPPING began, used to detect an undead process once
    /// `stopwaitsecs` has elapsed without a `finish()` call.
    stopping_since: Option<Instant>,
    /// The exit status attached by the last `finish()` call, cleared on
    /// the next successful `spawn()`.
    exitstatus: Option<ExitStatus>,
    /// The diagnostic recorded by a failed `spawn()` or an early `finish()`,
    /// cleared once the process spawns successfully.
    spawnerr: Option<String>,
    /// Set once the process has been given up on by the supervisor itself
    /// (BACKOFF exhausted its retries), as opposed to an administrative stop.
    system_stop: bool,
}

impl Subprocess {
    pub fn new(config: Config) -> Self {
        let startretries = config.startretries;
        Subprocess {
            config,
            state: ProcessState::Stopped,
            pid: None,
            pipes: None,
            stdin: None,
            stdout: None,
            stderr: None,
            backoff: Backoff::new(startretries),
            laststart: None,
            delay: None,
            administrative_stop: false,
            stopping_since: None,
            exitstatus: None,
            spawnerr: None,
            system_stop: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn autostart(&self) -> bool {
        self.config.autostart
    }

    pub fn autorestart(&self) -> bool {
        self.config.autorestart
    }

    /// `true` if `spawn()` has never once been called for this process.
    pub fn never_started(&self) -> bool {
        self.laststart.is_none()
    }

    /// `true` once a BACKOFF process's retry delay has elapsed, i.e. the
    /// group should `spawn()` it again.
    pub fn retry_ready(&self, now: Instant) -> bool {
        self.state == ProcessState::Backoff && self.delay.is_some_and(|d| now >= d)
    }

    pub fn exitstatus(&self) -> Option<ExitStatus> {
        self.exitstatus
    }

    pub fn spawnerr(&self) -> Option<&str> {
        self.spawnerr.as_deref()
    }

    pub fn system_stop(&self) -> bool {
        self.system_stop
    }

    /// This process's stdin/stdout/stderr dispatchers, for the reactor to
    /// poll for I/O readiness. Empty while the process isn't running.
    pub fn dispatchers(&self) -> impl Iterator<Item = &Dispatcher> {
        [&self.stdin, &self.stdout, &self.stderr]
            .into_iter()
            .filter_map(|d| d.as_ref())
    }

    /// Moves `self.state` to `to`, notifying `bus` of the transition before
    /// the field is updated, so subscribers observing `Subprocess::state()`
    /// from inside the callback still see the prior state (cooperative,
    /// single-threaded: there is no race to guard against, only ordering).
    fn change_state(&mut self, to: ProcessState, bus: &EventBus) {
        let from = self.state;
        bus.notify(&Event::ProcessStateChange {
            process_name: self.config.name.clone(),
            from,
            to,
        });
        debug!(process = %self.config.name, %from, %to, "process state transition");
        self.state = to;
    }

    /// Forks and execs the configured command. Legal from STOPPED, EXITED,
    /// FATAL, or BACKOFF; any other starting state is a caller bug.
    ///
    /// Transitions to STARTING unconditionally before attempting anything
    /// fallible, then to BACKOFF if any step fails (program resolution, pipe
    /// creation, fork/exec): a spawn failure is handled exactly like a child
    /// that died before `startsecs` elapsed, never surfaced as a bare error
    /// with the state left untouched.
    pub fn spawn(&mut self, host: &dyn Host, bus: &mut EventBus, now: Instant) -> Result<(), SpawnError> {
        debug_assert!(matches!(
            self.state,
            ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal | ProcessState::Backoff
        ));

        self.spawnerr = None;
        self.exitstatus = None;
        self.system_stop = false;
        self.administrative_stop = false;
        self.laststart = Some(now);
        self.change_state(ProcessState::Starting, bus);

        match self.try_spawn(host) {
            Ok(pid) => {
                info!(process = %self.config.name, pid, "spawned");
                self.pid = Some(pid);
                self.delay = Some(now + Duration::from_secs(self.config.startsecs));
                Ok(())
            }
            Err(e) => {
                self.spawnerr = Some(e.to_string());
                warn!(process = %self.config.name, error = %e, "spawnerr");
                self.enter_backoff(bus, now);
                Err(e)
            }
        }
    }

    /// The fallible part of `spawn()`: program resolution, pipe creation,
    /// fork/exec. Leaves `self.state` at STARTING either way; the caller
    /// decides where to go next.
    fn try_spawn(&mut self, host: &dyn Host) -> Result<i32, SpawnError> {
        let argv = host::tokenize(&self.config.command);
        let program = argv
            .first()
            .ok_or_else(|| SpawnError::ProgramNotFound(self.config.command.clone()))?;
        let resolved = host::resolve_program(host, program)
            .ok_or_else(|| SpawnError::ProgramNotFound(program.clone()))?;

        let (pipes, stdin, stdout, stderr) = dispatch::make_pipes()
            .map_err(|e| SpawnError::Unknown(self.config.name.clone(), e.to_string()))?;

        let pid = unsafe {
            host::fork_exec(
                host,
                &resolved,
                &argv,
                &self.config.environment,
                &pipes,
                self.config.redirect_stderr,
                self.config.uid,
            )
        }
        .map_err(|e| SpawnError::Unknown(self.config.name.clone(), e.to_string()))?;

        dispatch::close_child_pipes(&pipes);
        self.pipes = Some(pipes);
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        Ok(pid)
    }

    /// Records a failed start attempt and moves STARTING/RUNNING into
    /// BACKOFF. Never goes straight to FATAL; `transition()` is the only
    /// place that decides the retries are exhausted.
    fn enter_backoff(&mut self, bus: &mut EventBus, now: Instant) {
        let delay = self.backoff.fail(now);
        self.delay = Some(now + delay);
        self.change_state(ProcessState::Backoff, bus);
    }

    /// BACKOFF → FATAL: the supervisor gives up on the process. Clears the
    /// retry bookkeeping and marks it as stopped by the system rather than
    /// by an operator.
    fn fatal(&mut self, bus: &mut EventBus) {
        self.delay = None;
        self.backoff.reset();
        self.system_stop = true;
        self.change_state(ProcessState::Fatal, bus);
    }

    /// Called by the group's `stop_all` for a process still in BACKOFF: it
    /// has no running child to signal, so it's given up on outright instead.
    /// A no-op outside BACKOFF.
    pub fn give_up(&mut self, bus: &mut EventBus) {
        if self.state == ProcessState::Backoff {
            self.fatal(bus);
        }
    }

    /// Sends a raw signal to the running child, without changing state.
    pub fn kill(&self, host: &dyn Host, sig: Signal) -> Result<(), KillError> {
        let pid = self
            .pid
            .ok_or_else(|| KillError::NotRunning(self.config.name.clone()))?;
        host.kill(pid as u32, sig)
            .map_err(|e| KillError::Unknown(self.config.name.clone(), pid as u32, e.to_string()))
    }

    /// Administrative stop: sends `stopsignal`, transitions to STOPPING
    /// (from STARTING or RUNNING), and remembers that the eventual `finish()`
    /// was requested rather than unexpected.
    pub fn stop(&mut self, host: &dyn Host, bus: &mut EventBus) -> Result<(), KillError> {
        if !matches!(self.state, ProcessState::Starting | ProcessState::Running) {
            return Ok(());
        }
        self.drain();
        self.kill(host, self.config.stopsignal)?;
        self.administrative_stop = true;
        self.stopping_since = Some(std::time::Instant::now());
        self.change_state(ProcessState::Stopping, bus);
        Ok(())
    }

    /// Escalates to SIGKILL; called by the group once `stopwaitsecs` has
    /// elapsed since `stop()` without the child exiting.
    pub fn kill_undead(&self, host: &dyn Host) -> Result<(), KillError> {
        self.kill(host, Signal::SIGKILL)
    }

    /// `true` once `stop()` was called at least `stopwaitsecs` ago and the
    /// child still hasn't been reaped, i.e. it ignored `stopsignal`.
    pub fn is_undead(&self, now: Instant) -> bool {
        self.state == ProcessState::Stopping
            && self
                .stopping_since
                .is_some_and(|since| now.duration_since(since) >= Duration::from_secs(self.config.stopwaitsecs))
    }

    /// Reports the child has exited or been killed, reaped by the external
    /// reactor's `waitpid`. Drives STARTING/RUNNING/STOPPING to their
    /// terminal states per the outcome.
    ///
    /// Classifies the exit the way the original source does: `tooquickly`
    /// (died before `startsecs` elapsed), `badexit` (exit code outside
    /// `exitcodes`, or killed by signal), `expected` (neither). An expected
    /// exit seen while still in STARTING is tolerated: this is the
    /// STARTING→RUNNING→EXITED jump, since the caller's `transition()` tick
    /// never got a chance to promote it to RUNNING first.
    pub fn finish(&mut self, bus: &mut EventBus, status: ExitStatus, now: Instant) {
        if let Some(pipes) = self.pipes.take() {
            dispatch::close_parent_pipes(&pipes);
        }
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        self.pid = None;

        if self.state == ProcessState::Stopping {
            self.administrative_stop = false;
            self.stopping_since = None;
            self.delay = None;
            self.exitstatus = Some(status);
            self.change_state(ProcessState::Stopped, bus);
            return;
        }

        let tooquickly = self
            .laststart
            .is_some_and(|start| now.duration_since(start) < Duration::from_secs(self.config.startsecs));
        let badexit = match status {
            ExitStatus::Code(code) => !self.config.exitcodes.contains(&code),
            ExitStatus::Signaled(_) => true,
        };
        let expected = !tooquickly && !badexit;

        if expected {
            self.delay = None;
            self.backoff.reset();
            self.exitstatus = Some(status);
            if self.state == ProcessState::Starting {
                self.change_state(ProcessState::Running, bus);
            }
            self.change_state(ProcessState::Exited, bus);
        } else {
            self.exitstatus = None;
            let delay = self.backoff.fail(now);
            self.delay = Some(now + delay);
            if tooquickly {
                self.spawnerr = Some("exited too quickly (process log may have details)".to_string());
                self.change_state(ProcessState::Backoff, bus);
            } else {
                self.spawnerr = Some(format!("bad exit status {status:?}"));
                self.change_state(ProcessState::Exited, bus);
            }
        }
    }

    /// Cooperative tick: the only two transitions a process drives on its
    /// own, without an external spawn/finish call. BACKOFF→STARTING and
    /// EXITED→STARTING retries are not decided here; they belong to the
    /// owning group's `start_necessary`, which can see `autostart`/
    /// `autorestart` and order retries by priority.
    pub fn transition(&mut self, bus: &mut EventBus, now: Instant) {
        match self.state {
            ProcessState::Starting => {
                if let Some(start) = self.laststart {
                    if now.duration_since(start) >= Duration::from_secs(self.config.startsecs) {
                        self.delay = None;
                        self.backoff.reset();
                        self.change_state(ProcessState::Running, bus);
                    }
                }
            }
            ProcessState::Backoff => {
                if self.backoff.exhausted() {
                    self.fatal(bus);
                }
            }
            _ => {}
        }
    }

    /// Whether `stop()` was requested for the process currently tearing down.
    pub fn administrative_stop(&self) -> bool {
        self.administrative_stop
    }

    /// Appends `bytes` to the stdin dispatcher's buffer, for the external
    /// reactor to drain on the next writable-fd notification. Used by the
    /// listener pool to hand an envelope to a listener's stdin.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), DispatchError> {
        if self.pid.is_none() || self.state == ProcessState::Stopping {
            return Err(DispatchError::PipeClosed);
        }
        match &mut self.stdin {
            Some(Dispatcher::Input(input)) => {
                input.append(bytes);
                Ok(())
            }
            _ => Err(DispatchError::PipeClosed),
        }
    }

    /// Flushes the stdin dispatcher's pending buffer. A no-op here since the
    /// actual non-blocking write is owned by the external reactor; called at
    /// the top of `stop()` in the original source so nothing is lost before
    /// `stopsignal` is sent.
    pub fn drain(&mut self) {
        if let Some(Dispatcher::Input(input)) = &mut self.stdin {
            input.input_buffer.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn force_state_for_test(&mut self, state: ProcessState) {
        self.state = state;
    }

    #[cfg(test)]
    pub(crate) fn set_delay_for_test(&mut self, delay: Option<Instant>) {
        self.delay = delay;
    }

    #[cfg(test)]
    pub(crate) fn backoff_tries_for_test(&self) -> u32 {
        self.backoff.tries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use rstest::rstest;
    use std::sync::{Arc, Mutex};

    struct FakeHost {
        executables: Vec<String>,
        killed: Arc<Mutex<Vec<(u32, Signal)>>>,
    }

    impl Host for FakeHost {
        fn is_executable(&self, path: &str) -> bool {
            self.executables.iter().any(|p| p == path)
        }
        fn get_path(&self) -> Vec<String> {
            vec!["/bin".to_string()]
        }
        fn kill(&self, pid: u32, sig: Signal) -> Result<(), HostError> {
            self.killed.lock().unwrap().push((pid, sig));
            Ok(())
        }
        fn drop_privileges(&self, _uid: u32) -> Option<String> {
            None
        }
        fn close_fds_from(&self, _from: i32, _minfds: i32) {}
    }

    #[test]
    fn spawn_rejects_unresolvable_program() {
        let host = FakeHost {
            executables: vec![],
            killed: Arc::new(Mutex::new(Vec::new())),
        };
        let mut bus = EventBus::new();
        let mut proc = Subprocess::new(Config::new("ghost", "wrong-command"));
        let now = Instant::now();
        let err = proc.spawn(&host, &mut bus, now);
        assert!(matches!(err, Err(SpawnError::ProgramNotFound(_))));
        assert_eq!(proc.state(), ProcessState::Backoff);
        assert_eq!(proc.backoff.tries(), 1);
        assert!(proc.spawnerr().is_some());
        assert_eq!(proc.delay, Some(now + Duration::from_secs(1)));
    }

    #[rstest]
    #[case(ProcessState::Starting, ProcessState::Backoff)]
    fn finish_during_starting_enters_backoff(
        #[case] starting: ProcessState,
        #[case] expected: ProcessState,
    ) {
        let mut proc = Subprocess::new(Config::new("flaky", "/bin/flaky"));
        let now = Instant::now();
        proc.state = starting;
        proc.pid = Some(42);
        proc.laststart = Some(now);
        let mut bus = EventBus::new();
        proc.finish(&mut bus, ExitStatus::Code(1), now);
        assert_eq!(proc.state(), expected);
        assert_eq!(proc.backoff.tries(), 1);
        assert!(proc.spawnerr().is_some());
    }

    #[test]
    fn finish_during_starting_goes_fatal_after_retries_exhausted_via_transition() {
        let mut cfg = Config::new("flaky", "/bin/flaky");
        cfg.startretries = 1;
        let mut proc = Subprocess::new(cfg);
        let mut bus = EventBus::new();
        let now = Instant::now();

        proc.state = ProcessState::Starting;
        proc.pid = Some(1);
        proc.laststart = Some(now);
        proc.finish(&mut bus, ExitStatus::Code(1), now);
        assert_eq!(proc.state(), ProcessState::Backoff);

        proc.state = ProcessState::Starting;
        proc.pid = Some(2);
        proc.laststart = Some(now);
        proc.finish(&mut bus, ExitStatus::Code(1), now);
        assert_eq!(proc.state(), ProcessState::Backoff);
        assert!(!proc.system_stop());

        // finish() never reaches FATAL directly; only transition() does,
        // once it observes the retries are exhausted.
        proc.transition(&mut bus, now);
        assert_eq!(proc.state(), ProcessState::Fatal);
        assert!(proc.system_stop());
        assert_eq!(proc.delay, None);
    }

    #[test]
    fn finish_during_starting_tolerates_an_expected_quick_exit() {
        let mut cfg = Config::new("oneshot", "/bin/oneshot");
        cfg.startsecs = 0;
        let mut proc = Subprocess::new(cfg);
        let mut bus = EventBus::new();
        let now = Instant::now();
        proc.state = ProcessState::Starting;
        proc.pid = Some(1);
        proc.laststart = Some(now);

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe(crate::event::EventKind::ProcessStateChange, move |e| {
            s.lock().unwrap().push(e.name());
        });

        proc.finish(&mut bus, ExitStatus::Code(0), now);

        assert_eq!(proc.state(), ProcessState::Exited);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &["RunningFromStartingEvent", "ExitedFromRunningEvent"]
        );
        assert!(proc.spawnerr().is_none());
    }

    #[test]
    fn finish_during_stopping_goes_stopped() {
        let mut proc = Subprocess::new(Config::new("svc", "/bin/svc"));
        let mut bus = EventBus::new();
        proc.state = ProcessState::Stopping;
        proc.pid = Some(7);
        proc.administrative_stop = true;
        proc.finish(&mut bus, ExitStatus::Signaled(15), Instant::now());
        assert_eq!(proc.state(), ProcessState::Stopped);
        assert!(!proc.administrative_stop());
    }

    #[test]
    fn transition_promotes_starting_to_running_after_startsecs() {
        let mut cfg = Config::new("svc", "/bin/svc");
        cfg.startsecs = 2;
        let mut proc = Subprocess::new(cfg);
        let mut bus = EventBus::new();
        let t0 = Instant::now();
        proc.state = ProcessState::Starting;
        proc.laststart = Some(t0);

        proc.transition(&mut bus, t0 + Duration::from_secs(1));
        assert_eq!(proc.state(), ProcessState::Starting);

        proc.transition(&mut bus, t0 + Duration::from_secs(2));
        assert_eq!(proc.state(), ProcessState::Running);
    }

    #[test]
    fn transition_sends_backoff_to_fatal_once_retries_are_exhausted() {
        let mut cfg = Config::new("flaky", "/bin/flaky");
        cfg.startretries = 0;
        let mut proc = Subprocess::new(cfg);
        let mut bus = EventBus::new();
        let now = Instant::now();
        proc.state = ProcessState::Backoff;
        proc.backoff.fail(now);

        proc.transition(&mut bus, now);
        assert_eq!(proc.state(), ProcessState::Fatal);
    }

    #[test]
    fn stop_sends_stopsignal_and_enters_stopping() {
        let killed = Arc::new(Mutex::new(Vec::new()));
        let host = FakeHost {
            executables: vec![],
            killed: killed.clone(),
        };
        let mut proc = Subprocess::new(Config::new("svc", "/bin/svc"));
        let mut bus = EventBus::new();
        proc.state = ProcessState::Running;
        proc.pid = Some(99);

        proc.stop(&host, &mut bus).unwrap();
        assert_eq!(proc.state(), ProcessState::Stopping);
        assert_eq!(killed.lock().unwrap().as_slice(), &[(99, Signal::SIGTERM)]);
    }

    #[test]
    fn kill_wraps_a_failing_host_call() {
        use crate::host::MockHost;

        let mut host = MockHost::new();
        host.expect_kill()
            .times(1)
            .returning(|_, _| Err(HostError::Io(std::io::Error::from_raw_os_error(3))));

        let mut proc = Subprocess::new(Config::new("svc", "/bin/svc"));
        proc.pid = Some(123);

        assert_matches::assert_matches!(
            proc.kill(&host, Signal::SIGTERM),
            Err(KillError::Unknown(_, 123, _))
        );
    }

    #[test]
    fn kill_on_a_never_started_process_is_not_running() {
        let host = crate::host::MockHost::new();
        let proc = Subprocess::new(Config::new("svc", "/bin/svc"));
        assert_matches::assert_matches!(proc.kill(&host, Signal::SIGTERM), Err(KillError::NotRunning(_)));
    }

    #[test]
    fn write_is_rejected_once_the_process_has_no_pid() {
        let mut proc = Subprocess::new(Config::new("svc", "/bin/svc"));
        assert_matches::assert_matches!(proc.write(b"hello"), Err(DispatchError::PipeClosed));
    }
}
