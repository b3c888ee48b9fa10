//! A named, priority-ordered roster of [`Subprocess`]es. Mirrors
//! `ProcessGroupBase`/`ProcessGroup` from the original source: start order
//! is ascending priority, stop order is descending, and both use a stable
//! sort so same-priority processes keep their configured order.

use std::time::Instant;

use tracing::info;

use crate::config::GroupConfig;
use crate::dispatch::Dispatcher;
use crate::event::EventBus;
use crate::host::Host;
use crate::process::{ProcessState, Subprocess};

pub struct ProcessGroup {
    name: String,
    processes: Vec<Subprocess>,
}

impl ProcessGroup {
    pub fn new(config: GroupConfig) -> Self {
        let processes = config
            .process_configs
            .into_iter()
            .map(Subprocess::new)
            .collect();
        ProcessGroup {
            name: config.name,
            processes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processes(&self) -> &[Subprocess] {
        &self.processes
    }

    pub fn process_mut(&mut self, name: &str) -> Option<&mut Subprocess> {
        self.processes.iter_mut().find(|p| p.name() == name)
    }

    fn ascending_by_priority(&mut self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.processes.len()).collect();
        idx.sort_by_key(|&i| self.processes[i].priority());
        idx
    }

    fn descending_by_priority(&mut self) -> Vec<usize> {
        let mut idx = self.ascending_by_priority();
        idx.reverse();
        idx
    }

    /// Spawns every process eligible to (re)start, in ascending priority
    /// order: STOPPED only on its very first ever start and only with
    /// `autostart`; EXITED only with `autorestart`; BACKOFF only once its
    /// retry delay has elapsed. FATAL is never auto-spawned, FATAL→STARTING
    /// only happens on an operator's explicit request. Called once at group
    /// construction time and again on every reactor tick.
    pub fn start_necessary(&mut self, host: &dyn Host, bus: &mut EventBus, now: Instant) {
        for i in self.ascending_by_priority() {
            let proc = &mut self.processes[i];
            let eligible = match proc.state() {
                ProcessState::Stopped => proc.never_started() && proc.autostart(),
                ProcessState::Exited => proc.autorestart(),
                ProcessState::Backoff => proc.retry_ready(now),
                _ => false,
            };
            if eligible {
                if let Err(e) = proc.spawn(host, bus, now) {
                    tracing::warn!(process = proc.name(), error = %e, "failed to start");
                }
            }
        }
    }

    /// Sends `stopsignal` to every STARTING/RUNNING process, descending
    /// priority order (the reverse of start order, so dependents generally
    /// stop before what they depend on). A process still in BACKOFF is given
    /// up on outright rather than sent a signal it can't receive.
    pub fn stop_all(&mut self, host: &dyn Host, bus: &mut EventBus) {
        for i in self.descending_by_priority() {
            let proc = &mut self.processes[i];
            proc.give_up(bus);
            if let Err(e) = proc.stop(host, bus) {
                tracing::warn!(process = proc.name(), error = %e, "failed to stop");
            }
        }
    }

    /// Processes stuck in STOPPING past their `stopwaitsecs` grace period.
    pub fn get_undead(&self, now: Instant) -> Vec<&Subprocess> {
        self.processes.iter().filter(|p| p.is_undead(now)).collect()
    }

    /// Escalates every undead process to SIGKILL.
    pub fn kill_undead(&mut self, host: &dyn Host, now: Instant) {
        for proc in self.processes.iter_mut() {
            if proc.is_undead(now) {
                info!(process = proc.name(), "escalating to SIGKILL, ignored stopsignal");
                if let Err(e) = proc.kill_undead(host) {
                    tracing::warn!(process = proc.name(), error = %e, "SIGKILL failed");
                }
            }
        }
    }

    /// Cooperative tick: escalates undead processes first, then advances
    /// every process's own `transition()` (STARTING→RUNNING promotion,
    /// BACKOFF→FATAL once retries are exhausted).
    pub fn transition(&mut self, host: &dyn Host, bus: &mut EventBus, now: Instant) {
        self.kill_undead(host, now);
        for proc in self.processes.iter_mut() {
            proc.transition(bus, now);
        }
    }

    /// Processes currently waiting on a delay: STARTING (waiting for
    /// `startsecs`) or BACKOFF (waiting for its retry delay). Used by the
    /// reactor to size its next poll timeout instead of busy-looping.
    pub fn get_delay_processes(&self) -> Vec<&Subprocess> {
        self.processes
            .iter()
            .filter(|p| p.state() == ProcessState::Starting || p.state() == ProcessState::Backoff)
            .collect()
    }

    /// The `(process name, dispatcher)` pairs across every process's
    /// stdin/stdout/stderr, for the reactor to poll for I/O readiness.
    pub fn get_dispatchers(&self) -> Vec<(&str, &Dispatcher)> {
        let mut dispatchers = Vec::new();
        for proc in &self.processes {
            dispatchers.extend(proc.dispatchers().map(|d| (proc.name(), d)));
        }
        dispatchers
    }
}
