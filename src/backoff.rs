//! Restart backoff. The teacher's `restart_policy.rs` supports pluggable
//! fixed/linear/exponential strategies; the fixed formula below
//! (`next retry at now + tries seconds`) is the only one this crate needs,
//! so the strategy enum is dropped and `Backoff` just tracks `tries`
//! directly, the way the original source's `Subprocess.backoff` counter does.

use std::time::{Duration, Instant};

/// Tracks consecutive restart attempts for one [`crate::process::Subprocess`]
/// and computes the delay before the next one is allowed.
#[derive(Debug, Clone)]
pub struct Backoff {
    tries: u32,
    max_retries: u32,
    last_retry: Option<Instant>,
}

impl Backoff {
    pub fn new(max_retries: u32) -> Self {
        Self {
            tries: 0,
            max_retries,
            last_retry: None,
        }
    }

    /// Records a failed start attempt and returns the delay to wait before
    /// retrying. Always increments the counter, even past `max_retries`;
    /// callers check `exhausted()` separately to decide whether to give up.
    pub fn fail(&mut self, now: Instant) -> Duration {
        self.tries += 1;
        self.last_retry = Some(now);
        Duration::from_secs(self.tries as u64)
    }

    /// Resets the counter, called once a process has stayed RUNNING past
    /// `startsecs` and is considered a genuine success rather than a retry.
    pub fn reset(&mut self) {
        self.tries = 0;
        self.last_retry = None;
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn exhausted(&self) -> bool {
        self.tries > self.max_retries
    }

    /// Whether enough time has elapsed since the last failure to attempt a
    /// restart, given the `k`-th-failure delay of `k` seconds.
    pub fn ready(&self, now: Instant) -> bool {
        match self.last_retry {
            None => true,
            Some(last) => now.duration_since(last) >= Duration::from_secs(self.tries as u64),
        }
    }
}
