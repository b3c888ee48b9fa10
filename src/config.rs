//! Configuration consumed by the core. Populating these structs from a
//! config file or RPC surface is the job of an external loader (out of
//! scope here); this crate only defines their shape.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Immutable per-process configuration, mirroring `ProcessConfig` in the
/// original source's `ProcessConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Stable identifier used as the `HashMap` key in [`crate::group::ProcessGroup`].
    pub name: String,
    /// Shell-style command string, tokenized by [`crate::host::tokenize`].
    pub command: String,
    /// Minimum uptime, in seconds, before the process is considered successfully running.
    pub startsecs: u64,
    /// Number of consecutive failed starts tolerated before entering FATAL.
    pub startretries: u32,
    /// Signal sent on administrative `stop()`.
    #[cfg(target_family = "unix")]
    #[serde(with = "signal_serde")]
    pub stopsignal: nix::sys::signal::Signal,
    /// Grace period between `stopsignal` and the SIGKILL escalation.
    pub stopwaitsecs: u64,
    /// Whether the process is spawned automatically at group construction time.
    pub autostart: bool,
    /// Whether an EXITED process is respawned automatically.
    pub autorestart: bool,
    /// Exit codes considered "clean" / expected.
    pub exitcodes: HashSet<i32>,
    /// Merge stderr into the stdout channel.
    pub redirect_stderr: bool,
    /// Environment overlay, applied on top of the host environment (overlay wins).
    pub environment: HashMap<String, String>,
    /// Drop privileges to this uid before exec, if set.
    pub uid: Option<u32>,
    /// Start/stop ordering key, ascending for start, descending for stop.
    pub priority: i32,
}

#[cfg(target_family = "unix")]
mod signal_serde {
    use nix::sys::signal::Signal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(sig: &Signal, s: S) -> Result<S::Ok, S::Error> {
        (*sig as i32).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Signal, D::Error> {
        let raw = i32::deserialize(d)?;
        Signal::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl Config {
    /// Convenience constructor used throughout the test suite; production
    /// configs come from the (out-of-scope) loader.
    #[cfg(target_family = "unix")]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Config {
            name: name.into(),
            command: command.into(),
            startsecs: 1,
            startretries: 3,
            stopsignal: nix::sys::signal::Signal::SIGTERM,
            stopwaitsecs: 10,
            autostart: true,
            autorestart: true,
            exitcodes: HashSet::from([0]),
            redirect_stderr: false,
            environment: HashMap::new(),
            uid: None,
            priority: 999,
        }
    }
}

/// Ordered roster of [`Config`]s sharing a priority, plus factory hooks the
/// core calls through (`make_process` is implicit: [`crate::group::ProcessGroup::new`]
/// builds one [`crate::process::Subprocess`] per entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub process_configs: Vec<Config>,
}

/// Extra configuration for an [`crate::listener::EventListenerPool`]: the
/// bounded buffer size and the set of event kinds it subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventListenerPoolConfig {
    pub group: GroupConfig,
    pub buffer_size: usize,
    pub pool_events: Vec<crate::event::EventKind>,
}
