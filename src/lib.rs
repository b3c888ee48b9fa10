//! A cooperative, single-threaded process supervisor core: spawns and
//! restarts a static roster of child processes with restart backoff, and
//! fans their lifecycle events out through a bounded event-listener pool.
//!
//! This crate owns the state machines (per-process and per-group) and the
//! listener wire format. It deliberately does not own a config file loader,
//! a logging sink, an I/O-dispatch reactor, or a CLI/RPC surface, those are
//! external collaborators that drive this core by calling `spawn`/`finish`/
//! `transition` on a tick or on I/O readiness.

pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod group;
pub mod host;
pub mod listener;
pub mod process;
