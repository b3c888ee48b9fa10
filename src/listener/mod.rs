//! The event-listener pool: a [`ProcessGroup`] of listener processes plus a
//! bounded FIFO event buffer, mirroring `EventListenerPool` in the original
//! source. Dispatch is modeled without the actual stdin write (owned by the
//! out-of-scope I/O-dispatch reactor): [`EventListenerPool::notify`] decides
//! *whether* and *to whom* an event would be written, and
//! [`envelope::build_envelope`] is the wire format that write would use.

mod envelope;

pub use envelope::{build_envelope, parse_envelope};

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tracing::{info, warn};

use crate::config::EventListenerPoolConfig;
use crate::event::{Event, EventBus, EventKind};
use crate::group::ProcessGroup;
use crate::host::Host;

/// A listener's handshake state, reported over its stdout (`READY`,
/// `RESULT <len>\n<payload>`, `ACK`/`FAIL`). Tracked per-listener so
/// dispatch only targets listeners that have said `READY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unknown,
    Acknowledged,
    Ready,
    Busy,
}

pub struct EventListenerPool {
    group: ProcessGroup,
    buffer: VecDeque<Event>,
    buffer_size: usize,
    pool_events: Vec<EventKind>,
    listener_states: HashMap<String, ListenerState>,
}

impl EventListenerPool {
    pub fn new(config: EventListenerPoolConfig) -> Self {
        let group = ProcessGroup::new(config.group);
        let listener_states = group
            .processes()
            .iter()
            .map(|p| (p.name().to_string(), ListenerState::Unknown))
            .collect();
        EventListenerPool {
            group,
            buffer: VecDeque::new(),
            buffer_size: config.buffer_size,
            pool_events: config.pool_events,
            listener_states,
        }
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut ProcessGroup {
        &mut self.group
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether this pool subscribes to `event`'s class at all. An empty
    /// `pool_events` list means "everything".
    fn accepts(&self, event: &Event) -> bool {
        self.pool_events.is_empty() || self.pool_events.iter().any(|k| event.kind().is_a(*k))
    }

    fn ready_listener(&self) -> Option<String> {
        self.listener_states
            .iter()
            .find(|(_, state)| **state == ListenerState::Ready)
            .map(|(name, _)| name.clone())
    }

    /// Marks `name` busy and appends its envelope to the listener's stdin
    /// dispatcher buffer, for the external reactor to flush non-blockingly.
    fn dispatch_to(&mut self, name: &str, event: &Event) {
        self.listener_states
            .insert(name.to_string(), ListenerState::Busy);
        let envelope = match build_envelope(event) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(listener = name, error = %e, "could not serialize event for dispatch");
                return;
            }
        };
        match self.group.process_mut(name) {
            Some(proc) => match proc.write(envelope.as_bytes()) {
                Ok(()) => info!(listener = name, bytes = envelope.len(), event = event.name(), "dispatched"),
                Err(e) => warn!(listener = name, error = %e, "listener stdin unavailable"),
            },
            None => warn!(listener = name, "no such listener process in pool"),
        }
    }

    /// Evicts the oldest buffered event if full, notifying `bus` of the
    /// overflow, then appends `event`. An overflow event is never itself
    /// buffered, it only exists to tell subscribers something was dropped.
    fn buffer_event(&mut self, bus: &mut EventBus, event: Event) {
        if matches!(event, Event::EventBufferOverflow { .. }) {
            return;
        }
        if self.buffer.len() >= self.buffer_size {
            if let Some(discarded) = self.buffer.pop_front() {
                warn!(group = self.group.name(), discarded = discarded.name(), "event buffer overflow");
                bus.notify(&Event::EventBufferOverflow {
                    group_name: self.group.name().to_string(),
                    discarded_event_name: discarded.name(),
                });
            }
        }
        self.buffer.push_back(event);
    }

    /// Entry point for every event this pool might care about: dispatches
    /// immediately to a READY listener, or buffers it (possibly evicting the
    /// oldest buffered event) if none is available.
    pub fn notify(&mut self, bus: &mut EventBus, event: Event) {
        if !self.accepts(&event) {
            return;
        }
        match self.ready_listener() {
            Some(name) => self.dispatch_to(&name, &event),
            None => self.buffer_event(bus, event),
        }
    }

    /// Called when a listener announces `READY` on its stdout. Immediately
    /// drains the oldest buffered event to it, if any.
    pub fn acknowledge(&mut self, name: &str) {
        self.listener_states
            .insert(name.to_string(), ListenerState::Ready);
        if let Some(event) = self.buffer.pop_front() {
            self.dispatch_to(name, &event);
        }
    }

    /// A listener sent `RESULT` but the supervisor rejected it (bad length,
    /// malformed payload). The event is rebuffered at the tail, in arrival
    /// order, and the listener is marked READY again. Matches
    /// `handle_rejected` in the original source, which only rebuffers and
    /// never re-emits a rejection notice of its own.
    pub fn handle_rejected(&mut self, bus: &mut EventBus, name: &str, event: Event) {
        self.listener_states
            .insert(name.to_string(), ListenerState::Ready);
        self.buffer_event(bus, event);
    }

    /// Cooperative tick: escalates undead listeners, advances every
    /// listener's own `transition()`, then resends the oldest buffered
    /// event (if any) without rebuffering it on success, so buffer order
    /// among the rest is preserved. A failed resend goes back to the front,
    /// not the tail, so it's retried first next time.
    pub fn transition(&mut self, host: &dyn Host, bus: &mut EventBus, now: Instant) {
        self.group.transition(host, bus, now);

        let Some(event) = self.buffer.pop_front() else {
            return;
        };
        match self.ready_listener() {
            Some(name) => self.dispatch_to(&name, &event),
            None => self.buffer.push_front(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GroupConfig};

    fn pool(buffer_size: usize, pool_events: Vec<EventKind>) -> EventListenerPool {
        EventListenerPool::new(EventListenerPoolConfig {
            group: GroupConfig {
                name: "listeners".into(),
                process_configs: vec![Config::new("listener1", "/bin/listener")],
            },
            buffer_size,
            pool_events,
        })
    }

    fn overflow_event(id: &str) -> Event {
        Event::ProcessCommunication {
            process_name: id.into(),
            channel: crate::event::Channel::Stdout,
            data: "x".into(),
        }
    }

    #[test]
    fn buffers_when_no_listener_is_ready() {
        let mut pool = pool(5, vec![]);
        let mut bus = EventBus::new();
        pool.notify(&mut bus, overflow_event("a"));
        assert_eq!(pool.buffered_len(), 1);
    }

    #[test]
    fn dispatches_immediately_to_a_ready_listener() {
        let mut pool = pool(5, vec![]);
        let mut bus = EventBus::new();
        pool.acknowledge("listener1");
        pool.notify(&mut bus, overflow_event("a"));
        assert_eq!(pool.buffered_len(), 0);
    }

    #[test]
    fn overflow_evicts_oldest_and_notifies() {
        let mut pool = pool(2, vec![]);
        let mut bus = EventBus::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe(EventKind::EventBufferOverflow, move |e| {
            s.lock().unwrap().push(e.name());
        });

        pool.notify(&mut bus, overflow_event("a"));
        pool.notify(&mut bus, overflow_event("b"));
        pool.notify(&mut bus, overflow_event("c"));

        assert_eq!(pool.buffered_len(), 2);
        assert_eq!(seen.lock().unwrap().as_slice(), &["EventBufferOverflowEvent"]);
    }

    #[test]
    fn rejected_event_is_requeued_at_the_tail_and_not_renotified() {
        let mut pool = pool(5, vec![]);
        let mut bus = EventBus::new();
        pool.notify(&mut bus, overflow_event("a"));
        pool.notify(&mut bus, overflow_event("b"));

        let rejections = std::sync::Arc::new(std::sync::Mutex::new(0));
        let r = rejections.clone();
        bus.subscribe(EventKind::EventRejected, move |_| {
            *r.lock().unwrap() += 1;
        });

        pool.handle_rejected(&mut bus, "listener1", overflow_event("rejected"));
        assert_eq!(pool.buffered_len(), 3);
        assert_eq!(*rejections.lock().unwrap(), 0);

        // still in arrival order: "a" was oldest before the rejection, and
        // stays oldest; "rejected" goes to the tail, not the front.
        pool.acknowledge("listener1");
        assert_eq!(pool.buffered_len(), 2);
    }

    #[test]
    fn event_buffer_overflow_is_never_itself_buffered() {
        let mut pool = pool(5, vec![]);
        let mut bus = EventBus::new();
        pool.notify(
            &mut bus,
            Event::EventBufferOverflow {
                group_name: "listeners".into(),
                discarded_event_name: "TICK_60".into(),
            },
        );
        assert_eq!(pool.buffered_len(), 0);
    }

    #[test]
    fn transition_tick_resends_the_oldest_buffered_event() {
        use crate::host::MockHost;

        let mut pool = pool(5, vec![]);
        let mut bus = EventBus::new();
        pool.notify(&mut bus, overflow_event("a"));
        assert_eq!(pool.buffered_len(), 1);

        // Simulate the listener having already announced READY between
        // ticks, without going through acknowledge()'s own immediate drain.
        pool.listener_states
            .insert("listener1".to_string(), ListenerState::Ready);

        let host = MockHost::new();
        pool.transition(&host, &mut bus, Instant::now());
        assert_eq!(pool.buffered_len(), 0);
    }

    #[test]
    fn transition_tick_requeues_at_the_front_when_nothing_is_ready() {
        use crate::host::MockHost;

        let mut pool = pool(5, vec![]);
        let mut bus = EventBus::new();
        pool.notify(&mut bus, overflow_event("a"));

        let host = MockHost::new();
        pool.transition(&host, &mut bus, Instant::now());
        assert_eq!(pool.buffered_len(), 1);
    }

    #[test]
    fn pool_events_filters_unsubscribed_kinds() {
        let mut pool = pool(5, vec![EventKind::SupervisorStateChange]);
        let mut bus = EventBus::new();
        pool.notify(&mut bus, overflow_event("a"));
        assert_eq!(pool.buffered_len(), 0);

        pool.notify(&mut bus, Event::SupervisorStateChange);
        assert_eq!(pool.buffered_len(), 1);
    }
}
