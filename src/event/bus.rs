use super::{Event, EventKind};

/// Synchronous, in-process publish/subscribe bus.
///
/// `subscribe`/`notify` can be swapped for an external message bus; this is
/// the minimal concrete implementation the core links against so groups can
/// be constructed and exercised standalone. Notification is synchronous and
/// reentrant-free: `notify` runs every matching subscriber to completion
/// before returning, matching the single-threaded, cooperative supervision
/// model this crate implements.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<(EventKind, Box<dyn Fn(&Event) + Send>)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `callback` to `kind` and all its subclasses (e.g.
    /// subscribing to `ProcessCommunication` also delivers `Stdout`/`Stderr`
    /// events).
    pub fn subscribe<F>(&mut self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) + Send + 'static,
    {
        self.subscribers.push((kind, Box::new(callback)));
    }

    /// Delivers `event` to every subscriber whose registered kind is an
    /// ancestor of (or equal to) the event's own kind.
    pub fn notify(&self, event: &Event) {
        let kind = event.kind();
        for (subscribed_kind, callback) in &self.subscribers {
            if kind.is_a(*subscribed_kind) {
                callback(event);
            }
        }
    }
}
