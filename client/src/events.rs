//! Named event bus (component C9).
//!
//! Callbacks fire synchronously on the pool manager's event loop thread,
//! never from a worker thread, so observers never need their own locking.
use std::collections::HashMap;
use std::sync::Arc;

use svnet_common::{Height, ServerKey};

use crate::state::ConnectionStatus;

/// Which event a callback wants to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `connection_status` changed.
    Status,
    /// The locally longest fork's height changed.
    Updated,
    /// The default interface's `server.banner` changed.
    Banner,
    /// The known server set changed (new peer discovered, one removed).
    Servers,
    /// An interface connected, disconnected, or was blacklisted.
    Interfaces,
    /// Pass-through for higher layers: a checkpoint-anchored header was
    /// freshly verified.
    Verified,
    /// Pass-through for higher layers: the blockchain object itself was
    /// replaced (e.g. after a reorg past the previous longest fork).
    BlockchainUpdated,
}

/// One fired event, carrying whatever payload its kind implies.
#[derive(Debug, Clone)]
pub enum Event {
    /// See [`EventKind::Status`].
    Status(ConnectionStatus),
    /// See [`EventKind::Updated`].
    Updated { height: Height },
    /// See [`EventKind::Banner`].
    Banner(String),
    /// See [`EventKind::Servers`].
    Servers(Vec<ServerKey>),
    /// See [`EventKind::Interfaces`].
    Interfaces(Vec<ServerKey>),
    /// See [`EventKind::Verified`].
    Verified { height: Height },
    /// See [`EventKind::BlockchainUpdated`].
    BlockchainUpdated,
}

impl Event {
    /// The [`EventKind`] this event belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Status(_) => EventKind::Status,
            Event::Updated { .. } => EventKind::Updated,
            Event::Banner(_) => EventKind::Banner,
            Event::Servers(_) => EventKind::Servers,
            Event::Interfaces(_) => EventKind::Interfaces,
            Event::Verified { .. } => EventKind::Verified,
            Event::BlockchainUpdated => EventKind::BlockchainUpdated,
        }
    }
}

/// A registered observer. Cloned into every [`EventKind`] it subscribed
/// to, so a single registration spans several event kinds.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque handle returned by [`EventBus::register_callback`], used to
/// unregister later.
pub type CallbackId = u64;

/// Named event → callback-list dispatch.
pub struct EventBus {
    next_id: CallbackId,
    by_kind: HashMap<EventKind, Vec<(CallbackId, Callback)>>,
    kinds_by_id: HashMap<CallbackId, Vec<EventKind>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Construct an empty bus.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            by_kind: HashMap::new(),
            kinds_by_id: HashMap::new(),
        }
    }

    /// Register `callback` for every kind in `events`. Returns an id that
    /// can later be passed to [`Self::unregister_callback`].
    pub fn register_callback(&mut self, events: &[EventKind], callback: Callback) -> CallbackId {
        let id = self.next_id;
        self.next_id += 1;
        for kind in events {
            self.by_kind
                .entry(*kind)
                .or_default()
                .push((id, callback.clone()));
        }
        self.kinds_by_id.insert(id, events.to_vec());
        id
    }

    /// Remove every registration made under `id`.
    pub fn unregister_callback(&mut self, id: CallbackId) {
        if let Some(kinds) = self.kinds_by_id.remove(&id) {
            for kind in kinds {
                if let Some(list) = self.by_kind.get_mut(&kind) {
                    list.retain(|(cb_id, _)| *cb_id != id);
                }
            }
        }
    }

    /// Invoke every callback registered for `event`'s kind, synchronously,
    /// in registration order.
    pub fn trigger_callback(&self, event: Event) {
        if let Some(list) = self.by_kind.get(&event.kind()) {
            for (_, callback) in list {
                callback(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_only_to_registered_kind() {
        let mut bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.register_callback(&[EventKind::Updated], Arc::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.trigger_callback(Event::Banner("hello".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.trigger_callback(Event::Updated { height: 5 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_stops_future_dispatch() {
        let mut bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let id = bus.register_callback(&[EventKind::Status], Arc::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.trigger_callback(Event::Status(ConnectionStatus::Connected));
        bus.unregister_callback(id);
        bus.trigger_callback(Event::Status(ConnectionStatus::Connected));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_registration_can_span_several_kinds() {
        let mut bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.register_callback(
            &[EventKind::Status, EventKind::Interfaces],
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.trigger_callback(Event::Status(ConnectionStatus::Disconnected));
        bus.trigger_callback(Event::Interfaces(vec![]));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
