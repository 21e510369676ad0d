//! The network's single piece of shared state (component data model §3).
//!
//! Mutated only from the pool manager's event loop, with one exception:
//! [`NetworkState::callbacks`], `subscriptions`, and `pending_sends` are
//! the fields a [`crate::command::Command`] arriving from another thread
//! ultimately touches — and even those are only ever applied by the loop
//! itself after being drained from the command channel, never mutated
//! directly by a caller thread. A single owner with no locks at all,
//! rather than several locks taken in a fixed order.
use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;

use svnet_common::time::LocalTime;
use svnet_common::ServerKey;
use svnet_net::Interface;

use crate::command::{Callback, CallbackId};

/// Coarse connection state surfaced to the [`crate::events::EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// At least one interface, including the default, is connected.
    Connected,
    /// No interface is up yet, but at least one open is in flight.
    Connecting,
    /// No interface is up and nothing is being attempted right now.
    Disconnected,
}

/// A request sent and not yet answered, tracked so a late response (or a
/// timeout) can find its way back to the right caller.
pub struct UnansweredRequest {
    /// RPC method.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
    /// The callback registered when this request was sent.
    pub callback_id: CallbackId,
    /// When the request was sent, for 30s `synchronous_get`-style
    /// deadlines tracked above the interface's own 20s timeout.
    pub sent_at: LocalTime,
}

/// One caller-supplied batch still waiting to be assigned message ids and
/// handed to an interface. Enqueued by [`crate::command::Command::Send`]
/// from any thread; drained only by the event loop.
pub struct PendingSend {
    /// The requests to send, in order.
    pub messages: Vec<(String, Vec<Value>)>,
    /// The callback id these requests share.
    pub callback_id: CallbackId,
}

/// All mutable state for one running network core.
pub struct NetworkState {
    /// The interface whose responses feed higher layers by default.
    pub default_server: Option<ServerKey>,
    /// Connected sessions.
    pub interfaces: HashMap<ServerKey, Interface>,
    /// Servers with an open in flight.
    pub connecting: HashSet<ServerKey>,
    /// Servers that failed transiently; retried after `SERVER_RETRY_INTERVAL`.
    pub disconnected: HashSet<ServerKey>,
    /// Servers blacklisted for a proof failure or protocol violation;
    /// persisted, never retried automatically.
    pub blacklisted: HashSet<ServerKey>,
    /// Most-recently-used connected servers, MRU-first, capped at 20.
    pub recent: VecDeque<ServerKey>,
    /// Peers learned via `server.peers.subscribe`, keyed by host.
    pub irc_servers: HashMap<String, Vec<ServerKey>>,
    /// `request-index -> callback ids` fan-out list.
    pub subscriptions: HashMap<String, Vec<CallbackId>>,
    /// `request-index -> last response`, populated only for `.subscribe`
    /// methods.
    pub sub_cache: HashMap<String, Value>,
    /// `message_id -> outstanding request`.
    pub unanswered: HashMap<u64, UnansweredRequest>,
    /// Requests queued by callers, not yet dispatched to an interface.
    pub pending_sends: VecDeque<PendingSend>,
    /// Registered event/request callbacks, keyed by the id handed out at
    /// registration time.
    pub callbacks: HashMap<CallbackId, Callback>,
    /// Scripthashes with a live subscription, replayed on
    /// `switch_to_interface`.
    pub subscribed_addresses: HashSet<String>,
    /// Next retry sweep of `disconnected` (every `NODES_RETRY_INTERVAL`).
    pub nodes_retry_time: LocalTime,
    /// Next retry of the user-specified default server.
    pub server_retry_time: LocalTime,
    /// Coarse status surfaced through the event bus.
    pub connection_status: ConnectionStatus,

    next_message_id: u64,
    next_callback_id: CallbackId,
}

/// Cap on [`NetworkState::recent`], matching the persisted format.
pub const RECENT_SERVERS_CAP: usize = 20;

impl Default for NetworkState {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkState {
    /// Construct empty state; no interfaces, nothing persisted yet
    /// applied. The caller (the `node` binary, typically) is responsible
    /// for seeding `recent`/`blacklisted`/`default_server` from a
    /// [`crate::config::PersistedServerState`] before starting the loop.
    pub fn new() -> Self {
        Self {
            default_server: None,
            interfaces: HashMap::new(),
            connecting: HashSet::new(),
            disconnected: HashSet::new(),
            blacklisted: HashSet::new(),
            recent: VecDeque::new(),
            irc_servers: HashMap::new(),
            subscriptions: HashMap::new(),
            sub_cache: HashMap::new(),
            unanswered: HashMap::new(),
            pending_sends: VecDeque::new(),
            callbacks: HashMap::new(),
            subscribed_addresses: HashSet::new(),
            nodes_retry_time: LocalTime::EPOCH,
            server_retry_time: LocalTime::EPOCH,
            connection_status: ConnectionStatus::Disconnected,
            next_message_id: 1,
            next_callback_id: 1,
        }
    }

    /// Allocate the next monotonically increasing message id. A `u64`
    /// counter never wraps within a process lifetime at any plausible
    /// request rate.
    pub fn next_message_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    /// Allocate the next callback registration id.
    pub fn next_callback_id(&mut self) -> CallbackId {
        let id = self.next_callback_id;
        self.next_callback_id += 1;
        id
    }

    /// Push `server` to the front of `recent`, deduplicating and capping
    /// at [`RECENT_SERVERS_CAP`].
    pub fn remember_recent(&mut self, server: ServerKey) {
        self.recent.retain(|s| s != &server);
        self.recent.push_front(server);
        self.recent.truncate(RECENT_SERVERS_CAP);
    }

    /// Whether `server` may be picked for a fresh connection attempt: not
    /// already connected, connecting, transiently disconnected, or
    /// blacklisted.
    pub fn is_eligible(&self, server: &ServerKey) -> bool {
        !self.interfaces.contains_key(server)
            && !self.connecting.contains(server)
            && !self.disconnected.contains(server)
            && !self.blacklisted.contains(server)
    }

    /// Move `server` into `blacklisted`, persistent across restarts, and
    /// drop it from every other set.
    pub fn blacklist(&mut self, server: ServerKey) {
        self.connecting.remove(&server);
        self.disconnected.remove(&server);
        self.interfaces.remove(&server);
        self.blacklisted.insert(server);
    }

    /// Record that an open attempt to `server` is in flight.
    pub fn mark_connecting(&mut self, server: ServerKey) {
        self.connecting.insert(server);
    }

    /// Record a transient failure: drop from `connecting`, add to
    /// `disconnected`.
    pub fn mark_disconnected(&mut self, server: ServerKey) {
        self.connecting.remove(&server);
        self.interfaces.remove(&server);
        self.disconnected.insert(server);
    }

    /// Promote a successfully opened socket into a live interface.
    pub fn promote_interface(&mut self, server: ServerKey, interface: Interface) {
        self.connecting.remove(&server);
        self.disconnected.remove(&server);
        self.remember_recent(server.clone());
        self.interfaces.insert(server, interface);
    }

    /// Tear down `server`'s interface, if any, returning it so the caller
    /// can release any catch-up claim it held.
    pub fn remove_interface(&mut self, server: &ServerKey) -> Option<Interface> {
        self.interfaces.remove(server)
    }

    /// Register `callback_id` under `index`'s fan-out list, at most once
    /// (double-registration is a no-op).
    pub fn register_subscription(&mut self, index: String, callback_id: CallbackId) {
        let list = self.subscriptions.entry(index).or_default();
        if !list.contains(&callback_id) {
            list.push(callback_id);
        }
    }

    /// The callbacks registered for `index`.
    pub fn subscription_callbacks(&self, index: &str) -> &[CallbackId] {
        self.subscriptions.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record the most recent response observed for a subscription index.
    pub fn cache_subscription(&mut self, index: String, value: Value) {
        self.sub_cache.insert(index, value);
    }

    /// The cached value for `index`, if a `.subscribe` response has ever
    /// been observed for it.
    pub fn cached(&self, index: &str) -> Option<&Value> {
        self.sub_cache.get(index)
    }

    /// Remove `callback_id` from every subscription list and from the
    /// registered callback table. Server-side subscriptions are *not*
    /// cancelled; later pushes for an index with no remaining callbacks
    /// are simply discarded by the caller.
    pub fn unsubscribe(&mut self, callback_id: CallbackId) {
        for list in self.subscriptions.values_mut() {
            list.retain(|id| *id != callback_id);
        }
        self.callbacks.remove(&callback_id);
    }

    /// Track a request as outstanding.
    pub fn queue_unanswered(&mut self, message_id: u64, request: UnansweredRequest) {
        self.unanswered.insert(message_id, request);
    }

    /// Remove and return the outstanding request for `message_id`, if any.
    pub fn take_unanswered(&mut self, message_id: u64) -> Option<UnansweredRequest> {
        self.unanswered.remove(&message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svnet_common::Protocol;

    fn key(host: &str) -> ServerKey {
        ServerKey::new(host, 50002, Protocol::Tls)
    }

    #[test]
    fn remember_recent_caps_and_dedupes() {
        let mut state = NetworkState::new();
        for i in 0..25 {
            state.remember_recent(key(&format!("h{i}")));
        }
        assert_eq!(state.recent.len(), RECENT_SERVERS_CAP);
        assert_eq!(state.recent.front().unwrap().host, "h24");
    }

    #[test]
    fn blacklisting_removes_from_every_other_set() {
        let mut state = NetworkState::new();
        let k = key("a");
        state.mark_connecting(k.clone());
        state.blacklist(k.clone());
        assert!(state.blacklisted.contains(&k));
        assert!(!state.connecting.contains(&k));
        assert!(!state.is_eligible(&k));
    }

    #[test]
    fn double_registering_a_subscription_is_idempotent() {
        let mut state = NetworkState::new();
        state.register_subscription("blockchain.scripthash.subscribe:abcd".into(), 1);
        state.register_subscription("blockchain.scripthash.subscribe:abcd".into(), 1);
        assert_eq!(state.subscription_callbacks("blockchain.scripthash.subscribe:abcd").len(), 1);
    }

    #[test]
    fn unsubscribe_removes_from_every_index() {
        let mut state = NetworkState::new();
        state.register_subscription("a".into(), 7);
        state.register_subscription("b".into(), 7);
        state.unsubscribe(7);
        assert!(state.subscription_callbacks("a").is_empty());
        assert!(state.subscription_callbacks("b").is_empty());
    }
}
