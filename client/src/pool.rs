//! Pool manager (component C8): the single cooperative event loop that
//! owns every live interface, the header store, and the state shared
//! with callers only through the command channel.
//!
//! Socket readiness is driven by `mio` on a fixed tick: a readiness
//! selector event loop handed a state machine and a set of peers, here
//! an Electrum-protocol client with its own header-sync driver and
//! multiplexer rather than a raw P2P message handler.
use std::collections::HashMap;
use std::io::{self, Read};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;
use fastrand::Rng;
use log::{debug, info, warn};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use svnet_chain::HeaderStore;
use svnet_common::server::ProxyConfig;
use svnet_common::time::{Clock, LocalTime, WallClock};
use svnet_common::ServerKey;
use svnet_net::dialer::BoxedStream;
use svnet_net::{ConnectionOpener, Delivery, Interface};

use crate::command::Command;
use crate::driver::{self, DriverOutcome};
use crate::events::{Event, EventBus};
use crate::methods;
use crate::multiplexer;
use crate::state::{ConnectionStatus, NetworkState};

/// Default cap on concurrently open interfaces, per step 3.
pub const DEFAULT_NUM_SERVER: usize = 10;
/// How often `disconnected` is cleared and retried wholesale.
pub const NODES_RETRY_INTERVAL_SECS: f64 = 60.0;
/// How often the user-specified default server is retried when
/// `auto_connect` is off.
pub const SERVER_RETRY_INTERVAL_SECS: f64 = 10.0;
/// `mio::Poll::poll` timeout; bounds how promptly timeouts and pings are
/// noticed even with no socket activity.
const POLL_TICK: Duration = Duration::from_millis(100);
/// A peer is "lagging" once its tip falls this far behind local-longest.
const LAGGING_THRESHOLD: u32 = 1;

/// Why [`Pool::switch_to_interface`] was invoked, surfaced for logging
/// only — the mechanics are identical for every reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// The configured/persisted default server became available.
    Default,
    /// `auto_connect` picked a random connected peer.
    Random,
    /// The previous default fell behind the longest chain.
    Lagging,
    /// The previous default's socket closed.
    SocketLoop,
    /// Reconciliation moved us onto a different fork.
    FollowChain,
    /// A caller explicitly requested a server.
    SetParameters,
}

struct Socket {
    stream: BoxedStream,
    raw_fd: RawFd,
    token: Token,
}

/// The pool manager. Owns the one [`NetworkState`], the one
/// [`HeaderStore`], and every open socket; everything else (the
/// multiplexer, the header-sync driver, the event bus) operates on
/// borrows handed to it one tick at a time.
pub struct Pool<C: Clock = WallClock> {
    state: NetworkState,
    store: HeaderStore,
    opener: ConnectionOpener,
    proxy: Option<ProxyConfig>,
    num_server: usize,
    oneserver: bool,
    auto_connect: bool,
    default_servers: Vec<ServerKey>,
    bus: Arc<Mutex<EventBus>>,
    commands: Receiver<Command>,
    clock: C,
    rng: Rng,
    poll: Poll,
    events: Events,
    sockets: HashMap<ServerKey, Socket>,
    tokens: HashMap<Token, ServerKey>,
    next_token: usize,
}

impl Pool<WallClock> {
    /// Construct a pool with the system wall clock, the configuration
    /// the `node` binary assembled at startup.
    pub fn new(
        store: HeaderStore,
        opener: ConnectionOpener,
        proxy: Option<ProxyConfig>,
        default_servers: Vec<ServerKey>,
        oneserver: bool,
        auto_connect: bool,
        commands: Receiver<Command>,
        bus: Arc<Mutex<EventBus>>,
    ) -> io::Result<Self> {
        Self::with_clock(
            store,
            opener,
            proxy,
            default_servers,
            oneserver,
            auto_connect,
            commands,
            bus,
            WallClock,
        )
    }
}

impl<C: Clock> Pool<C> {
    /// Construct a pool against an injected clock, for deterministic
    /// tests of the retry/lag timers. `bus` is shared with whatever holds
    /// the other end of `commands`, so callers can register event
    /// observers without a round trip through the command channel.
    pub fn with_clock(
        store: HeaderStore,
        opener: ConnectionOpener,
        proxy: Option<ProxyConfig>,
        default_servers: Vec<ServerKey>,
        oneserver: bool,
        auto_connect: bool,
        commands: Receiver<Command>,
        bus: Arc<Mutex<EventBus>>,
        clock: C,
    ) -> io::Result<Self> {
        Ok(Self {
            state: NetworkState::new(),
            store,
            opener,
            proxy,
            num_server: if oneserver { 0 } else { DEFAULT_NUM_SERVER },
            oneserver,
            auto_connect,
            default_servers,
            bus,
            commands,
            clock,
            rng: Rng::new(),
            poll: Poll::new()?,
            events: Events::with_capacity(128),
            sockets: HashMap::new(),
            tokens: HashMap::new(),
            next_token: 1,
        })
    }

    /// Seed `recent`/`blacklisted`/`default_server` from a previous run.
    pub fn restore(&mut self, persisted: crate::config::PersistedServerState) {
        for server in persisted.recent {
            self.state.remember_recent(server);
        }
        for server in persisted.blacklisted {
            self.state.blacklisted.insert(server);
        }
        self.state.default_server = persisted.server;
    }

    /// Run the event loop until a [`Command::Stop`] is drained. Blocks
    /// the calling thread — the `node` binary spawns this on its own.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            if !self.tick()? {
                return Ok(());
            }
        }
    }

    /// One iteration of the loop: steps 1–6 plus command draining and
    /// socket I/O. Returns `false` once [`Command::Stop`] has been
    /// processed.
    pub fn tick(&mut self) -> io::Result<bool> {
        if !self.drain_commands() {
            self.shutdown();
            return Ok(false);
        }

        self.poll.poll(&mut self.events, Some(POLL_TICK))?;
        let ready: Vec<ServerKey> =
            self.events.iter().filter_map(|ev| self.tokens.get(&ev.token()).cloned()).collect();
        for server in ready {
            self.service_socket(&server);
        }

        self.drain_opened();
        self.check_timeouts_and_pings();
        self.maintain_pool_size();
        self.maintain_default();
        self.check_lagging();
        self.drain_pending_sends();

        Ok(true)
    }

    fn now(&self) -> LocalTime {
        self.clock.local_time()
    }

    // --- command channel -------------------------------------------------

    fn drain_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send { messages, callback_id, callback } => {
                    let now = self.now();
                    if let Some(default) = self.default_server_key() {
                        if let Some(iface) = self.state.interfaces.get_mut(&default) {
                            multiplexer::send(&mut self.state, iface, callback_id, messages, callback, now);
                            continue;
                        }
                    }
                    self.state.callbacks.insert(callback_id, callback);
                    self.state.pending_sends.push_back(crate::state::PendingSend { messages, callback_id });
                }
                Command::Unsubscribe { callback_id } => self.state.unsubscribe(callback_id),
                Command::Stop => return false,
            }
        }
        true
    }

    fn shutdown(&mut self) {
        for (server, socket) in self.sockets.drain() {
            let _ = self.poll.registry().deregister(&mut SourceFd(&socket.raw_fd));
            debug!("closed {server} on shutdown");
        }
        self.state.interfaces.clear();
        self.bus.lock().unwrap().trigger_callback(Event::Status(ConnectionStatus::Disconnected));
    }

    fn default_server_key(&self) -> Option<ServerKey> {
        self.state.default_server.clone()
    }

    /// Flush any [`PendingSend`](crate::state::PendingSend)s queued while
    /// no default interface was connected, now that one might be.
    fn drain_pending_sends(&mut self) {
        let Some(default) = self.default_server_key() else {
            return;
        };
        if self.state.pending_sends.is_empty() {
            return;
        }
        let now = self.now();
        while let Some(pending) = self.state.pending_sends.pop_front() {
            let Some(mut iface) = self.state.interfaces.remove(&default) else {
                self.state.pending_sends.push_front(pending);
                break;
            };
            for (method, params) in pending.messages {
                multiplexer::queue_one(&mut self.state, &mut iface, method, params, pending.callback_id, now);
            }
            self.flush(&default, &mut iface);
            self.state.interfaces.insert(default.clone(), iface);
        }
    }

    // --- step 1: drain the socket queue -----------------------------------

    fn drain_opened(&mut self) {
        let results: Vec<_> = self.opener.results().try_iter().collect();
        for result in results {
            match (result.stream, result.raw_fd) {
                (Some(stream), Some(raw_fd)) => self.promote(result.server_key, stream, raw_fd),
                _ => {
                    self.state.mark_disconnected(result.server_key.clone());
                    warn!("dial to {} failed", result.server_key);
                }
            }
        }
    }

    fn promote(&mut self, server: ServerKey, stream: BoxedStream, raw_fd: RawFd) {
        let token = Token(self.next_token);
        self.next_token += 1;
        if let Err(e) = self.poll.registry().register(&mut SourceFd(&raw_fd), token, Interest::READABLE) {
            warn!("failed to register {server} with the selector: {e}");
            self.state.mark_disconnected(server);
            return;
        }
        self.sockets.insert(server.clone(), Socket { stream, raw_fd, token });
        self.tokens.insert(token, server.clone());

        let mut iface = Interface::new(server.clone());
        let now = self.now();
        let mut next_id = || self.state.next_message_id();
        driver::start(&mut iface, &self.store, &mut next_id, now);
        self.flush(&server, &mut iface);
        self.state.promote_interface(server.clone(), iface);
        info!("promoted {server} to a live interface");
        self.update_connection_status();
    }

    fn flush(&mut self, server: &ServerKey, iface: &mut Interface) {
        if let Some(socket) = self.sockets.get_mut(server) {
            if let Err(e) = iface.send_requests(&mut socket.stream) {
                warn!("write to {server} failed: {e}");
            }
        }
    }

    // --- socket service + dispatch -----------------------------------------

    fn service_socket(&mut self, server: &ServerKey) {
        let mut buf = [0u8; 8192];
        let read = match self.sockets.get_mut(server) {
            Some(socket) => socket.stream.read(&mut buf),
            None => return,
        };
        let n = match read {
            Ok(0) => {
                self.teardown(server, false);
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!("read from {server} failed: {e}");
                self.teardown(server, false);
                return;
            }
        };

        let Some(mut iface) = self.state.interfaces.remove(server) else {
            return;
        };
        iface.feed(&buf[..n]);
        let deliveries = iface.get_responses();
        let now = self.now();
        let mut blacklist = false;
        let mut disconnect = false;
        let mut updated = false;
        for delivery in deliveries {
            if is_header_delivery(&delivery) {
                let mut next_id = || self.state.next_message_id();
                match driver::handle_delivery(&mut iface, &mut self.store, delivery, &mut next_id, now) {
                    DriverOutcome::Continue => {}
                    DriverOutcome::Updated => updated = true,
                    DriverOutcome::Disconnect => disconnect = true,
                    DriverOutcome::Blacklist => blacklist = true,
                }
            } else {
                multiplexer::dispatch_delivery(&mut self.state, delivery, now);
            }
            if disconnect || blacklist {
                break;
            }
        }
        self.flush(server, &mut iface);
        self.state.interfaces.insert(server.clone(), iface);

        if blacklist {
            self.teardown(server, true);
        } else if disconnect {
            self.teardown(server, false);
        } else if updated {
            if let Some(fork) = self.store.longest() {
                self.bus.lock().unwrap().trigger_callback(Event::Updated { height: fork.tip_height() });
            }
        }
    }

    fn teardown(&mut self, server: &ServerKey, blacklist: bool) {
        if let Some(iface) = self.state.remove_interface(server) {
            if let Some(fork_id) = iface.blockchain {
                self.store.release_catch_up(fork_id);
            }
        }
        if let Some(socket) = self.sockets.remove(server) {
            let _ = self.poll.registry().deregister(&mut SourceFd(&socket.raw_fd));
            self.tokens.remove(&socket.token);
        }
        if blacklist {
            self.state.blacklist(server.clone());
            warn!("blacklisted {server}");
        } else {
            self.state.mark_disconnected(server.clone());
            debug!("disconnected {server}");
        }
        if self.state.default_server.as_ref() == Some(server) {
            self.state.default_server = None;
        }
        self.update_connection_status();
    }

    // --- step 2: timeout / ping ------------------------------------------

    fn check_timeouts_and_pings(&mut self) {
        let now = self.now();
        let servers: Vec<ServerKey> = self.state.interfaces.keys().cloned().collect();
        for server in servers {
            let timed_out = self.state.interfaces.get(&server).map_or(false, |i| i.has_timed_out(now));
            if timed_out {
                self.teardown(&server, false);
                continue;
            }
            let needs_ping = self.state.interfaces.get(&server).map_or(false, |i| i.ping_required(now));
            if needs_ping {
                if let Some(mut iface) = self.state.interfaces.remove(&server) {
                    let id = self.state.next_message_id();
                    iface.queue_request(methods::SERVER_PING, vec![], id, now);
                    self.flush(&server, &mut iface);
                    self.state.interfaces.insert(server.clone(), iface);
                }
            }
        }
    }

    // --- step 3: maintain pool size ----------------------------------------

    fn maintain_pool_size(&mut self) {
        let now = self.now();
        if now.duration_since(self.state.nodes_retry_time).as_secs_f64() > NODES_RETRY_INTERVAL_SECS {
            self.state.disconnected.clear();
            self.state.nodes_retry_time = now;
        }

        let in_flight = self.state.interfaces.len() + self.state.connecting.len();
        if in_flight >= self.num_server {
            return;
        }
        let candidates: Vec<ServerKey> = self
            .default_servers
            .iter()
            .chain(self.state.recent.iter())
            .chain(self.state.irc_servers.values().flatten())
            .filter(|s| self.state.is_eligible(s))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return;
        }
        let pick = candidates[self.rng.usize(..candidates.len())].clone();
        self.state.mark_connecting(pick.clone());
        self.opener.open(pick, self.proxy.clone());
    }

    // --- step 4 + 5: default selection / switching --------------------------

    fn maintain_default(&mut self) {
        if self.state.default_server.is_some() {
            return;
        }
        let now = self.now();
        if self.auto_connect {
            if let Some(candidate) = self.random_connected_on_longest(None) {
                self.switch_to_interface(candidate, SwitchReason::Random);
            }
        } else if now.duration_since(self.state.server_retry_time).as_secs_f64() > SERVER_RETRY_INTERVAL_SECS {
            self.state.server_retry_time = now;
            if let Some(server) = self.state.default_server.clone().or_else(|| self.default_servers.first().cloned())
            {
                if self.state.interfaces.contains_key(&server) {
                    self.switch_to_interface(server, SwitchReason::Default);
                } else if self.state.is_eligible(&server) {
                    self.state.mark_connecting(server.clone());
                    self.opener.open(server, self.proxy.clone());
                }
            }
        }
    }

    fn random_connected_on_longest(&self, exclude: Option<&ServerKey>) -> Option<ServerKey> {
        let longest_id = self.store.longest()?.id;
        let candidates: Vec<ServerKey> = self
            .state
            .interfaces
            .iter()
            .filter(|(server, iface)| iface.blockchain == Some(longest_id) && exclude != Some(server))
            .map(|(server, _)| server.clone())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.rng.usize(..candidates.len())].clone())
    }

    /// Promote `server` to `default_server`, opening it first if it
    /// isn't already connected, and re-issue every standing subscription
    /// against it per step 5.
    pub fn switch_to_interface(&mut self, server: ServerKey, reason: SwitchReason) {
        info!("switching default interface to {server} ({reason:?})");
        self.state.default_server = Some(server.clone());
        self.state.sub_cache.clear();

        if !self.state.interfaces.contains_key(&server) {
            if self.state.is_eligible(&server) {
                self.state.mark_connecting(server.clone());
                self.opener.open(server, self.proxy.clone());
            }
            return;
        }

        self.reissue_standing_subscriptions(&server);
        self.update_connection_status();
        self.bus.lock().unwrap().trigger_callback(Event::Interfaces(self.state.interfaces.keys().cloned().collect()));
    }

    fn reissue_standing_subscriptions(&mut self, server: &ServerKey) {
        let now = self.now();
        let standing: Vec<(&'static str, Vec<serde_json::Value>)> = vec![
            (methods::SERVER_BANNER, vec![]),
            (methods::SERVER_DONATION_ADDRESS, vec![]),
            (methods::SERVER_PEERS_SUBSCRIBE, vec![]),
            (methods::BLOCKCHAIN_RELAYFEE, vec![]),
        ];
        let addresses: Vec<String> = self.state.subscribed_addresses.iter().cloned().collect();
        let Some(mut iface) = self.state.interfaces.remove(server) else {
            return;
        };
        for (method, params) in standing {
            let id = self.state.next_message_id();
            iface.queue_request(method, params, id, now);
        }
        for address in addresses {
            let id = self.state.next_message_id();
            iface.queue_request(
                methods::BLOCKCHAIN_SCRIPTHASH_SUBSCRIBE,
                vec![serde_json::Value::from(address)],
                id,
                now,
            );
        }
        self.flush(server, &mut iface);
        self.state.interfaces.insert(server.clone(), iface);
    }

    // --- step 6: lagging detection -----------------------------------------

    fn check_lagging(&mut self) {
        if !self.auto_connect {
            return;
        }
        let Some(server) = self.state.default_server.clone() else {
            return;
        };
        let Some(iface_tip) = self.state.interfaces.get(&server).and_then(|i| i.tip_height) else {
            return;
        };
        let Some(longest_tip) = self.store.longest().map(|f| f.tip_height()) else {
            return;
        };
        if longest_tip > iface_tip.saturating_add(LAGGING_THRESHOLD) {
            if let Some(candidate) = self.random_connected_on_longest(Some(&server)) {
                self.switch_to_interface(candidate, SwitchReason::Lagging);
            }
        }
    }

    fn update_connection_status(&mut self) {
        let status = if self.state.default_server.is_some() && self.state.interfaces.contains_key(
            self.state.default_server.as_ref().unwrap(),
        ) {
            ConnectionStatus::Connected
        } else if !self.state.connecting.is_empty() {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Disconnected
        };
        if status != self.state.connection_status {
            self.state.connection_status = status;
            self.bus.lock().unwrap().trigger_callback(Event::Status(status));
        }
    }
}

fn is_header_delivery(delivery: &Delivery) -> bool {
    let method = delivery
        .request
        .as_ref()
        .map(|r| r.method.as_str())
        .or_else(|| match &delivery.frame {
            Some(svnet_net::Frame::Notification { method, .. }) => Some(method.as_str()),
            _ => None,
        });
    matches!(
        method,
        Some(methods::BLOCKCHAIN_HEADERS_SUBSCRIBE)
            | Some(methods::BLOCKCHAIN_BLOCK_HEADER)
            | Some(methods::BLOCKCHAIN_BLOCK_HEADERS)
    )
}
