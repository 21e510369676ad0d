//! Config value trait (C11) and the slice of persisted state this crate
//! owns the shape of.
//!
//! `ConfigStore` deliberately mirrors only the call shape the original
//! `SimpleConfig` is used with (`config.get(key, default)` /
//! `config.set_key(key, value, save)`) — not its file-backed persistence,
//! which remains an external collaborator per the purpose & scope section.
//! A real embedding application supplies its own implementation; the node
//! binary uses [`MemoryConfigStore`] as a default if no config file is
//! given, and tests use it directly.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use svnet_common::{ProxyConfig, ServerKey};

/// A key/value configuration store, standing in for the external
/// `SimpleConfig`.
pub trait ConfigStore: Send + Sync {
    /// Read a string value, or `None` if the key is unset.
    fn get(&self, key: &str) -> Option<String>;
    /// Write a string value.
    fn set(&self, key: &str, value: String);
}

/// An in-memory [`ConfigStore`], for tests and as the node binary's
/// fallback when no config file path is given.
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryConfigStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }
}

/// The fields the original network module explicitly persists:
/// `recent-servers`, `server_blacklist`, `server`, `proxy`, `auto_connect`.
///
/// This struct only models the data shape so a `node` binary can round-trip
/// it through a [`ConfigStore`]; it never touches a filesystem itself.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedServerState {
    /// Most-recently-used connected servers, MRU-first, capped at 20.
    pub recent: Vec<ServerKey>,
    /// Servers that failed a checkpoint proof or otherwise misbehaved and
    /// are never retried automatically.
    pub blacklisted: Vec<ServerKey>,
    /// The user-selected default server, if `auto_connect` is off.
    pub server: Option<ServerKey>,
    /// The configured proxy, if any.
    pub proxy: Option<ProxyConfig>,
    /// Whether the pool manager is free to pick its own default server.
    pub auto_connect: bool,
    /// Whether to maintain exactly one connection instead of `num_server`.
    pub oneserver: bool,
}

impl PersistedServerState {
    /// Config keys this struct round-trips through a [`ConfigStore`].
    pub const KEY_RECENT_SERVERS: &'static str = "recent-servers";
    /// See [`Self::KEY_RECENT_SERVERS`].
    pub const KEY_SERVER_BLACKLIST: &'static str = "server_blacklist";
    /// See [`Self::KEY_RECENT_SERVERS`].
    pub const KEY_SERVER: &'static str = "server";
    /// See [`Self::KEY_RECENT_SERVERS`].
    pub const KEY_PROXY: &'static str = "proxy";
    /// See [`Self::KEY_RECENT_SERVERS`].
    pub const KEY_AUTO_CONNECT: &'static str = "auto_connect";
    /// See [`Self::KEY_RECENT_SERVERS`].
    pub const KEY_ONESERVER: &'static str = "oneserver";

    /// Load persisted state from `store`, falling back to defaults
    /// (`auto_connect = true`, nothing recent/blacklisted) on any
    /// malformed value — per the propagation policy, a `ParseError` here
    /// is logged and never fatal.
    pub fn load(store: &dyn ConfigStore) -> Self {
        let recent = store
            .get(Self::KEY_RECENT_SERVERS)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let blacklisted = store
            .get(Self::KEY_SERVER_BLACKLIST)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let server = store
            .get(Self::KEY_SERVER)
            .and_then(|s| s.parse().ok());
        let proxy = store
            .get(Self::KEY_PROXY)
            .and_then(|s| ProxyConfig::parse(&s).ok())
            .flatten();
        let auto_connect = store
            .get(Self::KEY_AUTO_CONNECT)
            .map(|s| s == "true")
            .unwrap_or(true);
        let oneserver = store
            .get(Self::KEY_ONESERVER)
            .map(|s| s == "true")
            .unwrap_or(false);
        Self {
            recent,
            blacklisted,
            server,
            proxy,
            auto_connect,
            oneserver,
        }
    }

    /// Write this state back to `store`.
    pub fn save(&self, store: &dyn ConfigStore) {
        if let Ok(json) = serde_json::to_string(&self.recent) {
            store.set(Self::KEY_RECENT_SERVERS, json);
        }
        if let Ok(json) = serde_json::to_string(&self.blacklisted) {
            store.set(Self::KEY_SERVER_BLACKLIST, json);
        }
        if let Some(server) = &self.server {
            store.set(Self::KEY_SERVER, server.to_string());
        }
        store.set(Self::KEY_PROXY, ProxyConfig::serialize(self.proxy.as_ref()));
        store.set(Self::KEY_AUTO_CONNECT, self.auto_connect.to_string());
        store.set(Self::KEY_ONESERVER, self.oneserver.to_string());
    }

    /// Push `server` to the front of `recent`, deduplicating and capping
    /// at 20 entries (MRU-first), matching the original's fixed cap.
    pub fn remember(&mut self, server: ServerKey) {
        self.recent.retain(|s| s != &server);
        self.recent.insert(0, server);
        self.recent.truncate(20);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryConfigStore::new();
        store.set("k", "v".into());
        assert_eq!(store.get("k"), Some("v".to_string()));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn persisted_state_defaults_auto_connect_true() {
        let store = MemoryConfigStore::new();
        let state = PersistedServerState::load(&store);
        assert!(state.auto_connect);
        assert!(state.recent.is_empty());
    }

    #[test]
    fn remember_caps_at_twenty_and_dedupes() {
        let mut state = PersistedServerState::default();
        for i in 0..25u16 {
            state.remember(ServerKey::new(format!("host{i}"), 50002, svnet_common::Protocol::Tls));
        }
        assert_eq!(state.recent.len(), 20);
        assert_eq!(state.recent[0].host, "host24");

        let dup = state.recent[5].clone();
        state.remember(dup.clone());
        assert_eq!(state.recent[0], dup);
        assert_eq!(state.recent.len(), 20);
    }

    #[test]
    fn save_and_reload_round_trips_through_a_memory_store() {
        let store = MemoryConfigStore::new();
        let mut state = PersistedServerState::default();
        state.remember(ServerKey::new("host", 50002, svnet_common::Protocol::Tls));
        state.auto_connect = false;
        state.save(&store);

        let reloaded = PersistedServerState::load(&store);
        assert_eq!(reloaded.recent, state.recent);
        assert!(!reloaded.auto_connect);
    }
}
