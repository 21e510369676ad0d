//! Command-line options and the file-backed config store the daemon uses
//! to persist recent/blacklisted servers across restarts.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use argh::FromArgs;

use svnet_client::ConfigStore;

/// A lightweight, checkpoint-anchored Electrum-protocol network core.
#[derive(FromArgs, Debug)]
pub struct Options {
    /// which chain to connect to: main, test, or regtest
    #[argh(option, default = "String::from(\"main\")")]
    pub network: String,

    /// directory holding the config file and pinned TLS certificates
    #[argh(option, default = "default_config_dir()")]
    pub config_dir: PathBuf,

    /// connect only to this server (host:port:protocol), disabling
    /// automatic server selection
    #[argh(option)]
    pub server: Option<String>,

    /// proxy string (mode:host:port[:user[:password]]), or "none"
    #[argh(option)]
    pub proxy: Option<String>,

    /// maintain exactly one connection instead of the default pool size
    #[argh(switch)]
    pub oneserver: bool,
}

fn default_config_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".svnet")
}

/// Persists config key/value pairs as a single JSON object on disk,
/// reading it once at startup and rewriting it on every [`ConfigStore::set`].
///
/// This is the daemon's own concrete implementation of the core's
/// `ConfigStore` trait — the trait is deliberately agnostic about
/// persistence, so providing the file-backed half is this binary's job.
pub struct FileConfigStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileConfigStore {
    /// Load `<config_dir>/config.json`, creating `config_dir` if missing.
    /// A missing or malformed file starts from an empty map rather than
    /// failing the daemon.
    pub fn open(config_dir: &Path) -> std::io::Result<Arc<Self>> {
        fs::create_dir_all(config_dir)?;
        let path = config_dir.join("config.json");
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Ok(Arc::new(Self { path, values: Mutex::new(values) }))
    }

    fn flush(&self) {
        if let Ok(json) = serde_json::to_string_pretty(&*self.values.lock().unwrap()) {
            let _ = fs::write(&self.path, json);
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.lock().unwrap().insert(key.to_string(), value);
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_fresh_directory() {
        let dir = std::env::temp_dir().join(format!("svnet-config-test-{}", fastrand::u64(..)));
        let store = FileConfigStore::open(&dir).unwrap();
        store.set("k", "v".into());

        let reopened = FileConfigStore::open(&dir).unwrap();
        assert_eq!(reopened.get("k"), Some("v".to_string()));

        fs::remove_dir_all(&dir).ok();
    }
}
