//! Standalone daemon: wires a [`svnet_chain::HeaderStore`], a file-backed
//! config store, a [`svnet_net::ConnectionOpener`], and the pool manager
//! together, then runs until a process signal asks it to stop.
mod config;
mod error;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use svnet_chain::HeaderStore;
use svnet_client::{ConnectionStatus, Event, EventKind, Network as NetworkCore, PersistedServerState};
use svnet_common::server::ProxyConfig;
use svnet_common::{Network, ServerKey};
use svnet_net::ConnectionOpener;

use crate::config::{FileConfigStore, Options};
use crate::error::Error;

fn parse_network(s: &str) -> Network {
    match s {
        "test" | "testnet" => Network::Testnet,
        "regtest" => Network::Regtest,
        _ => Network::Mainnet,
    }
}

fn run() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options: Options = argh::from_env();
    let network = parse_network(&options.network);

    log::info!("Starting svnet-node on {} using config dir {}", options.network, options.config_dir.display());

    let config_store = FileConfigStore::open(&options.config_dir)?;
    let mut persisted = PersistedServerState::load(config_store.as_ref());

    if let Some(server) = &options.server {
        persisted.server = Some(ServerKey::from_str(server)?);
        persisted.auto_connect = false;
    }
    if options.oneserver {
        persisted.oneserver = true;
    }
    let proxy = match &options.proxy {
        Some(s) => ProxyConfig::parse(s)?,
        None => persisted.proxy.clone(),
    };
    persisted.proxy = proxy.clone();

    let store = HeaderStore::new(network);
    let opener = ConnectionOpener::new(options.config_dir.clone());
    let default_servers = network.default_servers();

    log::info!(
        "Checkpoint height {} ({} default servers)",
        store.checkpoint_height(),
        default_servers.len()
    );

    let core = NetworkCore::spawn(store, opener, proxy, default_servers, persisted.clone())?;

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    core.register_callback(
        &[EventKind::Status, EventKind::Interfaces, EventKind::Updated],
        Arc::new(move |event: &Event| match event {
            Event::Status(ConnectionStatus::Connected) => log::info!("connected to a default server"),
            Event::Status(ConnectionStatus::Disconnected) => log::warn!("disconnected from the default server"),
            Event::Status(ConnectionStatus::Connecting) => log::debug!("connecting.."),
            Event::Interfaces(servers) => log::debug!("{} interface(s) active", servers.len()),
            Event::Updated { height } => log::info!("chain tip is now at height {height}"),
            _ => {}
        }),
    );

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(Error::Signal)?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            log::info!("received shutdown signal");
            running_handler.store(false, Ordering::SeqCst);
        }
    });

    log::info!("Running main event loop..");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("Shutting down..");
    persisted.save(config_store.as_ref());
    core.stop()?;

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        log::error!("fatal: {err}");
        std::process::exit(1);
    }
}
