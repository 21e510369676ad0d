//! Types and constants shared by every `svnet` crate: server identifiers,
//! proxy configuration, and the hard-coded per-network parameters.
#![warn(missing_docs)]

pub mod error;
pub mod network;
pub mod server;
pub mod time;

pub use error::Error;
pub use network::Network;
pub use server::{Protocol, ProxyConfig, ProxyMode, ServerKey};

/// A block height.
pub type Height = u32;
