//! Thin aggregator over the workspace's four library crates, each gated by
//! a feature of the same name so a downstream consumer can pull in only
//! the layer it needs (e.g. just the wire codec, without the pool
//! manager).
#![warn(missing_docs)]

#[cfg(feature = "svnet-common")]
#[doc(inline)]
pub use svnet_common as common;

#[cfg(feature = "svnet-chain")]
#[doc(inline)]
pub use svnet_chain as chain;

#[cfg(feature = "svnet-net")]
#[doc(inline)]
pub use svnet_net as net;

#[cfg(feature = "svnet-client")]
#[doc(inline)]
pub use svnet_client as client;
