//! Crate-wide error kinds surfaced to callers of the `Network` handle.
use thiserror::Error;

/// Errors a caller of [`crate::Network`] can observe.
///
/// Internal failures that only ever drive a state transition — a missing
/// parent header, a bad proof-of-work, mode-transition bookkeeping — never
/// reach this type; they are handled entirely by the header-sync driver
/// and the pool manager per the propagation policy.
#[derive(Error, Debug)]
pub enum Error {
    /// The server's `error` field was populated.
    #[error("rpc error: {0}")]
    RPCError(String),

    /// `synchronous_get` did not receive a response within its deadline.
    #[error("timed out waiting for a response")]
    Timeout,

    /// A checkpoint Merkle proof did not resolve to the expected root.
    #[error("checkpoint proof failed at height {0}")]
    ProofFailure(svnet_common::Height),

    /// The header store rejected an import.
    #[error(transparent)]
    Chain(#[from] svnet_chain::Error),

    /// A socket, TLS, or framing failure.
    #[error(transparent)]
    Net(#[from] svnet_net::Error),

    /// A server identifier or proxy string failed to parse.
    #[error(transparent)]
    Common(#[from] svnet_common::Error),

    /// The network's command channel was dropped; the event loop has
    /// already stopped.
    #[error("network event loop is no longer running")]
    Stopped,
}
