//! Errors raised while dialing, handshaking, or framing bytes on an
//! [`Interface`](crate::interface::Interface) session.
use thiserror::Error;

use crate::codec;

/// Socket, TLS, proxy, and framing failures (component C5/C4).
///
/// Per the crate-wide propagation policy, every variant here maps to a
/// disconnect at the pool manager; none of them are blacklist-worthy on
/// their own (a malformed *header* response is a `chain::Error` instead,
/// and that one can blacklist).
#[derive(Error, Debug)]
pub enum Error {
    /// The TCP connection could not be established or was reset.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The TLS handshake failed, or the peer's certificate did not match
    /// the pinned one on file.
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    /// The SOCKS4/SOCKS5 proxy rejected the connection.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// An HTTP CONNECT proxy did not answer with a 2xx status.
    #[error("http connect failed: {0}")]
    HttpConnect(String),

    /// A wire frame could not be parsed.
    #[error(transparent)]
    Codec(#[from] codec::Error),

    /// A request was issued to an interface in a mode that does not permit
    /// it (see [`crate::interface::Mode`] transition rules).
    #[error("illegal mode transition: {from:?} -> {to:?}")]
    IllegalModeTransition {
        /// The mode the interface was in.
        from: crate::interface::Mode,
        /// The mode that was requested.
        to: crate::interface::Mode,
    },
}
