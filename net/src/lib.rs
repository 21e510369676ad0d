//! Electrum-protocol wire codec, interface sessions, and the connection
//! dialer (direct / SOCKS4 / SOCKS5 / HTTP-CONNECT / TLS).
#![warn(missing_docs)]

pub mod codec;
pub mod dialer;
pub mod error;
pub mod interface;
pub mod opener;

pub use codec::{Frame, Request, RpcError};
pub use dialer::Dialer;
pub use error::Error;
pub use interface::{Delivery, Interface, Mode, PendingRequest};
pub use opener::{ConnectionOpener, OpenResult};
