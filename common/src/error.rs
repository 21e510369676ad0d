//! Shared error kinds used across the parsing layer.
use thiserror::Error;

/// An error produced while parsing a server identifier, proxy string, or
/// other externally supplied string form.
///
/// Per the propagation policy, a `ParseError` arising from persisted
/// config is never fatal: callers log it and fall back to defaults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A server identifier string did not have the `host:port:protocol`
    /// shape, or its protocol/port fields were invalid.
    #[error("invalid server string {0:?}")]
    InvalidServer(String),

    /// A proxy string did not have the `mode:host:port[:user[:password]]`
    /// shape, or named an unsupported mode.
    #[error("invalid proxy string {0:?}")]
    InvalidProxy(String),
}
