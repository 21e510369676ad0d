//! Aggregated error type for the daemon entry point.
use std::io;

use thiserror::Error;

/// Everything that can go wrong starting or running the daemon.
#[derive(Error, Debug)]
pub enum Error {
    /// A filesystem failure reading or writing the config directory.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The persisted config file was present but not valid JSON.
    #[error(transparent)]
    Config(#[from] serde_json::Error),

    /// A `--server` or `--proxy` command-line value failed to parse.
    #[error(transparent)]
    Common(#[from] svnet_common::Error),

    /// Installing the signal handler failed.
    #[error("failed to install signal handler: {0}")]
    Signal(io::Error),
}
