//! Header-store error kinds (component C2).
use thiserror::Error;

use svnet_common::Height;

/// Errors raised while importing or querying headers.
///
/// `MissingHeader`/`IncorrectBits`/`InsufficientPoW` are the three shapes a
/// malformed or dishonest chunk of headers can fail proof-of-work
/// validation with; the caller maps these to the blacklist-vs-disconnect
/// policy described in the propagation policy, not this crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A header references a previous block hash this store has never
    /// seen, and which was not supplied earlier in the same batch.
    #[error("missing header for height {0}")]
    MissingHeader(Height),

    /// A header's `bits` field does not match what the difficulty
    /// adjustment rule requires at its height.
    #[error("incorrect difficulty bits at height {0}")]
    IncorrectBits(Height),

    /// A header's hash does not satisfy the target implied by its own
    /// `bits` field.
    #[error("insufficient proof of work at height {0}")]
    InsufficientPoW(Height),

    /// A header at this height was already present with a different hash.
    #[error("duplicate header at height {0}")]
    DuplicateHeader(Height),

    /// The raw bytes of a header could not be parsed (wrong length, or
    /// consensus-encoding failure).
    #[error("malformed header: {0}")]
    Malformed(String),
}
