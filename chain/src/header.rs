//! Raw 80-byte block headers: parsing, hashing, and proof-of-work checks.
use bitcoin::blockdata::block::BlockHeader;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hash_types::BlockHash;
use bitcoin::hashes::hex::FromHex;
use bitcoin::util::uint::Uint256;

use crate::error::Error;

/// A parsed 80-byte block header, plus the height the chain believes it
/// sits at.
///
/// Wraps the upstream [`BlockHeader`] type rather than re-deriving
/// consensus (de)serialization, double-SHA-256 hashing, and target/PoW
/// arithmetic from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Consensus header fields.
    pub inner: BlockHeader,
}

impl Header {
    /// Parse a header from its 80-byte wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 80 {
            return Err(Error::Malformed(format!(
                "expected an 80-byte header, got {} bytes",
                bytes.len()
            )));
        }
        let inner: BlockHeader =
            deserialize(bytes).map_err(|e| Error::Malformed(e.to_string()))?;
        Ok(Header { inner })
    }

    /// Parse a header from its hex-encoded wire form, as delivered by
    /// `blockchain.block.header`.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let bytes = Vec::<u8>::from_hex(hex).map_err(|e| Error::Malformed(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Re-encode to the 80-byte wire form.
    pub fn to_bytes(&self) -> [u8; 80] {
        let v = serialize(&self.inner);
        let mut out = [0u8; 80];
        out.copy_from_slice(&v);
        out
    }

    /// The header's double-SHA-256 hash (display order, big-endian).
    pub fn block_hash(&self) -> BlockHash {
        self.inner.block_hash()
    }

    /// The hash of the previous block this header extends.
    pub fn prev_block_hash(&self) -> BlockHash {
        self.inner.prev_blockhash
    }

    /// The cumulative work this single header contributes, derived from its
    /// `bits` target.
    pub fn work(&self) -> Uint256 {
        self.inner.work()
    }

    /// The PoW target implied by this header's `bits` field.
    pub fn target(&self) -> Uint256 {
        self.inner.target()
    }

    /// Whether this header's hash satisfies its own claimed target.
    pub fn validate_pow(&self) -> bool {
        self.inner.validate_pow(&self.target()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The Bitcoin genesis block header, a fixed and widely published
    // 80-byte constant, used as a minimal parse/hash/PoW round-trip check.
    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

    #[test]
    fn parses_and_hashes_genesis() {
        let header = Header::from_hex(GENESIS_HEX).unwrap();
        assert_eq!(
            header.block_hash().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn rejects_short_input() {
        assert!(Header::from_bytes(&[0u8; 79]).is_err());
    }

    #[test]
    fn genesis_satisfies_its_own_target() {
        let header = Header::from_hex(GENESIS_HEX).unwrap();
        assert!(header.validate_pow());
    }

    #[test]
    fn round_trips_wire_bytes() {
        let header = Header::from_hex(GENESIS_HEX).unwrap();
        let bytes = header.to_bytes();
        let reparsed = Header::from_bytes(&bytes).unwrap();
        assert_eq!(header, reparsed);
    }
}
