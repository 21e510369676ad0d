//! Checkpoint-anchored header fork tree and gateway (component C2).
//!
//! Headers below the network's pinned checkpoint are never stored: a
//! fresh store trusts the checkpoint height outright and only tracks forks
//! that diverge above it. This mirrors the upstream `BlockTree`'s
//! checkpoint-pruned `Branch` model, simplified to a single writer (no
//! concurrent import) since a [`HeaderStore`] is only ever driven by one
//! pool manager event loop at a time.
use std::collections::HashMap;

use bitcoin::hash_types::BlockHash;
use bitcoin::util::uint::Uint256;
use log::{debug, warn};
use nonempty::NonEmpty;

use svnet_common::{Height, Network, ServerKey};

use crate::error::Error;
use crate::header::Header;

/// The number of headers immediately below (and including) the checkpoint
/// that [`HeaderStore::required_checkpoint_headers`] asks a fresh peer
/// for. This mirrors Bitcoin's median-time-past window: enough context to
/// validate the next difficulty retarget without storing the entire chain
/// below the checkpoint.
pub const CHECKPOINT_WINDOW: u32 = 11;

/// Height interval between Bitcoin difficulty retargets.
const RETARGET_INTERVAL: Height = 2016;

/// Stable identifier for one tracked fork. Ids are never reused, so a
/// driver can hold one across a fork being extended, reorganised past, or
/// pruned without a dangling-index hazard.
pub type ForkId = u64;

/// A chain of headers above the checkpoint.
#[derive(Debug, Clone)]
pub struct Fork {
    /// This fork's stable identifier.
    pub id: ForkId,
    /// Height of the first header in this fork (`checkpoint_height + 1`).
    pub start_height: Height,
    /// Headers from `start_height` to this fork's tip, inclusive.
    pub headers: NonEmpty<Header>,
    /// The interface currently replaying this fork forward from the
    /// checkpoint, if any. Only one peer may hold this at a time —
    /// enforced by [`HeaderStore::try_claim_catch_up`].
    pub catch_up: Option<ServerKey>,
}

impl Fork {
    /// Height of this fork's tip.
    pub fn tip_height(&self) -> Height {
        self.start_height + (self.headers.len() as Height - 1)
    }

    /// Hash of this fork's tip.
    pub fn tip_hash(&self) -> BlockHash {
        self.headers.last().block_hash()
    }

    /// Total work accumulated by this fork's headers.
    pub fn work(&self) -> Uint256 {
        self.headers
            .iter()
            .fold(Uint256::from_u64(0).unwrap(), |acc, h| acc + h.work())
    }

    fn header_at(&self, height: Height) -> Option<&Header> {
        if height < self.start_height {
            return None;
        }
        let idx = (height - self.start_height) as usize;
        if idx < self.headers.len() {
            Some(&self.headers[idx])
        } else {
            None
        }
    }
}

/// The checkpoint-anchored store of known headers and their forks
/// (component C2's concrete "Blockchain").
pub struct HeaderStore {
    network: Network,
    checkpoint_height: Height,
    checkpoint_merkle_root: Option<BlockHash>,
    /// The short window of headers immediately below/at the checkpoint,
    /// fetched once via a checkpoint-proven chunk so difficulty retargets
    /// just above the checkpoint can be validated.
    checkpoint_window: Option<NonEmpty<Header>>,
    forks: Vec<Fork>,
    by_hash: HashMap<BlockHash, (ForkId, Height)>,
    next_fork_id: ForkId,
}

impl HeaderStore {
    /// Construct an empty store, trusting `network`'s pinned checkpoint
    /// outright with no headers yet imported.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            checkpoint_height: network.checkpoint_height(),
            checkpoint_merkle_root: network.checkpoint_merkle_root(),
            checkpoint_window: None,
            forks: Vec::new(),
            by_hash: HashMap::new(),
            next_fork_id: 1,
        }
    }

    /// The network this store tracks.
    pub fn network(&self) -> Network {
        self.network
    }

    /// The checkpoint height below which no headers are stored.
    pub fn checkpoint_height(&self) -> Height {
        self.checkpoint_height
    }

    /// The pinned checkpoint Merkle root, if this network has one
    /// configured (regtest has none).
    pub fn checkpoint_merkle_root(&self) -> Option<BlockHash> {
        self.checkpoint_merkle_root
    }

    /// Iterate over all currently tracked forks.
    pub fn forks(&self) -> impl Iterator<Item = &Fork> {
        self.forks.iter()
    }

    /// The heaviest (most cumulative work) currently tracked fork, or
    /// `None` if nothing has been imported above the checkpoint yet.
    pub fn longest(&self) -> Option<&Fork> {
        self.forks.iter().max_by_key(|f| f.work())
    }

    /// Height of the heaviest fork's tip, or the checkpoint height if no
    /// headers have been imported yet.
    pub fn height(&self) -> Height {
        self.longest().map_or(self.checkpoint_height, Fork::tip_height)
    }

    /// Whether a header hash is already known, on any tracked fork.
    pub fn is_known(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Look up the `(fork, height)` of a known header hash.
    pub fn locate(&self, hash: &BlockHash) -> Option<(ForkId, Height)> {
        self.by_hash.get(hash).copied()
    }

    /// Look up a fork by its id.
    pub fn fork(&self, id: ForkId) -> Option<&Fork> {
        self.forks.iter().find(|f| f.id == id)
    }

    /// Whether the store still needs its checkpoint window (component C7's
    /// VERIFICATION phase consults this to decide whether to request a
    /// checkpoint-proven chunk before subscribing to new tips).
    pub fn needs_checkpoint_headers(&self) -> bool {
        self.checkpoint_window.is_none()
    }

    /// The `(base_height, count)` chunk request that will satisfy
    /// [`Self::needs_checkpoint_headers`], always ending at the checkpoint
    /// height itself.
    pub fn required_checkpoint_headers(&self) -> (Height, u32) {
        let count = CHECKPOINT_WINDOW.min(self.checkpoint_height + 1);
        (self.checkpoint_height + 1 - count, count)
    }

    /// Record the checkpoint window fetched to satisfy
    /// [`Self::required_checkpoint_headers`]. The caller (the header-sync
    /// driver) is responsible for having already verified the accompanying
    /// Merkle proof against [`Self::checkpoint_merkle_root`] via
    /// [`crate::merkle::verify`] before calling this.
    pub fn import_checkpoint_window(&mut self, base_height: Height, headers: &[Header]) -> Result<(), Error> {
        let (expected_base, expected_count) = self.required_checkpoint_headers();
        if base_height != expected_base || headers.len() as u32 > expected_count {
            return Err(Error::Malformed(
                "checkpoint window did not match the requested range".into(),
            ));
        }
        self.validate_pow_chain(headers, base_height)?;
        self.checkpoint_window =
            Some(NonEmpty::from_slice(headers).ok_or_else(|| Error::Malformed("empty checkpoint window".into()))?);
        debug!("checkpoint window recorded ({} headers ending at {})", headers.len(), self.checkpoint_height);
        Ok(())
    }

    /// Import one header extending a known tip (any tracked fork, or the
    /// checkpoint itself). `proof_was_provided` records whether the caller
    /// supplied (and separately verified) a checkpoint Merkle proof for
    /// this import; the store itself does not re-run that check, only
    /// tracks whether the policy that requires one was honoured.
    pub fn connect(
        &mut self,
        height: Height,
        header: Header,
        proof_was_provided: bool,
    ) -> Result<(Header, ForkId), Error> {
        let id = self.connect_chunk(height, std::slice::from_ref(&header), proof_was_provided)?;
        Ok((header, id))
    }

    /// Import a contiguous run of headers starting at `start_height`.
    ///
    /// Validates proof-of-work and hash linkage for every header before
    /// touching any store state; a failure partway through the chunk
    /// leaves the store unchanged. Extends an existing fork when the first
    /// header's `prev_blockhash` matches a known tip, otherwise starts a
    /// new fork at the point of divergence.
    pub fn connect_chunk(
        &mut self,
        start_height: Height,
        headers: &[Header],
        _proof_was_provided: bool,
    ) -> Result<ForkId, Error> {
        let Some((first, _)) = headers.split_first() else {
            return Err(Error::Malformed("empty chunk".into()));
        };

        if self.by_hash.contains_key(&first.block_hash()) {
            return Err(Error::DuplicateHeader(start_height));
        }

        let parent = self.locate_parent(start_height, first.prev_block_hash())?;
        self.validate_pow_chain(headers, start_height)?;

        let fork_id = match parent {
            Some((fork_id, _)) => self.extend_fork(fork_id, start_height, headers),
            None => self.start_fork(start_height, headers),
        };
        for (i, header) in headers.iter().enumerate() {
            self.by_hash.insert(header.block_hash(), (fork_id, start_height + i as Height));
        }
        Ok(fork_id)
    }

    /// Whether `fork_id` may be claimed by `server` for CATCH_UP replay.
    /// Only one interface may hold a fork's catch-up slot at a time.
    pub fn try_claim_catch_up(&mut self, fork_id: ForkId, server: ServerKey) -> bool {
        let Some(fork) = self.forks.iter_mut().find(|f| f.id == fork_id) else {
            return false;
        };
        if fork.catch_up.is_some() {
            return false;
        }
        fork.catch_up = Some(server);
        true
    }

    /// Release a previously claimed catch-up slot, clearing it
    /// unconditionally once CATCH_UP completes or the owning interface is
    /// torn down.
    pub fn release_catch_up(&mut self, fork_id: ForkId) {
        if let Some(fork) = self.forks.iter_mut().find(|f| f.id == fork_id) {
            fork.catch_up = None;
        }
    }

    fn locate_parent(&self, height: Height, prev_hash: BlockHash) -> Result<Option<(ForkId, Height)>, Error> {
        if height == self.checkpoint_height + 1 {
            if let Some(window) = &self.checkpoint_window {
                if window.last().block_hash() != prev_hash {
                    return Err(Error::MissingHeader(height));
                }
            }
            return Ok(None);
        }
        match self.by_hash.get(&prev_hash) {
            Some(&(fork_id, parent_height)) if parent_height + 1 == height => Ok(Some((fork_id, parent_height))),
            _ => Err(Error::MissingHeader(height)),
        }
    }

    fn parent_header(&self, fork_id: Option<ForkId>, height: Height) -> Option<&Header> {
        if height == self.checkpoint_height {
            return self.checkpoint_window.as_ref().map(|w| w.last());
        }
        let fork_id = fork_id?;
        self.fork(fork_id)?.header_at(height)
    }

    fn validate_pow_chain(&self, headers: &[Header], start_height: Height) -> Result<(), Error> {
        let parent_fork = self.by_hash.get(&headers[0].prev_block_hash()).map(|&(id, _)| id);
        let mut prev_header = self.parent_header(parent_fork, start_height.saturating_sub(1)).copied();
        let mut prev_hash = headers[0].prev_block_hash();
        for (i, header) in headers.iter().enumerate() {
            let height = start_height + i as Height;
            if header.prev_block_hash() != prev_hash {
                return Err(Error::MissingHeader(height));
            }
            if !header.validate_pow() {
                return Err(Error::InsufficientPoW(height));
            }
            if let Some(prev) = prev_header {
                if height % RETARGET_INTERVAL != 0 && header.inner.bits != prev.inner.bits {
                    return Err(Error::IncorrectBits(height));
                }
            }
            prev_hash = header.block_hash();
            prev_header = Some(*header);
        }
        Ok(())
    }

    fn extend_fork(&mut self, fork_id: ForkId, start_height: Height, headers: &[Header]) -> ForkId {
        let fork = self.forks.iter_mut().find(|f| f.id == fork_id).expect("fork exists");
        debug_assert_eq!(fork.tip_height() + 1, start_height);
        for header in headers {
            fork.headers.push(*header);
        }
        debug!("fork {} extended to height {}", fork_id, fork.tip_height());
        fork_id
    }

    fn start_fork(&mut self, start_height: Height, headers: &[Header]) -> ForkId {
        let id = self.next_fork_id;
        self.next_fork_id += 1;
        let fork = Fork {
            id,
            start_height,
            headers: NonEmpty::from_slice(headers).expect("non-empty chunk"),
            catch_up: None,
        };
        warn!("new fork {} started at height {}", id, start_height);
        self.forks.push(fork);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::block::BlockHeader;
    use bitcoin_hashes::Hash;

    fn header(prev: BlockHash, bits: u32) -> Header {
        Header {
            inner: BlockHeader {
                version: 1,
                prev_blockhash: prev,
                merkle_root: Default::default(),
                time: 0,
                bits,
                nonce: 0,
            },
        }
    }

    fn easy_bits() -> u32 {
        0x207fffff
    }

    fn seeded_store() -> HeaderStore {
        let network = Network::Regtest;
        let mut store = HeaderStore::new(network);
        let (base, count) = store.required_checkpoint_headers();
        let mut headers = Vec::new();
        let mut prev = BlockHash::from_inner([0u8; 32]);
        for _ in 0..count {
            let h = header(prev, easy_bits());
            prev = h.block_hash();
            headers.push(h);
        }
        store.import_checkpoint_window(base, &headers).unwrap();
        store
    }

    #[test]
    fn empty_store_reports_checkpoint_height() {
        let store = HeaderStore::new(Network::Regtest);
        assert_eq!(store.height(), store.checkpoint_height());
        assert!(store.longest().is_none());
        assert!(store.needs_checkpoint_headers());
    }

    #[test]
    fn connecting_past_the_checkpoint_starts_a_fork() {
        let mut store = seeded_store();
        let checkpoint_tip = store
            .checkpoint_window
            .as_ref()
            .unwrap()
            .last()
            .block_hash();
        let next = header(checkpoint_tip, easy_bits());
        let (_, fork_id) = store.connect(store.checkpoint_height() + 1, next, false).unwrap();
        assert_eq!(store.height(), store.checkpoint_height() + 1);
        assert_eq!(store.longest().unwrap().id, fork_id);
    }

    #[test]
    fn rejects_header_with_mismatched_prev_hash() {
        let mut store = seeded_store();
        let wrong_prev = header(BlockHash::from_inner([0xAB; 32]), easy_bits());
        let err = store.connect(store.checkpoint_height() + 1, wrong_prev, false).unwrap_err();
        assert_eq!(err, Error::MissingHeader(store.checkpoint_height() + 1));
    }

    #[test]
    fn rejects_insufficient_proof_of_work() {
        let mut store = seeded_store();
        let checkpoint_tip = store.checkpoint_window.as_ref().unwrap().last().block_hash();
        let mut bad = header(checkpoint_tip, easy_bits());
        bad.inner.bits = 0x03000001; // an unreachable target
        let err = store.connect(store.checkpoint_height() + 1, bad, false).unwrap_err();
        assert_eq!(err, Error::InsufficientPoW(store.checkpoint_height() + 1));
    }

    #[test]
    fn catch_up_slot_is_exclusive() {
        let mut store = seeded_store();
        let checkpoint_tip = store.checkpoint_window.as_ref().unwrap().last().block_hash();
        let next = header(checkpoint_tip, easy_bits());
        let (_, fork_id) = store.connect(store.checkpoint_height() + 1, next, false).unwrap();

        let peer_a = ServerKey::new("a", 50002, svnet_common::Protocol::Tls);
        let peer_b = ServerKey::new("b", 50002, svnet_common::Protocol::Tls);
        assert!(store.try_claim_catch_up(fork_id, peer_a));
        assert!(!store.try_claim_catch_up(fork_id, peer_b.clone()));
        store.release_catch_up(fork_id);
        assert!(store.try_claim_catch_up(fork_id, peer_b));
    }

    #[test]
    fn longest_tracks_cumulative_work_not_recency() {
        let mut store = seeded_store();
        let checkpoint_tip = store.checkpoint_window.as_ref().unwrap().last().block_hash();
        let a1 = header(checkpoint_tip, easy_bits());
        let a1_hash = a1.block_hash();
        let (_, fork_a) = store.connect(store.checkpoint_height() + 1, a1, false).unwrap();
        let a2 = header(a1_hash, easy_bits());
        store.connect(store.checkpoint_height() + 2, a2, false).unwrap();

        let mut b1 = header(checkpoint_tip, easy_bits());
        b1.inner.nonce = 1; // diverges from a1 so it hashes differently and starts its own fork
        let (_, fork_b) = store.connect(store.checkpoint_height() + 1, b1, false).unwrap();

        assert_eq!(store.longest().unwrap().id, fork_a);
        assert_ne!(fork_a, fork_b);
    }
}
