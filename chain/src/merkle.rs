//! Checkpoint Merkle proof verification (component C3).
//!
//! Electrum servers answer `blockchain.block.header`/`headers` requests
//! carrying a `cp_height` parameter with a `root` and `branch`: a proof
//! that the requested header's hash is included in the checkpoint height's
//! header-commitment tree. This module recomputes that root from the
//! header's own hash and the supplied branch and compares it against the
//! network's pinned checkpoint root — never the header's proof-of-work,
//! which is [`crate::header::Header::validate_pow`]'s job.
use bitcoin::hash_types::BlockHash;
use bitcoin_hashes::Hash;

/// A checkpoint Merkle proof as received on the wire: the claimed root,
/// the sibling branch from the proven header up to (but not including)
/// that root, and the header's index within its level.
#[derive(Debug, Clone)]
pub struct CheckpointProof {
    /// The root the server claims the branch folds up to.
    pub root: BlockHash,
    /// Sibling hashes, ordered leaf (the proven header) to root.
    pub branch: Vec<BlockHash>,
    /// The proven header's position in its tree level.
    pub index: u32,
}

/// Fold a Merkle branch up to its root.
///
/// At each level the running hash is concatenated with the next branch
/// element — on the left if the current index is odd, on the right if
/// even — and the pair is double-SHA-256'd, mirroring the reference
/// Electrum server's own commitment scheme.
pub fn root_from_proof(leaf: BlockHash, branch: &[BlockHash], mut index: u32) -> BlockHash {
    let mut running: [u8; 32] = leaf.into_inner();
    for sibling in branch {
        let sibling: [u8; 32] = (*sibling).into_inner();
        let mut buf = [0u8; 64];
        if index & 1 == 1 {
            buf[..32].copy_from_slice(&sibling);
            buf[32..].copy_from_slice(&running);
        } else {
            buf[..32].copy_from_slice(&running);
            buf[32..].copy_from_slice(&sibling);
        }
        running = bitcoin_hashes::sha256d::Hash::hash(&buf).into_inner();
        index >>= 1;
    }
    BlockHash::from_inner(running)
}

/// Verify that `proof` resolves to the pinned checkpoint root, or to its
/// own claimed root when no checkpoint root has been configured (e.g. a
/// freshly bootstrapped regtest network with nothing pinned yet).
///
/// Never panics or returns an error: a failed verification is a plain
/// `false`, and it is the caller's job (the header-sync driver, C7) to map
/// that into the blacklist-vs-disconnect policy described in the
/// propagation policy — a chunk proof failure blacklists, a single-header
/// proof failure only disconnects.
pub fn verify(leaf: BlockHash, proof: &CheckpointProof, pinned_root: Option<BlockHash>) -> bool {
    if root_from_proof(leaf, &proof.branch, proof.index) != proof.root {
        return false;
    }
    match pinned_root {
        Some(pinned) => proof.root == pinned,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(byte: u8) -> BlockHash {
        BlockHash::from_inner([byte; 32])
    }

    #[test]
    fn empty_branch_returns_leaf_as_root() {
        let leaf = hash_of(7);
        assert_eq!(root_from_proof(leaf, &[], 0), leaf);
    }

    #[test]
    fn single_sibling_combines_in_order() {
        let leaf = hash_of(1);
        let sibling = hash_of(2);

        let root_even = root_from_proof(leaf, &[sibling], 0);
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&leaf.into_inner());
        buf[32..].copy_from_slice(&sibling.into_inner());
        let expected = BlockHash::from_inner(bitcoin_hashes::sha256d::Hash::hash(&buf).into_inner());
        assert_eq!(root_even, expected);

        let root_odd = root_from_proof(leaf, &[sibling], 1);
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&sibling.into_inner());
        buf[32..].copy_from_slice(&leaf.into_inner());
        let expected_odd = BlockHash::from_inner(bitcoin_hashes::sha256d::Hash::hash(&buf).into_inner());
        assert_eq!(root_odd, expected_odd);
    }

    #[test]
    fn tampered_branch_fails_against_pinned_root() {
        let leaf = hash_of(1);
        let branch = vec![hash_of(2), hash_of(3)];
        let root = root_from_proof(leaf, &branch, 0);
        let proof = CheckpointProof {
            root,
            branch: vec![hash_of(9), hash_of(3)],
            index: 0,
        };
        assert!(!verify(leaf, &proof, Some(root)));
    }

    #[test]
    fn matches_pinned_root() {
        let leaf = hash_of(1);
        let branch = vec![hash_of(2), hash_of(3)];
        let root = root_from_proof(leaf, &branch, 0);
        let proof = CheckpointProof { root, branch, index: 0 };
        assert!(verify(leaf, &proof, Some(root)));
    }

    #[test]
    fn claimed_root_mismatching_pinned_root_fails_even_if_branch_is_internally_consistent() {
        let leaf = hash_of(1);
        let branch = vec![hash_of(2)];
        let root = root_from_proof(leaf, &branch, 0);
        let proof = CheckpointProof { root, branch, index: 0 };
        assert!(!verify(leaf, &proof, Some(hash_of(0xAA))));
    }

    #[test]
    fn falls_back_to_claimed_root_when_nothing_pinned() {
        let leaf = hash_of(1);
        let branch = vec![hash_of(2)];
        let root = root_from_proof(leaf, &branch, 0);
        let proof = CheckpointProof { root, branch, index: 0 };
        assert!(verify(leaf, &proof, None));
    }
}
