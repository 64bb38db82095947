//! Merkle inclusion proofs over the recent burn-hash window
//!
//! The destination chain's quorum contract checks that a claimed burn sits in
//! the source chain's recent history without replaying the whole ledger. The
//! proof covers the most recent window of burn hashes (at most
//! [`PROOF_WINDOW`]), so proof size stays constant as the ledger grows.
//!
//! Tree construction: leaves are the raw 32-byte burn hashes in ledger order.
//! Each level hashes concatenated pairs with SHA-256. An odd node count at any
//! level pairs the last node with itself (duplication, not promotion), so the
//! rule is unambiguous on both sides of the bridge.

use alloy::primitives::B256;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum number of recent burn hashes covered by one proof.
pub const PROOF_WINDOW: usize = 16;

/// A sibling on the path from leaf to root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    pub hash: B256,
    /// True when the sibling sits to the right of the running hash
    pub sibling_on_right: bool,
}

/// Inclusion proof for one burn hash within a leaf window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: B256,
    pub path: Vec<ProofNode>,
    pub root: B256,
}

fn hash_pair(left: B256, right: B256) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    B256::from_slice(&hasher.finalize())
}

/// Compute the root over a leaf window.
pub fn merkle_root(leaves: &[B256]) -> Result<B256> {
    if leaves.is_empty() {
        return Err(eyre!("Cannot build a Merkle tree over zero leaves"));
    }
    if leaves.len() > PROOF_WINDOW {
        return Err(eyre!(
            "Leaf window {} exceeds the proof window of {}",
            leaves.len(),
            PROOF_WINDOW
        ));
    }

    let mut level: Vec<B256> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            next.push(hash_pair(left, right));
        }
        level = next;
    }
    Ok(level[0])
}

/// Build an inclusion proof for `leaf` within `leaves`.
///
/// When a hash appears more than once (it cannot, on a well-formed ledger),
/// the first occurrence is proven.
pub fn prove(leaves: &[B256], leaf: B256) -> Result<MerkleProof> {
    if leaves.is_empty() {
        return Err(eyre!("Cannot build a Merkle proof over zero leaves"));
    }
    if leaves.len() > PROOF_WINDOW {
        return Err(eyre!(
            "Leaf window {} exceeds the proof window of {}",
            leaves.len(),
            PROOF_WINDOW
        ));
    }
    let mut index = leaves
        .iter()
        .position(|l| *l == leaf)
        .ok_or_else(|| eyre!("Leaf {leaf} is not in the proof window"))?;

    let mut path = Vec::new();
    let mut level: Vec<B256> = leaves.to_vec();
    while level.len() > 1 {
        let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
        // Odd level width: the last node is its own sibling
        let sibling = if sibling_index < level.len() {
            level[sibling_index]
        } else {
            level[index]
        };
        path.push(ProofNode {
            hash: sibling,
            sibling_on_right: index % 2 == 0,
        });

        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            next.push(hash_pair(left, right));
        }
        level = next;
        index /= 2;
    }

    Ok(MerkleProof {
        leaf,
        path,
        root: level[0],
    })
}

/// Recompute the root from leaf and path, compare against `root`.
pub fn verify(root: B256, leaf: B256, path: &[ProofNode]) -> bool {
    let mut running = leaf;
    for node in path {
        running = if node.sibling_on_right {
            hash_pair(running, node.hash)
        } else {
            hash_pair(node.hash, running)
        };
    }
    running == root
}

impl MerkleProof {
    /// Sibling hashes in leaf-to-root order, as submitted on-chain.
    pub fn sibling_hashes(&self) -> Vec<B256> {
        self.path.iter().map(|node| node.hash).collect()
    }

    pub fn is_valid(&self) -> bool {
        verify(self.root, self.leaf, &self.path)
    }
}
