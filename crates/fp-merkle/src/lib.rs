//! A Merkle tree over fixed-size chunks of an arbitrary byte stream.
//!
//! This is the "data tree" of the commitment core: the block's serialized
//! transaction/intermediate-state stream is sliced into fixed-size chunks,
//! and this tree commits to the chunk sequence so that any contiguous range
//! of chunks can be authenticated against a single root without shipping
//! the rest of the block.
//!
//! The tree shape follows the usual certificate-transparency convention:
//! for `n > 1` leaves the set is split at the largest power of two `k < n`,
//! the left `k` leaves and right `n - k` leaves are each rooted
//! recursively, and the two subroots are combined. This keeps inclusion
//! proofs logarithmic for any leaf count, not just powers of two, and
//! avoids the ambiguity of leaf-duplication schemes under chunk-count
//! changes.

use fp_crypto::Digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LEAF_PREFIX: u8 = 0x00;
const INTERNAL_PREFIX: u8 = 0x01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("cannot build a Merkle tree over zero chunks")]
    EmptyTree,
    #[error("leaf index {index} out of range for a tree with {num_leaves} leaves")]
    IndexOutOfRange { index: usize, num_leaves: usize },
}

fn hash_leaf(chunk: &[u8]) -> Digest {
    let mut preimage = Vec::with_capacity(chunk.len() + 1);
    preimage.push(LEAF_PREFIX);
    preimage.extend_from_slice(chunk);
    Digest::hash_bytes(&preimage)
}

fn hash_internal(left: &Digest, right: &Digest) -> Digest {
    let mut preimage = Vec::with_capacity(1 + fp_crypto::DIGEST_LENGTH * 2);
    preimage.push(INTERNAL_PREFIX);
    preimage.extend_from_slice(left.as_bytes());
    preimage.extend_from_slice(right.as_bytes());
    Digest::hash_bytes(&preimage)
}

/// Largest power of two strictly smaller than `n` (`n` must be `> 1`).
fn split_point(n: usize) -> usize {
    debug_assert!(n > 1, "split_point requires at least two leaves");
    let mut k = 1usize;
    while k * 2 < n {
        k *= 2;
    }
    k
}

fn root_of(leaves: &[Digest]) -> Digest {
    match leaves.len() {
        0 => unreachable!("root_of is never called on an empty slice"),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            let left = root_of(&leaves[..k]);
            let right = root_of(&leaves[k..]);
            hash_internal(&left, &right)
        }
    }
}

/// Which side of its parent a proof's sibling digest sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// A logarithmic-size inclusion proof for one leaf of a [`MerkleTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InclusionProof {
    /// Sibling digests from the leaf's parent up to the root.
    pub siblings: Vec<(Side, Digest)>,
}

impl InclusionProof {
    /// Verify that `chunk`, at `index` within a tree of `num_leaves` total
    /// leaves, authenticates against `root`.
    pub fn verify(&self, chunk: &[u8], index: usize, num_leaves: usize, root: Digest) -> bool {
        if num_leaves == 0 || index >= num_leaves {
            return false;
        }
        match verify_rec(num_leaves, index, hash_leaf(chunk), &self.siblings) {
            Some(computed) => computed == root,
            None => false,
        }
    }
}

fn verify_rec(num_leaves: usize, index: usize, leaf_hash: Digest, path: &[(Side, Digest)]) -> Option<Digest> {
    if num_leaves == 1 {
        return if path.is_empty() { Some(leaf_hash) } else { None };
    }
    let (side, sibling) = path.first()?;
    let k = split_point(num_leaves);
    if index < k {
        let sub = verify_rec(k, index, leaf_hash, &path[1..])?;
        match side {
            Side::Right => Some(hash_internal(&sub, sibling)),
            Side::Left => None,
        }
    } else {
        let sub = verify_rec(num_leaves - k, index - k, leaf_hash, &path[1..])?;
        match side {
            Side::Left => Some(hash_internal(sibling, &sub)),
            Side::Right => None,
        }
    }
}

fn prove_rec(leaves: &[Digest], index: usize, acc: &mut Vec<(Side, Digest)>) {
    if leaves.len() == 1 {
        return;
    }
    let k = split_point(leaves.len());
    if index < k {
        acc.push((Side::Right, root_of(&leaves[k..])));
        prove_rec(&leaves[..k], index, acc);
    } else {
        acc.push((Side::Left, root_of(&leaves[..k])));
        prove_rec(&leaves[k..], index - k, acc);
    }
}

/// A Merkle tree over a fixed sequence of raw byte chunks.
///
/// Built once from the chunk sequence and then immutable; owns both the
/// raw chunks (needed to carry them inside a fraud proof) and their leaf
/// digests (needed to build proofs without re-hashing on every call).
#[derive(Debug, Clone)]
pub struct MerkleTree {
    chunks: Vec<Vec<u8>>,
    leaf_hashes: Vec<Digest>,
    root: Digest,
}

impl MerkleTree {
    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Result<Self, MerkleError> {
        if chunks.is_empty() {
            return Err(MerkleError::EmptyTree);
        }
        let leaf_hashes: Vec<Digest> = chunks.iter().map(|c| hash_leaf(c)).collect();
        let root = root_of(&leaf_hashes);
        tracing::debug!(num_leaves = chunks.len(), root = %root, "built data tree");
        Ok(Self {
            chunks,
            leaf_hashes,
            root,
        })
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn num_leaves(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, index: usize) -> Result<&[u8], MerkleError> {
        self.chunks
            .get(index)
            .map(|c| c.as_slice())
            .ok_or(MerkleError::IndexOutOfRange {
                index,
                num_leaves: self.chunks.len(),
            })
    }

    pub fn prove(&self, index: usize) -> Result<InclusionProof, MerkleError> {
        if index >= self.leaf_hashes.len() {
            return Err(MerkleError::IndexOutOfRange {
                index,
                num_leaves: self.leaf_hashes.len(),
            });
        }
        let mut siblings = Vec::new();
        prove_rec(&self.leaf_hashes, index, &mut siblings);
        Ok(InclusionProof { siblings })
    }
}

/// Configuration for slicing a byte stream into the data tree's leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub chunk_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { chunk_size: 256 }
    }
}

/// Slice `data` into fixed-size chunks, zero-padding the final chunk.
/// `data` must be non-empty; `chunk_size` must be non-zero.
pub fn chunk_stream(data: &[u8], config: ChunkConfig) -> Vec<Vec<u8>> {
    assert!(config.chunk_size > 0, "chunk_size must be non-zero");
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(config.chunk_size)
        .map(|c| {
            if c.len() == config.chunk_size {
                c.to_vec()
            } else {
                let mut padded = c.to_vec();
                padded.resize(config.chunk_size, 0);
                padded
            }
        })
        .collect()
}

/// The contiguous chunk range `[lo, hi]` (inclusive) covering byte offsets
/// `[start, end)` of the original stream.
pub fn chunk_range(start: usize, end: usize, config: ChunkConfig) -> (usize, usize) {
    assert!(end > start, "range must be non-empty");
    let lo = start / config.chunk_size;
    let hi = (end - 1) / config.chunk_size;
    (lo, hi)
}
