//! A depth-256 sparse Merkle tree keyed by 32-byte digests, plus the
//! "compact proof" primitives that let a fraud-proof verifier update a
//! root without holding the full tree.
//!
//! Every unpopulated subtree hashes to a fixed default value indexed only
//! by its depth from the root — the standard sparse-Merkle-tree trick
//! that makes a 2^256-leaf tree representable at all. A leaf's hash
//! commits to its *value* only; the key that owns it is authenticated
//! positionally, by the bit path a verifier walks from root to leaf, not
//! by being hashed into the leaf. That is what lets "this key is absent"
//! be expressed as an ordinary value (`ABSENT_VALUE`) rather than a
//! special case threaded through every proof.

use fp_crypto::Digest;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of levels in the tree; one per bit of a 32-byte key.
pub const DEPTH: usize = 256;

/// Canonical value of a key that has never been written. Chosen so that
/// the default hash of an empty leaf position is a single depth-indexed
/// constant, independent of which key would occupy it.
pub const ABSENT_VALUE: [u8; 32] = [0u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const INTERNAL_PREFIX: u8 = 0x01;

fn leaf_hash(value: &[u8]) -> Digest {
    let mut preimage = Vec::with_capacity(value.len() + 1);
    preimage.push(LEAF_PREFIX);
    preimage.extend_from_slice(value);
    Digest::hash_bytes(&preimage)
}

fn hash_internal(left: &Digest, right: &Digest) -> Digest {
    let mut preimage = Vec::with_capacity(1 + fp_crypto::DIGEST_LENGTH * 2);
    preimage.push(INTERNAL_PREFIX);
    preimage.extend_from_slice(left.as_bytes());
    preimage.extend_from_slice(right.as_bytes());
    Digest::hash_bytes(&preimage)
}

/// `default_hashes()[d]` is the root hash of a completely empty subtree
/// of depth `d` (0 = the tree's own root, 256 = a single empty leaf).
static DEFAULT_HASHES: Lazy<Vec<Digest>> = Lazy::new(|| {
    let mut table = vec![Digest::default(); DEPTH + 1];
    table[DEPTH] = leaf_hash(&ABSENT_VALUE);
    for d in (0..DEPTH).rev() {
        table[d] = hash_internal(&table[d + 1], &table[d + 1]);
    }
    table
});

fn default_hash(depth: usize) -> Digest {
    DEFAULT_HASHES[depth]
}

/// The empty-tree root, i.e. the state root before any key has ever been
/// written.
pub fn empty_root() -> Digest {
    default_hash(0)
}

fn get_bit(key: &Digest, pos: usize) -> bool {
    let byte = key.as_bytes()[pos / 8];
    let bit = 7 - (pos % 8);
    (byte >> bit) & 1 == 1
}

fn flip_bit(bytes: &mut [u8; 32], pos: usize) {
    let byte = pos / 8;
    let bit = 7 - (pos % 8);
    bytes[byte] ^= 1 << bit;
}

/// `key` with every bit from position `depth` onward cleared, i.e. the
/// node identity shared by every key with the same first `depth` bits.
fn mask_prefix(key: &Digest, depth: usize) -> [u8; 32] {
    let mut out = *key.as_bytes();
    if depth >= DEPTH {
        return out;
    }
    let full_bytes = depth / 8;
    let rem_bits = depth % 8;
    if rem_bits == 0 {
        out[full_bytes..].fill(0);
    } else {
        let mask = 0xFFu8 << (8 - rem_bits);
        out[full_bytes] &= mask;
        out[full_bytes + 1..].fill(0);
    }
    out
}

/// Identity, at depth `depth`, of the sibling of `key`'s node — same
/// first `depth - 1` bits, opposite bit at position `depth - 1`.
fn sibling_prefix(key: &Digest, depth: usize) -> Digest {
    let mut bytes = mask_prefix(key, depth);
    flip_bit(&mut bytes, depth - 1);
    Digest::new(bytes)
}

/// Sibling digests authenticating one key's path from leaf to root,
/// ordered leaf-first (`siblings[0]` is the leaf's sibling,
/// `siblings[DEPTH - 1]` is the sibling of the node just below the root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactProof {
    pub siblings: Vec<Digest>,
}

fn fold(siblings: &[Digest], key: &Digest, leaf: Digest) -> Option<Digest> {
    if siblings.len() != DEPTH {
        return None;
    }
    let mut current = leaf;
    for (i, depth) in (1..=DEPTH).rev().enumerate() {
        let bit = get_bit(key, depth - 1);
        let sibling = siblings[i];
        current = if bit {
            hash_internal(&sibling, &current)
        } else {
            hash_internal(&current, &sibling)
        };
    }
    Some(current)
}

/// Verify that `key` has `value` in the tree rooted at `root`, using only
/// `proof`'s sibling digests. Works identically for present keys and for
/// `value == ABSENT_VALUE` proving absence.
pub fn verify_compact(proof: &CompactProof, root: Digest, key: Digest, value: &[u8]) -> bool {
    match fold(&proof.siblings, &key, leaf_hash(value)) {
        Some(computed) => computed == root,
        None => false,
    }
}

/// Apply an update to `root` without holding the full tree. Re-derives
/// `root` from `old_value` and `proof`'s siblings — returning `None` if
/// it does not match — then folds the same siblings with `new_value` to
/// produce the next root.
pub fn update_from_compact(
    proof: &CompactProof,
    key: Digest,
    old_value: &[u8],
    new_value: &[u8],
    root: Digest,
) -> Option<Digest> {
    if !verify_compact(proof, root, key, old_value) {
        return None;
    }
    fold(&proof.siblings, &key, leaf_hash(new_value))
}

/// The authenticated key-value state tree. `get`/`update`/`prove_compact`
/// are the operations a block producer needs; `verify_compact` and
/// `update_from_compact` above are free functions so a stateless verifier
/// can use them without ever holding an implementation of this trait.
pub trait SparseMerkleTree: Clone {
    fn root(&self) -> Digest;
    fn update(&mut self, key: Digest, value: Vec<u8>) -> Digest;
    fn get(&self, key: Digest) -> Option<Vec<u8>>;
    fn prove_compact(&self, key: Digest) -> CompactProof;
}

/// In-memory sparse Merkle tree. Stores only the nodes actually touched
/// by an update, keyed by `(depth, prefix)`; every other position is
/// implicitly the depth's default hash. Suitable for tests and
/// single-process nodes; a durable backend implements the same trait
/// against persistent storage.
#[derive(Debug, Clone, Default)]
pub struct InMemorySmt {
    nodes: HashMap<(u16, Digest), Digest>,
    values: HashMap<Digest, Vec<u8>>,
}

impl InMemorySmt {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_at(&self, depth: usize, prefix: Digest) -> Digest {
        self.nodes
            .get(&(depth as u16, prefix))
            .copied()
            .unwrap_or_else(|| default_hash(depth))
    }
}

impl SparseMerkleTree for InMemorySmt {
    fn root(&self) -> Digest {
        self.node_at(0, Digest::default())
    }

    fn update(&mut self, key: Digest, value: Vec<u8>) -> Digest {
        let leaf = leaf_hash(&value);
        self.nodes.insert((DEPTH as u16, key), leaf);
        if value == ABSENT_VALUE {
            self.values.remove(&key);
        } else {
            self.values.insert(key, value);
        }

        let mut current = leaf;
        for depth in (1..=DEPTH).rev() {
            let sibling = self.node_at(depth, sibling_prefix(&key, depth));
            let bit = get_bit(&key, depth - 1);
            current = if bit {
                hash_internal(&sibling, &current)
            } else {
                hash_internal(&current, &sibling)
            };
            let parent_prefix = Digest::new(mask_prefix(&key, depth - 1));
            self.nodes.insert(((depth - 1) as u16, parent_prefix), current);
        }
        tracing::trace!(key = %key, root = %current, "smt update");
        current
    }

    fn get(&self, key: Digest) -> Option<Vec<u8>> {
        self.values.get(&key).cloned()
    }

    fn prove_compact(&self, key: Digest) -> CompactProof {
        let siblings = (1..=DEPTH)
            .rev()
            .map(|depth| self.node_at(depth, sibling_prefix(&key, depth)))
            .collect();
        CompactProof { siblings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key_of(byte: u8) -> Digest {
        Digest::hash_bytes(&[byte])
    }

    #[test]
    fn empty_tree_root_is_stable() {
        let tree = InMemorySmt::new();
        assert_eq!(tree.root(), empty_root());
    }

    #[test]
    fn update_changes_root_and_is_gettable() {
        let mut tree = InMemorySmt::new();
        let root0 = tree.root();
        let root1 = tree.update(key_of(1), b"hello".to_vec());
        assert_ne!(root0, root1);
        assert_eq!(tree.get(key_of(1)), Some(b"hello".to_vec()));
        assert_eq!(tree.root(), root1);
    }

    #[test]
    fn absent_key_reads_as_none() {
        let tree = InMemorySmt::new();
        assert_eq!(tree.get(key_of(9)), None);
    }

    #[test]
    fn compact_proof_verifies_presence_and_absence() {
        let mut tree = InMemorySmt::new();
        tree.update(key_of(1), b"value-a".to_vec());
        let root = tree.root();

        let present_proof = tree.prove_compact(key_of(1));
        assert!(verify_compact(&present_proof, root, key_of(1), b"value-a"));
        assert!(!verify_compact(&present_proof, root, key_of(1), b"wrong"));

        let absent_proof = tree.prove_compact(key_of(2));
        assert!(verify_compact(&absent_proof, root, key_of(2), &ABSENT_VALUE));
        assert!(!verify_compact(&absent_proof, root, key_of(2), b"spurious"));
    }

    #[test]
    fn update_from_compact_matches_live_update() {
        let mut tree = InMemorySmt::new();
        let root0 = tree.root();
        let proof = tree.prove_compact(key_of(7));

        let live_root = tree.update(key_of(7), b"new".to_vec());
        let remote_root =
            update_from_compact(&proof, key_of(7), &ABSENT_VALUE, b"new", root0).unwrap();
        assert_eq!(live_root, remote_root);
    }

    #[test]
    fn update_from_compact_rejects_wrong_old_value() {
        let mut tree = InMemorySmt::new();
        tree.update(key_of(3), b"first".to_vec());
        let root = tree.root();
        let proof = tree.prove_compact(key_of(3));

        assert!(update_from_compact(&proof, key_of(3), b"not-first", b"second", root).is_none());
        assert!(update_from_compact(&proof, key_of(3), b"first", b"second", root).is_some());
    }

    #[test]
    fn tampered_sibling_breaks_verification() {
        let mut tree = InMemorySmt::new();
        tree.update(key_of(4), b"v".to_vec());
        let root = tree.root();
        let mut proof = tree.prove_compact(key_of(4));
        proof.siblings[10] = Digest::hash_bytes(b"forged");
        assert!(!verify_compact(&proof, root, key_of(4), b"v"));
    }

    proptest! {
        #[test]
        fn random_keys_round_trip_through_many_updates(
            updates in proptest::collection::vec((any::<u8>(), proptest::collection::vec(any::<u8>(), 1..16)), 1..30)
        ) {
            let mut tree = InMemorySmt::new();
            for (k, v) in &updates {
                tree.update(key_of(*k), v.clone());
            }
            for (k, _) in &updates {
                let root = tree.root();
                let proof = tree.prove_compact(key_of(*k));
                let stored = tree.get(key_of(*k)).unwrap();
                prop_assert!(verify_compact(&proof, root, key_of(*k), &stored));
            }
        }
    }
}
