use crate::fraud_proof::FraudProof;
use crate::transaction::{Transaction, TransactionError};
use fp_crypto::Digest;
use fp_merkle::{chunk_range, chunk_stream, ChunkConfig, MerkleError, MerkleTree};
use fp_smt::{SparseMerkleTree, ABSENT_VALUE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("a block must contain at least one transaction")]
    Empty,
    #[error("intermediate state root count {roots} does not match transaction count {txs}")]
    RootCountMismatch { roots: usize, txs: usize },
    #[error("transaction {index} writes key {key} whose claimed old value does not match the state tree")]
    StaleWrite { index: usize, key: Digest },
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("failed to build the data tree: {0}")]
    DataTree(#[from] MerkleError),
}

/// Everything a light client needs to locate and re-authenticate the
/// transition a fraud proof concerns: the state root just before the
/// block's first transaction, every intermediate root the block claims,
/// and the block's two top-level commitments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub pre_block_root: Digest,
    pub inter_state_roots: Vec<Digest>,
    pub data_root: Digest,
    pub state_root: Digest,
}

/// A constructed block: its transactions, the state root claimed after
/// each one, and the dual-tree commitments (`data_root` over the
/// serialized transaction/root stream, `state_root` over key-value state).
#[derive(Debug, Clone)]
pub struct Block {
    transactions: Vec<Transaction>,
    pre_block_root: Digest,
    inter_state_roots: Vec<Digest>,
    data_root: Digest,
    state_root: Digest,
    data_tree: MerkleTree,
    segments: Vec<(usize, usize)>,
}

impl Block {
    /// Applies `transactions` to `state_tree` in order, building a block
    /// that commits to the resulting roots. Mutates `state_tree` in place;
    /// callers that need to keep a prior root around should clone first.
    pub fn new<T: SparseMerkleTree>(
        transactions: Vec<Transaction>,
        state_tree: &mut T,
    ) -> Result<Block, BlockError> {
        if transactions.is_empty() {
            return Err(BlockError::Empty);
        }
        let pre_block_root = state_tree.root();
        let mut inter_state_roots = Vec::with_capacity(transactions.len());
        for (i, tx) in transactions.iter().enumerate() {
            for (key, old) in tx.write_keys().iter().zip(tx.old_data()) {
                let current = state_tree.get(*key).unwrap_or_else(|| ABSENT_VALUE.to_vec());
                if &current != old {
                    return Err(BlockError::StaleWrite { index: i, key: *key });
                }
            }
            for (key, new_value) in tx.write_keys().iter().zip(tx.new_data()) {
                state_tree.update(*key, new_value.clone());
            }
            let root = state_tree.root();
            tracing::debug!(tx_index = i, %root, "applied transaction to state tree");
            inter_state_roots.push(root);
        }
        if inter_state_roots.len() != transactions.len() {
            return Err(BlockError::RootCountMismatch {
                roots: inter_state_roots.len(),
                txs: transactions.len(),
            });
        }
        let state_root = *inter_state_roots.last().expect("non-empty transactions");
        let (data_tree, segments) = build_data_tree(&transactions, &inter_state_roots, pre_block_root)?;
        let data_root = data_tree.root();
        tracing::info!(
            num_tx = transactions.len(),
            %data_root,
            %state_root,
            "constructed block"
        );
        Ok(Block {
            transactions,
            pre_block_root,
            inter_state_roots,
            data_root,
            state_root,
            data_tree,
            segments,
        })
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn inter_state_roots(&self) -> &[Digest] {
        &self.inter_state_roots
    }

    pub fn data_root(&self) -> Digest {
        self.data_root
    }

    pub fn state_root(&self) -> Digest {
        self.state_root
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            pre_block_root: self.pre_block_root,
            inter_state_roots: self.inter_state_roots.clone(),
            data_root: self.data_root,
            state_root: self.state_root,
        }
    }

    /// Re-executes this block's transactions against a clone of
    /// `state_tree`, comparing each recomputed root against the one the
    /// block claims. Returns `Ok(None)` if the block is clean, or a
    /// [`FraudProof`] for the first transaction where the claimed root
    /// diverges from re-execution.
    pub fn check_block<T: SparseMerkleTree>(&self, state_tree: &T) -> Result<Option<FraudProof>, BlockError> {
        if self.transactions.is_empty() {
            return Err(BlockError::Empty);
        }
        if self.inter_state_roots.len() != self.transactions.len() {
            return Err(BlockError::RootCountMismatch {
                roots: self.inter_state_roots.len(),
                txs: self.transactions.len(),
            });
        }

        let mut working = state_tree.clone();
        for (i, tx) in self.transactions.iter().enumerate() {
            tx.validate_structure()?;
            let prior_tree = working.clone();
            for (key, new_value) in tx.write_keys().iter().zip(tx.new_data()) {
                working.update(*key, new_value.clone());
            }
            let recomputed_root = working.root();
            if recomputed_root != self.inter_state_roots[i] {
                tracing::warn!(
                    tx_index = i,
                    claimed = %self.inter_state_roots[i],
                    recomputed = %recomputed_root,
                    "fraud detected during block re-execution"
                );
                return Ok(Some(self.generate_fraud_proof(i, &prior_tree)));
            }
        }
        tracing::info!(num_tx = self.transactions.len(), "block passed re-execution cleanly");
        Ok(None)
    }

    fn generate_fraud_proof<T: SparseMerkleTree>(&self, index: usize, state_before: &T) -> FraudProof {
        let tx = &self.transactions[index];
        let config = ChunkConfig::default();

        let proof_state = tx
            .write_keys()
            .iter()
            .chain(tx.read_keys())
            .map(|key| state_before.prove_compact(*key))
            .collect();

        let (seg_start, seg_end) = self.segments[index];
        let (lo, hi) = chunk_range(seg_start, seg_end, config);
        let mut chunks = Vec::with_capacity(hi - lo + 1);
        let mut proof_chunks = Vec::with_capacity(hi - lo + 1);
        let mut chunk_indexes = Vec::with_capacity(hi - lo + 1);
        for idx in lo..=hi {
            chunks.push(self.data_tree.chunk(idx).expect("segment range within tree").to_vec());
            proof_chunks.push(self.data_tree.prove(idx).expect("segment range within tree"));
            chunk_indexes.push(idx);
        }

        FraudProof {
            write_keys: tx.write_keys().to_vec(),
            old_data: tx.old_data().to_vec(),
            read_keys: tx.read_keys().to_vec(),
            read_data: tx.read_data().to_vec(),
            proof_state,
            chunks,
            proof_chunks,
            chunk_indexes,
            // The segment `[seg_start, seg_end)` this transaction's triple
            // occupies is rarely chunk-aligned; these two fields let the
            // verifier carve the exact span back out of the chunk-aligned
            // `chunks` it just authenticated.
            segment_offset: seg_start - lo * config.chunk_size,
            segment_len: seg_end - seg_start,
            num_leaves: self.data_tree.num_leaves(),
        }
    }

    /// Forces a claimed intermediate root, simulating a malicious producer.
    /// Test-only: the public constructor never lets a caller do this.
    #[cfg(test)]
    pub(crate) fn tamper_inter_state_root(&mut self, index: usize, root: Digest) {
        self.inter_state_roots[index] = root;
        if index == self.inter_state_roots.len() - 1 {
            self.state_root = root;
        }
    }

    /// Builds a block from producer-claimed roots without re-deriving them
    /// from execution, so tests can construct a block whose data tree and
    /// `inter_state_roots` consistently encode a dishonest transition — the
    /// only way to exercise [`crate::fraud_proof::verify_fraud_proof`]
    /// against chunk bytes that actually disagree with correct execution.
    #[cfg(test)]
    pub(crate) fn new_for_test(
        transactions: Vec<Transaction>,
        pre_block_root: Digest,
        inter_state_roots: Vec<Digest>,
    ) -> Result<Block, BlockError> {
        if transactions.is_empty() {
            return Err(BlockError::Empty);
        }
        if inter_state_roots.len() != transactions.len() {
            return Err(BlockError::RootCountMismatch {
                roots: inter_state_roots.len(),
                txs: transactions.len(),
            });
        }
        let state_root = *inter_state_roots.last().expect("non-empty transactions");
        let (data_tree, segments) = build_data_tree(&transactions, &inter_state_roots, pre_block_root)?;
        let data_root = data_tree.root();
        Ok(Block {
            transactions,
            pre_block_root,
            inter_state_roots,
            data_root,
            state_root,
            data_tree,
            segments,
        })
    }
}

/// Serializes `pre_block_root || (tx_0 || root_0) || (tx_1 || root_1) ||
/// ...` and chunks it for the data tree, tracking the byte range each
/// transaction's `(root_{i-1}, tx_i, root_i)` triple occupies so a fraud
/// proof can later pull exactly the chunks that cover it.
fn build_data_tree(
    transactions: &[Transaction],
    inter_state_roots: &[Digest],
    pre_block_root: Digest,
) -> Result<(MerkleTree, Vec<(usize, usize)>), BlockError> {
    let mut stream = Vec::new();
    stream.extend_from_slice(pre_block_root.as_bytes());
    let mut segments = Vec::with_capacity(transactions.len());
    let mut prev_root_start = 0usize;
    for (tx, root) in transactions.iter().zip(inter_state_roots) {
        let seg_start = prev_root_start;
        stream.extend_from_slice(&tx.encode());
        let root_start = stream.len();
        stream.extend_from_slice(root.as_bytes());
        segments.push((seg_start, stream.len()));
        prev_root_start = root_start;
    }
    let config = ChunkConfig::default();
    let chunks = chunk_stream(&stream, config);
    let tree = MerkleTree::from_chunks(chunks)?;
    Ok((tree, segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp_smt::InMemorySmt;

    fn key(byte: u8) -> Digest {
        Digest::hash_bytes(&[byte])
    }

    fn fresh_tx(byte: u8, value: &[u8]) -> Transaction {
        Transaction::new(
            vec![key(byte)],
            vec![value.to_vec()],
            vec![ABSENT_VALUE.to_vec()],
            vec![],
            vec![],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn empty_transaction_list_is_rejected() {
        let mut tree = InMemorySmt::new();
        let err = Block::new(vec![], &mut tree).unwrap_err();
        assert!(matches!(err, BlockError::Empty));
    }

    #[test]
    fn stale_write_is_rejected() {
        let mut tree = InMemorySmt::new();
        tree.update(key(1), b"already-there".to_vec());
        let tx = Transaction::new(
            vec![key(1)],
            vec![b"new".to_vec()],
            vec![ABSENT_VALUE.to_vec()],
            vec![],
            vec![],
            vec![],
        )
        .unwrap();
        let err = Block::new(vec![tx], &mut tree).unwrap_err();
        assert!(matches!(err, BlockError::StaleWrite { index: 0, .. }));
    }

    #[test]
    fn honest_block_produces_no_fraud_proof() {
        let mut producer_tree = InMemorySmt::new();
        let txs = vec![fresh_tx(1, b"a"), fresh_tx(2, b"b"), fresh_tx(3, b"c")];
        let block = Block::new(txs, &mut producer_tree).unwrap();

        let verifier_tree = InMemorySmt::new();
        assert!(block.check_block(&verifier_tree).unwrap().is_none());
    }

    #[test]
    fn tampered_inter_state_root_yields_a_fraud_proof() {
        let mut producer_tree = InMemorySmt::new();
        let txs = vec![fresh_tx(1, b"a"), fresh_tx(2, b"b")];
        let mut block = Block::new(txs, &mut producer_tree).unwrap();
        block.tamper_inter_state_root(0, Digest::hash_bytes(b"forged root"));

        let verifier_tree = InMemorySmt::new();
        let fraud_proof = block.check_block(&verifier_tree).unwrap();
        assert!(fraud_proof.is_some());
    }

    #[test]
    fn dishonest_block_fraud_proof_verifies_as_fraud() {
        let pre_root = InMemorySmt::new().root();
        let txs = vec![fresh_tx(1, b"a"), fresh_tx(2, b"b")];
        let forged_root0 = Digest::hash_bytes(b"forged root");
        let block = Block::new_for_test(txs, pre_root, vec![forged_root0, Digest::default()]).unwrap();
        let header = block.header();

        let verifier_tree = InMemorySmt::new();
        let fraud_proof = block.check_block(&verifier_tree).unwrap().unwrap();
        assert!(crate::fraud_proof::verify_fraud_proof(&fraud_proof, &header).unwrap());
    }
}
