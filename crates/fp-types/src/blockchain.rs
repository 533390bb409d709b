use crate::block::{Block, BlockError};
use crate::fraud_proof::FraudProof;
use fp_crypto::Digest;
use fp_smt::SparseMerkleTree;

/// A chain of accepted blocks sitting on top of a single state tree. Each
/// appended block is re-executed against the chain's own state before its
/// writes are admitted, so the chain's state root never advances unless a
/// block's claims actually hold up.
#[derive(Debug, Clone)]
pub struct Blockchain<T: SparseMerkleTree> {
    blocks: Vec<Block>,
    state_tree: T,
}

impl<T: SparseMerkleTree> Blockchain<T> {
    pub fn new(state_tree: T) -> Self {
        Self {
            blocks: Vec::new(),
            state_tree,
        }
    }

    pub fn tip_state_root(&self) -> Digest {
        self.state_tree.root()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn state_tree(&self) -> &T {
        &self.state_tree
    }

    /// Re-executes `block` against the chain's current state. If it checks
    /// out, its writes are committed and the block is appended; otherwise
    /// the chain is left untouched and the fraud proof is returned to the
    /// caller instead.
    pub fn append(&mut self, block: Block) -> Result<Option<FraudProof>, BlockError> {
        if let Some(fraud_proof) = block.check_block(&self.state_tree)? {
            tracing::warn!(num_tx = block.transactions().len(), "rejecting block: fraud proof generated");
            return Ok(Some(fraud_proof));
        }
        for tx in block.transactions() {
            for (key, new_value) in tx.write_keys().iter().zip(tx.new_data()) {
                self.state_tree.update(*key, new_value.clone());
            }
        }
        tracing::info!(
            height = self.blocks.len() + 1,
            new_root = %self.state_tree.root(),
            "appended block"
        );
        self.blocks.push(block);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use fp_smt::{InMemorySmt, ABSENT_VALUE};

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
    fn honest_blocks_advance_the_chain() {
        let mut chain = Blockchain::new(InMemorySmt::new());
        let root0 = chain.tip_state_root();

        let mut producer_tree = InMemorySmt::new();
        let block = Block::new(vec![fresh_tx(1, b"a")], &mut producer_tree).unwrap();
        let result = chain.append(block).unwrap();
        assert!(result.is_none());
        assert_eq!(chain.blocks().len(), 1);
        assert_ne!(chain.tip_state_root(), root0);
    }

    #[test]
    fn dishonest_block_is_rejected_without_mutating_state() {
        let mut chain = Blockchain::new(InMemorySmt::new());
        let root0 = chain.tip_state_root();

        let block = Block::new_for_test(vec![fresh_tx(1, b"a")], root0, vec![Digest::hash_bytes(b"forged")]).unwrap();
        let result = chain.append(block).unwrap();
        assert!(result.is_some());
        assert!(chain.blocks().is_empty());
        assert_eq!(chain.tip_state_root(), root0);
    }

    #[test]
    fn second_block_builds_on_first() {
        let mut chain = Blockchain::new(InMemorySmt::new());

        let mut producer_tree = InMemorySmt::new();
        let block1 = Block::new(vec![fresh_tx(1, b"a")], &mut producer_tree).unwrap();
        chain.append(block1).unwrap();

        let block2 = Block::new(vec![fresh_tx(2, b"b")], &mut producer_tree).unwrap();
        let result = chain.append(block2).unwrap();
        assert!(result.is_none());
        assert_eq!(chain.blocks().len(), 2);
        assert_eq!(chain.tip_state_root(), producer_tree.root());
    }
}
