//! Block, transaction and fraud-proof types for a chain that commits to
//! both its key-value state (a sparse Merkle tree) and the serialized
//! stream of transactions and intermediate roots that produced it (a
//! chunked Merkle "data tree"). A light client that only trusts a block's
//! two roots can verify a single [`FraudProof`] against a tiny slice of
//! the data tree plus a handful of state-tree compact proofs, without ever
//! holding the full state or the full block body.

mod block;
mod blockchain;
mod codec;
mod fraud_proof;
mod transaction;

pub use block::{Block, BlockError, BlockHeader};
pub use blockchain::Blockchain;
pub use fraud_proof::{verify_fraud_proof, FraudProof, ProofError};
pub use transaction::{Transaction, TransactionError};

/// Chunking parameters for the data tree. An alias rather than a new type:
/// the data tree's shape is entirely determined by [`fp_merkle::ChunkConfig`].
pub type DataTreeConfig = fp_merkle::ChunkConfig;

pub use fp_crypto::Digest;
pub use fp_smt::{InMemorySmt, SparseMerkleTree, ABSENT_VALUE};
