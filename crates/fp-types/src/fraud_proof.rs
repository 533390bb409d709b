use crate::block::BlockHeader;
use crate::codec::{write_seq, write_u32, Cursor};
use crate::transaction::{Transaction, TransactionError};
use fp_crypto::Digest;
use fp_merkle::{ChunkConfig, InclusionProof, Side};
use fp_smt::{verify_compact, CompactProof, DEPTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("failed to decode fraud proof: {0}")]
    Decode(String),
    #[error("proof_state has {got} entries, expected {expected} (one per write_keys + read_keys entry)")]
    ProofStateLength { got: usize, expected: usize },
    #[error("chunk {0} failed inclusion verification against the claimed data root")]
    ChunkAuth(usize),
    #[error("reassembled chunks do not contain a well-formed transaction")]
    MalformedReassembly,
    #[error("reassembled transaction fields disagree with the fraud proof's own fields")]
    FieldMismatch,
    #[error("the transition this proof concerns cannot be located in the block header")]
    UnlocatedTransition,
}

/// A compact, self-contained witness that one transaction inside a block
/// was executed incorrectly: the pieces of the data tree that contain it,
/// and the state-tree proofs needed to re-run it without the full state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudProof {
    pub write_keys: Vec<Digest>,
    pub old_data: Vec<Vec<u8>>,
    pub read_keys: Vec<Digest>,
    pub read_data: Vec<Vec<u8>>,
    /// One compact proof per key in `write_keys` followed by `read_keys`,
    /// all against the state root immediately before this transaction.
    pub proof_state: Vec<CompactProof>,
    pub chunks: Vec<Vec<u8>>,
    pub proof_chunks: Vec<InclusionProof>,
    pub chunk_indexes: Vec<usize>,
    /// Byte offset, within the concatenation of `chunks` in order, where the
    /// `enc(prevRoot) || enc(tx) || enc(postRoot)` triple begins. `chunks`
    /// covers a chunk-size-aligned superset of the triple's exact byte
    /// range, so this is generally nonzero.
    pub segment_offset: usize,
    /// Exact length in bytes of the `enc(prevRoot) || enc(tx) ||
    /// enc(postRoot)` triple starting at `segment_offset`.
    pub segment_len: usize,
    pub num_leaves: usize,
}

impl FraudProof {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_seq(
            &mut buf,
            &self.write_keys.iter().map(|k| k.to_vec()).collect::<Vec<_>>(),
        );
        write_seq(&mut buf, &self.old_data);
        write_seq(
            &mut buf,
            &self.read_keys.iter().map(|k| k.to_vec()).collect::<Vec<_>>(),
        );
        write_seq(&mut buf, &self.read_data);
        write_seq(
            &mut buf,
            &self.proof_state.iter().map(encode_compact_proof).collect::<Vec<_>>(),
        );
        write_seq(&mut buf, &self.chunks);
        write_seq(
            &mut buf,
            &self
                .proof_chunks
                .iter()
                .map(encode_inclusion_proof)
                .collect::<Vec<_>>(),
        );
        write_seq(
            &mut buf,
            &self
                .chunk_indexes
                .iter()
                .map(|i| (*i as u32).to_be_bytes().to_vec())
                .collect::<Vec<_>>(),
        );
        write_u32(&mut buf, self.segment_offset as u32);
        write_u32(&mut buf, self.segment_len as u32);
        write_u32(&mut buf, self.num_leaves as u32);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProofError> {
        let mut cursor = Cursor::new(bytes);
        let write_keys = decode_key_seq(&mut cursor)?;
        let old_data = cursor.read_seq().map_err(|e| ProofError::Decode(e.to_string()))?;
        let read_keys = decode_key_seq(&mut cursor)?;
        let read_data = cursor.read_seq().map_err(|e| ProofError::Decode(e.to_string()))?;
        let proof_state = cursor
            .read_seq()
            .map_err(|e| ProofError::Decode(e.to_string()))?
            .into_iter()
            .map(|b| decode_compact_proof(&b))
            .collect::<Result<Vec<_>, _>>()?;
        let chunks = cursor.read_seq().map_err(|e| ProofError::Decode(e.to_string()))?;
        let proof_chunks = cursor
            .read_seq()
            .map_err(|e| ProofError::Decode(e.to_string()))?
            .into_iter()
            .map(|b| decode_inclusion_proof(&b))
            .collect::<Result<Vec<_>, _>>()?;
        let chunk_indexes = cursor
            .read_seq()
            .map_err(|e| ProofError::Decode(e.to_string()))?
            .into_iter()
            .map(|b| decode_u32_field(&b).map(|n| n as usize))
            .collect::<Result<Vec<_>, _>>()?;
        let segment_offset = cursor.read_u32().map_err(|e| ProofError::Decode(e.to_string()))? as usize;
        let segment_len = cursor.read_u32().map_err(|e| ProofError::Decode(e.to_string()))? as usize;
        let num_leaves = cursor.read_u32().map_err(|e| ProofError::Decode(e.to_string()))? as usize;
        cursor.finish().map_err(|e| ProofError::Decode(e.to_string()))?;

        let expected = write_keys.len() + read_keys.len();
        if proof_state.len() != expected {
            return Err(ProofError::ProofStateLength {
                got: proof_state.len(),
                expected,
            });
        }

        Ok(FraudProof {
            write_keys,
            old_data,
            read_keys,
            read_data,
            proof_state,
            chunks,
            proof_chunks,
            chunk_indexes,
            segment_offset,
            segment_len,
            num_leaves,
        })
    }
}

fn encode_compact_proof(proof: &CompactProof) -> Vec<u8> {
    let mut buf = Vec::with_capacity(proof.siblings.len() * fp_crypto::DIGEST_LENGTH);
    for sibling in &proof.siblings {
        buf.extend_from_slice(sibling.as_bytes());
    }
    buf
}

fn decode_compact_proof(bytes: &[u8]) -> Result<CompactProof, ProofError> {
    if bytes.len() != DEPTH * fp_crypto::DIGEST_LENGTH {
        return Err(ProofError::Decode(format!(
            "compact proof has {} bytes, expected {}",
            bytes.len(),
            DEPTH * fp_crypto::DIGEST_LENGTH
        )));
    }
    let siblings = bytes
        .chunks(fp_crypto::DIGEST_LENGTH)
        .map(Digest::from_slice)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProofError::Decode(e.to_string()))?;
    Ok(CompactProof { siblings })
}

fn encode_inclusion_proof(proof: &InclusionProof) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, proof.siblings.len() as u32);
    for (side, digest) in &proof.siblings {
        buf.push(match side {
            Side::Left => 0,
            Side::Right => 1,
        });
        buf.extend_from_slice(digest.as_bytes());
    }
    buf
}

fn decode_inclusion_proof(bytes: &[u8]) -> Result<InclusionProof, ProofError> {
    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_u32().map_err(|e| ProofError::Decode(e.to_string()))? as usize;
    let mut siblings = Vec::new();
    for _ in 0..count {
        let side_byte = cursor
            .read_bytes(1)
            .map_err(|e| ProofError::Decode(e.to_string()))?[0];
        let side = match side_byte {
            0 => Side::Left,
            1 => Side::Right,
            other => return Err(ProofError::Decode(format!("invalid side byte {other}"))),
        };
        let digest_bytes = cursor
            .read_bytes(fp_crypto::DIGEST_LENGTH)
            .map_err(|e| ProofError::Decode(e.to_string()))?;
        let digest = Digest::from_slice(digest_bytes).map_err(|e| ProofError::Decode(e.to_string()))?;
        siblings.push((side, digest));
    }
    cursor.finish().map_err(|e| ProofError::Decode(e.to_string()))?;
    Ok(InclusionProof { siblings })
}

fn decode_u32_field(bytes: &[u8]) -> Result<u32, ProofError> {
    if bytes.len() != 4 {
        return Err(ProofError::Decode(format!("u32 field has {} bytes, expected 4", bytes.len())));
    }
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

fn decode_key_seq(cursor: &mut Cursor<'_>) -> Result<Vec<Digest>, ProofError> {
    cursor
        .read_seq()
        .map_err(|e| ProofError::Decode(e.to_string()))?
        .into_iter()
        .map(|bytes| Digest::from_slice(&bytes).map_err(|e| ProofError::Decode(e.to_string())))
        .collect()
}

/// Checks the chunks carry a consistent data-tree witness, reassembles the
/// `(prevRoot, tx, claimedPostRoot)` triple they encode, locates that
/// transition within `header.inter_state_roots`, and re-executes the
/// transaction against the state proofs to see whether the claimed post
/// root is actually reachable. A fraud proof is valid — i.e. the block it
/// accuses really is faulty — iff every chunk authenticates, the
/// reassembled fields agree with the proof's own, the transition is
/// genuinely part of the header, and re-execution disagrees with the
/// claimed post root.
pub fn verify_fraud_proof(proof: &FraudProof, header: &BlockHeader) -> Result<bool, ProofError> {
    if proof.chunks.len() != proof.proof_chunks.len() || proof.chunks.len() != proof.chunk_indexes.len() {
        return Err(ProofError::MalformedReassembly);
    }
    for ((chunk, chunk_proof), &index) in proof
        .chunks
        .iter()
        .zip(&proof.proof_chunks)
        .zip(&proof.chunk_indexes)
    {
        if !chunk_proof.verify(chunk, index, proof.num_leaves, header.data_root) {
            return Ok(false);
        }
    }

    let config = ChunkConfig::default();
    let mut reassembled = Vec::with_capacity(proof.chunks.len() * config.chunk_size);
    for chunk in &proof.chunks {
        reassembled.extend_from_slice(chunk);
    }

    // `chunks` covers a chunk-size-aligned superset of the transaction's
    // triple; carve the exact `enc(prevRoot) || enc(tx) || enc(postRoot)`
    // span back out before splitting it into its three fields.
    let segment = reassembled
        .get(proof.segment_offset..)
        .and_then(|rest| rest.get(..proof.segment_len))
        .ok_or(ProofError::MalformedReassembly)?;
    if segment.len() < fp_crypto::DIGEST_LENGTH * 2 {
        return Err(ProofError::MalformedReassembly);
    }

    let prev_root_bytes = &segment[..fp_crypto::DIGEST_LENGTH];
    let prev_root = Digest::from_slice(prev_root_bytes).map_err(|_| ProofError::MalformedReassembly)?;

    let tx_and_root = &segment[fp_crypto::DIGEST_LENGTH..];
    let tail_start = tx_and_root
        .len()
        .checked_sub(fp_crypto::DIGEST_LENGTH)
        .ok_or(ProofError::MalformedReassembly)?;
    let claimed_post_root =
        Digest::from_slice(&tx_and_root[tail_start..]).map_err(|_| ProofError::MalformedReassembly)?;
    let tx_bytes = &tx_and_root[..tail_start];

    let reassembled_tx = Transaction::decode(tx_bytes).map_err(decode_err_to_proof_err)?;
    if reassembled_tx.write_keys() != proof.write_keys.as_slice()
        || reassembled_tx.old_data() != proof.old_data.as_slice()
        || reassembled_tx.read_keys() != proof.read_keys.as_slice()
        || reassembled_tx.read_data() != proof.read_data.as_slice()
    {
        return Ok(false);
    }

    let transition_index = match locate_transition(header, prev_root, claimed_post_root) {
        Ok(i) => i,
        Err(_) => return Ok(false),
    };
    let _ = transition_index;

    for (key, old_value, proof_entry) in std::iter::empty::<(Digest, &[u8], &CompactProof)>()
        .chain(
            proof
                .write_keys
                .iter()
                .zip(proof.old_data.iter())
                .zip(proof.proof_state.iter())
                .map(|((k, v), p)| (*k, v.as_slice(), p)),
        )
        .chain(
            proof
                .read_keys
                .iter()
                .zip(proof.read_data.iter())
                .zip(proof.proof_state.iter().skip(proof.write_keys.len()))
                .map(|((k, v), p)| (*k, v.as_slice(), p)),
        )
    {
        if !verify_compact(proof_entry, prev_root, key, old_value) {
            return Ok(false);
        }
    }

    let mut current = prev_root;
    for ((key, old_value), (new_value, proof_entry)) in proof
        .write_keys
        .iter()
        .zip(proof.old_data.iter())
        .zip(reassembled_tx.new_data().iter().zip(proof.proof_state.iter()))
    {
        match fp_smt::update_from_compact(proof_entry, *key, old_value, new_value, current) {
            Some(next) => current = next,
            None => return Ok(false),
        }
    }

    Ok(current != claimed_post_root)
}

fn locate_transition(header: &BlockHeader, prev_root: Digest, claimed_post_root: Digest) -> Result<usize, ProofError> {
    if prev_root == header.pre_block_root {
        if header.inter_state_roots.first() == Some(&claimed_post_root) {
            return Ok(0);
        }
    }
    for (i, root) in header.inter_state_roots.iter().enumerate() {
        if *root == prev_root && header.inter_state_roots.get(i + 1) == Some(&claimed_post_root) {
            return Ok(i + 1);
        }
    }
    Err(ProofError::UnlocatedTransition)
}

fn decode_err_to_proof_err(e: TransactionError) -> ProofError {
    ProofError::Decode(e.to_string())
}
