use crate::codec::{write_field, write_seq, Cursor};
use fp_crypto::Digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error(
        "write_keys/new_data/old_data length mismatch: {write_keys} keys, {new_data} new values, {old_data} old values"
    )]
    LengthMismatch {
        write_keys: usize,
        new_data: usize,
        old_data: usize,
    },
    #[error("read_keys/read_data length mismatch: {read_keys} keys, {read_data} values")]
    ReadLengthMismatch { read_keys: usize, read_data: usize },
    #[error("failed to decode transaction: {0}")]
    Decode(String),
}

/// A single state transition: a set of writes, the reads it claims to have
/// observed, and an opaque payload not interpreted by the commitment core.
///
/// Invariant (checked once, at construction, and never re-derivable from a
/// `Transaction` value afterward): `write_keys`, `new_data` and `old_data`
/// have equal length, as do `read_keys` and `read_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    write_keys: Vec<Digest>,
    new_data: Vec<Vec<u8>>,
    old_data: Vec<Vec<u8>>,
    read_keys: Vec<Digest>,
    read_data: Vec<Vec<u8>>,
    arbitrary: Vec<u8>,
}

impl Transaction {
    pub fn new(
        write_keys: Vec<Digest>,
        new_data: Vec<Vec<u8>>,
        old_data: Vec<Vec<u8>>,
        read_keys: Vec<Digest>,
        read_data: Vec<Vec<u8>>,
        arbitrary: Vec<u8>,
    ) -> Result<Self, TransactionError> {
        if write_keys.len() != new_data.len() || write_keys.len() != old_data.len() {
            return Err(TransactionError::LengthMismatch {
                write_keys: write_keys.len(),
                new_data: new_data.len(),
                old_data: old_data.len(),
            });
        }
        if read_keys.len() != read_data.len() {
            return Err(TransactionError::ReadLengthMismatch {
                read_keys: read_keys.len(),
                read_data: read_data.len(),
            });
        }
        Ok(Self {
            write_keys,
            new_data,
            old_data,
            read_keys,
            read_data,
            arbitrary,
        })
    }

    pub fn write_keys(&self) -> &[Digest] {
        &self.write_keys
    }

    pub fn new_data(&self) -> &[Vec<u8>] {
        &self.new_data
    }

    pub fn old_data(&self) -> &[Vec<u8>] {
        &self.old_data
    }

    pub fn read_keys(&self) -> &[Digest] {
        &self.read_keys
    }

    pub fn read_data(&self) -> &[Vec<u8>] {
        &self.read_data
    }

    pub fn arbitrary(&self) -> &[u8] {
        &self.arbitrary
    }

    /// Re-checks the length invariant enforced at construction. A
    /// `Transaction` cannot actually violate it once built (there is no
    /// public mutator), but block re-execution re-derives it anyway so a
    /// corrupted-on-the-wire transaction is rejected before any state-tree
    /// work happens.
    pub fn validate_structure(&self) -> Result<(), TransactionError> {
        Transaction::new(
            self.write_keys.clone(),
            self.new_data.clone(),
            self.old_data.clone(),
            self.read_keys.clone(),
            self.read_data.clone(),
            Vec::new(),
        )
        .map(|_| ())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_seq(
            &mut buf,
            &self.write_keys.iter().map(|k| k.to_vec()).collect::<Vec<_>>(),
        );
        write_seq(&mut buf, &self.new_data);
        write_seq(&mut buf, &self.old_data);
        write_seq(
            &mut buf,
            &self.read_keys.iter().map(|k| k.to_vec()).collect::<Vec<_>>(),
        );
        write_seq(&mut buf, &self.read_data);
        write_field(&mut buf, &self.arbitrary);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut cursor = Cursor::new(bytes);
        let write_keys = decode_key_seq(&mut cursor)?;
        let new_data = cursor
            .read_seq()
            .map_err(|e| TransactionError::Decode(e.to_string()))?;
        let old_data = cursor
            .read_seq()
            .map_err(|e| TransactionError::Decode(e.to_string()))?;
        let read_keys = decode_key_seq(&mut cursor)?;
        let read_data = cursor
            .read_seq()
            .map_err(|e| TransactionError::Decode(e.to_string()))?;
        let arbitrary = cursor
            .read_field()
            .map_err(|e| TransactionError::Decode(e.to_string()))?;
        cursor
            .finish()
            .map_err(|e| TransactionError::Decode(e.to_string()))?;
        Transaction::new(write_keys, new_data, old_data, read_keys, read_data, arbitrary)
    }
}

fn decode_key_seq(cursor: &mut Cursor<'_>) -> Result<Vec<Digest>, TransactionError> {
    cursor
        .read_seq()
        .map_err(|e| TransactionError::Decode(e.to_string()))?
        .into_iter()
        .map(|bytes| Digest::from_slice(&bytes).map_err(|e| TransactionError::Decode(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Digest {
        Digest::hash_bytes(&[byte])
    }

    #[test]
    fn mismatched_write_lengths_are_rejected() {
        let err = Transaction::new(
            vec![key(1), key(2)],
            vec![b"a".to_vec()],
            vec![b"a".to_vec()],
            vec![],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransactionError::LengthMismatch {
                write_keys: 2,
                new_data: 1,
                old_data: 1
            }
        );
    }

    #[test]
    fn mismatched_read_lengths_are_rejected() {
        let err = Transaction::new(vec![], vec![], vec![], vec![key(1)], vec![], vec![]).unwrap_err();
        assert_eq!(
            err,
            TransactionError::ReadLengthMismatch {
                read_keys: 1,
                read_data: 0
            }
        );
    }

    #[test]
    fn encode_decode_round_trips() {
        let tx = Transaction::new(
            vec![key(1), key(2)],
            vec![b"new-a".to_vec(), b"new-b".to_vec()],
            vec![[0u8; 32].to_vec(), [0u8; 32].to_vec()],
            vec![key(3)],
            vec![b"read-c".to_vec()],
            b"memo".to_vec(),
        )
        .unwrap();
        let bytes = tx.encode();
        let decoded = Transaction::decode(&bytes).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let tx = Transaction::new(vec![key(1)], vec![b"v".to_vec()], vec![[0u8; 32].to_vec()], vec![], vec![], vec![])
            .unwrap();
        let mut bytes = tx.encode();
        bytes.truncate(bytes.len() - 1);
        assert!(Transaction::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_trailing_garbage() {
        let tx = Transaction::new(vec![], vec![], vec![], vec![], vec![], vec![]).unwrap();
        let mut bytes = tx.encode();
        bytes.push(0xFF);
        assert!(Transaction::decode(&bytes).is_err());
    }
}
