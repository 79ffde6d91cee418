//! Canonical encoding of a [CourseCompletion] into a Merkle leaf.
//!
//! A leaf is built from two 32-byte parts:
//! - the timestamp block: the four timestamps as 8-byte big-endian integers in
//!   the order started, completed, assessed, issued
//! - the record hash: `SHA256(SHA256(identity encoding))`
//!
//! and the leaf hash is `SHA256(timestamp_block || record_hash)`.
//!
//! The identity encoding writes each string field as a 4-byte big-endian
//! length followed by its UTF-8 bytes (issuer, student, term, course) and
//! appends the attempt number as a 2-byte big-endian integer. Length prefixes
//! keep field boundaries unambiguous, so `("ab", "c")` and `("a", "bc")` can
//! never produce the same record hash.

use primitive_types::H256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::completion::{CompletionIdentity, CourseCompletion, Timestamps};

pub const TIMESTAMP_BLOCK_BYTES: usize = 32;

// -------------------------------------------------------------------------------------------------
// Timestamp block.

/// The four timestamps of a completion packed into 32 bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampBlock(pub H256);

impl TimestampBlock {
    pub fn pack(timestamps: &Timestamps) -> Self {
        let mut bytes = [0u8; TIMESTAMP_BLOCK_BYTES];
        bytes[0..8].copy_from_slice(&timestamps.started.to_be_bytes());
        bytes[8..16].copy_from_slice(&timestamps.completed.to_be_bytes());
        bytes[16..24].copy_from_slice(&timestamps.assessed.to_be_bytes());
        bytes[24..32].copy_from_slice(&timestamps.issued.to_be_bytes());
        TimestampBlock(H256(bytes))
    }

    pub fn unpack(&self) -> Timestamps {
        let bytes = self.0.as_fixed_bytes();
        let read = |i: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            u64::from_be_bytes(word)
        };

        Timestamps {
            started: read(0),
            completed: read(1),
            assessed: read(2),
            issued: read(3),
        }
    }

    pub fn as_bytes(&self) -> &[u8; TIMESTAMP_BLOCK_BYTES] {
        self.0.as_fixed_bytes()
    }
}

// -------------------------------------------------------------------------------------------------
// Leaf encoding.

/// All the parts of an encoded leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EncodedLeaf {
    pub timestamp_block: TimestampBlock,
    pub record_hash: H256,
    pub leaf_hash: H256,
}

/// Encode a completion into its leaf.
///
/// Pure and deterministic. Timestamp ordering is not checked here, that is
/// the job of [crate::StudentTermTree::build]. An error is returned only for
/// structurally invalid input: an attempt number of 0 or one that does not
/// fit in 16 bits.
pub fn encode_leaf(completion: &CourseCompletion) -> Result<EncodedLeaf, LeafError> {
    let record_hash = record_hash(&completion.identity())?;
    let timestamp_block = TimestampBlock::pack(completion.timestamps());
    let leaf_hash = leaf_hash_from_parts(&timestamp_block, &record_hash);

    Ok(EncodedLeaf {
        timestamp_block,
        record_hash,
        leaf_hash,
    })
}

/// `SHA256(SHA256(identity encoding))`.
pub fn record_hash(identity: &CompletionIdentity) -> Result<H256, LeafError> {
    let attempt = u16::try_from(identity.attempt)
        .ok()
        .filter(|attempt| *attempt >= 1)
        .ok_or(LeafError::MalformedRecord {
            attempt: identity.attempt,
        })?;

    let mut hasher = Sha256::new();
    for field in [
        identity.issuer.as_bytes(),
        identity.student.as_bytes(),
        identity.term.as_bytes(),
        identity.course.as_bytes(),
    ] {
        // Identifiers are capped at 256 bytes so the length always fits.
        hasher.update((field.len() as u32).to_be_bytes());
        hasher.update(field);
    }
    hasher.update(attempt.to_be_bytes());

    let inner = hasher.finalize();
    let outer: [u8; 32] = Sha256::digest(inner).into();

    Ok(H256(outer))
}

/// `SHA256(timestamp_block || record_hash)`.
pub fn leaf_hash_from_parts(timestamp_block: &TimestampBlock, record_hash: &H256) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(timestamp_block.as_bytes());
    hasher.update(record_hash.as_bytes());
    H256(hasher.finalize().into())
}

// -------------------------------------------------------------------------------------------------
// Errors.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LeafError {
    #[error("Malformed record: attempt number {attempt} must be in the range [1, 65535]")]
    MalformedRecord { attempt: u32 },
}

// -------------------------------------------------------------------------------------------------
// Unit tests.
