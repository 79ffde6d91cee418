//! Binding a claimed disclosure to an aggregation membership proof.
//!
//! A receipt carries the claimed `(student, value)` pairs and the proof as
//! separate fields, so whoever transports the receipt could edit the claims
//! and leave the proof alone. [verify_binding] never trusts the claims: it
//! looks up the value the proof itself attributes to `H(student)`, compares
//! it with the claim, and then checks the opening proof cryptographically
//! over exactly those attributed values. Finally the proof's root
//! commitment must equal the published term root.
//!
//! The publication time of the proven root is absorbed into the transcript,
//! so it cannot be edited without invalidating the opening proof.
//!
//! The openings inside a proof are turned into polynomial queries by
//! [opening_queries], which both the prover and the verifier use, so the
//! Fiat-Shamir transcripts on the two sides agree by construction.

use curve25519_dalek_ng::{ristretto::RistrettoPoint, scalar::Scalar};
use log::debug;
use merlin::Transcript;
use primitive_types::H256;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use std::collections::HashMap;

use crate::{
    aggregation::{
        student_key_hash,
        trie::{leaf_values, KEY_BYTES},
    },
    completion::StudentKey,
    ipa::{
        group_to_field, Crs, IpaError, MultiPointProof, PointBytes, PrecomputedWeights,
        TranscriptProtocol, VerifierQuery,
    },
};

/// Label for the transcript of every aggregation proof.
pub const PROOF_TRANSCRIPT_LABEL: &[u8] = b"credacc_aggregation_proof";

// -------------------------------------------------------------------------------------------------
// Wire types.

/// Everything the proof says about one key.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOpening {
    pub key_hash: H256,
    /// The value the proof attributes to `key_hash`.
    pub value: Option<H256>,
    /// Commitments from the root (first) down to the leaf holding the key
    /// (last).
    #[serde_as(as = "Vec<PointBytes>")]
    pub path: Vec<RistrettoPoint>,
}

/// Membership proof for one or more keys of a term aggregation tree.
///
/// Produced by [crate::TermAggregationTree::prove_membership] and checked with
/// [verify_binding] (or [AggregationProof::verify] for already decoded
/// proofs).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationProof {
    #[serde_as(as = "PointBytes")]
    root: RistrettoPoint,
    /// Unix seconds.
    published_at: u64,
    openings: Vec<KeyOpening>,
    multiproof: MultiPointProof,
}

impl AggregationProof {
    pub(crate) fn new(
        root: RistrettoPoint,
        published_at: u64,
        openings: Vec<KeyOpening>,
        multiproof: MultiPointProof,
    ) -> Self {
        AggregationProof {
            root,
            published_at,
            openings,
            multiproof,
        }
    }

    /// Compressed root commitment, i.e. the term root this proof claims.
    pub fn root(&self) -> H256 {
        H256(self.root.compress().to_bytes())
    }

    /// Publication time of the proven root, as committed by the prover.
    pub fn published_at(&self) -> u64 {
        self.published_at
    }

    pub fn openings(&self) -> &[KeyOpening] {
        &self.openings
    }

    pub fn opening_for(&self, key_hash: &H256) -> Option<&KeyOpening> {
        self.openings.iter().find(|o| &o.key_hash == key_hash)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BindingError> {
        bincode::serialize(self).map_err(|err| BindingError::Malformed(err.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BindingError> {
        bincode::deserialize(bytes).map_err(|err| BindingError::Malformed(err.to_string()))
    }

    /// Check the opening proof over the values attributed by the proof
    /// itself, then check that the root equals `expected_root`.
    pub fn verify(&self, expected_root: &H256) -> Result<(), BindingError> {
        let queries = opening_queries(&self.root, &self.openings)?;

        let mut transcript = new_transcript(&self.root, self.published_at);
        self.multiproof
            .check(
                Crs::shared(),
                PrecomputedWeights::shared(),
                &queries,
                &mut transcript,
            )
            .map_err(|err| match err {
                IpaError::ChallengeMismatch => BindingError::ChallengeMismatch,
                IpaError::InnerProductFailed | IpaError::RoundCount { .. } => {
                    BindingError::InnerProductFailed
                }
                IpaError::NoQueries => BindingError::Malformed(err.to_string()),
            })?;

        let actual = self.root();
        if actual != *expected_root {
            return Err(BindingError::RootMismatch {
                expected: *expected_root,
                actual,
            });
        }

        debug!(
            "Aggregation proof with {} openings verified against root {:?}",
            self.openings.len(),
            expected_root
        );

        Ok(())
    }
}

/// Fresh transcript for an aggregation proof rooted at `root`, published at
/// `published_at`.
pub(crate) fn new_transcript(root: &RistrettoPoint, published_at: u64) -> Transcript {
    let mut transcript = Transcript::new(PROOF_TRANSCRIPT_LABEL);
    transcript.append_point(b"root", root);
    transcript.append_u64(b"published_at", published_at);
    transcript
}

/// Turn the openings into the list of polynomial queries they imply.
///
/// For every internal node on a path the query is
/// `(node commitment, key byte at that depth, group_to_field(child))`; for
/// the leaf the queries open slots `0..5` to
/// `[1, key_lo, key_hi, value_lo, value_hi]`. Queries repeated across
/// openings (shared path prefixes) are emitted once, in first-occurrence
/// order. Two openings that disagree on the same query make the proof
/// malformed.
pub(crate) fn opening_queries(
    root: &RistrettoPoint,
    openings: &[KeyOpening],
) -> Result<Vec<VerifierQuery>, BindingError> {
    if openings.is_empty() {
        return Err(BindingError::Malformed("proof has no openings".to_owned()));
    }

    let mut queries = Vec::new();
    let mut seen: HashMap<([u8; 32], u64), Scalar> = HashMap::new();

    let mut push = |commitment: &RistrettoPoint, point: u64, result: Scalar| {
        let id = (commitment.compress().to_bytes(), point);
        match seen.get(&id) {
            Some(existing) if *existing == result => Ok(()),
            Some(_) => Err(BindingError::Malformed(
                "two openings disagree on the same node slot".to_owned(),
            )),
            None => {
                seen.insert(id, result);
                queries.push(VerifierQuery {
                    commitment: *commitment,
                    point: Scalar::from(point),
                    result,
                });
                Ok(())
            }
        }
    };

    for opening in openings {
        let value = opening
            .value
            .ok_or(BindingError::AttributedValueMissing {
                key_hash: opening.key_hash,
            })?;

        if opening.path.len() < 2 || opening.path.len() > KEY_BYTES + 1 {
            return Err(BindingError::Malformed(format!(
                "path of length {} for key {:?}",
                opening.path.len(),
                opening.key_hash
            )));
        }
        if opening.path[0] != *root {
            return Err(BindingError::Malformed(format!(
                "path for key {:?} does not start at the root",
                opening.key_hash
            )));
        }

        for (depth, pair) in opening.path.windows(2).enumerate() {
            let slot = opening.key_hash[depth] as u64;
            push(&pair[0], slot, group_to_field(&pair[1]))?;
        }

        let leaf = &opening.path[opening.path.len() - 1];
        for (slot, committed) in leaf_values(&opening.key_hash, &value).into_iter().enumerate() {
            push(leaf, slot as u64, committed)?;
        }
    }

    Ok(queries)
}

// -------------------------------------------------------------------------------------------------
// Verification.

/// Verify that `proof_bytes` proves every `(student, value)` in `claims`
/// against `expected_root`.
///
/// All checks must pass; the first failing one is returned.
pub fn verify_binding(
    proof_bytes: &[u8],
    claims: &[(StudentKey, H256)],
    expected_root: &H256,
) -> Result<(), BindingError> {
    if claims.is_empty() {
        return Err(BindingError::EmptyClaims);
    }

    let proof = AggregationProof::from_bytes(proof_bytes)?;

    for (student, claimed) in claims {
        let key_hash = student_key_hash(student);

        let opening = proof
            .opening_for(&key_hash)
            .ok_or_else(|| BindingError::KeyNotInProof {
                student: student.clone(),
            })?;

        let attributed = opening
            .value
            .ok_or(BindingError::AttributedValueMissing { key_hash })?;

        if attributed != *claimed {
            return Err(BindingError::ValueMismatch {
                student: student.clone(),
                claimed: *claimed,
                attributed,
            });
        }
    }

    proof.verify(expected_root)
}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Reasons a claimed disclosure is not bound to the published term root.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("No claims given")]
    EmptyClaims,
    #[error("Malformed proof: {0}")]
    Malformed(String),
    #[error("Student {student} is not in the proof")]
    KeyNotInProof { student: StudentKey },
    #[error("Proof attributes no value to key {key_hash:?}")]
    AttributedValueMissing { key_hash: H256 },
    #[error("Claimed value {claimed:?} for student {student} but the proof attributes {attributed:?}")]
    ValueMismatch {
        student: StudentKey,
        claimed: H256,
        attributed: H256,
    },
    #[error("Fiat-Shamir challenge does not match the transcript")]
    ChallengeMismatch,
    #[error("Inner-product verification failed")]
    InnerProductFailed,
    #[error("Proof root {actual:?} does not match the expected term root {expected:?}")]
    RootMismatch { expected: H256, actual: H256 },
}

// -------------------------------------------------------------------------------------------------
// Unit tests.
