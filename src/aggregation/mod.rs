//! Term aggregation tree: one commitment over every student of a term.
//!
//! The tree maps `H(student key)` to that student's [crate::StudentTermTree]
//! root. Keys are hashed so the key space is uniform whatever identifier
//! scheme the caller uses, which keeps the trie shallow and balanced.
//!
//! Lifecycle:
//! 1. [TermAggregationTree::new] gives an empty, unpublished tree at
//!    version 0.
//! 2. Students are inserted. Before the first publish, re-inserting a key
//!    overwrites it.
//! 3. [TermAggregationTree::publish] computes the root commitment, stamps it
//!    and bumps the version.
//! 4. Insertions after a publish are recorded as pending changes; the next
//!    publish supersedes the previous root (which is kept in
//!    [TermAggregationTree::history]) rather than mutating it.
//!
//! Insertion is single-writer: the tree is owned by whichever task is
//! publishing the term. Once published it is read-only and can be shared
//! freely for proof generation.

use chrono::Utc;
use curve25519_dalek_ng::scalar::Scalar;
use log::{debug, info};
use logging_timer::time;
use primitive_types::H256;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;

use crate::{
    binding::{new_transcript, opening_queries, AggregationProof, BindingError, KeyOpening},
    completion::{StudentKey, TermId},
    hasher::Hasher,
    ipa::{Crs, MultiPointProof, PrecomputedWeights, ProverQuery},
};

pub(crate) mod trie;
use trie::{NodeIndex, Trie};

/// `H(student key)`, the key used in the aggregation trie.
pub fn student_key_hash(student: &StudentKey) -> H256 {
    let mut hasher = Hasher::new();
    hasher.update(b"student_key");
    hasher.update(student.as_bytes());
    hasher.finalize()
}

// -------------------------------------------------------------------------------------------------
// Published root.

/// One publication of a term root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRoot {
    pub version: u32,
    pub root: H256,
    /// Unix seconds.
    pub published_at: u64,
    pub total_students: usize,
}

// -------------------------------------------------------------------------------------------------
// Main struct.

#[derive(Debug, Clone)]
pub struct TermAggregationTree {
    term: TermId,
    trie: Trie,
    version: u32,
    published: Option<PublishedRoot>,
    history: Vec<PublishedRoot>,
    pending_changes: bool,
}

impl TermAggregationTree {
    pub fn new(term: TermId) -> Self {
        TermAggregationTree {
            term,
            trie: Trie::new(),
            version: 0,
            published: None,
            history: Vec::new(),
            pending_changes: false,
        }
    }

    /// Insert or correct the student term root of `student`.
    ///
    /// An error is returned if the tree has been published and already holds
    /// exactly this `(student, root)` pair: there is nothing to supersede.
    pub fn insert_student(
        &mut self,
        student: &StudentKey,
        student_term_root: H256,
    ) -> Result<(), AggregationError> {
        let key = student_key_hash(student);

        if self.published.is_some() && self.trie.get(&key) == Some(&student_term_root) {
            return Err(AggregationError::DuplicateKey {
                student: student.clone(),
                term: self.term.clone(),
            });
        }

        let previous = self.trie.insert(key, student_term_root);

        if previous != Some(student_term_root) {
            self.pending_changes = true;
        }

        match (previous, self.published.is_some()) {
            (Some(_), true) => debug!(
                "Student {} corrected in published term {}, version {} will be superseded",
                student, self.term, self.version
            ),
            (Some(_), false) => debug!("Student {} overwritten in term {}", student, self.term),
            (None, _) => debug!("Student {} inserted into term {}", student, self.term),
        }

        Ok(())
    }

    /// Publish the tree, stamping the current time.
    pub fn publish(&mut self) -> Result<H256, AggregationError> {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        self.publish_at(now)
    }

    /// Publish the tree with the given publication time (Unix seconds).
    ///
    /// Computes the root commitment and bumps the version. Publishing with no
    /// changes since the last publication returns the current root without a
    /// new version.
    #[time("debug", "TermAggregationTree::{}")]
    pub fn publish_at(&mut self, published_at: u64) -> Result<H256, AggregationError> {
        if self.trie.is_empty() {
            return Err(AggregationError::EmptyTree {
                term: self.term.clone(),
            });
        }

        if let (Some(current), false) = (self.published, self.pending_changes) {
            debug!(
                "Term {} has no pending changes, keeping version {}",
                self.term, current.version
            );
            return Ok(current.root);
        }

        let commitment = self.trie.commit(Crs::shared());
        let root = H256(commitment.compress().to_bytes());

        self.version += 1;
        let publication = PublishedRoot {
            version: self.version,
            root,
            published_at,
            total_students: self.trie.len(),
        };

        if let Some(previous) = self.published.replace(publication) {
            self.history.push(previous);
        }
        self.pending_changes = false;

        info!(
            "Published term {} version {} with {} students, root {:?}",
            self.term,
            self.version,
            self.trie.len(),
            root
        );

        Ok(root)
    }

    /// Prove the current values of `students` against the published root.
    ///
    /// Duplicate keys in `students` are proven once.
    #[time("debug", "TermAggregationTree::{}")]
    pub fn prove_membership(
        &self,
        students: &[StudentKey],
    ) -> Result<AggregationProof, AggregationError> {
        if students.is_empty() {
            return Err(AggregationError::NoKeys);
        }
        if self.published.is_none() {
            return Err(AggregationError::Unpublished {
                term: self.term.clone(),
            });
        }
        if self.pending_changes {
            return Err(AggregationError::PendingChanges {
                term: self.term.clone(),
            });
        }

        let mut openings: Vec<KeyOpening> = Vec::with_capacity(students.len());
        let mut nodes_by_commitment: HashMap<[u8; 32], NodeIndex> = HashMap::new();

        for student in students {
            let key_hash = student_key_hash(student);
            if openings.iter().any(|o| o.key_hash == key_hash) {
                continue;
            }

            let path = self
                .trie
                .path_to(&key_hash)
                .ok_or_else(|| AggregationError::NotFound {
                    student: student.clone(),
                    term: self.term.clone(),
                })?;

            let commitments = path
                .iter()
                .map(|index| {
                    let commitment = *self.trie.node(*index).commitment();
                    nodes_by_commitment.insert(commitment.compress().to_bytes(), *index);
                    commitment
                })
                .collect();

            openings.push(KeyOpening {
                key_hash,
                value: self.trie.get(&key_hash).copied(),
                path: commitments,
            });
        }

        let published_at = self
            .published
            .map(|p| p.published_at)
            .ok_or_else(|| AggregationError::Unpublished {
                term: self.term.clone(),
            })?;

        let root = *self.trie.root_commitment();
        let queries = opening_queries(&root, &openings)?;

        let prover_queries = queries
            .into_iter()
            .map(|query| {
                let index = nodes_by_commitment
                    .get(query.commitment.compress().as_bytes())
                    .copied()
                    .ok_or(AggregationError::InconsistentTrie)?;
                Ok(ProverQuery {
                    commitment: query.commitment,
                    poly: self.trie.polynomial(index),
                    point: scalar_to_slot(&query.point)?,
                    result: query.result,
                })
            })
            .collect::<Result<Vec<ProverQuery>, AggregationError>>()?;

        let mut transcript = new_transcript(&root, published_at);
        let multiproof = MultiPointProof::open(
            Crs::shared(),
            PrecomputedWeights::shared(),
            &mut transcript,
            &prover_queries,
        );

        debug!(
            "Membership proof for {} students in term {} covers {} queries",
            openings.len(),
            self.term,
            prover_queries.len()
        );

        Ok(AggregationProof::new(root, published_at, openings, multiproof))
    }
}

/// Domain points are single bytes, little-endian in the scalar encoding.
fn scalar_to_slot(point: &Scalar) -> Result<usize, AggregationError> {
    let bytes = point.as_bytes();
    if bytes[1..].iter().any(|b| *b != 0) {
        return Err(AggregationError::InconsistentTrie);
    }
    Ok(bytes[0] as usize)
}

// -------------------------------------------------------------------------------------------------
// Accessor methods.

impl TermAggregationTree {
    pub fn term(&self) -> &TermId {
        &self.term
    }

    /// 0 before the first publication, incremented by every publication.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn published_root(&self) -> Option<&PublishedRoot> {
        self.published.as_ref()
    }

    /// Unix seconds of the latest publication.
    pub fn published_at(&self) -> Option<u64> {
        self.published.map(|p| p.published_at)
    }

    /// Superseded publications, oldest first.
    pub fn history(&self) -> &[PublishedRoot] {
        &self.history
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending_changes
    }

    /// Number of students in the tree.
    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn contains(&self, student: &StudentKey) -> bool {
        self.value_for(student).is_some()
    }

    /// The student term root currently stored for `student`.
    pub fn value_for(&self, student: &StudentKey) -> Option<&H256> {
        self.trie.get(&student_key_hash(student))
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Errors encountered when handling a [TermAggregationTree].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Student {student} already holds this root in published term {term}")]
    DuplicateKey { student: StudentKey, term: TermId },
    #[error("Term {term} has no students to publish")]
    EmptyTree { term: TermId },
    #[error("Student {student} not found in term {term}")]
    NotFound { student: StudentKey, term: TermId },
    #[error("No students given to prove")]
    NoKeys,
    #[error("Term {term} has not been published")]
    Unpublished { term: TermId },
    #[error("Term {term} has changes that are not published yet")]
    PendingChanges { term: TermId },
    #[error("Trie nodes do not match the proof openings")]
    InconsistentTrie,
    #[error("Building the opening queries failed")]
    Binding(#[from] BindingError),
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::assert_err;
    use std::str::FromStr;

    fn student(s: &str) -> StudentKey {
        StudentKey::from_str(s).unwrap()
    }

    fn tree() -> TermAggregationTree {
        TermAggregationTree::new(TermId::from_str("T1").unwrap())
    }

    #[test]
    fn new_tree_is_empty_and_unpublished() {
        let tree = tree();
        assert_eq!(tree.version(), 0);
        assert!(tree.published_root().is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn publishing_empty_tree_fails() {
        assert_err!(tree().publish(), Err(AggregationError::EmptyTree { .. }));
    }

    #[test]
    fn publish_sets_root_and_version() {
        let mut tree = tree();
        tree.insert_student(&student("a"), H256::repeat_byte(1)).unwrap();
        let root = tree.publish_at(100).unwrap();

        let published = tree.published_root().unwrap();
        assert_eq!(published.root, root);
        assert_eq!(published.version, 1);
        assert_eq!(published.published_at, 100);
        assert_eq!(published.total_students, 1);
        assert!(!tree.has_pending_changes());
    }

    #[test]
    fn overwrite_before_publish_is_allowed() {
        let mut tree = tree();
        tree.insert_student(&student("a"), H256::repeat_byte(1)).unwrap();
        tree.insert_student(&student("a"), H256::repeat_byte(2)).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.value_for(&student("a")), Some(&H256::repeat_byte(2)));
    }

    #[test]
    fn root_is_independent_of_insertion_order() {
        let mut forward = tree();
        let mut backward = tree();
        let entries: Vec<(StudentKey, H256)> = (0..20u8)
            .map(|i| (student(&format!("s{}", i)), H256::repeat_byte(i)))
            .collect();

        for (s, v) in entries.iter() {
            forward.insert_student(s, *v).unwrap();
        }
        for (s, v) in entries.iter().rev() {
            backward.insert_student(s, *v).unwrap();
        }

        assert_eq!(forward.publish_at(1).unwrap(), backward.publish_at(1).unwrap());
    }

    #[test]
    fn identical_reinsert_after_publish_is_duplicate() {
        let mut tree = tree();
        tree.insert_student(&student("a"), H256::repeat_byte(1)).unwrap();
        tree.publish_at(100).unwrap();

        assert_err!(
            tree.insert_student(&student("a"), H256::repeat_byte(1)),
            Err(AggregationError::DuplicateKey { .. })
        );
        assert!(!tree.has_pending_changes());
    }

    #[test]
    fn correction_after_publish_bumps_version() {
        let mut tree = tree();
        tree.insert_student(&student("a"), H256::repeat_byte(1)).unwrap();
        let first = tree.publish_at(100).unwrap();

        tree.insert_student(&student("a"), H256::repeat_byte(2)).unwrap();
        assert!(tree.has_pending_changes());
        // The published root is untouched until the next publish.
        assert_eq!(tree.published_root().unwrap().root, first);

        let second = tree.publish_at(200).unwrap();
        assert_ne!(first, second);
        assert_eq!(tree.version(), 2);
        assert_eq!(tree.history().len(), 1);
        assert_eq!(tree.history()[0].root, first);
        assert_eq!(tree.history()[0].version, 1);
    }

    #[test]
    fn republish_without_changes_keeps_version() {
        let mut tree = tree();
        tree.insert_student(&student("a"), H256::repeat_byte(1)).unwrap();
        let first = tree.publish_at(100).unwrap();
        assert_eq!(tree.publish_at(200).unwrap(), first);
        assert_eq!(tree.version(), 1);
        assert_eq!(tree.published_at(), Some(100));
        assert!(tree.history().is_empty());
    }

    #[test]
    fn prove_requires_publication() {
        let mut tree = tree();
        tree.insert_student(&student("a"), H256::repeat_byte(1)).unwrap();
        assert_err!(
            tree.prove_membership(&[student("a")]),
            Err(AggregationError::Unpublished { .. })
        );

        tree.publish_at(100).unwrap();
        tree.insert_student(&student("b"), H256::repeat_byte(2)).unwrap();
        assert_err!(
            tree.prove_membership(&[student("a")]),
            Err(AggregationError::PendingChanges { .. })
        );
    }

    #[test]
    fn prove_unknown_student_fails() {
        let mut tree = tree();
        tree.insert_student(&student("a"), H256::repeat_byte(1)).unwrap();
        tree.publish_at(100).unwrap();
        assert_err!(
            tree.prove_membership(&[student("z")]),
            Err(AggregationError::NotFound { .. })
        );
        assert_err!(tree.prove_membership(&[]), Err(AggregationError::NoKeys));
    }

    #[test]
    fn proof_verifies_against_published_root_only() {
        let mut tree = tree();
        for i in 0..8u8 {
            tree.insert_student(&student(&format!("s{}", i)), H256::repeat_byte(i))
                .unwrap();
        }
        let root = tree.publish_at(100).unwrap();

        let proof = tree
            .prove_membership(&[student("s3"), student("s3"), student("s5")])
            .unwrap();
        assert_eq!(proof.openings().len(), 2);
        assert_eq!(proof.root(), root);
        assert!(proof.verify(&root).is_ok());
        assert!(proof.verify(&H256::zero()).is_err());
    }

    #[test]
    fn old_proof_fails_against_new_root() {
        let mut tree = tree();
        tree.insert_student(&student("a"), H256::repeat_byte(1)).unwrap();
        tree.insert_student(&student("b"), H256::repeat_byte(2)).unwrap();
        tree.publish_at(100).unwrap();
        let old_proof = tree.prove_membership(&[student("a")]).unwrap();

        tree.insert_student(&student("b"), H256::repeat_byte(3)).unwrap();
        let new_root = tree.publish_at(200).unwrap();

        assert_err!(
            old_proof.verify(&new_root),
            Err(BindingError::RootMismatch { .. })
        );
    }
}
