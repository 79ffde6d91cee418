//! Per-student, per-term Merkle tree over course completions.
//!
//! The completions are put in canonical order `(course asc, attempt asc,
//! completed asc)` before the tree is built, so the root only depends on the
//! multiset of completions and not on the order in which the caller supplied
//! them. Completions for one student may well arrive from different upstream
//! systems in arbitrary order.
//!
//! Construction validates every completion; a tree that fails validation is
//! never built, which in turn means it can never reach the aggregation tree.

use log::debug;
use primitive_types::H256;

use std::collections::HashMap;

use crate::{
    binary_tree::{MerkleTree, PathSiblings},
    completion::{CourseCompletion, CourseId, StudentKey, TermId, TimestampOrderError},
    leaf::{encode_leaf, EncodedLeaf, LeafError},
};

// -------------------------------------------------------------------------------------------------
// Main struct.

/// Merkle tree over one student's completions for one term.
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct StudentTermTree {
    student: StudentKey,
    term: TermId,
    completions: Vec<CourseCompletion>,
    leaves: Vec<EncodedLeaf>,
    tree: MerkleTree,
    /// Course -> leaf index of its highest attempt.
    latest_attempt_index: HashMap<CourseId, usize>,
    attempt_index: HashMap<(CourseId, u32), usize>,
}

impl StudentTermTree {
    /// Build the tree from a non-empty list of completions.
    ///
    /// An error is returned if:
    /// 1. `completions` is empty.
    /// 2. A completion belongs to a different student or term.
    /// 3. A completion's timestamps are not ordered
    ///    `started <= completed <= assessed <= issued`.
    /// 4. Two completions share the same (course, attempt).
    /// 5. A completion cannot be encoded (see [crate::leaf::encode_leaf]).
    pub fn build(
        student: StudentKey,
        term: TermId,
        mut completions: Vec<CourseCompletion>,
    ) -> Result<Self, StudentTreeError> {
        if completions.is_empty() {
            return Err(StudentTreeError::EmptyInput { student, term });
        }

        for completion in &completions {
            if completion.student() != &student || completion.term() != &term {
                return Err(StudentTreeError::ForeignCompletion {
                    course: completion.course().clone(),
                    student: completion.student().clone(),
                    term: completion.term().clone(),
                });
            }

            completion
                .timestamps()
                .check_order()
                .map_err(|source| StudentTreeError::TimestampOrder {
                    course: completion.course().clone(),
                    attempt: completion.attempt(),
                    source,
                })?;
        }

        completions.sort_by(|a, b| {
            a.course()
                .cmp(b.course())
                .then(a.attempt().cmp(&b.attempt()))
                .then(a.timestamps().completed.cmp(&b.timestamps().completed))
        });

        let mut latest_attempt_index = HashMap::with_capacity(completions.len());
        let mut attempt_index = HashMap::with_capacity(completions.len());

        for (i, completion) in completions.iter().enumerate() {
            let key = (completion.course().clone(), completion.attempt());
            if attempt_index.insert(key, i).is_some() {
                return Err(StudentTreeError::DuplicateIdentity {
                    course: completion.course().clone(),
                    attempt: completion.attempt(),
                });
            }
            // Sorted by attempt so the last one written is the highest.
            latest_attempt_index.insert(completion.course().clone(), i);
        }

        let leaves = completions
            .iter()
            .map(encode_leaf)
            .collect::<Result<Vec<EncodedLeaf>, LeafError>>()?;

        let tree = MerkleTree::build(leaves.iter().map(|leaf| leaf.leaf_hash).collect())
            .map_err(|_| StudentTreeError::EmptyInput {
                student: student.clone(),
                term: term.clone(),
            })?;

        debug!(
            "Built student term tree for student {} term {}: {} leaves, height {}, root {:?}",
            student,
            term,
            tree.leaf_count(),
            tree.height(),
            tree.root()
        );

        Ok(StudentTermTree {
            student,
            term,
            completions,
            leaves,
            tree,
            latest_attempt_index,
            attempt_index,
        })
    }

    /// Inclusion proof for the highest attempt of `course`.
    ///
    /// Layers where the course's node was promoted contribute no sibling, so
    /// the proof can be shorter than [StudentTermTree::height]. With an odd
    /// leaf count the last course in canonical order is the usual case.
    pub fn proof_for(&self, course: &CourseId) -> Result<PathSiblings, StudentTreeError> {
        let index = self.index_of(course)?;
        self.proof_at(index)
    }

    /// Inclusion proof for a specific attempt of `course`.
    pub fn proof_for_attempt(
        &self,
        course: &CourseId,
        attempt: u32,
    ) -> Result<PathSiblings, StudentTreeError> {
        let index = self
            .attempt_index
            .get(&(course.clone(), attempt))
            .copied()
            .ok_or_else(|| StudentTreeError::NotFound {
                course: course.clone(),
            })?;
        self.proof_at(index)
    }

    /// Recompute the leaf of `course` from the stored completion, walk `proof`
    /// and compare against `expected_root`.
    ///
    /// A mismatch gives `Ok(false)`; only a course that is not in this tree
    /// gives an error.
    pub fn verify(
        &self,
        course: &CourseId,
        proof: &PathSiblings,
        expected_root: &H256,
    ) -> Result<bool, StudentTreeError> {
        let index = self.index_of(course)?;
        let leaf = encode_leaf(&self.completions[index])?;
        Ok(proof.verify(&leaf.leaf_hash, expected_root))
    }

    fn index_of(&self, course: &CourseId) -> Result<usize, StudentTreeError> {
        self.latest_attempt_index
            .get(course)
            .copied()
            .ok_or_else(|| StudentTreeError::NotFound {
                course: course.clone(),
            })
    }

    fn proof_at(&self, index: usize) -> Result<PathSiblings, StudentTreeError> {
        self.tree
            .path_siblings(index)
            .ok_or_else(|| StudentTreeError::NotFound {
                course: self.completions[index].course().clone(),
            })
    }
}

// -------------------------------------------------------------------------------------------------
// Accessor methods.

impl StudentTermTree {
    pub fn root(&self) -> &H256 {
        self.tree.root()
    }

    pub fn student(&self) -> &StudentKey {
        &self.student
    }

    pub fn term(&self) -> &TermId {
        &self.term
    }

    /// Completions in canonical order.
    pub fn completions(&self) -> &[CourseCompletion] {
        &self.completions
    }

    /// Encoded leaves, in the same order as [StudentTermTree::completions].
    pub fn leaves(&self) -> &[EncodedLeaf] {
        &self.leaves
    }

    /// The highest attempt of `course`, if present.
    pub fn completion_for(&self, course: &CourseId) -> Option<&CourseCompletion> {
        self.latest_attempt_index
            .get(course)
            .map(|i| &self.completions[*i])
    }

    /// The encoded leaf of the highest attempt of `course`, if present.
    pub fn leaf_for(&self, course: &CourseId) -> Option<&EncodedLeaf> {
        self.latest_attempt_index.get(course).map(|i| &self.leaves[*i])
    }

    /// Distinct courses in canonical order.
    pub fn courses(&self) -> Vec<&CourseId> {
        let mut courses: Vec<&CourseId> = self.latest_attempt_index.keys().collect();
        courses.sort();
        courses
    }

    pub fn height(&self) -> usize {
        self.tree.height()
    }

    pub fn leaf_count(&self) -> usize {
        self.tree.leaf_count()
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Errors encountered when handling a [StudentTermTree].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StudentTreeError {
    #[error("No completions given for student {student} in term {term}")]
    EmptyInput { student: StudentKey, term: TermId },
    #[error("Completion for course {course} attempt {attempt} has out-of-order timestamps")]
    TimestampOrder {
        course: CourseId,
        attempt: u32,
        source: TimestampOrderError,
    },
    #[error("Course {course} attempt {attempt} appears more than once")]
    DuplicateIdentity { course: CourseId, attempt: u32 },
    #[error("Completion for course {course} belongs to student {student} term {term}")]
    ForeignCompletion {
        course: CourseId,
        student: StudentKey,
        term: TermId,
    },
    #[error("Course {course} not found in the tree")]
    NotFound { course: CourseId },
    #[error("Leaf encoding failed")]
    LeafError(#[from] LeafError),
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{IssuerId, Timestamps};
    use crate::leaf::leaf_hash_from_parts;
    use crate::utils::test_utils::assert_err;
    use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
    use std::str::FromStr;

    fn student() -> StudentKey {
        StudentKey::from_str("alice").unwrap()
    }

    fn term() -> TermId {
        TermId::from_str("T1").unwrap()
    }

    fn course(s: &str) -> CourseId {
        CourseId::from_str(s).unwrap()
    }

    fn completion(course_id: &str, attempt: u32, completed: u64) -> CourseCompletion {
        CourseCompletion::new(
            IssuerId::from_str("uni").unwrap(),
            student(),
            term(),
            course(course_id),
            attempt,
            Timestamps {
                started: completed - 10,
                completed,
                assessed: completed + 10,
                issued: completed + 20,
            },
            "B+".to_owned(),
            3,
        )
    }

    fn completions() -> Vec<CourseCompletion> {
        vec![
            completion("C1", 1, 1000),
            completion("C2", 1, 1100),
            completion("C3", 1, 1200),
            completion("C3", 2, 1300),
            completion("C4", 1, 1400),
        ]
    }

    #[test]
    fn empty_input_fails() {
        assert_err!(
            StudentTermTree::build(student(), term(), vec![]),
            Err(StudentTreeError::EmptyInput { .. })
        );
    }

    #[test]
    fn out_of_order_timestamps_fail() {
        let bad = CourseCompletion::new(
            IssuerId::from_str("uni").unwrap(),
            student(),
            term(),
            course("C1"),
            1,
            Timestamps {
                started: 10,
                completed: 20,
                assessed: 30,
                issued: 25,
            },
            "A".to_owned(),
            3,
        );
        assert_err!(
            StudentTermTree::build(student(), term(), vec![completion("C0", 1, 500), bad]),
            Err(StudentTreeError::TimestampOrder { attempt: 1, .. })
        );
    }

    #[test]
    fn duplicate_identity_fails() {
        let res = StudentTermTree::build(
            student(),
            term(),
            vec![completion("C1", 1, 1000), completion("C1", 1, 2000)],
        );
        assert_err!(res, Err(StudentTreeError::DuplicateIdentity { attempt: 1, .. }));
    }

    #[test]
    fn foreign_completion_fails() {
        let res = StudentTermTree::build(
            StudentKey::from_str("bob").unwrap(),
            term(),
            vec![completion("C1", 1, 1000)],
        );
        assert_err!(res, Err(StudentTreeError::ForeignCompletion { .. }));
    }

    #[test]
    fn root_is_independent_of_insertion_order() {
        let reference = StudentTermTree::build(student(), term(), completions()).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);

        for _ in 0..20 {
            let mut shuffled = completions();
            shuffled.shuffle(&mut rng);
            let tree = StudentTermTree::build(student(), term(), shuffled).unwrap();
            assert_eq!(tree.root(), reference.root());
        }
    }

    #[test]
    fn every_course_verifies() {
        let tree = StudentTermTree::build(student(), term(), completions()).unwrap();
        for c in tree.courses() {
            let proof = tree.proof_for(c).unwrap();
            assert!(tree.verify(c, &proof, tree.root()).unwrap());
        }
    }

    #[test]
    fn every_attempt_has_a_proof() {
        let tree = StudentTermTree::build(student(), term(), completions()).unwrap();
        for (i, c) in tree.completions().iter().enumerate() {
            let proof = tree.proof_for_attempt(c.course(), c.attempt()).unwrap();
            assert!(proof.verify(&tree.leaves()[i].leaf_hash, tree.root()));
        }
    }

    #[test]
    fn proof_for_picks_highest_attempt() {
        let tree = StudentTermTree::build(student(), term(), completions()).unwrap();
        assert_eq!(tree.completion_for(&course("C3")).unwrap().attempt(), 2);
        assert_eq!(
            tree.proof_for(&course("C3")).unwrap(),
            tree.proof_for_attempt(&course("C3"), 2).unwrap()
        );
    }

    #[test]
    fn promoted_course_has_proof_shorter_than_height() {
        let tree = StudentTermTree::build(student(), term(), completions()).unwrap();
        assert_eq!(tree.height(), 3);

        // C4 is the fifth leaf, promoted twice.
        let proof = tree.proof_for(&course("C4")).unwrap();
        assert_eq!(proof.len(), 1);
        assert!(tree.verify(&course("C4"), &proof, tree.root()).unwrap());

        for c in tree.courses() {
            assert!(tree.proof_for(c).unwrap().len() <= tree.height());
        }
    }

    #[test]
    fn verify_against_wrong_root_is_false() {
        let tree = StudentTermTree::build(student(), term(), completions()).unwrap();
        let proof = tree.proof_for(&course("C2")).unwrap();
        assert!(!tree.verify(&course("C2"), &proof, &H256::zero()).unwrap());
    }

    #[test]
    fn verify_with_another_courses_proof_is_false() {
        let tree = StudentTermTree::build(student(), term(), completions()).unwrap();
        let proof = tree.proof_for(&course("C1")).unwrap();
        assert!(!tree.verify(&course("C2"), &proof, tree.root()).unwrap());
    }

    #[test]
    fn unknown_course_gives_not_found() {
        let tree = StudentTermTree::build(student(), term(), completions()).unwrap();
        assert_err!(
            tree.proof_for(&course("C9")),
            Err(StudentTreeError::NotFound { .. })
        );
        assert_err!(
            tree.verify(&course("C9"), &PathSiblings::default(), tree.root()),
            Err(StudentTreeError::NotFound { .. })
        );
    }

    #[test]
    fn bit_flips_in_leaf_parts_break_verification() {
        let tree = StudentTermTree::build(student(), term(), completions()).unwrap();
        let c = course("C2");
        let leaf = *tree.leaf_for(&c).unwrap();
        let proof = tree.proof_for(&c).unwrap();

        for bit in 0..256 {
            let mut block = leaf.timestamp_block;
            block.0 .0[bit / 8] ^= 1 << (bit % 8);
            let tampered = leaf_hash_from_parts(&block, &leaf.record_hash);
            assert!(!proof.verify(&tampered, tree.root()));

            let mut record_hash = leaf.record_hash;
            record_hash.0[bit / 8] ^= 1 << (bit % 8);
            let tampered = leaf_hash_from_parts(&leaf.timestamp_block, &record_hash);
            assert!(!proof.verify(&tampered, tree.root()));
        }
    }

    #[test]
    fn single_completion_tree_root_is_leaf() {
        let tree =
            StudentTermTree::build(student(), term(), vec![completion("C1", 1, 1000)]).unwrap();
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.root(), &tree.leaves()[0].leaf_hash);
        let proof = tree.proof_for(&course("C1")).unwrap();
        assert!(proof.is_empty());
        assert!(tree.verify(&course("C1"), &proof, tree.root()).unwrap());
    }
}
