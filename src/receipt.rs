//! Selective-disclosure verification receipts.
//!
//! A [VerificationReceipt] bundles everything needed to check a subset of a
//! student's completions against a published term root, without access to
//! the repository that issued it:
//! - the disclosed completions, each with its Merkle proof and packed
//!   timestamp block, tying them to the student term root
//! - the aggregation membership proof, tying the student term root to the
//!   term root
//!
//! Undisclosed completions are simply absent; they are neither revealed nor
//! checked.
//!
//! Verification runs five independent checks (structural, temporal, Merkle,
//! binding, anchor) and collects every violation instead of stopping at the
//! first one. Any violation means the receipt is not verified.

use log::{debug, info, warn};
use primitive_types::H256;
use serde::{Deserialize, Serialize};

use std::{collections::BTreeMap, fmt, path::PathBuf};

use crate::{
    aggregation::AggregationError,
    anchor::{Anchor, AnchorError, AnchoredRoot},
    binary_tree::PathSiblings,
    binding::{verify_binding, AggregationProof, BindingError},
    completion::{CourseCompletion, CourseId, StudentKey, TermId, TimestampOrderError},
    leaf::{leaf_hash_from_parts, record_hash, LeafError, TimestampBlock},
    read_write_utils::{self, FileFormat, ReadWriteError},
    repository::Repository,
    student_tree::StudentTreeError,
};

/// Extension used for bincode-encoded receipt files.
pub const RECEIPT_FILE_EXTENSION: &str = "receipt";

// -------------------------------------------------------------------------------------------------
// Receipt.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReceipt {
    pub term_id: TermId,
    pub student_key: StudentKey,
    pub student_term_root: H256,
    /// Encoded [crate::AggregationProof].
    #[serde(with = "serde_bytes")]
    pub aggregation_proof: Vec<u8>,
    pub term_root: H256,
    /// Unix seconds.
    pub published_at: u64,
    pub disclosed_courses: Vec<CourseCompletion>,
    pub merkle_proofs: BTreeMap<CourseId, PathSiblings>,
    pub timestamp_blocks: BTreeMap<CourseId, TimestampBlock>,
}

impl VerificationReceipt {
    pub fn to_json(&self) -> Result<String, ReceiptError> {
        Ok(serde_json::to_string_pretty(self).map_err(ReadWriteError::from)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ReceiptError> {
        Ok(serde_json::from_str(json).map_err(ReadWriteError::from)?)
    }

    /// Write the receipt to a file.
    ///
    /// A `.json` extension gives a json file and `.receipt` a bincode file.
    pub fn serialize(&self, path: PathBuf) -> Result<(), ReceiptError> {
        info!("Serializing receipt to {:?}", path);
        match read_write_utils::file_format(&path, RECEIPT_FILE_EXTENSION)? {
            FileFormat::Json => read_write_utils::serialize_to_json_file(self, path)?,
            FileFormat::Binary => read_write_utils::serialize_to_bin_file(self, path)?,
        }
        Ok(())
    }

    /// Read a receipt written by [VerificationReceipt::serialize].
    pub fn deserialize(path: PathBuf) -> Result<Self, ReceiptError> {
        debug!("Deserializing receipt from {:?}", path);
        let receipt = match read_write_utils::file_format(&path, RECEIPT_FILE_EXTENSION)? {
            FileFormat::Json => read_write_utils::deserialize_from_json_file(path)?,
            FileFormat::Binary => read_write_utils::deserialize_from_bin_file(path)?,
        };
        Ok(receipt)
    }

    pub fn disclosed_course_ids(&self) -> Vec<&CourseId> {
        self.disclosed_courses.iter().map(|c| c.course()).collect()
    }
}

// -------------------------------------------------------------------------------------------------
// Issuing.

/// Builds receipts from the trees held in a [Repository].
pub struct ReceiptIssuer<'a> {
    repository: &'a Repository,
}

impl<'a> ReceiptIssuer<'a> {
    pub fn new(repository: &'a Repository) -> Self {
        ReceiptIssuer { repository }
    }

    /// Issue a receipt for `student` in `term` disclosing `disclosed`
    /// courses. An empty list discloses every course.
    ///
    /// For each course the highest attempt is disclosed. The term must be
    /// published with no pending changes.
    pub fn issue(
        &self,
        student: &StudentKey,
        term: &TermId,
        disclosed: &[CourseId],
    ) -> Result<VerificationReceipt, ReceiptError> {
        let tree = self
            .repository
            .student_tree(term, student)
            .ok_or_else(|| ReceiptError::StudentNotFound {
                student: student.clone(),
                term: term.clone(),
            })?;

        let aggregation = self
            .repository
            .aggregation(term)
            .ok_or_else(|| ReceiptError::StudentNotFound {
                student: student.clone(),
                term: term.clone(),
            })?;

        let published = aggregation
            .published_root()
            .copied()
            .ok_or_else(|| AggregationError::Unpublished { term: term.clone() })?;

        let courses: Vec<CourseId> = if disclosed.is_empty() {
            tree.courses().into_iter().cloned().collect()
        } else {
            let mut courses = disclosed.to_vec();
            courses.sort();
            courses.dedup();
            courses
        };

        let mut disclosed_courses = Vec::with_capacity(courses.len());
        let mut merkle_proofs = BTreeMap::new();
        let mut timestamp_blocks = BTreeMap::new();

        for course in courses {
            let completion = tree
                .completion_for(&course)
                .ok_or_else(|| StudentTreeError::NotFound {
                    course: course.clone(),
                })?;

            merkle_proofs.insert(course.clone(), tree.proof_for(&course)?);
            timestamp_blocks.insert(course, TimestampBlock::pack(completion.timestamps()));
            disclosed_courses.push(completion.clone());
        }

        let aggregation_proof = aggregation
            .prove_membership(std::slice::from_ref(student))?
            .to_bytes()?;

        info!(
            "Issued receipt for student {} in term {} disclosing {} of {} courses",
            student,
            term,
            disclosed_courses.len(),
            tree.courses().len()
        );

        Ok(VerificationReceipt {
            term_id: term.clone(),
            student_key: student.clone(),
            student_term_root: *tree.root(),
            aggregation_proof,
            term_root: published.root,
            published_at: published.published_at,
            disclosed_courses,
            merkle_proofs,
            timestamp_blocks,
        })
    }
}

// -------------------------------------------------------------------------------------------------
// Verification.

/// Run every check on `receipt`, with `expected_root` being the term root
/// the verifier fetched independently.
///
/// Pure: no I/O, no shared state. Either every check passes or all the
/// violations found are returned.
///
/// The receipt's publication time is checked against the one committed in
/// the aggregation proof, but nothing here ties it to the ledger. Use
/// [verify_receipt_anchored] when the anchored publication time is known.
pub fn verify_receipt(receipt: &VerificationReceipt, expected_root: &H256) -> Result<(), Violations> {
    conclude(receipt, collect_violations(receipt, expected_root))
}

/// Like [verify_receipt], with the root and publication time held by the
/// ledger.
///
/// A root is always published before it is anchored, so a receipt claiming
/// a publication time later than the anchored one is rejected.
pub fn verify_receipt_anchored(
    receipt: &VerificationReceipt,
    anchored: &AnchoredRoot,
) -> Result<(), Violations> {
    let mut violations = collect_violations(receipt, &anchored.root);

    if receipt.published_at > anchored.published_at {
        violations.push(Violation::PublishedAfterAnchoring {
            published_at: receipt.published_at,
            anchored_at: anchored.published_at,
        });
    }

    conclude(receipt, violations)
}

/// Fetch the latest anchored root for the receipt's term, then run
/// [verify_receipt_anchored] against it.
///
/// A failing anchor gives [ReceiptError::Anchor]: the outcome is unknown,
/// which is not the same as the receipt being invalid.
pub fn verify_receipt_with_anchor(
    receipt: &VerificationReceipt,
    anchor: &dyn Anchor,
) -> Result<(), ReceiptError> {
    let anchored = anchor.query_latest(&receipt.term_id)?;
    debug!(
        "Anchor gave root {:?} (version {}) for term {}",
        anchored.root, anchored.version, receipt.term_id
    );
    verify_receipt_anchored(receipt, &anchored)?;
    Ok(())
}

fn collect_violations(receipt: &VerificationReceipt, expected_root: &H256) -> Vec<Violation> {
    let mut violations = Vec::new();

    // Structural.
    if receipt.disclosed_courses.is_empty() {
        violations.push(Violation::NothingDisclosed);
    }

    for completion in &receipt.disclosed_courses {
        let course = completion.course();

        if completion.student() != &receipt.student_key || completion.term() != &receipt.term_id {
            violations.push(Violation::ForeignCompletion {
                course: course.clone(),
            });
        }

        let proof = receipt.merkle_proofs.get(course);
        let block = receipt.timestamp_blocks.get(course);

        if proof.is_none() {
            violations.push(Violation::MissingMerkleProof {
                course: course.clone(),
            });
        }

        let block = match block {
            Some(block) => block,
            None => {
                violations.push(Violation::MissingTimestampBlock {
                    course: course.clone(),
                });
                continue;
            }
        };

        // Temporal.
        let timestamps = block.unpack();

        if let Err(source) = timestamps.check_order() {
            violations.push(Violation::TimestampOrder {
                course: course.clone(),
                source,
            });
        }

        if timestamps.issued > receipt.published_at {
            violations.push(Violation::IssuedAfterPublication {
                course: course.clone(),
                issued: timestamps.issued,
                published_at: receipt.published_at,
            });
        }

        if *completion.timestamps() != timestamps {
            violations.push(Violation::TimestampMismatch {
                course: course.clone(),
            });
        }

        // Leaf-level cryptographic.
        let proof = match proof {
            Some(proof) => proof,
            None => continue,
        };

        match record_hash(&completion.identity()) {
            Ok(record_hash) => {
                let leaf = leaf_hash_from_parts(block, &record_hash);
                if !proof.verify(&leaf, &receipt.student_term_root) {
                    violations.push(Violation::MerkleProofInvalid {
                        course: course.clone(),
                    });
                }
            }
            Err(source) => violations.push(Violation::MalformedRecord {
                course: course.clone(),
                source,
            }),
        }
    }

    // Binding-level cryptographic. The publication time is committed in the
    // proof transcript; undecodable bytes are reported by verify_binding.
    if let Ok(proof) = AggregationProof::from_bytes(&receipt.aggregation_proof) {
        if proof.published_at() != receipt.published_at {
            violations.push(Violation::PublicationTimeMismatch {
                claimed: receipt.published_at,
                proven: proof.published_at(),
            });
        }
    }

    if let Err(err) = verify_binding(
        &receipt.aggregation_proof,
        &[(receipt.student_key.clone(), receipt.student_term_root)],
        &receipt.term_root,
    ) {
        violations.push(Violation::Binding(err));
    }

    // Anchor.
    if receipt.term_root != *expected_root {
        violations.push(Violation::AnchorMismatch {
            expected: *expected_root,
            actual: receipt.term_root,
        });
    }

    violations
}

fn conclude(receipt: &VerificationReceipt, violations: Vec<Violation>) -> Result<(), Violations> {
    if violations.is_empty() {
        info!(
            "Receipt for student {} in term {} verified ({} courses)",
            receipt.student_key,
            receipt.term_id,
            receipt.disclosed_courses.len()
        );
        Ok(())
    } else {
        warn!(
            "Receipt for student {} in term {} failed verification with {} violations",
            receipt.student_key,
            receipt.term_id,
            violations.len()
        );
        Err(Violations(violations))
    }
}

// -------------------------------------------------------------------------------------------------
// Violations.

/// One failed receipt check.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("Receipt discloses no courses")]
    NothingDisclosed,
    #[error("Course {course} belongs to another student or term")]
    ForeignCompletion { course: CourseId },
    #[error("Course {course} has no Merkle proof")]
    MissingMerkleProof { course: CourseId },
    #[error("Course {course} has no timestamp block")]
    MissingTimestampBlock { course: CourseId },
    #[error("Course {course} has out-of-order timestamps")]
    TimestampOrder {
        course: CourseId,
        source: TimestampOrderError,
    },
    #[error("Course {course} was issued at {issued}, after the term was published at {published_at}")]
    IssuedAfterPublication {
        course: CourseId,
        issued: u64,
        published_at: u64,
    },
    #[error("Course {course} timestamps differ from its timestamp block")]
    TimestampMismatch { course: CourseId },
    #[error("Course {course} has a malformed record")]
    MalformedRecord { course: CourseId, source: LeafError },
    #[error("Merkle proof of course {course} does not lead to the student term root")]
    MerkleProofInvalid { course: CourseId },
    #[error("Receipt claims publication at {claimed} but the proof commits to {proven}")]
    PublicationTimeMismatch { claimed: u64, proven: u64 },
    #[error("Student term root is not bound to the term root: {0}")]
    Binding(BindingError),
    #[error("Receipt term root {actual:?} differs from the anchored root {expected:?}")]
    AnchorMismatch { expected: H256, actual: H256 },
    #[error("Receipt claims publication at {published_at}, after the root was anchored at {anchored_at}")]
    PublishedAfterAnchoring { published_at: u64, anchored_at: u64 },
}

/// Every violation found while verifying one receipt. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} violation(s)", self.0.len())?;
        for violation in &self.0 {
            write!(f, "\n - {}", violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for Violations {}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Errors encountered when issuing, storing or verifying a receipt.
#[derive(thiserror::Error, Debug)]
pub enum ReceiptError {
    #[error("Student {student} has no tree in term {term}")]
    StudentNotFound { student: StudentKey, term: TermId },
    #[error("Student term tree error")]
    StudentTree(#[from] StudentTreeError),
    #[error("Aggregation tree error")]
    Aggregation(#[from] AggregationError),
    #[error("Encoding the aggregation proof failed")]
    Binding(#[from] BindingError),
    #[error("Anchored root could not be fetched")]
    Anchor(#[from] AnchorError),
    #[error("Receipt is not valid: {0}")]
    Violations(#[from] Violations),
    #[error("Receipt could not be read or written")]
    ReadWrite(#[from] ReadWriteError),
}

// -------------------------------------------------------------------------------------------------
// Unit tests.
