// Copyright ⓒ 2023 SilverSixpence
// Licensed under the MIT license
// (see LICENSE or <http://opensource.org/licenses/MIT>) All files in the project carrying such
// notice may not be copied, modified, or distributed except according to those
// terms.

//! # Two-level accumulator for academic credentials
//!
//! Course completions of a student in a term are committed to a binary
//! Merkle tree, the *student term tree*. The roots of all student term trees
//! of a term are then committed to a 256-ary Verkle-style trie, the *term
//! aggregation tree*, whose root is what gets anchored on a public ledger.
//!
//! A student can hand a verifier a [VerificationReceipt] disclosing any
//! subset of their completions. The verifier checks it against the anchored
//! root without access to the repository that issued it:
//! - each disclosed completion is proven to be a leaf of the student term
//!   tree with a SHA-256 Merkle path
//! - the student term root is proven to be the value stored under the
//!   student's key in the aggregation tree with an inner-product-argument
//!   multiproof over Ristretto
//! - the term root the receipt was issued against must equal the root held
//!   by the ledger
//!
//! ## What is contained in this code
//!
//! - [StudentTermTree]: building, proving and verifying student term trees.
//! - [TermAggregationTree]: versioned per-term aggregation with membership
//!   proofs ([AggregationProof]).
//! - [verify_binding]: checking that claimed student term roots are bound to
//!   a term root.
//! - [ReceiptIssuer] & [verify_receipt]: the selective-disclosure protocol.
//! - [Repository]: builds whole terms in parallel and publishes them through
//!   an [Anchor].
//!
//! The inner-product argument and multipoint opening live in [ipa].
//!
//! ## How this code can be used
//!
//! ```
#![doc = include_str!("../demos/main.rs")]
//! ```

pub mod ipa;
pub mod read_write_utils;
pub mod utils;

pub use curve25519_dalek_ng::{ristretto::RistrettoPoint, scalar::Scalar};
pub use primitive_types::H256;

mod hasher;
pub use hasher::Hasher;

mod max_thread_count;
pub use max_thread_count::{
    initialize_machine_parallelism, MaxThreadCount, MaxThreadCountError, MACHINE_PARALLELISM,
};

mod completion;
pub use completion::{
    CompletionIdentity, CourseCompletion, CourseCompletionBuilder, CourseCompletionBuilderError,
    CourseId, IdentifierError, IssuerId, StudentKey, TermId, TimestampOrderError, Timestamps,
    IDENTIFIER_MAX_BYTES,
};

mod leaf;
pub use leaf::{
    encode_leaf, leaf_hash_from_parts, record_hash, EncodedLeaf, LeafError, TimestampBlock,
    TIMESTAMP_BLOCK_BYTES,
};

mod binary_tree;
pub use binary_tree::{
    MerkleTree, PathSibling, PathSiblings, PathSiblingsError, Side, TreeBuildError,
};

mod student_tree;
pub use student_tree::{StudentTermTree, StudentTreeError};

mod aggregation;
pub use aggregation::{student_key_hash, AggregationError, PublishedRoot, TermAggregationTree};

mod binding;
pub use binding::{
    verify_binding, AggregationProof, BindingError, KeyOpening, PROOF_TRANSCRIPT_LABEL,
};

mod anchor;
pub use anchor::{Anchor, AnchorError, AnchorReceipt, AnchoredRoot, InMemoryAnchor};

mod repository;
pub use repository::{Repository, RepositoryError, TermEntry};

mod config;
pub use config::{
    RepositoryConfig, RepositoryConfigBuilder, RepositoryConfigBuilderError, RepositoryConfigError,
};

mod receipt;
pub use receipt::{
    verify_receipt, verify_receipt_anchored, verify_receipt_with_anchor, ReceiptError,
    ReceiptIssuer, VerificationReceipt, Violation, Violations, RECEIPT_FILE_EXTENSION,
};
