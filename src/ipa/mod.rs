//! Vector commitments and opening proofs over the Ristretto group.
//!
//! This is the commitment scheme behind the term aggregation tree. Vectors
//! of length [DOMAIN_SIZE] are committed with [Crs::commit] and treated as
//! polynomials in evaluation form over the domain `0..DOMAIN_SIZE`
//! ([LagrangeBasis]). Any number of openings `f(z) = y` are proven together
//! with one [MultiPointProof], which reduces them to a single
//! inner-product argument ([IpaProof]).
//!
//! Group and scalar arithmetic is provided by `curve25519-dalek-ng` and the
//! Fiat-Shamir transcript by `merlin`, the same stack the bulletproofs
//! library is built on.

use curve25519_dalek_ng::{
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs};

use crate::hasher::Hasher;

mod crs;
pub use crs::Crs;

mod inner_product;
pub use inner_product::IpaProof;

mod lagrange_basis;
pub use lagrange_basis::{inner_product, powers_of, LagrangeBasis, PrecomputedWeights};

mod multiproof;
pub use multiproof::{MultiPointProof, ProverQuery, VerifierQuery};

mod transcript;
pub use transcript::TranscriptProtocol;

/// Width of every committed vector, and so the branching factor of the
/// aggregation trie.
pub const DOMAIN_SIZE: usize = 256;

/// Map a commitment to the scalar field so that it can be committed to again
/// one level up.
pub fn group_to_field(point: &RistrettoPoint) -> Scalar {
    let mut hasher = Hasher::new();
    hasher.update(b"group_to_field");
    hasher.update(point.compress().as_bytes());

    let mut wide = [0u8; 64];
    hasher.finalize_xof(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

// -------------------------------------------------------------------------------------------------
// Wire encoding.

/// Serialize a group element as its 32-byte compressed form.
///
/// Deserialization fails for bytes that are not a valid encoding.
pub struct PointBytes;

impl SerializeAs<RistrettoPoint> for PointBytes {
    fn serialize_as<S: Serializer>(source: &RistrettoPoint, serializer: S) -> Result<S::Ok, S::Error> {
        source.compress().to_bytes().serialize(serializer)
    }
}

impl<'de> DeserializeAs<'de, RistrettoPoint> for PointBytes {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<RistrettoPoint, D::Error> {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        CompressedRistretto(bytes)
            .decompress()
            .ok_or_else(|| D::Error::custom("bytes are not a valid Ristretto point"))
    }
}

/// Serialize a scalar as its 32-byte little-endian form.
///
/// Deserialization fails for non-canonical encodings.
pub struct ScalarBytes;

impl SerializeAs<Scalar> for ScalarBytes {
    fn serialize_as<S: Serializer>(source: &Scalar, serializer: S) -> Result<S::Ok, S::Error> {
        source.to_bytes().serialize(serializer)
    }
}

impl<'de> DeserializeAs<'de, Scalar> for ScalarBytes {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<Scalar, D::Error> {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        Scalar::from_canonical_bytes(bytes)
            .ok_or_else(|| D::Error::custom("bytes are not a canonical scalar"))
    }
}

// -------------------------------------------------------------------------------------------------
// Errors.

/// Reasons an opening proof can be rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IpaError {
    #[error("Proof has no queries to check")]
    NoQueries,
    #[error("Recomputed evaluation challenge does not match the one in the proof")]
    ChallengeMismatch,
    #[error("Inner-product argument has {actual} rounds, expected {expected}")]
    RoundCount { expected: usize, actual: usize },
    #[error("Inner-product verification equation does not hold")]
    InnerProductFailed,
}
