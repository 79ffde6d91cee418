//! Common reference string for the vector commitment.
//!
//! The CRS is made of `n` value generators `G_i` and one auxiliary point `Q`
//! used by the inner-product argument. The `G_i` are hashed onto the group
//! from a fixed seed so nobody knows a discrete log relation between them.
//! `Q` is the Pedersen blinding base from the bulletproofs library, which is
//! derived independently of the seed.

use bulletproofs::PedersenGens;
use curve25519_dalek_ng::{
    ristretto::RistrettoPoint, scalar::Scalar, traits::VartimeMultiscalarMul,
};
use once_cell::sync::Lazy;

use std::collections::HashSet;

use super::{LagrangeBasis, DOMAIN_SIZE};
use crate::hasher::Hasher;

const CRS_SEED: &[u8] = b"credacc_aggregation_tree_crs_v1";

static DEFAULT_CRS: Lazy<Crs> = Lazy::new(|| Crs::new(DOMAIN_SIZE, CRS_SEED));

/// Generators for committing to vectors of length `n`.
#[allow(non_snake_case)]
#[derive(Debug, Clone)]
pub struct Crs {
    pub n: usize,
    pub G: Vec<RistrettoPoint>,
    pub Q: RistrettoPoint,
}

impl Crs {
    /// Derive `n` generators from `seed`.
    ///
    /// Candidates that collide with an already generated point (or with `Q`)
    /// are skipped so that the generator set always has full rank.
    #[allow(non_snake_case)]
    pub fn new(n: usize, seed: &[u8]) -> Self {
        let Q = PedersenGens::default().B_blinding;

        let mut seen = HashSet::with_capacity(n + 1);
        seen.insert(Q.compress().to_bytes());

        let G = (0u64..)
            .map(|index| hash_to_group(seed, index))
            .filter(|point| seen.insert(point.compress().to_bytes()))
            .take(n)
            .collect();

        Crs { n, G, Q }
    }

    /// The CRS used for all aggregation trees, built once per process.
    pub fn shared() -> &'static Crs {
        &DEFAULT_CRS
    }

    /// `sum_i values[i] * G_i`.
    ///
    /// `values` may be shorter than `n`, the missing entries count as 0.
    pub fn commit(&self, values: &[Scalar]) -> RistrettoPoint {
        RistrettoPoint::vartime_multiscalar_mul(values.iter(), self.G.iter().take(values.len()))
    }

    /// Commit only to the non-zero entries, given as `(index, value)` pairs.
    pub fn commit_sparse(&self, entries: &[(usize, Scalar)]) -> RistrettoPoint {
        RistrettoPoint::vartime_multiscalar_mul(
            entries.iter().map(|(_, value)| value),
            entries.iter().map(|(index, _)| &self.G[*index]),
        )
    }

    pub fn commit_lagrange_poly(&self, polynomial: &LagrangeBasis) -> RistrettoPoint {
        self.commit(polynomial.values())
    }
}

fn hash_to_group(seed: &[u8], index: u64) -> RistrettoPoint {
    let mut hasher = Hasher::new();
    hasher.update(seed);
    hasher.update(&index.to_be_bytes());

    let mut wide = [0u8; 64];
    hasher.finalize_xof(&mut wide);
    RistrettoPoint::from_uniform_bytes(&wide)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let a = Crs::new(16, b"seed");
        let b = Crs::new(16, b"seed");
        assert_eq!(a.G, b.G);
        assert_eq!(a.Q, b.Q);
    }

    #[test]
    fn different_seed_gives_different_generators() {
        let a = Crs::new(4, b"seed");
        let b = Crs::new(4, b"other seed");
        assert_ne!(a.G[0], b.G[0]);
    }

    #[test]
    fn generators_are_distinct() {
        let crs = Crs::shared();
        assert_eq!(crs.G.len(), DOMAIN_SIZE);
        let unique: HashSet<_> = crs.G.iter().map(|p| p.compress().to_bytes()).collect();
        assert_eq!(unique.len(), DOMAIN_SIZE);
        assert!(!unique.contains(&crs.Q.compress().to_bytes()));
    }

    #[test]
    fn sparse_commit_matches_dense_commit() {
        let crs = Crs::new(8, b"seed");
        let mut dense = vec![Scalar::zero(); 8];
        dense[1] = Scalar::from(5u64);
        dense[6] = Scalar::from(9u64);

        let sparse = crs.commit_sparse(&[(1, Scalar::from(5u64)), (6, Scalar::from(9u64))]);
        assert_eq!(crs.commit(&dense), sparse);
    }

    #[test]
    fn short_vector_is_zero_padded() {
        let crs = Crs::new(8, b"seed");
        let short = [Scalar::from(3u64), Scalar::from(4u64)];
        let mut padded = short.to_vec();
        padded.resize(8, Scalar::zero());
        assert_eq!(crs.commit(&short), crs.commit(&padded));
    }
}
