//! Aggregate many polynomial openings into one inner-product argument.
//!
//! Given queries `f_i(z_i) = y_i` for committed polynomials `C_i`, the prover
//! combines them with powers of a challenge `r`:
//!
//! - `g(X) = sum_i r^i (f_i(X) - y_i) / (X - z_i)`, committed as `D`
//! - `h(X) = sum_i r^i f_i(X) / (t - z_i)` for a second challenge `t`,
//!   committed as `E`
//!
//! and then opens `h - g` at `t`. The verifier can compute `E` and
//! `h(t) - g(t) = sum_i r^i y_i / (t - z_i)` from the queries alone, so a
//! single IPA covers every opening.

use curve25519_dalek_ng::{
    ristretto::RistrettoPoint, scalar::Scalar, traits::VartimeMultiscalarMul,
};
use merlin::Transcript;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use std::collections::BTreeMap;

use super::{
    powers_of, Crs, IpaError, IpaProof, LagrangeBasis, PointBytes, PrecomputedWeights,
    ScalarBytes, TranscriptProtocol,
};

// -------------------------------------------------------------------------------------------------
// Queries.

/// One opening known to the prover: the full polynomial is available.
#[derive(Clone, Debug)]
pub struct ProverQuery {
    pub commitment: RistrettoPoint,
    pub poly: LagrangeBasis,
    /// Domain point the polynomial is opened at.
    pub point: usize,
    pub result: Scalar,
}

/// One opening as seen by the verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifierQuery {
    pub commitment: RistrettoPoint,
    pub point: Scalar,
    pub result: Scalar,
}

impl From<&ProverQuery> for VerifierQuery {
    fn from(query: &ProverQuery) -> Self {
        VerifierQuery {
            commitment: query.commitment,
            point: Scalar::from(query.point as u64),
            result: query.result,
        }
    }
}

fn record_queries<'a>(
    transcript: &mut Transcript,
    queries: impl Iterator<Item = (&'a RistrettoPoint, Scalar, &'a Scalar)>,
) {
    for (commitment, point, result) in queries {
        transcript.append_point(b"C", commitment);
        transcript.append_scalar(b"z", &point);
        transcript.append_scalar(b"y", result);
    }
}

// -------------------------------------------------------------------------------------------------
// Proof.

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiPointProof {
    #[serde_as(as = "PointBytes")]
    d_comm: RistrettoPoint,
    /// The evaluation challenge the prover derived. Only used to tell a
    /// transcript mismatch apart from a failed equation; the verifier always
    /// works with its own recomputed value.
    #[serde_as(as = "ScalarBytes")]
    evaluation_challenge: Scalar,
    open_proof: IpaProof,
}

impl MultiPointProof {
    pub fn open(
        crs: &Crs,
        precomp: &PrecomputedWeights,
        transcript: &mut Transcript,
        queries: &[ProverQuery],
    ) -> MultiPointProof {
        let domain_size = precomp.domain_size();

        transcript.domain_sep(b"multiproof");
        record_queries(
            transcript,
            queries
                .iter()
                .map(|q| (&q.commitment, Scalar::from(q.point as u64), &q.result)),
        );

        let r = transcript.challenge_scalar(b"r");
        let powers_of_r = powers_of(r, queries.len());

        // Polynomials opened at the same point share one division.
        let mut grouped: BTreeMap<usize, LagrangeBasis> = BTreeMap::new();
        for (query, r_i) in queries.iter().zip(powers_of_r) {
            let scaled = query.poly.clone() * r_i;
            let entry = match grouped.remove(&query.point) {
                Some(acc) => acc + scaled,
                None => scaled,
            };
            grouped.insert(query.point, entry);
        }
        let grouped: Vec<(usize, LagrangeBasis)> = grouped.into_iter().collect();

        let g_x = grouped
            .par_iter()
            .map(|(point, agg_f_x)| agg_f_x.divide_by_linear_vanishing(precomp, *point))
            .reduce(|| LagrangeBasis::zero(domain_size), |a, b| a + b);

        let d_comm = crs.commit_lagrange_poly(&g_x);
        transcript.append_point(b"D", &d_comm);

        let t = transcript.challenge_scalar(b"t");

        let mut denominators: Vec<Scalar> = grouped
            .iter()
            .map(|(point, _)| t - Scalar::from(*point as u64))
            .collect();
        Scalar::batch_invert(&mut denominators);

        let h_x = grouped
            .into_iter()
            .zip(denominators)
            .map(|((_, agg_f_x), den_inv)| agg_f_x * den_inv)
            .fold(LagrangeBasis::zero(domain_size), |a, b| a + b);

        let e_comm = crs.commit_lagrange_poly(&h_x);
        transcript.append_point(b"E", &e_comm);

        let opened = &h_x - &g_x;
        let opened_comm = e_comm - d_comm;

        let b = LagrangeBasis::evaluate_lagrange_coefficients(precomp, domain_size, t);
        let open_proof = IpaProof::create(
            transcript,
            crs,
            opened.values().to_vec(),
            b,
            &opened_comm,
            t,
        );

        MultiPointProof {
            d_comm,
            evaluation_challenge: t,
            open_proof,
        }
    }

    pub fn check(
        &self,
        crs: &Crs,
        precomp: &PrecomputedWeights,
        queries: &[VerifierQuery],
        transcript: &mut Transcript,
    ) -> Result<(), IpaError> {
        if queries.is_empty() {
            return Err(IpaError::NoQueries);
        }

        transcript.domain_sep(b"multiproof");
        record_queries(
            transcript,
            queries.iter().map(|q| (&q.commitment, q.point, &q.result)),
        );

        let r = transcript.challenge_scalar(b"r");
        let powers_of_r = powers_of(r, queries.len());

        transcript.append_point(b"D", &self.d_comm);
        let t = transcript.challenge_scalar(b"t");

        if t != self.evaluation_challenge {
            return Err(IpaError::ChallengeMismatch);
        }

        let mut denominators: Vec<Scalar> = queries.iter().map(|q| t - q.point).collect();
        Scalar::batch_invert(&mut denominators);

        let helper_scalars: Vec<Scalar> = powers_of_r
            .into_iter()
            .zip(denominators)
            .map(|(r_i, den_inv)| r_i * den_inv)
            .collect();

        let opened_value: Scalar = helper_scalars
            .iter()
            .zip(queries)
            .map(|(helper, q)| helper * q.result)
            .sum();

        let e_comm = RistrettoPoint::vartime_multiscalar_mul(
            helper_scalars.iter(),
            queries.iter().map(|q| &q.commitment),
        );
        transcript.append_point(b"E", &e_comm);

        let opened_comm = e_comm - self.d_comm;

        let b = LagrangeBasis::evaluate_lagrange_coefficients(precomp, crs.n, t);
        self.open_proof
            .verify(transcript, crs, &b, &opened_comm, t, opened_value)
    }
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::assert_err;

    const N: usize = 16;

    fn poly(seed: u64) -> LagrangeBasis {
        LagrangeBasis::new(
            (0..N as u64)
                .map(|i| Scalar::from(seed * 1000 + i * i + 1))
                .collect(),
        )
    }

    fn queries(crs: &Crs) -> Vec<ProverQuery> {
        let opening = |seed: u64, point: usize| {
            let poly = poly(seed);
            ProverQuery {
                commitment: crs.commit_lagrange_poly(&poly),
                result: poly.evaluate_in_domain(point),
                poly,
                point,
            }
        };

        // Two polynomials share point 3 to exercise the grouping.
        vec![opening(1, 3), opening(2, 3), opening(3, 0), opening(4, 15)]
    }

    fn prove(crs: &Crs, precomp: &PrecomputedWeights) -> (MultiPointProof, Vec<VerifierQuery>) {
        let queries = queries(crs);
        let mut transcript = Transcript::new(b"multiproof test");
        let proof = MultiPointProof::open(crs, precomp, &mut transcript, &queries);
        (proof, queries.iter().map(VerifierQuery::from).collect())
    }

    #[test]
    fn honest_multiproof_verifies() {
        let crs = Crs::new(N, b"multiproof test");
        let precomp = PrecomputedWeights::new(N);
        let (proof, verifier_queries) = prove(&crs, &precomp);

        let mut transcript = Transcript::new(b"multiproof test");
        assert!(proof
            .check(&crs, &precomp, &verifier_queries, &mut transcript)
            .is_ok());
    }

    #[test]
    fn changed_result_is_caught_by_transcript() {
        let crs = Crs::new(N, b"multiproof test");
        let precomp = PrecomputedWeights::new(N);
        let (proof, mut verifier_queries) = prove(&crs, &precomp);
        verifier_queries[1].result += Scalar::one();

        let mut transcript = Transcript::new(b"multiproof test");
        assert_err!(
            proof.check(&crs, &precomp, &verifier_queries, &mut transcript),
            Err(IpaError::ChallengeMismatch)
        );
    }

    #[test]
    fn forged_challenge_fails_equation() {
        let crs = Crs::new(N, b"multiproof test");
        let precomp = PrecomputedWeights::new(N);
        let (proof, mut verifier_queries) = prove(&crs, &precomp);
        verifier_queries[2].result += Scalar::one();

        // A prover that knows the verifier's t still cannot satisfy the IPA.
        let mut forged = proof;
        let mut transcript = Transcript::new(b"multiproof test");
        transcript.domain_sep(b"multiproof");
        record_queries(
            &mut transcript,
            verifier_queries.iter().map(|q| (&q.commitment, q.point, &q.result)),
        );
        let _ = transcript.challenge_scalar(b"r");
        transcript.append_point(b"D", &forged.d_comm);
        forged.evaluation_challenge = transcript.challenge_scalar(b"t");

        let mut transcript = Transcript::new(b"multiproof test");
        assert_err!(
            forged.check(&crs, &precomp, &verifier_queries, &mut transcript),
            Err(IpaError::InnerProductFailed)
        );
    }

    #[test]
    fn empty_queries_are_rejected() {
        let crs = Crs::new(N, b"multiproof test");
        let precomp = PrecomputedWeights::new(N);
        let (proof, _) = prove(&crs, &precomp);

        let mut transcript = Transcript::new(b"multiproof test");
        assert_err!(
            proof.check(&crs, &precomp, &[], &mut transcript),
            Err(IpaError::NoQueries)
        );
    }

    #[test]
    fn bincode_keeps_proof_intact() {
        let crs = Crs::new(N, b"multiproof test");
        let precomp = PrecomputedWeights::new(N);
        let (proof, verifier_queries) = prove(&crs, &precomp);

        let bytes = bincode::serialize(&proof).unwrap();
        let decoded: MultiPointProof = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, proof);

        let mut transcript = Transcript::new(b"multiproof test");
        assert!(decoded
            .check(&crs, &precomp, &verifier_queries, &mut transcript)
            .is_ok());
    }
}
