//! Inner-product argument (Bulletproofs / BCMS style, no zero-knowledge).
//!
//! Proves that `y = <a, b>` where the prover knows `a` with
//! `C = <a, G>` and `b` is public. Each round halves the vectors and sends
//! two cross-term commitments `L` and `R`, so a proof for length `n` has
//! `log2(n)` rounds and ends with a single scalar.

use curve25519_dalek_ng::{
    ristretto::RistrettoPoint, scalar::Scalar, traits::VartimeMultiscalarMul,
};
use merlin::Transcript;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::{inner_product, Crs, IpaError, PointBytes, ScalarBytes, TranscriptProtocol};

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpaProof {
    #[serde_as(as = "Vec<PointBytes>")]
    pub(crate) l_vec: Vec<RistrettoPoint>,
    #[serde_as(as = "Vec<PointBytes>")]
    pub(crate) r_vec: Vec<RistrettoPoint>,
    #[serde_as(as = "ScalarBytes")]
    pub(crate) a: Scalar,
}

impl IpaProof {
    /// Number of folding rounds.
    pub fn rounds(&self) -> usize {
        self.l_vec.len()
    }

    /// Prove `<a, b> = y` for the commitment `commitment = <a, G>`, with `b`
    /// being the Lagrange coefficients of `input_point`.
    ///
    /// `a` and `b` must have the same power-of-two length, no larger than the
    /// CRS.
    #[allow(non_snake_case)]
    pub fn create(
        transcript: &mut Transcript,
        crs: &Crs,
        mut a: Vec<Scalar>,
        mut b: Vec<Scalar>,
        commitment: &RistrettoPoint,
        input_point: Scalar,
    ) -> IpaProof {
        debug_assert_eq!(a.len(), b.len());
        debug_assert!(a.len().is_power_of_two());

        let mut G = crs.G[..a.len()].to_vec();
        let output_point = inner_product(&a, &b);

        transcript.domain_sep(b"ipa");
        transcript.append_point(b"C", commitment);
        transcript.append_scalar(b"input point", &input_point);
        transcript.append_scalar(b"output point", &output_point);

        let w = transcript.challenge_scalar(b"w");
        let Q = crs.Q * w;

        let rounds = a.len().trailing_zeros() as usize;
        let mut l_vec = Vec::with_capacity(rounds);
        let mut r_vec = Vec::with_capacity(rounds);

        while a.len() > 1 {
            let half = a.len() / 2;
            let (a_L, a_R) = a.split_at(half);
            let (b_L, b_R) = b.split_at(half);
            let (G_L, G_R) = G.split_at(half);

            let z_L = inner_product(a_R, b_L);
            let z_R = inner_product(a_L, b_R);

            let C_L = RistrettoPoint::vartime_multiscalar_mul(
                a_R.iter().chain(std::iter::once(&z_L)),
                G_L.iter().chain(std::iter::once(&Q)),
            );
            let C_R = RistrettoPoint::vartime_multiscalar_mul(
                a_L.iter().chain(std::iter::once(&z_R)),
                G_R.iter().chain(std::iter::once(&Q)),
            );

            transcript.append_point(b"L", &C_L);
            transcript.append_point(b"R", &C_R);
            l_vec.push(C_L);
            r_vec.push(C_R);

            let x = transcript.challenge_scalar(b"x");
            let x_inv = x.invert();

            let next_a = a_L.iter().zip(a_R).map(|(l, r)| l + x * r).collect();
            let next_b = b_L.iter().zip(b_R).map(|(l, r)| l + x_inv * r).collect();
            let next_G = G_L.iter().zip(G_R).map(|(l, r)| l + x_inv * r).collect();

            a = next_a;
            b = next_b;
            G = next_G;
        }

        IpaProof {
            l_vec,
            r_vec,
            a: a[0],
        }
    }

    /// Check the proof against `commitment`, the public vector `b` and the
    /// claimed `output_point = <a, b>`.
    #[allow(non_snake_case)]
    pub fn verify(
        &self,
        transcript: &mut Transcript,
        crs: &Crs,
        b: &[Scalar],
        commitment: &RistrettoPoint,
        input_point: Scalar,
        output_point: Scalar,
    ) -> Result<(), IpaError> {
        let n = b.len();
        let expected_rounds = n.trailing_zeros() as usize;
        if !n.is_power_of_two()
            || n > crs.n
            || self.l_vec.len() != expected_rounds
            || self.r_vec.len() != expected_rounds
        {
            return Err(IpaError::RoundCount {
                expected: expected_rounds,
                actual: self.l_vec.len(),
            });
        }

        transcript.domain_sep(b"ipa");
        transcript.append_point(b"C", commitment);
        transcript.append_scalar(b"input point", &input_point);
        transcript.append_scalar(b"output point", &output_point);

        let w = transcript.challenge_scalar(b"w");
        let Q = crs.Q * w;

        let mut challenges = Vec::with_capacity(expected_rounds);
        for (C_L, C_R) in self.l_vec.iter().zip(self.r_vec.iter()) {
            transcript.append_point(b"L", C_L);
            transcript.append_point(b"R", C_R);
            challenges.push(transcript.challenge_scalar(b"x"));
        }

        let mut challenges_inv = challenges.clone();
        Scalar::batch_invert(&mut challenges_inv);

        // C' = C + y*Q + sum_j (x_j * L_j + x_j^-1 * R_j)
        let folded_commitment = RistrettoPoint::vartime_multiscalar_mul(
            std::iter::once(Scalar::one())
                .chain(std::iter::once(output_point))
                .chain(challenges.iter().copied())
                .chain(challenges_inv.iter().copied()),
            std::iter::once(commitment)
                .chain(std::iter::once(&Q))
                .chain(self.l_vec.iter())
                .chain(self.r_vec.iter()),
        );

        // Round j folds index i with x_j^-1 iff i is in the right half of its
        // round-j block, i.e. bit (k-1-j) of i is set.
        let mut s = vec![Scalar::one(); n];
        for (j, x_inv) in challenges_inv.iter().enumerate() {
            let half = n >> (j + 1);
            for (i, s_i) in s.iter_mut().enumerate() {
                if (i / half) % 2 == 1 {
                    *s_i *= x_inv;
                }
            }
        }

        let b_0 = inner_product(&s, b);
        let expected = RistrettoPoint::vartime_multiscalar_mul(
            s.iter().map(|s_i| self.a * s_i).chain(std::iter::once(self.a * b_0)),
            crs.G[..n].iter().chain(std::iter::once(&Q)),
        );

        if folded_commitment == expected {
            Ok(())
        } else {
            Err(IpaError::InnerProductFailed)
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipa::{LagrangeBasis, PrecomputedWeights};
    use crate::utils::test_utils::assert_err;

    const N: usize = 16;

    fn setup() -> (Crs, PrecomputedWeights, Vec<Scalar>) {
        let crs = Crs::new(N, b"ipa test");
        let precomp = PrecomputedWeights::new(N);
        let a = (0..N as u64).map(|i| Scalar::from(i * 7 + 11)).collect();
        (crs, precomp, a)
    }

    fn prove(crs: &Crs, precomp: &PrecomputedWeights, a: &[Scalar], z: Scalar) -> (IpaProof, Scalar) {
        let b = LagrangeBasis::evaluate_lagrange_coefficients(precomp, N, z);
        let y = inner_product(a, &b);
        let commitment = crs.commit(a);
        let mut transcript = Transcript::new(b"ipa test");
        let proof = IpaProof::create(&mut transcript, crs, a.to_vec(), b, &commitment, z);
        (proof, y)
    }

    #[test]
    fn honest_proof_verifies() {
        let (crs, precomp, a) = setup();
        let z = Scalar::from(1234u64);
        let (proof, y) = prove(&crs, &precomp, &a, z);
        assert_eq!(proof.rounds(), 4);

        let b = LagrangeBasis::evaluate_lagrange_coefficients(&precomp, N, z);
        let mut transcript = Transcript::new(b"ipa test");
        assert!(proof
            .verify(&mut transcript, &crs, &b, &crs.commit(&a), z, y)
            .is_ok());
    }

    #[test]
    fn wrong_output_fails() {
        let (crs, precomp, a) = setup();
        let z = Scalar::from(1234u64);
        let (proof, y) = prove(&crs, &precomp, &a, z);

        let b = LagrangeBasis::evaluate_lagrange_coefficients(&precomp, N, z);
        let mut transcript = Transcript::new(b"ipa test");
        let res = proof.verify(
            &mut transcript,
            &crs,
            &b,
            &crs.commit(&a),
            z,
            y + Scalar::one(),
        );
        assert_err!(res, Err(IpaError::InnerProductFailed));
    }

    #[test]
    fn wrong_commitment_fails() {
        let (crs, precomp, a) = setup();
        let z = Scalar::from(99u64);
        let (proof, y) = prove(&crs, &precomp, &a, z);

        let mut other = a.clone();
        other[3] += Scalar::one();

        let b = LagrangeBasis::evaluate_lagrange_coefficients(&precomp, N, z);
        let mut transcript = Transcript::new(b"ipa test");
        let res = proof.verify(&mut transcript, &crs, &b, &crs.commit(&other), z, y);
        assert_err!(res, Err(IpaError::InnerProductFailed));
    }

    #[test]
    fn truncated_proof_is_rejected() {
        let (crs, precomp, a) = setup();
        let z = Scalar::from(99u64);
        let (mut proof, y) = prove(&crs, &precomp, &a, z);
        proof.l_vec.pop();

        let b = LagrangeBasis::evaluate_lagrange_coefficients(&precomp, N, z);
        let mut transcript = Transcript::new(b"ipa test");
        let res = proof.verify(&mut transcript, &crs, &b, &crs.commit(&a), z, y);
        assert_err!(res, Err(IpaError::RoundCount { expected: 4, actual: 3 }));
    }
}
