//! Fiat-Shamir helpers on top of [merlin::Transcript].

use curve25519_dalek_ng::{ristretto::RistrettoPoint, scalar::Scalar};
use merlin::Transcript;

/// Extension trait giving the transcript the absorb/squeeze operations the
/// proofs in this crate need.
///
/// Prover and verifier must call these in exactly the same order with the
/// same labels, otherwise the challenges diverge.
pub trait TranscriptProtocol {
    /// Mark the start of a sub-protocol.
    fn domain_sep(&mut self, label: &'static [u8]);

    fn append_point(&mut self, label: &'static [u8], point: &RistrettoPoint);

    fn append_scalar(&mut self, label: &'static [u8], scalar: &Scalar);

    /// Squeeze a uniformly distributed scalar out of the transcript.
    fn challenge_scalar(&mut self, label: &'static [u8]) -> Scalar;
}

impl TranscriptProtocol for Transcript {
    fn domain_sep(&mut self, label: &'static [u8]) {
        self.append_message(b"dom-sep", label);
    }

    fn append_point(&mut self, label: &'static [u8], point: &RistrettoPoint) {
        self.append_message(label, point.compress().as_bytes());
    }

    fn append_scalar(&mut self, label: &'static [u8], scalar: &Scalar) {
        self.append_message(label, scalar.as_bytes());
    }

    fn challenge_scalar(&mut self, label: &'static [u8]) -> Scalar {
        let mut wide = [0u8; 64];
        self.challenge_bytes(label, &mut wide);
        Scalar::from_bytes_mod_order_wide(&wide)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulletproofs::PedersenGens;

    #[test]
    fn same_inputs_give_same_challenge() {
        let point = PedersenGens::default().B;

        let mut a = Transcript::new(b"test");
        a.append_point(b"C", &point);
        a.append_scalar(b"z", &Scalar::from(7u64));

        let mut b = Transcript::new(b"test");
        b.append_point(b"C", &point);
        b.append_scalar(b"z", &Scalar::from(7u64));

        assert_eq!(a.challenge_scalar(b"r"), b.challenge_scalar(b"r"));
    }

    #[test]
    fn absorbed_value_changes_challenge() {
        let mut a = Transcript::new(b"test");
        a.append_scalar(b"z", &Scalar::from(7u64));

        let mut b = Transcript::new(b"test");
        b.append_scalar(b"z", &Scalar::from(8u64));

        assert_ne!(a.challenge_scalar(b"r"), b.challenge_scalar(b"r"));
    }

    #[test]
    fn domain_separator_changes_challenge() {
        let mut a = Transcript::new(b"test");
        a.domain_sep(b"ipa");

        let mut b = Transcript::new(b"test");
        b.domain_sep(b"multiproof");

        assert_ne!(a.challenge_scalar(b"r"), b.challenge_scalar(b"r"));
    }
}
