use primitive_types::H256;

const DELIMITER: &[u8] = b";";

/// Delimited blake3 hasher.
///
/// Used wherever the crate needs a domain-separated digest that is not part
/// of the leaf encoding: hashing student keys into the aggregation trie key
/// space, mapping commitments into the scalar field, and seeding the
/// commitment generators.
///
/// Each call to [Hasher::update] is followed by a `;` byte, so the boundaries
/// between inputs are part of the digest. Hashing a term and a student key
/// as two inputs therefore gives the same bytes as plain blake3 over
/// `term;student;`, and a different digest from hashing `termstudent` once:
/// ```
/// use credacc::Hasher;
///
/// let mut split = Hasher::new();
/// split.update(b"2024-fall").update(b"alice@example.com");
///
/// let mut joined = Hasher::new();
/// joined.update(b"2024-fallalice@example.com");
/// assert_ne!(split.finalize(), joined.finalize());
///
/// let plain = blake3::hash(b"2024-fall;alice@example.com;");
/// assert_eq!(split.finalize().as_bytes(), plain.as_bytes());
/// ```
#[derive(Clone)]
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Hasher(blake3::Hasher::new())
    }

    pub fn update(&mut self, input: &[u8]) -> &mut Self {
        self.0.update(input);
        self.0.update(DELIMITER);
        self
    }

    pub fn finalize(&self) -> H256 {
        let bytes: [u8; 32] = self.0.finalize().into();
        H256(bytes)
    }

    /// Fill `output` with the extendable output of the hash.
    ///
    /// Used where more than 32 bytes are needed, e.g. wide reduction into the
    /// scalar field or hashing onto the group.
    pub fn finalize_xof(&self, output: &mut [u8]) {
        self.0.finalize_xof().fill(output);
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Hasher(blake3::Hasher::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_update_is_delimited() {
        let mut hasher = Hasher::new();
        hasher.update(b"student_key").update(b"alice");

        let mut expected = blake3::Hasher::new();
        expected.update(b"student_key;alice;");
        let expected: [u8; 32] = expected.finalize().into();

        assert_eq!(hasher.finalize(), H256(expected));
    }

    #[test]
    fn split_input_differs_from_joined_input() {
        let mut split = Hasher::new();
        split.update(b"T1").update(b"C1");

        let mut joined = Hasher::new();
        joined.update(b"T1C1");

        assert_ne!(split.finalize(), joined.finalize());
    }

    #[test]
    fn xof_prefix_matches_finalize() {
        let mut hasher = Hasher::new();
        hasher.update(b"scalar").update(b"commitment");

        let mut wide = [0u8; 64];
        hasher.finalize_xof(&mut wide);

        assert_eq!(&wide[..32], hasher.finalize().as_bytes());
    }
}
