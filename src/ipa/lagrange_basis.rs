//! Polynomials in evaluation form over the domain `0, 1, ..., n-1`.
//!
//! A [LagrangeBasis] stores `f(0), f(1), ..., f(n-1)`. Committing to these
//! values with the CRS is the same as committing to the polynomial, and
//! opening the commitment at a point is an inner product with the Lagrange
//! coefficients of that point.

use curve25519_dalek_ng::scalar::Scalar;
use once_cell::sync::Lazy;

use std::ops::{Add, Mul, Sub};

use super::DOMAIN_SIZE;

static DEFAULT_WEIGHTS: Lazy<PrecomputedWeights> =
    Lazy::new(|| PrecomputedWeights::new(DOMAIN_SIZE));

// -------------------------------------------------------------------------------------------------
// Precomputed weights.

/// Barycentric weights for the domain `0..n`.
///
/// With `A(X) = prod_j (X - j)` the weight of domain point `i` is
/// `A'(i) = prod_{j != i} (i - j)`.
#[derive(Debug, Clone)]
pub struct PrecomputedWeights {
    barycentric_weights: Vec<Scalar>,
    inverted_barycentric_weights: Vec<Scalar>,
    /// `1/k` for `k` in `1..n`, index `k-1`.
    inverted_domain: Vec<Scalar>,
}

impl PrecomputedWeights {
    pub fn new(domain_size: usize) -> Self {
        // A'(i) = i! * (-1)^(n-1-i) * (n-1-i)!
        let mut factorials = Vec::with_capacity(domain_size);
        factorials.push(Scalar::one());
        for k in 1..domain_size {
            let previous = factorials[k - 1];
            factorials.push(previous * Scalar::from(k as u64));
        }

        let barycentric_weights: Vec<Scalar> = (0..domain_size)
            .map(|i| {
                let weight = factorials[i] * factorials[domain_size - 1 - i];
                if (domain_size - 1 - i) % 2 == 1 {
                    -weight
                } else {
                    weight
                }
            })
            .collect();

        let mut inverted_barycentric_weights = barycentric_weights.clone();
        Scalar::batch_invert(&mut inverted_barycentric_weights);

        let mut inverted_domain: Vec<Scalar> =
            (1..domain_size).map(|k| Scalar::from(k as u64)).collect();
        Scalar::batch_invert(&mut inverted_domain);

        PrecomputedWeights {
            barycentric_weights,
            inverted_barycentric_weights,
            inverted_domain,
        }
    }

    /// Weights for the aggregation tree domain, built once per process.
    pub fn shared() -> &'static PrecomputedWeights {
        &DEFAULT_WEIGHTS
    }

    pub fn domain_size(&self) -> usize {
        self.barycentric_weights.len()
    }

    pub fn barycentric_weight(&self, i: usize) -> Scalar {
        self.barycentric_weights[i]
    }

    pub fn inverted_barycentric_weight(&self, i: usize) -> Scalar {
        self.inverted_barycentric_weights[i]
    }

    /// `1 / (i - j)` for two distinct domain points.
    pub fn inverted_difference(&self, i: usize, j: usize) -> Scalar {
        if i > j {
            self.inverted_domain[i - j - 1]
        } else {
            -self.inverted_domain[j - i - 1]
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Polynomial in evaluation form.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagrangeBasis {
    values: Vec<Scalar>,
}

impl LagrangeBasis {
    pub fn new(values: Vec<Scalar>) -> Self {
        LagrangeBasis { values }
    }

    pub fn zero(domain_size: usize) -> Self {
        LagrangeBasis {
            values: vec![Scalar::zero(); domain_size],
        }
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    pub fn domain_size(&self) -> usize {
        self.values.len()
    }

    pub fn evaluate_in_domain(&self, index: usize) -> Scalar {
        self.values[index]
    }

    /// Evaluate at a point outside of the domain using the barycentric
    /// formula.
    pub fn evaluate_outside_domain(&self, precomp: &PrecomputedWeights, point: Scalar) -> Scalar {
        let coefficients = Self::evaluate_lagrange_coefficients(precomp, self.domain_size(), point);
        inner_product(&self.values, &coefficients)
    }

    /// Compute `q(X) = (f(X) - f(m)) / (X - m)` for the domain point `m`.
    ///
    /// At every `j != m` this is a plain division. At `m` itself `q(m)` equals
    /// `f'(m)`, which in evaluation form is
    /// `sum_{j != m} -q(j) * A'(m) / A'(j)`.
    pub fn divide_by_linear_vanishing(&self, precomp: &PrecomputedWeights, index: usize) -> Self {
        let y_index = self.values[index];
        let mut quotient = vec![Scalar::zero(); self.domain_size()];

        let a_prime_at_index = precomp.barycentric_weight(index);
        let mut q_index = Scalar::zero();

        for (j, f_j) in self.values.iter().enumerate() {
            if j == index {
                continue;
            }

            let q_j = (f_j - y_index) * precomp.inverted_difference(j, index);
            quotient[j] = q_j;

            q_index -= q_j * a_prime_at_index * precomp.inverted_barycentric_weight(j);
        }

        quotient[index] = q_index;
        LagrangeBasis::new(quotient)
    }

    /// The Lagrange coefficients `L_i(point)` for a point outside of the
    /// domain: `L_i(z) = A(z) / (A'(i) * (z - i))`.
    pub fn evaluate_lagrange_coefficients(
        precomp: &PrecomputedWeights,
        domain_size: usize,
        point: Scalar,
    ) -> Vec<Scalar> {
        let differences: Vec<Scalar> = (0..domain_size)
            .map(|i| point - Scalar::from(i as u64))
            .collect();

        let a_z: Scalar = differences.iter().product();

        let mut denominators: Vec<Scalar> = differences
            .iter()
            .enumerate()
            .map(|(i, difference)| precomp.barycentric_weight(i) * difference)
            .collect();
        Scalar::batch_invert(&mut denominators);

        denominators.into_iter().map(|inv| inv * a_z).collect()
    }
}

impl Add for LagrangeBasis {
    type Output = LagrangeBasis;

    fn add(mut self, rhs: LagrangeBasis) -> Self::Output {
        if self.values.len() < rhs.values.len() {
            self.values.resize(rhs.values.len(), Scalar::zero());
        }
        for (lhs, rhs) in self.values.iter_mut().zip(rhs.values) {
            *lhs += rhs;
        }
        self
    }
}

impl Sub for &LagrangeBasis {
    type Output = LagrangeBasis;

    fn sub(self, rhs: &LagrangeBasis) -> Self::Output {
        let values = self
            .values
            .iter()
            .zip(rhs.values.iter())
            .map(|(a, b)| a - b)
            .collect();
        LagrangeBasis::new(values)
    }
}

impl Mul<Scalar> for LagrangeBasis {
    type Output = LagrangeBasis;

    fn mul(mut self, rhs: Scalar) -> Self::Output {
        for value in self.values.iter_mut() {
            *value *= rhs;
        }
        self
    }
}

/// `sum_i a[i] * b[i]`.
pub fn inner_product(a: &[Scalar], b: &[Scalar]) -> Scalar {
    a.iter().zip(b.iter()).map(|(a, b)| a * b).sum()
}

/// `[1, x, x^2, ..., x^(n-1)]`.
pub fn powers_of(x: Scalar, n: usize) -> Vec<Scalar> {
    let mut powers = Vec::with_capacity(n);
    let mut current = Scalar::one();
    for _ in 0..n {
        powers.push(current);
        current *= x;
    }
    powers
}

// -------------------------------------------------------------------------------------------------
// Unit tests.

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 8;

    // f(X) = X^2 + 3X + 1 on the domain 0..N.
    fn quadratic() -> LagrangeBasis {
        LagrangeBasis::new(
            (0..N as u64)
                .map(|x| Scalar::from(x * x + 3 * x + 1))
                .collect(),
        )
    }

    #[test]
    fn barycentric_weights_match_definition() {
        let precomp = PrecomputedWeights::new(N);
        for i in 0..N {
            let expected: Scalar = (0..N)
                .filter(|j| *j != i)
                .map(|j| Scalar::from(i as u64) - Scalar::from(j as u64))
                .product();
            assert_eq!(precomp.barycentric_weight(i), expected);
            assert_eq!(
                precomp.barycentric_weight(i) * precomp.inverted_barycentric_weight(i),
                Scalar::one()
            );
        }
    }

    #[test]
    fn inverted_difference_is_signed() {
        let precomp = PrecomputedWeights::new(N);
        assert_eq!(
            precomp.inverted_difference(5, 2) * Scalar::from(3u64),
            Scalar::one()
        );
        assert_eq!(
            precomp.inverted_difference(2, 5) * Scalar::from(3u64),
            -Scalar::one()
        );
    }

    #[test]
    fn outside_evaluation_matches_polynomial() {
        let precomp = PrecomputedWeights::new(N);
        let z = 1000u64;
        let expected = Scalar::from(z * z + 3 * z + 1);
        assert_eq!(
            quadratic().evaluate_outside_domain(&precomp, Scalar::from(z)),
            expected
        );
    }

    #[test]
    fn lagrange_coefficients_sum_to_one() {
        let precomp = PrecomputedWeights::new(N);
        let coefficients =
            LagrangeBasis::evaluate_lagrange_coefficients(&precomp, N, Scalar::from(12345u64));
        let sum: Scalar = coefficients.iter().sum();
        assert_eq!(sum, Scalar::one());
    }

    #[test]
    fn quotient_is_linear_for_quadratic() {
        // (X^2 + 3X + 1 - f(m)) / (X - m) = X + m + 3
        let precomp = PrecomputedWeights::new(N);
        let m = 4usize;
        let quotient = quadratic().divide_by_linear_vanishing(&precomp, m);

        for x in 0..N {
            assert_eq!(
                quotient.evaluate_in_domain(x),
                Scalar::from((x + m + 3) as u64),
                "mismatch at {}",
                x
            );
        }
    }

    #[test]
    fn arithmetic_is_pointwise() {
        let f = quadratic();
        let doubled = f.clone() * Scalar::from(2u64);
        let sum = f.clone() + f.clone();
        assert_eq!(doubled, sum);
        assert_eq!(&sum - &f, f);
    }

    #[test]
    fn powers_start_at_one() {
        let powers = powers_of(Scalar::from(3u64), 4);
        assert_eq!(
            powers,
            vec![
                Scalar::one(),
                Scalar::from(3u64),
                Scalar::from(9u64),
                Scalar::from(27u64)
            ]
        );
    }
}
