//! Modular arithmetic over the modulus shared by all parties of a computation.

use rand::{CryptoRng, Rng};

/// The error returned when a modulus is too small or too large for the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the modulus must be in 2..2^63, got {0}")]
pub struct InvalidModulus(pub u64);

/// The modulus all shares and revealed values are reduced by.
///
/// A `Modulus` is fixed when the protocol is configured and passed explicitly to the evaluator
/// and the triplet sources, it is never global state. Elements are `u64` values in `0..q`;
/// products are computed with `u128` intermediates, so any modulus below 2^63 is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modulus(u64);

impl Modulus {
    /// Creates a new modulus, rejecting values that cannot carry a secret sharing.
    pub fn new(q: u64) -> Result<Self, InvalidModulus> {
        if q < 2 || q >= 1 << 63 {
            return Err(InvalidModulus(q));
        }
        Ok(Modulus(q))
    }

    /// Returns the modulus as a plain integer.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Reduces an arbitrary value into `0..q`.
    pub fn reduce(&self, a: u64) -> u64 {
        a % self.0
    }

    /// Adds two reduced values mod q.
    pub fn add(&self, a: u64, b: u64) -> u64 {
        (self.reduce(a) + self.reduce(b)) % self.0
    }

    /// Subtracts two values mod q.
    pub fn sub(&self, a: u64, b: u64) -> u64 {
        (self.reduce(a) + self.0 - self.reduce(b)) % self.0
    }

    /// Multiplies two values mod q.
    pub fn mul(&self, a: u64, b: u64) -> u64 {
        ((self.reduce(a) as u128 * self.reduce(b) as u128) % self.0 as u128) as u64
    }

    /// Negates a value mod q.
    pub fn neg(&self, a: u64) -> u64 {
        (self.0 - self.reduce(a)) % self.0
    }

    /// Samples a uniform element of `0..q`.
    ///
    /// Input sharing and triplet generation derive their confidentiality from the uniformity of
    /// these samples, so the generator must be cryptographically secure.
    pub fn sample(&self, rng: &mut (impl Rng + CryptoRng)) -> u64 {
        rng.gen_range(0..self.0)
    }

    /// Samples a vector of `n` uniform elements.
    pub(crate) fn sample_vec(&self, n: usize, rng: &mut (impl Rng + CryptoRng)) -> Vec<u64> {
        (0..n).map(|_| self.sample(rng)).collect()
    }

    /// Adds two vectors component-wise mod q.
    pub(crate) fn add_vec(&self, a: &[u64], b: &[u64]) -> Vec<u64> {
        a.iter().zip(b).map(|(a, b)| self.add(*a, *b)).collect()
    }

    /// Subtracts two vectors component-wise mod q.
    pub(crate) fn sub_vec(&self, a: &[u64], b: &[u64]) -> Vec<u64> {
        a.iter().zip(b).map(|(a, b)| self.sub(*a, *b)).collect()
    }

    /// Multiplies two vectors component-wise mod q.
    pub(crate) fn mul_vec(&self, a: &[u64], b: &[u64]) -> Vec<u64> {
        a.iter().zip(b).map(|(a, b)| self.mul(*a, *b)).collect()
    }
}
