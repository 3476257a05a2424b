//! Beaver triplets and the sources that provide them.
//!
//! A multiplication gate cannot be evaluated on additive shares alone: the parties first need
//! shares of a triplet `(a, b, c)` with `c = a * b mod q`, where `a` and `b` are uniformly
//! random and unknown to every party. This module defines the per-party triplet share, the
//! [`TripletSource`] trait the evaluator pulls triplets from, and three interchangeable
//! implementations:
//!
//! * [`dealer`]: a trusted third party generates and distributes triplet shares on request.
//! * [`offline`]: all parties live in one process and draw from a shared pool (testing).
//! * [`he`]: two parties generate triplet batches without any third party, using leveled
//!   homomorphic encryption.

use std::future::Future;

use rand::{CryptoRng, Rng};

use crate::{
    channel::{self, Channel},
    circuit::TripletKey,
    field::Modulus,
};

pub mod dealer;
pub mod he;
pub mod offline;

/// Errors raised while obtaining Beaver triplets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A triplet message could not be sent or received.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// A homomorphic operation of the two-party generator failed.
    #[error("HE triplet generation failed: {0}")]
    Fhe(#[from] fhe::Error),
    /// The HE-based generator only supports exactly two parties.
    #[error("the HE triplet source requires exactly 2 parties, got {0}")]
    TwoPartyOnly(usize),
    /// The dealer responded with a triplet for a different multiplication gate.
    #[error("requested a triplet for gate {requested:?}, received one for {received:?}")]
    KeyMismatch {
        /// The key sent along with the request.
        requested: TripletKey,
        /// The key the response was tagged with.
        received: TripletKey,
    },
    /// A triplet request specified a party count of zero.
    #[error("a triplet cannot be split among 0 parties")]
    EmptySharing,
    /// A freshly generated triplet batch was empty, which indicates a bug in the source.
    #[error("triplet batch exhausted directly after a refill")]
    Exhausted,
    /// A triplet request asked for a share outside of the sharing it specified.
    #[error("invalid triplet request by party {requester} of {parties} parties")]
    BadRequest {
        /// The party the request claims to come from.
        requester: u64,
        /// The party count the request specified.
        parties: u64,
    },
}

/// One party's additive share of a Beaver triplet `(a, b, c)` with `c = a * b mod q`.
///
/// Summing the shares of all parties component-wise yields the global triplet. A share is
/// consumed by exactly one multiplication gate and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaverTriplet {
    /// This party's share of the random factor `a`.
    pub a: u64,
    /// This party's share of the random factor `b`.
    pub b: u64,
    /// This party's share of the product `c = a * b`.
    pub c: u64,
}

/// A provider of Beaver triplets, queried by the evaluator once per multiplication gate.
///
/// All parties must query their sources with the same keys in the same order, so that the
/// shares handed out for a gate belong to the same global triplet.
pub trait TripletSource<C: Channel> {
    /// Returns this party's share of the triplet for the given multiplication gate, running
    /// whatever sub-protocol is necessary to produce it.
    fn triplet(
        &mut self,
        channel: &C,
        key: TripletKey,
    ) -> impl Future<Output = Result<BeaverTriplet, Error>> + Send;
}

/// Splits a value into `parties` additive shares mod q.
///
/// The first `parties - 1` shares are uniformly random, the last one is the exact residual, so
/// the shares always sum to `value` mod q.
pub(crate) fn split_additive(
    q: &Modulus,
    value: u64,
    parties: usize,
    rng: &mut (impl Rng + CryptoRng),
) -> Vec<u64> {
    let mut shares = Vec::with_capacity(parties);
    let mut sum = 0;
    for _ in 0..parties.saturating_sub(1) {
        let share = q.sample(rng);
        sum = q.add(sum, share);
        shares.push(share);
    }
    shares.push(q.sub(value, sum));
    shares
}

/// Samples a fresh triplet `(a, b, a * b)` and splits each component into per-party shares.
///
/// The returned vector is indexed by party; handing out entries across parties preserves the
/// global triplet invariant.
pub(crate) fn deal_triplet(
    q: &Modulus,
    parties: usize,
    rng: &mut (impl Rng + CryptoRng),
) -> Result<Vec<BeaverTriplet>, Error> {
    if parties == 0 {
        return Err(Error::EmptySharing);
    }
    let a = q.sample(rng);
    let b = q.sample(rng);
    let c = q.mul(a, b);
    let a_shares = split_additive(q, a, parties, rng);
    let b_shares = split_additive(q, b, parties, rng);
    let c_shares = split_additive(q, c, parties, rng);
    Ok(a_shares
        .into_iter()
        .zip(b_shares)
        .zip(c_shares)
        .map(|((a, b), c)| BeaverTriplet { a, b, c })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    /// Checks that the per-party shares reconstruct to a consistent triplet.
    pub(crate) fn assert_triplet_invariant(q: &Modulus, shares: &[BeaverTriplet]) {
        let mut a = 0;
        let mut b = 0;
        let mut c = 0;
        for share in shares {
            a = q.add(a, share.a);
            b = q.add(b, share.b);
            c = q.add(c, share.c);
        }
        assert_eq!(c, q.mul(a, b), "c != a * b for reconstructed triplet");
    }

    #[test]
    fn additive_shares_sum_to_the_secret() {
        let q = Modulus::new(65537).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for parties in 1..6 {
            for value in [0, 1, 65536, 42] {
                let shares = split_additive(&q, value, parties, &mut rng);
                assert_eq!(shares.len(), parties);
                let sum = shares.into_iter().fold(0, |acc, s| q.add(acc, s));
                assert_eq!(sum, value);
            }
        }
    }

    #[test]
    fn dealt_triplets_reconstruct() {
        let q = Modulus::new(65537).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        for parties in 1..6 {
            let shares = deal_triplet(&q, parties, &mut rng).unwrap();
            assert_eq!(shares.len(), parties);
            assert_triplet_invariant(&q, &shares);
        }
    }

    #[test]
    fn zero_parties_is_an_error() {
        let q = Modulus::new(65537).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        assert!(matches!(deal_triplet(&q, 0, &mut rng), Err(Error::EmptySharing)));
    }
}
