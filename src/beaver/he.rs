//! A two-party triplet generator based on leveled homomorphic (BFV) encryption.
//!
//! Instead of trusting a dealer, the two parties compute the cross terms of the triplet product
//! under encryption. Each party samples random factor vectors `a_i`, `b_i` (one scalar per
//! plaintext slot), encrypts `a_i` under a batch-fresh key and sends it over; the peer
//! multiplies the ciphertext with its own `b_j`, masks the result with a fresh uniform vector
//! and switches the ciphertext down to the last ciphertext modulus before returning it. The
//! mask hides the plaintext cross term; the modulus switch drops the accumulated multiplication
//! noise (whose magnitude is correlated with `b_j`) down to rounding noise, so the decrypting
//! party learns nothing about the peer's factor beyond the masked sum. Decrypting and combining
//! both cross terms yields additive shares of `a * b` across all slots at once.
//!
//! A whole ring dimension's worth of triplets is produced per round with exactly two ciphertext
//! round trips, independent of the batch size, which amortizes much better than the dealer for
//! circuits with many multiplications. The evaluator consumes the batch slot by slot; when it
//! runs out mid-circuit, the source transparently runs another round.
//!
//! Both parties must construct their sources from the same [`HeParams`] and modulus, and the
//! modulus doubles as the BFV plaintext modulus, so it must support SIMD batching (a prime
//! congruent to 1 mod twice the ring degree, e.g. 65537 for any degree up to 32768).

use std::{collections::VecDeque, sync::Arc};

use fhe::bfv::{
    BfvParameters, BfvParametersBuilder, Ciphertext, Encoding, Plaintext, PublicKey, SecretKey,
};
use fhe_traits::{
    DeserializeParametrized, FheDecoder, FheDecrypter, FheEncoder, FheEncrypter, Serialize,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::debug;

use crate::{
    beaver::{BeaverTriplet, Error, TripletSource},
    channel::{Channel, recv_ciphertext_from, send_to},
    circuit::{PartyId, TripletKey},
    field::Modulus,
    message::Message,
};

/// The BFV parameters of the two-party triplet generator.
#[derive(Debug, Clone)]
pub struct HeParams {
    /// The ring degree; also the number of triplets generated per round.
    pub degree: usize,
    /// The bit sizes of the ciphertext moduli.
    pub moduli_sizes: Vec<usize>,
}

impl Default for HeParams {
    fn default() -> Self {
        Self {
            degree: 4096,
            moduli_sizes: vec![36, 37],
        }
    }
}

/// A triplet source for exactly two parties, generating batches via homomorphic encryption.
pub struct PairwiseHeSource {
    params: Arc<BfvParameters>,
    modulus: Modulus,
    peer: PartyId,
    rng: ChaCha20Rng,
    batch: VecDeque<BeaverTriplet>,
}

impl PairwiseHeSource {
    /// Creates the source for one of the two parties.
    ///
    /// Fails if the computation has more than two participants or if the BFV parameters are
    /// rejected by the underlying scheme.
    pub fn new(
        he: &HeParams,
        modulus: Modulus,
        party: PartyId,
        parties: usize,
    ) -> Result<Self, Error> {
        if parties != 2 || party >= 2 {
            return Err(Error::TwoPartyOnly(parties));
        }
        let params = BfvParametersBuilder::new()
            .set_degree(he.degree)
            .set_plaintext_modulus(modulus.value())
            .set_moduli_sizes(&he.moduli_sizes)
            .build_arc()?;
        Ok(Self {
            params,
            modulus,
            peer: 1 - party,
            rng: ChaCha20Rng::from_entropy(),
            batch: VecDeque::new(),
        })
    }

    /// Runs one batch-generation round with the peer and refills the triplet queue.
    async fn refill(&mut self, channel: &impl Channel) -> Result<(), Error> {
        let n = self.params.degree();
        let q = self.modulus;
        debug!("generating a batch of {n} triplets with party {}", self.peer);

        let a = q.sample_vec(n, &mut self.rng);
        let b = q.sample_vec(n, &mut self.rng);
        let mut c = q.mul_vec(&a, &b);

        // A fresh key pair per batch; the public key is shared with the peer so the peer can
        // mask (and thereby re-randomize) the cross term it computes for us.
        let sk = SecretKey::random(&self.params, &mut self.rng);
        let pk = PublicKey::new(&sk, &mut self.rng);
        let pt_a = Plaintext::try_encode(a.as_slice(), Encoding::simd(), &self.params)?;
        let ct_a: Ciphertext = pk.try_encrypt(&pt_a, &mut self.rng)?;
        send_to(channel, self.peer, "HE key", &Message::Ciphertext(pk.to_bytes())).await?;
        send_to(channel, self.peer, "HE factor", &Message::Ciphertext(ct_a.to_bytes())).await?;

        let peer_pk = recv_ciphertext_from(channel, self.peer, "HE key").await?;
        let peer_pk = PublicKey::from_bytes(&peer_pk, &self.params)?;
        let peer_ct = recv_ciphertext_from(channel, self.peer, "HE factor").await?;
        let peer_ct = Ciphertext::from_bytes(&peer_ct, &self.params)?;

        // Under the peer's key: a_peer * b_own + r, with r subtracted from our own c share so
        // the global sum is preserved. The noise of the product is correlated with b_own, so
        // the ciphertext must not leave at this level: switching to the last modulus reduces it
        // to rounding noise.
        let pt_b = Plaintext::try_encode(b.as_slice(), Encoding::simd(), &self.params)?;
        let cross = &peer_ct * &pt_b;
        let r = q.sample_vec(n, &mut self.rng);
        let pt_r = Plaintext::try_encode(r.as_slice(), Encoding::simd(), &self.params)?;
        let ct_r: Ciphertext = peer_pk.try_encrypt(&pt_r, &mut self.rng)?;
        let mut masked = &cross + &ct_r;
        masked.mod_switch_to_last_level()?;
        c = q.sub_vec(&c, &r);
        send_to(channel, self.peer, "HE cross term", &Message::Ciphertext(masked.to_bytes()))
            .await?;

        let own_cross = recv_ciphertext_from(channel, self.peer, "HE cross term").await?;
        let own_cross = Ciphertext::from_bytes(&own_cross, &self.params)?;
        let decrypted = sk.try_decrypt(&own_cross)?;
        let decoded = Vec::<u64>::try_decode(&decrypted, Encoding::simd())?;
        c = q.add_vec(&c, &decoded);

        self.batch = a
            .into_iter()
            .zip(b)
            .zip(c)
            .map(|((a, b), c)| BeaverTriplet { a, b, c })
            .collect();
        Ok(())
    }
}

impl<C: Channel + Sync> TripletSource<C> for PairwiseHeSource {
    async fn triplet(&mut self, channel: &C, _key: TripletKey) -> Result<BeaverTriplet, Error> {
        // Triplets are consumed slot by slot; both parties walk the same circuit, so their
        // batches stay aligned without keying.
        if self.batch.is_empty() {
            self.refill(channel).await?;
        }
        self.batch.pop_front().ok_or(Error::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use tokio::task;

    use super::*;
    use crate::{beaver::tests::assert_triplet_invariant, channel::SimpleChannel};

    async fn consume(
        he: HeParams,
        channel: SimpleChannel,
        party: PartyId,
        count: usize,
    ) -> Result<Vec<BeaverTriplet>, Error> {
        let q = Modulus::new(65537).unwrap();
        let mut source = PairwiseHeSource::new(&he, q, party, 2)?;
        let mut triplets = vec![];
        for i in 0..count {
            let key = TripletKey { in1: 2 * i as u64, in2: 2 * i as u64 + 1, out: u64::MAX };
            triplets.push(source.triplet(&channel, key).await?);
        }
        Ok(triplets)
    }

    #[tokio::test]
    async fn batched_triplets_reconstruct() -> Result<(), Error> {
        let q = Modulus::new(65537).unwrap();
        let mut channels = SimpleChannel::channels(2);
        let c1 = channels.pop().unwrap();
        let c0 = channels.pop().unwrap();
        let p1 = task::spawn(consume(HeParams::default(), c1, 1, 8));
        let shares_0 = consume(HeParams::default(), c0, 0, 8).await?;
        let shares_1 = p1.await.expect("party 1 panicked")?;
        for (s0, s1) in shares_0.iter().zip(&shares_1) {
            assert_triplet_invariant(&q, &[*s0, *s1]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn cross_terms_survive_a_multi_level_modulus_switch() -> Result<(), Error> {
        // Three ciphertext moduli: the masked cross term is switched down two levels before it
        // reaches the decrypting party.
        let he = HeParams {
            degree: 4096,
            moduli_sizes: vec![30, 30, 30],
        };
        let q = Modulus::new(65537).unwrap();
        let mut channels = SimpleChannel::channels(2);
        let c1 = channels.pop().unwrap();
        let c0 = channels.pop().unwrap();
        let p1 = task::spawn(consume(he.clone(), c1, 1, 4));
        let shares_0 = consume(he, c0, 0, 4).await?;
        let shares_1 = p1.await.expect("party 1 panicked")?;
        for (s0, s1) in shares_0.iter().zip(&shares_1) {
            assert_triplet_invariant(&q, &[*s0, *s1]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn rejects_more_than_two_parties() {
        let q = Modulus::new(65537).unwrap();
        let result = PairwiseHeSource::new(&HeParams::default(), q, 0, 3);
        assert!(matches!(result, Err(Error::TwoPartyOnly(3))));
    }
}
