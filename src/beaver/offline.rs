//! An in-process triplet source for computations where all parties share one process.
//!
//! Used in tests and simulations as a drop-in replacement for the networked dealer: the same
//! generation code path runs against a pool shared by all party handles, so the statistical
//! properties of the shares (uniformity, exact residual) are identical to the dealer's.

use std::{collections::HashMap, sync::Arc};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    beaver::{BeaverTriplet, Error, TripletSource, deal_triplet},
    channel::Channel,
    circuit::{PartyId, TripletKey},
    field::Modulus,
};

struct Pool {
    modulus: Modulus,
    parties: usize,
    rng: ChaCha20Rng,
    cache: HashMap<TripletKey, Vec<BeaverTriplet>>,
}

/// One party's handle to a triplet pool shared by all parties of the computation.
#[derive(Clone)]
pub struct OfflineSource {
    party: PartyId,
    pool: Arc<Mutex<Pool>>,
}

impl OfflineSource {
    /// Creates one source handle per party, all drawing from the same pool.
    pub fn for_parties(parties: usize, modulus: Modulus) -> Vec<OfflineSource> {
        let pool = Arc::new(Mutex::new(Pool {
            modulus,
            parties,
            rng: ChaCha20Rng::from_entropy(),
            cache: HashMap::new(),
        }));
        (0..parties)
            .map(|party| OfflineSource {
                party,
                pool: Arc::clone(&pool),
            })
            .collect()
    }
}

impl<C: Channel + Sync> TripletSource<C> for OfflineSource {
    async fn triplet(&mut self, _channel: &C, key: TripletKey) -> Result<BeaverTriplet, Error> {
        let mut pool = self.pool.lock().await;
        let pool = &mut *pool;
        if !pool.cache.contains_key(&key) {
            debug!("generating offline triplet set for gate {key:?}");
            let set = deal_triplet(&pool.modulus, pool.parties, &mut pool.rng)?;
            pool.cache.insert(key, set);
        }
        Ok(pool.cache[&key][self.party])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{beaver::tests::assert_triplet_invariant, channel::SimpleChannel};

    #[tokio::test]
    async fn shares_reconstruct_for_any_party_count() -> Result<(), Error> {
        let q = Modulus::new(65537).unwrap();
        for parties in 1..6 {
            let channels = SimpleChannel::channels(parties);
            let mut sources = OfflineSource::for_parties(parties, q);
            let key = TripletKey { in1: 0, in2: 1, out: 2 };
            let mut shares = vec![];
            for (source, channel) in sources.iter_mut().zip(&channels) {
                shares.push(source.triplet(channel, key).await?);
            }
            assert_triplet_invariant(&q, &shares);
        }
        Ok(())
    }

    #[tokio::test]
    async fn same_key_yields_the_cached_set() -> Result<(), Error> {
        let q = Modulus::new(65537).unwrap();
        let channels = SimpleChannel::channels(2);
        let mut sources = OfflineSource::for_parties(2, q);
        let key = TripletKey { in1: 3, in2: 4, out: 5 };
        let first = sources[0].triplet(&channels[0], key).await?;
        let again = sources[0].triplet(&channels[0], key).await?;
        assert_eq!(first, again);
        Ok(())
    }
}
