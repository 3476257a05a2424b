//! A trusted (non-colluding) dealer that generates and distributes Beaver triplets.
//!
//! The dealer is an additional party process: circuit parties send it a
//! [`Message::TripletRequest`] per multiplication gate and block until the matching
//! [`Message::TripletResponse`] arrives. Generated triplet sets are cached under their
//! [`TripletKey`], so that every party requesting the same gate receives its share of the same
//! global triplet, and repeated requests are answered with bit-identical shares.

use std::collections::HashMap;

use futures::future::try_join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::sync::Mutex;
use tracing::{Level, debug, instrument};

use crate::{
    beaver::{BeaverTriplet, Error, TripletSource, deal_triplet},
    channel::{Channel, ErrorKind, recv_from, send_to},
    circuit::{PartyId, TripletKey},
    field::Modulus,
    message::Message,
};

struct DealerState {
    rng: ChaCha20Rng,
    cache: HashMap<TripletKey, Vec<BeaverTriplet>>,
}

/// Runs the trusted dealer, serving triplet requests from all parties concurrently.
///
/// The dealer answers requests until every party has closed its connection. Cache access is
/// mutually exclusive, so concurrent requests for the same key trigger at most one generation.
#[instrument(level = Level::DEBUG, skip_all, err)]
pub async fn serve(
    channel: &(impl Channel + Sync),
    parties: usize,
    modulus: Modulus,
) -> Result<(), Error> {
    debug!("dealing triplets for {parties} parties mod {}", modulus.value());
    let state = Mutex::new(DealerState {
        rng: ChaCha20Rng::from_entropy(),
        cache: HashMap::new(),
    });
    try_join_all((0..parties).map(|p| serve_party(channel, p, &state, modulus))).await?;
    Ok(())
}

async fn serve_party(
    channel: &impl Channel,
    p: PartyId,
    state: &Mutex<DealerState>,
    modulus: Modulus,
) -> Result<(), Error> {
    loop {
        let msg = match recv_from(channel, p, "triplet request").await {
            Ok(msg) => msg,
            // The party is done and has hung up. Any other receive failure (e.g. a timeout on
            // a stalled connection) is an error, not a graceful shutdown.
            Err(e) if matches!(e.reason, ErrorKind::Closed) => {
                debug!("party {p} disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let Message::TripletRequest {
            requester,
            parties,
            key,
        } = msg
        else {
            return Err(crate::channel::Error {
                phase: "triplet request".into(),
                reason: ErrorKind::UnexpectedMessage {
                    expected: "triplet request",
                    actual: msg.kind(),
                },
            }
            .into());
        };
        if requester >= parties {
            return Err(Error::BadRequest { requester, parties });
        }
        let share = {
            let mut state = state.lock().await;
            let state = &mut *state;
            if !state.cache.contains_key(&key) {
                debug!("generating triplet set for gate {key:?}");
                let set = deal_triplet(&modulus, parties as usize, &mut state.rng)?;
                state.cache.insert(key, set);
            }
            let set = &state.cache[&key];
            if requester as usize >= set.len() {
                return Err(Error::BadRequest { requester, parties });
            }
            set[requester as usize]
        };
        send_to(channel, p, "triplet response", &Message::TripletResponse { key, share }).await?;
    }
}

/// The party-side handle of the dealer protocol.
///
/// Implements [`TripletSource`] by one blocking request/response round trip with the dealer per
/// multiplication gate.
#[derive(Debug, Clone)]
pub struct DealerClient {
    party: PartyId,
    parties: usize,
    dealer: PartyId,
}

impl DealerClient {
    /// Creates a client for the given party, where `dealer` is the dealer's channel index.
    pub fn new(party: PartyId, parties: usize, dealer: PartyId) -> Self {
        Self {
            party,
            parties,
            dealer,
        }
    }
}

impl<C: Channel + Sync> TripletSource<C> for DealerClient {
    async fn triplet(&mut self, channel: &C, key: TripletKey) -> Result<BeaverTriplet, Error> {
        let request = Message::TripletRequest {
            requester: self.party as u64,
            parties: self.parties as u64,
            key,
        };
        send_to(channel, self.dealer, "triplet request", &request).await?;
        match recv_from(channel, self.dealer, "triplet response").await? {
            Message::TripletResponse { key: received, share } if received == key => Ok(share),
            Message::TripletResponse { key: received, .. } => Err(Error::KeyMismatch {
                requested: key,
                received,
            }),
            other => Err(crate::channel::Error {
                phase: "triplet response".into(),
                reason: ErrorKind::UnexpectedMessage {
                    expected: "triplet response",
                    actual: other.kind(),
                },
            }
            .into()),
        }
    }
}
