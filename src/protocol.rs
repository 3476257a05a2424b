//! The secure computation protocol, executed once per party and run.
//!
//! [`mpc`] walks the circuit gate by gate: linear gates are evaluated locally on the shares,
//! [`Op::Input`] and [`Op::Mul`] and [`Op::Reveal`] gates exchange messages with the peers, and
//! every multiplication gate consumes one fresh Beaver triplet from the configured
//! [`TripletSource`]. The evaluator is strictly sequential; it suspends only on the specific
//! message it needs next, and a stalled peer stalls the run (there are no timeouts and no
//! recovery, as peers are assumed to be semi-honest).

use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::task;
use tracing::{Level, debug, error, instrument};

use crate::{
    beaver::{
        self, TripletSource,
        dealer::{self, DealerClient},
        he::{HeParams, PairwiseHeSource},
        offline::OfflineSource,
    },
    channel::{self, Channel, SimpleChannel, recv_value_from, send_to},
    circuit::{Circuit, CircuitError, Op, PartyId, TripletKey, WireId},
    field::{InvalidModulus, Modulus},
    message::Message,
};

/// A custom error type for MPC computation and communication.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message could not be sent or received.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// The specified circuit is invalid.
    #[error(transparent)]
    Circuit(#[from] CircuitError),
    /// A Beaver triplet could not be obtained.
    #[error(transparent)]
    Triplet(#[from] beaver::Error),
    /// The configured modulus cannot carry a secret sharing.
    #[error(transparent)]
    InvalidModulus(#[from] InvalidModulus),
    /// An operation refers to a party that does not participate in the computation.
    #[error("party {0} is not among the {1} participants")]
    UnknownParty(PartyId, usize),
    /// A wire was read before any operation wrote it.
    #[error("wire {0} was read before it was written")]
    UndefinedWire(WireId),
    /// A wire was written twice, violating the write-once wire table.
    #[error("wire {0} was written twice")]
    WireAlreadySet(WireId),
    /// A peer sent a share belonging to a different wire than the protocol expected.
    #[error("expected a share for wire {expected}, got one for wire {actual}")]
    WireMismatch {
        /// The wire the evaluator was waiting for.
        expected: WireId,
        /// The wire the received share was tagged with.
        actual: WireId,
    },
    /// The circuit ended without revealing anything.
    #[error("the circuit contains no reveal gate")]
    NoRevealGate,
    /// A simulated party could not be joined.
    #[error("simulated party failed: {0}")]
    Simulation(String),
}

/// The per-run configuration of the evaluator.
#[derive(Debug, Clone, Copy)]
pub struct EvalConfig {
    /// The modulus all shares are reduced by.
    pub modulus: Modulus,
    /// The distinguished party that injects constants and the `e * f` correction term.
    ///
    /// Exactly one party must play this role and all parties must agree on it, otherwise
    /// constants would be added once per party and the sharing invariant would break. It is the
    /// same party for `AddConst` and `Mul` gates throughout a run.
    pub distinguished: PartyId,
}

impl EvalConfig {
    /// Creates a configuration with the given modulus and party 0 as the distinguished party.
    pub fn new(modulus: u64) -> Result<Self, InvalidModulus> {
        Ok(Self {
            modulus: Modulus::new(modulus)?,
            distinguished: 0,
        })
    }
}

/// Executes the MPC protocol for one party and returns the revealed circuit output.
///
/// Every participant must call this function with the same circuit, configuration and party
/// count, a channel connecting it to all peers, and a triplet source agreeing with the peers'
/// sources. `secret` is this party's input, used by the `Input` gates it owns.
#[instrument(level = Level::DEBUG, skip_all, fields(party = p_own), err)]
pub async fn mpc<C: Channel + Sync>(
    channel: &C,
    circuit: &Circuit,
    secret: u64,
    p_own: PartyId,
    parties: usize,
    cfg: &EvalConfig,
    triplets: &mut impl TripletSource<C>,
) -> Result<u64, Error> {
    if p_own >= parties {
        return Err(Error::UnknownParty(p_own, parties));
    }
    let q = cfg.modulus;
    let mut rng = ChaCha20Rng::from_entropy();
    let mut wires: HashMap<WireId, u64> = HashMap::new();
    let mut output = None;
    for op in circuit.ops() {
        debug!(?op, "evaluating");
        match *op {
            Op::Input { party, out } => {
                if party >= parties {
                    return Err(Error::UnknownParty(party, parties));
                }
                if party == p_own {
                    // Split the secret among all parties; our own share is the residual, so
                    // that the shares sum to the secret mod q.
                    let mut sum = 0;
                    for p in (0..parties).filter(|p| *p != p_own) {
                        let share = q.sample(&mut rng);
                        sum = q.add(sum, share);
                        let msg = Message::Value { wire: out, value: share };
                        send_to(channel, p, "input share", &msg).await?;
                    }
                    set_wire(&mut wires, out, q.sub(secret, sum))?;
                } else {
                    let (wire, value) = recv_value_from(channel, party, "input share").await?;
                    if wire != out {
                        return Err(Error::WireMismatch { expected: out, actual: wire });
                    }
                    set_wire(&mut wires, out, q.reduce(value))?;
                }
            }
            Op::Add { in1, in2, out } => {
                let v = q.add(wire(&wires, in1)?, wire(&wires, in2)?);
                set_wire(&mut wires, out, v)?;
            }
            Op::Sub { in1, in2, out } => {
                let v = q.sub(wire(&wires, in1)?, wire(&wires, in2)?);
                set_wire(&mut wires, out, v)?;
            }
            Op::AddConst { input, value, out } => {
                // The constant must enter the sharing exactly once, so only the distinguished
                // party adds it.
                let mut v = wire(&wires, input)?;
                if p_own == cfg.distinguished {
                    v = q.add(v, value);
                }
                set_wire(&mut wires, out, v)?;
            }
            Op::MulConst { input, value, out } => {
                let v = q.mul(wire(&wires, input)?, value);
                set_wire(&mut wires, out, v)?;
            }
            Op::Mul { in1, in2, out } => {
                let triplet = triplets
                    .triplet(channel, TripletKey { in1, in2, out })
                    .await?;
                let x = wire(&wires, in1)?;
                let y = wire(&wires, in2)?;
                // Beaver's trick: open e = x - a and f = y - b. Both are uniformly masked by
                // the triplet, so revealing them leaks nothing about x and y.
                let mut e = q.sub(x, triplet.a);
                let mut f = q.sub(y, triplet.b);
                for p in (0..parties).filter(|p| *p != p_own) {
                    let msg = Message::Value { wire: out, value: e };
                    send_to(channel, p, "mul opening", &msg).await?;
                    let msg = Message::Value { wire: out, value: f };
                    send_to(channel, p, "mul opening", &msg).await?;
                }
                for p in (0..parties).filter(|p| *p != p_own) {
                    for opened in [&mut e, &mut f] {
                        let (wire, value) = recv_value_from(channel, p, "mul opening").await?;
                        if wire != out {
                            return Err(Error::WireMismatch { expected: out, actual: wire });
                        }
                        *opened = q.add(*opened, value);
                    }
                }
                let mut z = q.add(triplet.c, q.add(q.mul(x, f), q.mul(y, e)));
                if p_own == cfg.distinguished {
                    z = q.sub(z, q.mul(e, f));
                }
                set_wire(&mut wires, out, z)?;
            }
            Op::Reveal { input, out } => {
                let share = wire(&wires, input)?;
                for p in (0..parties).filter(|p| *p != p_own) {
                    let msg = Message::Value { wire: out, value: share };
                    send_to(channel, p, "reveal share", &msg).await?;
                }
                let mut sum = share;
                for p in (0..parties).filter(|p| *p != p_own) {
                    let (wire, value) = recv_value_from(channel, p, "reveal share").await?;
                    if wire != out {
                        return Err(Error::WireMismatch { expected: out, actual: wire });
                    }
                    sum = q.add(sum, value);
                }
                debug!(value = sum, "revealed wire {out}");
                set_wire(&mut wires, out, sum)?;
                output = Some(sum);
            }
        }
    }
    output.ok_or(Error::NoRevealGate)
}

fn set_wire(wires: &mut HashMap<WireId, u64>, wire: WireId, value: u64) -> Result<(), Error> {
    if wires.insert(wire, value).is_some() {
        return Err(Error::WireAlreadySet(wire));
    }
    Ok(())
}

fn wire(wires: &HashMap<WireId, u64>, wire: WireId) -> Result<u64, Error> {
    wires.get(&wire).copied().ok_or(Error::UndefinedWire(wire))
}

/// The triplet generation strategy used by [`simulate_mpc`].
#[derive(Debug, Clone)]
pub enum Preprocessor {
    /// A trusted dealer task serving all parties (centralized generation).
    TrustedDealer,
    /// An in-process pool shared by all parties.
    Offline,
    /// Two-party generation via homomorphic encryption (distributed generation).
    PairwiseHe(HeParams),
}

/// Simulates the multi party computation with the given inputs, one party per input.
///
/// All parties run as tasks of the current process, connected by [`SimpleChannel`]s, and every
/// party receives the revealed output.
pub async fn simulate_mpc(
    circuit: &Circuit,
    inputs: &[u64],
    modulus: u64,
    preprocessor: Preprocessor,
) -> Result<Vec<u64>, Error> {
    let parties = inputs.len();
    let cfg = EvalConfig::new(modulus)?;
    match preprocessor {
        Preprocessor::Offline => {
            let channels = SimpleChannel::channels(parties);
            let sources = OfflineSource::for_parties(parties, cfg.modulus);
            run_parties(circuit, inputs, cfg, channels, sources).await
        }
        Preprocessor::TrustedDealer => {
            let mut channels = SimpleChannel::channels(parties + 1);
            let dealer_channel = channels.pop().expect("one channel per party and dealer");
            let q = cfg.modulus;
            task::spawn(async move {
                if let Err(e) = dealer::serve(&dealer_channel, parties, q).await {
                    error!("trusted dealer failed: {e}");
                }
            });
            let sources = (0..parties)
                .map(|p| DealerClient::new(p, parties, parties))
                .collect();
            run_parties(circuit, inputs, cfg, channels, sources).await
        }
        Preprocessor::PairwiseHe(he) => {
            let channels = SimpleChannel::channels(parties);
            let sources = (0..parties)
                .map(|p| PairwiseHeSource::new(&he, cfg.modulus, p, parties))
                .collect::<Result<Vec<_>, _>>()?;
            run_parties(circuit, inputs, cfg, channels, sources).await
        }
    }
}

async fn run_parties<T>(
    circuit: &Circuit,
    inputs: &[u64],
    cfg: EvalConfig,
    channels: Vec<SimpleChannel>,
    sources: Vec<T>,
) -> Result<Vec<u64>, Error>
where
    T: TripletSource<SimpleChannel> + Send + 'static,
{
    let parties = inputs.len();
    let mut handles = vec![];
    for (p, (channel, mut source)) in channels.into_iter().zip(sources).enumerate() {
        let circuit = circuit.clone();
        let secret = inputs[p];
        handles.push(task::spawn(async move {
            mpc(&channel, &circuit, secret, p, parties, &cfg, &mut source).await
        }));
    }
    let mut outputs = vec![];
    for handle in handles {
        let output = handle
            .await
            .map_err(|e| Error::Simulation(format!("{e:?}")))??;
        outputs.push(output);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_without_a_reveal_gate() {
        let circuit = Circuit::new(vec![
            Op::Input { party: 0, out: 0 },
            Op::Input { party: 1, out: 1 },
            Op::Add { in1: 0, in2: 1, out: 2 },
        ])
        .unwrap();
        let result = simulate_mpc(&circuit, &[1, 2], 65537, Preprocessor::Offline).await;
        assert!(matches!(result, Err(Error::NoRevealGate)));
    }

    #[tokio::test]
    async fn fails_for_an_input_of_an_unknown_party() {
        let circuit = Circuit::new(vec![
            Op::Input { party: 5, out: 0 },
            Op::Reveal { input: 0, out: 1 },
        ])
        .unwrap();
        let result = simulate_mpc(&circuit, &[1, 2], 65537, Preprocessor::Offline).await;
        assert!(matches!(result, Err(Error::UnknownParty(5, 2))));
    }

    #[tokio::test]
    async fn fails_for_a_degenerate_modulus() {
        let circuit = Circuit::new(vec![
            Op::Input { party: 0, out: 0 },
            Op::Reveal { input: 0, out: 1 },
        ])
        .unwrap();
        let result = simulate_mpc(&circuit, &[1], 1, Preprocessor::Offline).await;
        assert!(matches!(result, Err(Error::InvalidModulus(_))));
    }

    #[tokio::test]
    async fn he_preprocessing_requires_two_parties() {
        let circuit = Circuit::new(vec![
            Op::Input { party: 0, out: 0 },
            Op::Reveal { input: 0, out: 1 },
        ])
        .unwrap();
        let result =
            simulate_mpc(&circuit, &[1, 2, 3], 65537, Preprocessor::PairwiseHe(HeParams::default()))
                .await;
        assert!(matches!(
            result,
            Err(Error::Triplet(beaver::Error::TwoPartyOnly(3)))
        ));
    }
}
