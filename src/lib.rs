//! A Rust implementation of semi-honest secure multi-party computation (MPC) over additively
//! shared integers, using Beaver triplets for secure multiplication.
//!
//! This crate lets N mutually distrusting parties jointly evaluate an arithmetic circuit over
//! their secret inputs, revealing nothing but the final result. Every wire value is split into
//! additive shares modulo a fixed word-sized modulus, linear gates are evaluated locally, and
//! multiplication gates consume pre-distributed correlated randomness (Beaver triplets).
//!
//! ## Main Components
//!
//! The crate is structured into several modules:
//!
//! * [`protocol`]: The [`protocol::mpc`] function which executes the protocol for a single party.
//! * [`circuit`]: The arithmetic circuit representation consumed by the evaluator.
//! * [`beaver`]: Interchangeable sources of Beaver triplets: a trusted dealer serving all
//!   parties over the network, an in-process generator for tests, and a two-party generator
//!   based on leveled homomorphic (BFV) encryption.
//! * [`channel`]: Communication abstractions for exchanging data between parties.
//! * [`message`]: The big-endian wire format shared by all protocol messages.
//! * [`field`]: Modular arithmetic over the configured modulus.
//!
//! ## Basic Usage
//!
//! To run an MPC computation, each participating party needs to:
//!
//! 1. Set up communication channels with the other parties
//! 2. Create or load a circuit definition
//! 3. Pick a triplet source (and start the trusted dealer, if one is used)
//! 4. Call the [`protocol::mpc`] function with its secret input
//! 5. Process the revealed output
//!
//! For simulated environments (testing/development), you can use the [`protocol::simulate_mpc`]
//! function, which runs all parties of the computation in a single process.
//!
//! ## Example
//!
//! ```ignore
//! use terzetto::{
//!     circuit::{Circuit, Op},
//!     protocol::{simulate_mpc, Preprocessor},
//! };
//!
//! # async fn example() -> Result<(), terzetto::protocol::Error> {
//! // f(a, b) = a * b, revealed to all parties:
//! let circuit = Circuit::new(vec![
//!     Op::Input { party: 0, out: 0 },
//!     Op::Input { party: 1, out: 1 },
//!     Op::Mul { in1: 0, in2: 1, out: 2 },
//!     Op::Reveal { input: 2, out: 3 },
//! ])?;
//!
//! let outputs = simulate_mpc(&circuit, &[6, 7], 65537, Preprocessor::TrustedDealer).await?;
//! assert_eq!(outputs, vec![42, 42]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! This implementation is secure against semi-honest adversaries: parties are assumed to follow
//! the protocol, but must not learn anything about each other's inputs beyond what the revealed
//! output implies. It does not protect against parties that deviate from the protocol.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod beaver;
pub mod channel;
pub mod circuit;
pub mod field;
pub mod message;
pub mod protocol;
