//! Arithmetic circuit representation consumed by the evaluator.
//!
//! A [`Circuit`] is an ordered list of [`Op`]s whose order is the evaluation order: every wire
//! read by an operation must have been produced by an earlier operation. Operations only carry
//! wire references and public constants, never secret data.

use std::collections::HashSet;

/// Identifies a participant of the computation and indexes into its communication channels.
pub type PartyId = usize;

/// Identifies a circuit wire; unique per circuit.
pub type WireId = u64;

/// The errors raised when a malformed circuit is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    /// An operation reads a wire that no earlier operation produced.
    #[error("op {op} reads wire {wire} before it is defined")]
    UndefinedWire {
        /// The index of the offending operation.
        op: usize,
        /// The undefined input wire.
        wire: WireId,
    },
    /// Two operations write to the same output wire.
    #[error("op {op} writes wire {wire} which is already defined")]
    DuplicateWire {
        /// The index of the offending operation.
        op: usize,
        /// The doubly-defined output wire.
        wire: WireId,
    },
}

/// A single gate of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// The secret input of one party, additively shared among all parties.
    Input {
        /// The party contributing the input.
        party: PartyId,
        /// The wire carrying the shared input.
        out: WireId,
    },
    /// Adds two shared values; evaluated locally.
    Add {
        /// The first summand.
        in1: WireId,
        /// The second summand.
        in2: WireId,
        /// The wire carrying the shared sum.
        out: WireId,
    },
    /// Subtracts two shared values; evaluated locally.
    Sub {
        /// The minuend.
        in1: WireId,
        /// The subtrahend.
        in2: WireId,
        /// The wire carrying the shared difference.
        out: WireId,
    },
    /// Adds a public constant to a shared value; evaluated locally.
    AddConst {
        /// The shared summand.
        input: WireId,
        /// The public constant.
        value: u64,
        /// The wire carrying the shared sum.
        out: WireId,
    },
    /// Multiplies two shared values, consuming one Beaver triplet.
    Mul {
        /// The first factor.
        in1: WireId,
        /// The second factor.
        in2: WireId,
        /// The wire carrying the shared product.
        out: WireId,
    },
    /// Multiplies a shared value by a public constant; evaluated locally.
    MulConst {
        /// The shared factor.
        input: WireId,
        /// The public constant.
        value: u64,
        /// The wire carrying the shared product.
        out: WireId,
    },
    /// Opens a shared value: all parties exchange their shares and learn the plaintext.
    Reveal {
        /// The wire to open.
        input: WireId,
        /// The wire carrying the revealed plaintext.
        out: WireId,
    },
}

impl Op {
    /// Returns the output wire produced by this operation.
    pub fn output(&self) -> WireId {
        match *self {
            Op::Input { out, .. }
            | Op::Add { out, .. }
            | Op::Sub { out, .. }
            | Op::AddConst { out, .. }
            | Op::Mul { out, .. }
            | Op::MulConst { out, .. }
            | Op::Reveal { out, .. } => out,
        }
    }

    /// Returns the input wires read by this operation.
    fn inputs(&self) -> Vec<WireId> {
        match *self {
            Op::Input { .. } => vec![],
            Op::Add { in1, in2, .. } | Op::Sub { in1, in2, .. } | Op::Mul { in1, in2, .. } => {
                vec![in1, in2]
            }
            Op::AddConst { input, .. } | Op::MulConst { input, .. } | Op::Reveal { input, .. } => {
                vec![input]
            }
        }
    }

    /// Returns the triplet key of a multiplication gate, `None` for all other gates.
    pub fn triplet_key(&self) -> Option<TripletKey> {
        match *self {
            Op::Mul { in1, in2, out } => Some(TripletKey { in1, in2, out }),
            _ => None,
        }
    }
}

/// Identifies the multiplication gate a Beaver triplet is consumed by.
///
/// The trusted dealer caches generated triplet sets under this key, so that every party
/// requesting a triplet for the same gate receives a share of the same global triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TripletKey {
    /// The first factor wire of the multiplication gate.
    pub in1: WireId,
    /// The second factor wire of the multiplication gate.
    pub in2: WireId,
    /// The output wire of the multiplication gate.
    pub out: WireId,
}

/// An ordered sequence of operations, validated to be in topological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circuit {
    ops: Vec<Op>,
}

impl Circuit {
    /// Creates a circuit, checking that every wire is written exactly once and read only after
    /// it has been written.
    pub fn new(ops: Vec<Op>) -> Result<Self, CircuitError> {
        let mut defined = HashSet::new();
        for (i, op) in ops.iter().enumerate() {
            for wire in op.inputs() {
                if !defined.contains(&wire) {
                    return Err(CircuitError::UndefinedWire { op: i, wire });
                }
            }
            if !defined.insert(op.output()) {
                return Err(CircuitError::DuplicateWire {
                    op: i,
                    wire: op.output(),
                });
            }
        }
        Ok(Circuit { ops })
    }

    /// Returns the operations in evaluation order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Returns the number of multiplication gates, each of which consumes one Beaver triplet.
    pub fn mul_gates(&self) -> usize {
        self.ops.iter().filter(|op| op.triplet_key().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_topologically_ordered_ops() {
        let circuit = Circuit::new(vec![
            Op::Input { party: 0, out: 0 },
            Op::Input { party: 1, out: 1 },
            Op::Mul { in1: 0, in2: 1, out: 2 },
            Op::AddConst { input: 2, value: 5, out: 3 },
            Op::Reveal { input: 3, out: 4 },
        ])
        .unwrap();
        assert_eq!(circuit.mul_gates(), 1);
        assert_eq!(circuit.ops()[2].triplet_key(), Some(TripletKey { in1: 0, in2: 1, out: 2 }));
    }

    #[test]
    fn rejects_undefined_input_wire() {
        let err = Circuit::new(vec![
            Op::Input { party: 0, out: 0 },
            Op::Add { in1: 0, in2: 1, out: 2 },
        ])
        .unwrap_err();
        assert_eq!(err, CircuitError::UndefinedWire { op: 1, wire: 1 });
    }

    #[test]
    fn rejects_wire_written_twice() {
        let err = Circuit::new(vec![
            Op::Input { party: 0, out: 0 },
            Op::MulConst { input: 0, value: 2, out: 0 },
        ])
        .unwrap_err();
        assert_eq!(err, CircuitError::DuplicateWire { op: 1, wire: 0 });
    }

    #[test]
    fn output_is_the_written_wire() {
        assert_eq!(Op::Input { party: 3, out: 7 }.output(), 7);
        assert_eq!(Op::Sub { in1: 0, in2: 1, out: 9 }.output(), 9);
        assert_eq!(Op::Reveal { input: 4, out: 5 }.output(), 5);
    }
}
