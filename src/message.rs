//! The wire format shared by all protocol messages.
//!
//! Every message is a fixed-layout big-endian frame starting with a one-byte discriminator, so
//! that a single channel can multiplex share values, dealer traffic and HE ciphertexts and the
//! receiver can dispatch on the kind. The layout is deliberately independent of any
//! serialization framework: a frame is fully described by this module.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use crate::{beaver::BeaverTriplet, circuit::TripletKey};

const TAG_VALUE: u8 = 0;
const TAG_TRIPLET_REQUEST: u8 = 1;
const TAG_TRIPLET_RESPONSE: u8 = 2;
const TAG_CIPHERTEXT: u8 = 3;

/// The errors raised when decoding a received frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame starts with an unknown message discriminator.
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    /// The frame ended before the fixed layout was complete.
    #[error("message frame is truncated")]
    UnexpectedEnd,
    /// The frame contains more bytes than its layout describes.
    #[error("message frame has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// A message exchanged between two parties (or a party and the trusted dealer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A share of the value on a wire: input shares, the opened e/f differences of a
    /// multiplication gate, and reveal shares all use this kind.
    Value {
        /// The wire the share belongs to.
        wire: u64,
        /// The share itself, reduced mod q.
        value: u64,
    },
    /// A party's request for its share of the triplet of one multiplication gate.
    TripletRequest {
        /// The requesting party.
        requester: u64,
        /// The number of parties the triplet must be split among.
        parties: u64,
        /// The multiplication gate the triplet is consumed by.
        key: TripletKey,
    },
    /// The dealer's response carrying the requester's triplet share.
    TripletResponse {
        /// The multiplication gate the triplet is consumed by.
        key: TripletKey,
        /// The requester's share of the triplet.
        share: BeaverTriplet,
    },
    /// An opaque serialized blob of the HE triplet protocol (a public key or a ciphertext).
    Ciphertext(Vec<u8>),
}

impl Message {
    /// Returns the name of the message kind, used in error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Value { .. } => "value",
            Message::TripletRequest { .. } => "triplet request",
            Message::TripletResponse { .. } => "triplet response",
            Message::Ciphertext(_) => "ciphertext",
        }
    }

    /// Encodes the message as a big-endian frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];
        match self {
            Message::Value { wire, value } => {
                buf.push(TAG_VALUE);
                put_u64(&mut buf, *wire);
                put_u64(&mut buf, *value);
            }
            Message::TripletRequest {
                requester,
                parties,
                key,
            } => {
                buf.push(TAG_TRIPLET_REQUEST);
                put_u64(&mut buf, *requester);
                put_u64(&mut buf, *parties);
                put_key(&mut buf, key);
            }
            Message::TripletResponse { key, share } => {
                buf.push(TAG_TRIPLET_RESPONSE);
                put_key(&mut buf, key);
                put_u64(&mut buf, share.a);
                put_u64(&mut buf, share.b);
                put_u64(&mut buf, share.c);
            }
            Message::Ciphertext(bytes) => {
                buf.push(TAG_CIPHERTEXT);
                put_u64(&mut buf, bytes.len() as u64);
                buf.extend_from_slice(bytes);
            }
        }
        buf
    }

    /// Decodes a complete frame, rejecting unknown tags, truncated and oversized frames.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = bytes;
        let tag = r.read_u8().map_err(|_| DecodeError::UnexpectedEnd)?;
        let msg = match tag {
            TAG_VALUE => Message::Value {
                wire: read_u64(&mut r)?,
                value: read_u64(&mut r)?,
            },
            TAG_TRIPLET_REQUEST => Message::TripletRequest {
                requester: read_u64(&mut r)?,
                parties: read_u64(&mut r)?,
                key: read_key(&mut r)?,
            },
            TAG_TRIPLET_RESPONSE => Message::TripletResponse {
                key: read_key(&mut r)?,
                share: BeaverTriplet {
                    a: read_u64(&mut r)?,
                    b: read_u64(&mut r)?,
                    c: read_u64(&mut r)?,
                },
            },
            TAG_CIPHERTEXT => {
                let size = read_u64(&mut r)? as usize;
                if r.len() < size {
                    return Err(DecodeError::UnexpectedEnd);
                }
                let mut blob = vec![0; size];
                r.read_exact(&mut blob).map_err(|_| DecodeError::UnexpectedEnd)?;
                Message::Ciphertext(blob)
            }
            tag => return Err(DecodeError::UnknownTag(tag)),
        };
        if !r.is_empty() {
            return Err(DecodeError::TrailingBytes(r.len()));
        }
        Ok(msg)
    }
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_key(buf: &mut Vec<u8>, key: &TripletKey) {
    put_u64(buf, key.in1);
    put_u64(buf, key.in2);
    put_u64(buf, key.out);
}

fn read_u64(r: &mut &[u8]) -> Result<u64, DecodeError> {
    r.read_u64::<BigEndian>().map_err(|_| DecodeError::UnexpectedEnd)
}

fn read_key(r: &mut &[u8]) -> Result<TripletKey, DecodeError> {
    Ok(TripletKey {
        in1: read_u64(r)?,
        in2: read_u64(r)?,
        out: read_u64(r)?,
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn roundtrips_every_message_kind() {
        let key = TripletKey { in1: 3, in2: 4, out: 5 };
        let msgs = [
            Message::Value { wire: 7, value: u64::MAX },
            Message::TripletRequest { requester: 1, parties: 5, key },
            Message::TripletResponse {
                key,
                share: BeaverTriplet { a: 11, b: 13, c: 143 },
            },
            Message::Ciphertext(vec![]),
            Message::Ciphertext(vec![0xde, 0xad, 0xbe, 0xef]),
        ];
        for msg in msgs {
            assert_eq!(Message::from_bytes(&msg.to_bytes()), Ok(msg));
        }
    }

    #[test]
    fn value_frames_are_big_endian() {
        let bytes = Message::Value { wire: 1, value: 2 }.to_bytes();
        assert_eq!(bytes[0], TAG_VALUE);
        assert_eq!(&bytes[1..9], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&bytes[9..17], &[0, 0, 0, 0, 0, 0, 0, 2]);
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_eq!(Message::from_bytes(&[]), Err(DecodeError::UnexpectedEnd));
        assert_eq!(Message::from_bytes(&[42]), Err(DecodeError::UnknownTag(42)));
        let mut truncated = Message::Value { wire: 1, value: 2 }.to_bytes();
        truncated.pop();
        assert_eq!(Message::from_bytes(&truncated), Err(DecodeError::UnexpectedEnd));
        let mut trailing = Message::Value { wire: 1, value: 2 }.to_bytes();
        trailing.push(0);
        assert_eq!(Message::from_bytes(&trailing), Err(DecodeError::TrailingBytes(1)));
        // A ciphertext frame whose size prefix exceeds the payload:
        let mut oversized = Message::Ciphertext(vec![1, 2, 3]).to_bytes();
        oversized.truncate(10);
        assert_eq!(Message::from_bytes(&oversized), Err(DecodeError::UnexpectedEnd));
    }

    proptest! {
        #[test]
        fn roundtrips_arbitrary_values(wire: u64, value: u64) {
            let msg = Message::Value { wire, value };
            prop_assert_eq!(Message::from_bytes(&msg.to_bytes()), Ok(msg));
        }

        #[test]
        fn roundtrips_arbitrary_ciphertext_blobs(blob: Vec<u8>) {
            let msg = Message::Ciphertext(blob);
            prop_assert_eq!(Message::from_bytes(&msg.to_bytes()), Ok(msg.clone()));
        }
    }
}
