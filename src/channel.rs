//! A communication channel used to send/receive messages to/from another party.

use std::{fmt, future::Future, time::Duration};

use tokio::{
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel, error::SendError},
    },
    time::timeout,
};
use tracing::trace;

use crate::message::{DecodeError, Message};

/// Errors related to sending / receiving / decoding messages.
#[derive(Debug, thiserror::Error)]
#[error("channel error during {phase}: {reason}")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The peer closed its connection, so no further message can arrive.
    #[error("connection closed by the peer")]
    Closed,
    /// The message could not be received over the channel.
    #[error("recv failed: {0}")]
    RecvError(String),
    /// The message could not be sent over the channel.
    #[error("send failed: {0}")]
    SendError(String),
    /// The received frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A message arrived, but it was not of the expected kind.
    #[error("expected a {expected} message, got a {actual} message")]
    UnexpectedMessage {
        /// The message kind the protocol was waiting for.
        expected: &'static str,
        /// The message kind that actually arrived.
        actual: &'static str,
    },
}

/// A communication channel used to send/receive messages to/from another party.
///
/// An implementation provides a reliable, ordered, bidirectional byte stream per pair of
/// parties: messages sent to the same party must arrive in send order. The protocol depends on
/// this FIFO guarantee; no ordering across different peers is assumed.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index (must be between `0..participants`).
    fn send_bytes_to(
        &self,
        party: usize,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits a message from the party with the given index (must be between `0..participants`).
    fn recv_bytes_from(
        &self,
        party: usize,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;

    /// Returns `true` if the receive error means the peer closed its connection, as opposed to
    /// a transient failure such as a timeout. A graceful hang-up must not be conflated with a
    /// stalled peer, so implementations should override this wherever the transport can tell
    /// the two apart.
    fn is_closed(&self, err: &Self::RecvError) -> bool {
        let _ = err;
        false
    }
}

/// Encodes and sends a message to the given party.
pub(crate) async fn send_to(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    msg: &Message,
) -> Result<(), Error> {
    trace!(party, phase, kind = msg.kind(), "sending");
    channel
        .send_bytes_to(party, msg.to_bytes())
        .await
        .map_err(|e| Error {
            phase: phase.to_string(),
            reason: ErrorKind::SendError(format!("{e:?}")),
        })
}

/// Receives and decodes a message from the given party.
pub(crate) async fn recv_from(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<Message, Error> {
    let bytes = channel.recv_bytes_from(party).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: if channel.is_closed(&e) {
            ErrorKind::Closed
        } else {
            ErrorKind::RecvError(format!("{e:?}"))
        },
    })?;
    let msg = Message::from_bytes(&bytes).map_err(|e| Error {
        phase: format!("decoding {phase}"),
        reason: e.into(),
    })?;
    trace!(party, phase, kind = msg.kind(), "received");
    Ok(msg)
}

/// Receives a [`Message::Value`] from the given party, failing on any other message kind.
pub(crate) async fn recv_value_from(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<(u64, u64), Error> {
    match recv_from(channel, party, phase).await? {
        Message::Value { wire, value } => Ok((wire, value)),
        other => Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::UnexpectedMessage {
                expected: "value",
                actual: other.kind(),
            },
        }),
    }
}

/// Receives a [`Message::Ciphertext`] from the given party, failing on any other message kind.
pub(crate) async fn recv_ciphertext_from(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<Vec<u8>, Error> {
    match recv_from(channel, party, phase).await? {
        Message::Ciphertext(bytes) => Ok(bytes),
        other => Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::UnexpectedMessage {
                expected: "ciphertext",
                actual: other.kind(),
            },
        }),
    }
}

/// A simple channel for N parties in a single process, backed by [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels = vec![];
        for _ in 0..parties {
            let mut s = vec![];
            let mut r = vec![];
            for _ in 0..parties {
                s.push(None);
                r.push(None);
            }
            channels.push(SimpleChannel { s, r });
        }
        for a in 0..parties {
            for b in 0..parties {
                if a == b {
                    continue;
                }
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                let (send_b_to_a, recv_b_to_a) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].s[a] = Some(send_b_to_a);
                channels[a].r[b] = Some(Mutex::new(recv_b_to_a));
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
}

impl Channel for SimpleChannel {
    type SendError = SendError<Vec<u8>>;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(&self, p: usize, msg: Vec<u8>) -> Result<(), SendError<Vec<u8>>> {
        self.s[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No sender for party {p}"))
            .send(msg)
            .await
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, AsyncRecvError> {
        let mut r = self.r[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No receiver for party {p}"))
            .lock()
            .await;
        match timeout(Duration::from_secs(10 * 60), r.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }

    fn is_closed(&self, err: &AsyncRecvError) -> bool {
        matches!(err, AsyncRecvError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_messages_in_fifo_order() -> Result<(), Error> {
        let mut channels = SimpleChannel::channels(2);
        let b = channels.pop().unwrap();
        let a = channels.pop().unwrap();
        for value in 0..10 {
            send_to(&a, 1, "fifo", &Message::Value { wire: 0, value }).await?;
        }
        for value in 0..10 {
            assert_eq!(recv_value_from(&b, 0, "fifo").await?, (0, value));
        }
        Ok(())
    }

    #[tokio::test]
    async fn rejects_wrong_message_kind() -> Result<(), Error> {
        let mut channels = SimpleChannel::channels(2);
        let b = channels.pop().unwrap();
        let a = channels.pop().unwrap();
        send_to(&a, 1, "test", &Message::Ciphertext(vec![1, 2, 3])).await?;
        let err = recv_value_from(&b, 0, "test").await.unwrap_err();
        assert!(matches!(
            err.reason,
            ErrorKind::UnexpectedMessage { expected: "value", actual: "ciphertext" }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn recv_from_closed_channel_reports_the_hang_up() {
        let mut channels = SimpleChannel::channels(2);
        let b = channels.pop().unwrap();
        drop(channels.pop());
        let err = recv_from(&b, 0, "closed").await.unwrap_err();
        assert!(matches!(err.reason, ErrorKind::Closed));
    }
}
