//! The message-delivery seam between the two parties.
//!
//! The core only ever performs a blocking "send message, await response"
//! effect; the host supplies whatever transport implements it (sockets,
//! threads, an event loop). Delivery must be reliable and ordered; there is
//! no retry or timeout logic here. A closed channel is terminal and surfaces
//! as [`crate::CascadeError::ChannelLost`].

use std::sync::mpsc::{Receiver, Sender, channel};

use thiserror::Error;

use crate::message::Envelope;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer is gone; the reconciliation run cannot continue.
    #[error("channel closed by peer")]
    Closed,

    /// A message could not be encoded or decoded.
    #[error("codec failure: {0}")]
    Codec(#[from] bincode::Error),
}

/// A reliable, ordered, message-oriented channel to the peer.
pub trait MessageChannel {
    /// Deliver one message to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the peer is gone, or
    /// [`ChannelError::Codec`] if the message cannot be serialized.
    fn send(&mut self, env: Envelope) -> Result<(), ChannelError>;

    /// Block until the next message from the peer arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the peer is gone, or
    /// [`ChannelError::Codec`] on a malformed message.
    fn recv(&mut self) -> Result<Envelope, ChannelError>;
}

/// In-process channel endpoint backed by `mpsc` queues.
///
/// Messages cross the queue in encoded form so the wire codec is exercised
/// even in loopback runs.
pub struct MemoryChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// Create a connected pair of in-process channel endpoints.
#[must_use]
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (tx_a, rx_b) = channel();
    let (tx_b, rx_a) = channel();
    (
        MemoryChannel { tx: tx_a, rx: rx_a },
        MemoryChannel { tx: tx_b, rx: rx_b },
    )
}

impl MessageChannel for MemoryChannel {
    fn send(&mut self, env: Envelope) -> Result<(), ChannelError> {
        let bytes = env.encode()?;
        self.tx.send(bytes).map_err(|_| ChannelError::Closed)
    }

    fn recv(&mut self) -> Result<Envelope, ChannelError> {
        let bytes = self.rx.recv().map_err(|_| ChannelError::Closed)?;
        Envelope::decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Payload, Role};

    #[test]
    fn test_memory_pair_delivers_in_order() {
        let (mut a, mut b) = memory_pair();
        for tag in 0..3 {
            a.send(Envelope {
                tag,
                role: Role::Initiator,
                payload: Payload::QberMoreSamples { additional: tag },
            })
            .unwrap();
        }
        for tag in 0..3 {
            assert_eq!(b.recv().unwrap().tag, tag);
        }
    }

    #[test]
    fn test_dropped_peer_closes_channel() {
        let (mut a, b) = memory_pair();
        drop(b);
        let err = a
            .send(Envelope {
                tag: 0,
                role: Role::Initiator,
                payload: Payload::QberMoreSamples { additional: 0 },
            })
            .unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }
}
