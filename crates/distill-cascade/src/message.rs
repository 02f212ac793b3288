//! Wire messages for the reconciliation protocol.
//!
//! Every message travels inside an [`Envelope`] carrying a correlation `tag`
//! (the responder echoes the tag of the request it answers) and the sender's
//! [`Role`]. The protocol is asymmetric: the initiator holds the noisy copy
//! and flips bits, the responder holds the reference copy and only ever
//! discloses parities. The role tag keeps both sides from ever flipping the
//! same disagreeing bit independently.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelError;

/// Wire pass identifier of the BICONF confirmation stage.
///
/// Regular cascade passes are numbered from 1; the confirmation stage runs
/// over a seeded random pair subset rather than a pass partition and uses
/// this sentinel in bisection traffic.
pub const BICONF_PASS: u32 = u32::MAX;

/// Which side of the link a message comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The side holding the noisy copy; drives the protocol and flips bits.
    Initiator,
    /// The side holding the reference copy; discloses parities on request.
    Responder,
}

/// A tagged protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Request/response correlation tag.
    pub tag: u32,
    /// Sender role.
    pub role: Role,
    /// The message body.
    pub payload: Payload,
}

/// Protocol message bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Disclosed raw-key sample for initial error-rate estimation.
    QberSample {
        /// Sampled absolute bit indices.
        indices: Vec<u32>,
        /// The initiator's bits at those indices, packed LSB-first.
        bits: Vec<u8>,
    },
    /// The responder wants more samples before settling on an estimate.
    QberMoreSamples {
        /// Additional sample bits requested.
        additional: u32,
    },
    /// The responder accepts the error estimate.
    QberAck {
        /// Total bits compared.
        tested: u32,
        /// Mismatches observed among them.
        mismatches: u32,
    },
    /// Ask the responder for the parities of one whole pass.
    ParityRequest {
        /// Pass index (1-based).
        pass: u32,
        /// Permutation seed for this pass (ignored for pass 1, which runs
        /// over the unpermuted key).
        seed: u64,
        /// Block size of this pass.
        block_size: u32,
    },
    /// Block parities of one pass, in block order.
    ParityList {
        /// Pass index the list belongs to.
        pass: u32,
        /// Number of parity bits that follow.
        block_count: u32,
        /// Parities packed LSB-first.
        parities: Vec<u8>,
    },
    /// One bisection step: a sub-range parity request (`parity == None`)
    /// or its answer (`parity == Some(_)`).
    BinSearch {
        /// Pass the block belongs to, or [`BICONF_PASS`].
        pass: u32,
        /// Block (or confirmation pair) being narrowed.
        block: u32,
        /// Sub-range start, in permuted positions.
        lo: u32,
        /// Sub-range end (exclusive).
        hi: u32,
        /// The responder's parity of the sub-range, if answering.
        parity: Option<bool>,
    },
    /// Start a confirmation round over a seeded random pair subset.
    BiconfRequest {
        /// Seed selecting the sampled positions.
        seed: u64,
        /// Number of pairs compared.
        pairs: u32,
    },
    /// Parities of the sampled pairs, in pair order, packed LSB-first.
    BiconfParities {
        /// Packed pair parities.
        parities: Vec<u8>,
    },
    /// Hand over to privacy amplification.
    StartPrivAmp {
        /// Agreed Toeplitz seed.
        seed: u64,
        /// Reconciled key length both sides must hold.
        reconciled_len: u32,
        /// Total bits disclosed during reconciliation.
        leaked: u64,
    },
}

impl Payload {
    /// Short name of the message kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QberSample { .. } => "QBER_ESTIM",
            Self::QberMoreSamples { .. } => "QBER_ESTIM_REQ_MORE_SAMPLES",
            Self::QberAck { .. } => "QBER_ESTIM_ACK",
            Self::ParityRequest { .. } => "CASCADE_PARITY_REQ",
            Self::ParityList { .. } => "CASCADE_PARITY_LIST",
            Self::BinSearch { .. } => "CASCADE_BIN_SEARCH_MSG",
            Self::BiconfRequest { .. } => "CASCADE_BICONF_INIT_REQ",
            Self::BiconfParities { .. } => "CASCADE_BICONF_PARITY_RESP",
            Self::StartPrivAmp { .. } => "START_PRIV_AMP",
        }
    }
}

impl Envelope {
    /// Serialize for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Codec`] on malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Pack bools LSB-first into bytes.
#[must_use]
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, &b) in bits.iter().enumerate() {
        if b {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// Unpack `count` LSB-first bits from bytes.
///
/// Returns `None` if `bytes` is too short for `count` bits.
#[must_use]
pub fn unpack_bits(bytes: &[u8], count: usize) -> Option<Vec<bool>> {
    if bytes.len() * 8 < count {
        return None;
    }
    Some((0..count).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect())
}
