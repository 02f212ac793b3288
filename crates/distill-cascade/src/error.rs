//! Error types for the reconciliation protocol.
//!
//! Every variant here is fatal for the run it occurs in: the protocol has no
//! internal retry, and a failed run produces no key. Locally recoverable
//! situations (a block found mismatched again after a correction because it
//! held several errors) are expected protocol behavior, not errors.

use distill_amp::AmpError;
use distill_bits::BitsError;
use thiserror::Error;

use crate::channel::ChannelError;

/// Fatal reconciliation failures.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// The transport died mid-run. Reconnection policy belongs to the caller.
    #[error("channel lost: {0}")]
    ChannelLost(#[from] ChannelError),

    /// A peer message is inconsistent with local protocol state.
    #[error("protocol desync in pass {pass}: {detail}")]
    ProtocolDesync {
        /// Pass being processed when the inconsistency surfaced (0 before
        /// the first pass).
        pass: u32,
        /// What was inconsistent.
        detail: String,
    },

    /// More corrections were demanded in one pass than the key holds bits.
    /// Defends against a misbehaving or absurdly noisy peer.
    #[error("implausible correction volume in pass {pass}: {corrections} corrections")]
    Divergent {
        /// Pass in which the bound was exceeded.
        pass: u32,
        /// Corrections counted when the run was aborted.
        corrections: u64,
    },

    /// Confirmation kept finding residual errors until its retry budget ran
    /// out; the keys cannot be trusted to match.
    #[error("residual error rate still nonzero after {rounds} confirmation rounds")]
    ResidualErrorTooHigh {
        /// Confirmation rounds attempted.
        rounds: u32,
    },

    /// The sampled error rate is at or above the bound where reconciliation
    /// stops being worthwhile.
    #[error("initial error estimate unusable: observed rate {rate:.4} at or above bound {bound:.4}")]
    EstimateUnusable {
        /// Observed sample error rate.
        rate: f64,
        /// The uselessness bound.
        bound: f64,
    },

    /// The sampling exchange never settled on an estimate.
    #[error("error estimation still unsettled after {rounds} sample rounds")]
    EstimationUnsettled {
        /// Sample rounds performed.
        rounds: u32,
    },

    /// Bit-level primitive rejected its input.
    #[error(transparent)]
    Bits(#[from] BitsError),

    /// Privacy amplification failed; carries `KeyExhausted` when the leak
    /// budget consumed the whole key.
    #[error(transparent)]
    Amp(#[from] AmpError),
}
