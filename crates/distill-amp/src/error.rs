//! Error types for privacy amplification.

use thiserror::Error;

/// Privacy-amplification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmpError {
    /// Reconciliation leaked (plus margin) at least as many bits as the key
    /// holds; no secret key can be produced from this block.
    #[error(
        "key budget exhausted: {leaked} leaked bits + {margin} margin >= {reconciled} reconciled bits"
    )]
    KeyExhausted {
        /// Length of the reconciled key.
        reconciled: usize,
        /// Bits disclosed during reconciliation.
        leaked: u64,
        /// Statistical security margin.
        margin: usize,
    },
}
