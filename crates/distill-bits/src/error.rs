//! Error types for the bit-level primitives.

use thiserror::Error;

/// Errors from bit-vector, permutation and partitioning operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitsError {
    /// A zero-length index domain was supplied where bits are required.
    #[error("empty index domain")]
    EmptyDomain,

    /// A block size of zero cannot partition anything.
    #[error("block size must be nonzero")]
    InvalidBlockSize,

    /// A buffer did not hold the number of bits the caller declared.
    #[error("length mismatch: expected {expected} bits, buffer holds {actual}")]
    LengthMismatch {
        /// Bits the caller asked for.
        expected: usize,
        /// Bits actually available.
        actual: usize,
    },
}
