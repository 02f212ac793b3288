//! # distill-bits
//!
//! Bit-level primitives for QKD key distillation.
//!
//! This crate provides:
//! - [`BitVector`]: a packed, indexable bit sequence with word-masked
//!   XOR-parity over arbitrary index ranges
//! - [`Permutation`]: seed-reproducible pseudo-random permutations of bit
//!   indices, identical on both ends of a link once the seed is agreed
//! - [`partition`]: contiguous block spans over a (permuted) index space
//!
//! Everything here is deterministic given its inputs; no operation touches an
//! entropy source. Callers that need fresh seeds draw them elsewhere and pass
//! them in.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitvec;
pub mod error;
pub mod partition;
pub mod permutation;

pub use bitvec::BitVector;
pub use error::BitsError;
pub use partition::{BlockSpan, block_containing, block_count, partition};
pub use permutation::Permutation;

/// Number of bits per storage word in [`BitVector`].
pub const WORD_BITS: usize = 64;
