//! # distill-amp
//!
//! Privacy amplification for reconciled QKD keys.
//!
//! Reconciliation discloses parity information over the public channel; an
//! eavesdropper may also hold residual statistical knowledge of the raw key.
//! This crate compresses the reconciled key with a seed-driven Toeplitz
//! universal hash so that the disclosed bits plus a statistical margin are
//! squeezed out of the output, leaving a key the adversary knows a negligible
//! fraction of.
//!
//! The seed is public: it only selects the hash from the universal family.
//! Both parties expand it to the same matrix and compress independently; no
//! further round trip is required once the leak count is agreed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod toeplitz;

pub use error::AmpError;
pub use key::SecretKey;
pub use toeplitz::ToeplitzHash;

use distill_bits::BitVector;

pub(crate) use distill_bits::WORD_BITS;

/// Output length of the amplified key: `m - leaked - margin`, clamped at 0.
#[must_use]
pub fn output_length(m: usize, leaked: u64, margin: usize) -> usize {
    m.saturating_sub(margin)
        .saturating_sub(usize::try_from(leaked).unwrap_or(usize::MAX))
}

/// Compress a reconciled key into the final secret key.
///
/// Deterministic: both sides call this with the identical
/// `(key, seed, leaked, margin)` and obtain bit-identical output.
///
/// # Errors
///
/// [`AmpError::KeyExhausted`] when the leak plus margin consume the whole
/// key (`output_length == 0`); an empty key is never emitted silently.
pub fn amplify(
    key: &BitVector,
    seed: u64,
    leaked: u64,
    margin: usize,
) -> Result<SecretKey, AmpError> {
    let out_len = output_length(key.len(), leaked, margin);
    if out_len == 0 {
        return Err(AmpError::KeyExhausted {
            reconciled: key.len(),
            leaked,
            margin,
        });
    }
    tracing::debug!(
        reconciled = key.len(),
        leaked,
        margin,
        out_len,
        "compressing reconciled key"
    );
    let hash = ToeplitzHash::from_seed(seed, key.len(), out_len);
    Ok(SecretKey::from_bits(&hash.compress(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn test_output_length_reference_values() {
        assert_eq!(output_length(1000, 120, 50), 830);
        assert_eq!(output_length(1000, 1000, 0), 0);
        assert_eq!(output_length(100, 500, 0), 0);
    }

    #[test]
    fn test_amplify_exhausted_budget_is_an_error() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let key = BitVector::random(&mut rng, 1000);
        assert_eq!(
            amplify(&key, 9, 1000, 0),
            Err(AmpError::KeyExhausted {
                reconciled: 1000,
                leaked: 1000,
                margin: 0,
            })
        );
    }

    #[test]
    fn test_amplify_deterministic_across_sides() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let key = BitVector::random(&mut rng, 1000);
        let alice = amplify(&key, 0xA11CE, 120, 50).unwrap();
        let bob = amplify(&key.clone(), 0xA11CE, 120, 50).unwrap();
        assert_eq!(alice, bob);
        assert_eq!(alice.len_bits(), 830);
    }

    #[test]
    fn test_amplify_output_differs_from_input() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let key = BitVector::random(&mut rng, 512);
        let secret = amplify(&key, 4, 100, 12).unwrap();
        assert_eq!(secret.len_bits(), 400);
        assert_ne!(secret.as_bytes(), &key.to_bytes()[..secret.as_bytes().len()]);
    }
}
