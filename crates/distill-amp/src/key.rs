//! The final secret key.

use distill_bits::BitVector;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The distilled secret key.
///
/// Produced exactly once per reconciliation run and immutable thereafter.
/// The backing bytes are wiped on drop; `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    len_bits: usize,
}

impl SecretKey {
    /// Wrap amplified output bits.
    #[must_use]
    pub fn from_bits(bits: &BitVector) -> Self {
        Self {
            bytes: bits.to_bytes(),
            len_bits: bits.len(),
        }
    }

    /// Key length in bits.
    #[must_use]
    pub fn len_bits(&self) -> usize {
        self.len_bits
    }

    /// Packed key material, LSB-first within each byte.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Read key bit `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len_bits`.
    #[must_use]
    pub fn bit(&self, i: usize) -> bool {
        assert!(i < self.len_bits, "key bit {i} out of range");
        self.bytes[i / 8] & (1 << (i % 8)) != 0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({} bits)", self.len_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_roundtrip() {
        let bits = BitVector::from_bits(&[true, false, false, true, true]);
        let key = SecretKey::from_bits(&bits);
        assert_eq!(key.len_bits(), 5);
        assert!(key.bit(0));
        assert!(!key.bit(1));
        assert!(key.bit(4));
    }

    #[test]
    fn test_debug_redacts_material() {
        let key = SecretKey::from_bits(&BitVector::from_bits(&[true; 16]));
        assert_eq!(format!("{key:?}"), "SecretKey(16 bits)");
    }
}
