//! Toeplitz universal hashing.
//!
//! A Toeplitz matrix is constant along each diagonal, so an `out_len x m`
//! binary matrix is fully determined by `m + out_len - 1` bits. Both parties
//! expand those bits from a public seed; the matrix itself is never
//! materialized. Output bit `i` is the XOR-parity of the key ANDed with a
//! length-`m` window of the diagonal bits starting at offset `i`, which the
//! fold below computes 64 key bits at a time.

use distill_bits::BitVector;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use crate::WORD_BITS;

/// A seed-driven Toeplitz compression matrix.
#[derive(Debug, Clone)]
pub struct ToeplitzHash {
    diag: BitVector,
    m: usize,
    out_len: usize,
}

impl ToeplitzHash {
    /// Expand the `m + out_len - 1` diagonal bits from a public seed.
    ///
    /// Deterministic: identical `(seed, m, out_len)` yield the identical
    /// matrix on both sides of the link.
    #[must_use]
    pub fn from_seed(seed: u64, m: usize, out_len: usize) -> Self {
        let mut rng = ChaCha12Rng::seed_from_u64(seed);
        let diag_len = m + out_len.saturating_sub(1);
        Self {
            diag: BitVector::random(&mut rng, diag_len),
            m,
            out_len,
        }
    }

    /// Input length the matrix accepts.
    #[must_use]
    pub fn input_len(&self) -> usize {
        self.m
    }

    /// Output length the matrix produces.
    #[must_use]
    pub fn output_len(&self) -> usize {
        self.out_len
    }

    /// Multiply against the reconciled key mod 2.
    ///
    /// # Panics
    ///
    /// Panics if `key.len() != input_len()`.
    #[must_use]
    pub fn compress(&self, key: &BitVector) -> BitVector {
        assert_eq!(key.len(), self.m, "key length does not match matrix");
        let mut out = BitVector::zeros(self.out_len);
        for i in 0..self.out_len {
            let mut acc = 0u64;
            for (w, &kw) in key.words().iter().enumerate() {
                acc ^= kw & self.diag.window_word(i + w * WORD_BITS);
            }
            if acc.count_ones() & 1 == 1 {
                out.set(i, true);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn brute_compress(hash: &ToeplitzHash, key: &BitVector) -> BitVector {
        let mut out = BitVector::zeros(hash.out_len);
        for i in 0..hash.out_len {
            let mut p = false;
            for j in 0..hash.m {
                p ^= key.get(j) & hash.diag.get(i + j);
            }
            out.set(i, p);
        }
        out
    }

    #[test]
    fn test_compress_matches_brute_force() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        for (m, out_len) in [(70usize, 20usize), (129, 64), (200, 1)] {
            let key = BitVector::random(&mut rng, m);
            let hash = ToeplitzHash::from_seed(0xFEED, m, out_len);
            assert_eq!(hash.compress(&key), brute_compress(&hash, &key));
        }
    }

    #[test]
    fn test_compress_is_deterministic() {
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let key = BitVector::random(&mut rng, 500);
        let a = ToeplitzHash::from_seed(77, 500, 300).compress(&key);
        let b = ToeplitzHash::from_seed(77, 500, 300).compress(&key);
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seeds_give_different_output() {
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let key = BitVector::random(&mut rng, 256);
        let a = ToeplitzHash::from_seed(1, 256, 128).compress(&key);
        let b = ToeplitzHash::from_seed(2, 256, 128).compress(&key);
        assert_ne!(a, b);
    }

    #[test]
    fn test_single_output_bit_is_window_parity() {
        let key = BitVector::from_bits(&[true, true, false, true]);
        let hash = ToeplitzHash::from_seed(3, 4, 1);
        let expected = key.parity_of_indices((0..4).filter(|&j| hash.diag.get(j)));
        assert_eq!(hash.compress(&key).get(0), expected);
    }
}
