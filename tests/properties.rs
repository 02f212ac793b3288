//! Property-based tests across the distillation pipeline.

use distill_amp::{AmpError, ToeplitzHash, amplify, output_length};
use distill_bits::BitVector;
use distill_cascade::{CascadeConfig, CascadeError, InitialEstimate};
use distill_integration_tests::{key_pair_with_errors, run_pair};
use proptest::prelude::*;

mod reconciliation_properties {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Any injected error pattern reconciles to hamming distance zero;
        /// the only acceptable failure is an exhausted key budget, which can
        /// legitimately happen for short keys, and even then both copies
        /// must already agree.
        #[test]
        fn reconciles_any_error_pattern(
            n in 512usize..1500,
            error_permille in 0u32..63,
            seed in any::<u64>(),
        ) {
            let errors = n * error_permille as usize / 1000;
            let (reference, noisy, _) = key_pair_with_errors(n, errors, seed);
            let config = CascadeConfig {
                protocol_seed: Some(seed ^ 0x5EED),
                biconf_pairs: (n / 2) as u32,
                margin: 32,
                ..Default::default()
            };
            let rate = (errors as f64 / n as f64).max(0.01);
            let run = run_pair(reference, noisy, InitialEstimate::Prior(rate), config);
            match &run.initiator_result {
                Ok(report) => {
                    prop_assert!(report.corrected_bits >= errors);
                }
                Err(CascadeError::Amp(AmpError::KeyExhausted { .. })) => {}
                Err(other) => prop_assert!(false, "unexpected failure: {other}"),
            }
            prop_assert_eq!(
                run.initiator.reconciled_key().hamming_distance(run.responder.key()),
                0
            );
        }
    }
}

mod parity_properties {
    use super::*;

    proptest! {
        /// Range parity always equals the XOR of the member bits.
        #[test]
        fn range_parity_matches_brute_force(
            bits in prop::collection::vec(any::<bool>(), 1..300),
            split in any::<(u16, u16)>(),
        ) {
            let v = BitVector::from_bits(&bits);
            let a = split.0 as usize % (bits.len() + 1);
            let b = split.1 as usize % (bits.len() + 1);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let brute = bits[lo..hi].iter().fold(false, |p, &bit| p ^ bit);
            prop_assert_eq!(v.parity_range(lo, hi), brute);
        }
    }
}

mod amplification_properties {
    use super::*;

    proptest! {
        /// The output-length arithmetic never underflows and accounts for
        /// every removed bit.
        #[test]
        fn output_length_accounts_for_leak_and_margin(
            m in 0usize..10_000,
            leaked in 0u64..20_000,
            margin in 0usize..200,
        ) {
            let out = output_length(m, leaked, margin);
            prop_assert!(out <= m);
            let removed = m - out;
            if out > 0 {
                prop_assert_eq!(removed as u64, leaked + margin as u64);
            } else {
                prop_assert!(leaked + margin as u64 >= removed as u64);
            }
        }

        /// Identical inputs on both simulated sides give bit-identical keys.
        #[test]
        fn amplification_is_deterministic(
            bits in prop::collection::vec(any::<bool>(), 128..512),
            seed in any::<u64>(),
            leaked in 0u64..64,
        ) {
            let key = BitVector::from_bits(&bits);
            let alice = amplify(&key, seed, leaked, 16);
            let bob = amplify(&key.clone(), seed, leaked, 16);
            match (alice, bob) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(a), Err(b)) => prop_assert_eq!(a, b),
                _ => prop_assert!(false, "sides disagreed on the outcome"),
            }
        }

        /// Toeplitz compression is linear over GF(2):
        /// `T(x) ^ T(y) == T(x ^ y)`.
        #[test]
        fn toeplitz_compression_is_linear(
            x_bits in prop::collection::vec(any::<bool>(), 64..200),
            seed in any::<u64>(),
            flip_seed in any::<u64>(),
        ) {
            let x = BitVector::from_bits(&x_bits);
            let mut y = x.clone();
            y.flip(flip_seed as usize % x.len());
            let hash = ToeplitzHash::from_seed(seed, x.len(), x.len() / 2);
            let lhs = &hash.compress(&x) ^ &hash.compress(&y);
            let rhs = hash.compress(&(&x ^ &y));
            prop_assert_eq!(lhs, rhs);
        }
    }
}
