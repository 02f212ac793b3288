//! Initial error-rate estimation over disclosed samples.
//!
//! When no trusted a-priori estimate is handed in, the initiator discloses a
//! seeded sample of its raw key; the responder compares against its own bits
//! and either asks for more samples or acknowledges with the counts both
//! sides turn into the starting estimate. Disclosed sample bits are burned:
//! they count toward leakage on both sides. The sample indices come from a
//! permutation so no index is ever disclosed twice.

use distill_bits::{BitVector, Permutation};
use rand::RngCore;
use rand_chacha::ChaCha12Rng;

use crate::channel::MessageChannel;
use crate::config::CascadeConfig;
use crate::error::CascadeError;
use crate::estimator::{ErrorRateEstimator, MIN_INITIAL_RATE, USELESS_ERRORBOUND};
use crate::leakage::LeakageAccountant;
use crate::message::{Envelope, Payload, Role, pack_bits, unpack_bits};

/// Drive the sampling exchange from the initiator side.
pub(crate) fn run_estimation_initiator<C: MessageChannel>(
    chan: &mut C,
    key: &BitVector,
    rng: &mut ChaCha12Rng,
    leakage: &mut LeakageAccountant,
    tag: &mut u32,
    config: &CascadeConfig,
) -> Result<ErrorRateEstimator, CascadeError> {
    let n = key.len();
    let order = Permutation::derive(rng.next_u64(), n);
    let mut cursor = 0usize;
    let mut to_send = ErrorRateEstimator::sample_bits_needed(config.qber_prior_guess) as usize;

    for round in 1..=config.qber_max_rounds {
        let take = to_send.min(n - cursor);
        if take == 0 {
            return Err(CascadeError::EstimationUnsettled { rounds: round });
        }
        let indices: Vec<u32> = (cursor..cursor + take)
            .map(|pos| order.raw_index(pos) as u32)
            .collect();
        let bits: Vec<bool> = indices.iter().map(|&i| key.get(i as usize)).collect();
        cursor += take;

        *tag += 1;
        let sent = *tag;
        chan.send(Envelope {
            tag: sent,
            role: Role::Initiator,
            payload: Payload::QberSample {
                indices,
                bits: pack_bits(&bits),
            },
        })?;
        leakage.record(take as u32);

        let reply = chan.recv()?;
        if reply.tag != sent || reply.role != Role::Responder {
            return Err(CascadeError::ProtocolDesync {
                pass: 0,
                detail: format!("estimation reply tag {} for request {sent}", reply.tag),
            });
        }
        match reply.payload {
            Payload::QberMoreSamples { additional } => {
                tracing::debug!(round, additional, "peer wants more estimation samples");
                to_send = additional as usize;
            }
            Payload::QberAck { tested, mismatches } => {
                if tested as usize != cursor {
                    return Err(CascadeError::ProtocolDesync {
                        pass: 0,
                        detail: format!("peer compared {tested} samples, we disclosed {cursor}"),
                    });
                }
                let rate = f64::from(mismatches) / f64::from(tested.max(1));
                tracing::info!(tested, mismatches, rate, "error estimate agreed");
                return ErrorRateEstimator::from_sample(tested, mismatches).ok_or(
                    CascadeError::EstimateUnusable {
                        rate,
                        bound: USELESS_ERRORBOUND,
                    },
                );
            }
            other => {
                return Err(CascadeError::ProtocolDesync {
                    pass: 0,
                    detail: format!("expected estimation reply, got {}", other.kind()),
                });
            }
        }
    }
    Err(CascadeError::EstimationUnsettled {
        rounds: config.qber_max_rounds,
    })
}

/// What the responder answers to a sample message.
#[derive(Debug)]
pub(crate) enum EstimationReply {
    /// Not enough samples yet to trust the estimate.
    MoreSamples {
        /// Additional sample bits wanted.
        additional: u32,
    },
    /// Estimate accepted; counts go back to the initiator.
    Accepted {
        /// Total bits compared.
        tested: u32,
        /// Mismatches observed.
        mismatches: u32,
    },
}

/// Responder-side accumulation of disclosed samples.
#[derive(Debug, Default)]
pub(crate) struct EstimationState {
    tested: u32,
    mismatches: u32,
    rounds: u32,
}

impl EstimationState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fold in one sample message and decide the reply.
    pub(crate) fn absorb(
        &mut self,
        key: &BitVector,
        indices: &[u32],
        packed_bits: &[u8],
        config: &CascadeConfig,
    ) -> Result<EstimationReply, CascadeError> {
        let bits = unpack_bits(packed_bits, indices.len()).ok_or_else(|| {
            CascadeError::ProtocolDesync {
                pass: 0,
                detail: "sample bit buffer shorter than its index list".into(),
            }
        })?;
        for (&index, bit) in indices.iter().zip(&bits) {
            let index = index as usize;
            if index >= key.len() {
                return Err(CascadeError::ProtocolDesync {
                    pass: 0,
                    detail: format!("sample index {index} beyond key of {} bits", key.len()),
                });
            }
            if key.get(index) != *bit {
                self.mismatches += 1;
            }
        }
        self.tested += indices.len() as u32;
        self.rounds += 1;

        let observed =
            (f64::from(self.mismatches) / f64::from(self.tested.max(1))).max(MIN_INITIAL_RATE);
        let needed = ErrorRateEstimator::sample_bits_needed(observed);
        if self.tested < needed && self.rounds < config.qber_max_rounds {
            Ok(EstimationReply::MoreSamples {
                additional: needed - self.tested,
            })
        } else {
            Ok(EstimationReply::Accepted {
                tested: self.tested,
                mismatches: self.mismatches,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_absorb_counts_mismatches() {
        let key = BitVector::from_bits(&[true, false, true, false]);
        let mut state = EstimationState::new();
        let cfg = CascadeConfig::default();
        // Disclose flipped bits at indices 1 and 2: one mismatch (index 2).
        let reply = state
            .absorb(&key, &[1, 2], &pack_bits(&[false, false]), &cfg)
            .unwrap();
        assert!(matches!(reply, EstimationReply::MoreSamples { .. }));
        assert_eq!(state.tested, 2);
        assert_eq!(state.mismatches, 1);
    }

    #[test]
    fn test_absorb_rejects_out_of_range_index() {
        let key = BitVector::from_bits(&[true, false]);
        let mut state = EstimationState::new();
        let err = state
            .absorb(&key, &[5], &pack_bits(&[true]), &CascadeConfig::default())
            .unwrap_err();
        assert!(matches!(err, CascadeError::ProtocolDesync { .. }));
    }

    #[test]
    fn test_absorb_accepts_once_sample_is_large_enough() {
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let key = BitVector::random(&mut rng, 4096);
        let mut state = EstimationState::new();
        let cfg = CascadeConfig::default();
        let indices: Vec<u32> = (0..2048).collect();
        // Disclose bits with roughly 5% of them flipped; a 2048-bit sample
        // is comfortably past what that rate needs.
        let bits: Vec<bool> = indices
            .iter()
            .map(|&i| key.get(i as usize) ^ (i % 20 == 0))
            .collect();
        let reply = state.absorb(&key, &indices, &pack_bits(&bits), &cfg).unwrap();
        assert!(matches!(
            reply,
            EstimationReply::Accepted { tested: 2048, .. }
        ));
    }
}
