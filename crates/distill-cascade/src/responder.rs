//! The reference-side serve loop.
//!
//! The responder holds the reference key copy and never mutates it; its job
//! is to disclose parities on request, tally the same leakage the initiator
//! tallies, and verify the leak count carried by the amplification trigger
//! before deriving the identical final key.

use distill_amp::{SecretKey, amplify};
use distill_bits::{BitVector, Permutation, partition};

use crate::channel::MessageChannel;
use crate::config::CascadeConfig;
use crate::error::CascadeError;
use crate::estimator::{ErrorRateEstimator, USELESS_ERRORBOUND};
use crate::leakage::LeakageAccountant;
use crate::message::{BICONF_PASS, Envelope, Payload, Role, pack_bits};
use crate::qber::{EstimationReply, EstimationState};

/// Outcome of a successful responder run.
#[derive(Debug)]
pub struct ResponderReport {
    /// The distilled secret key, bit-identical to the initiator's.
    pub secret_key: SecretKey,
    /// Length of the reference key fed into amplification.
    pub reconciled_len: usize,
    /// Total bits disclosed over the channel.
    pub leaked_bits: u64,
    /// Cascade passes served.
    pub passes_served: u32,
    /// Error rate agreed during estimation, if the exchange ran.
    pub estimated_rate: Option<f64>,
}

/// The responder side of a reconciliation run.
pub struct CascadeResponder {
    key: BitVector,
    config: CascadeConfig,
    leakage: LeakageAccountant,
    passes: Vec<(u32, Permutation)>,
    biconf: Option<Permutation>,
    estimation: EstimationState,
    estimated_rate: Option<f64>,
    passes_served: u32,
}

impl CascadeResponder {
    /// Create a responder over the local reference key.
    #[must_use]
    pub fn new(key: BitVector, config: CascadeConfig) -> Self {
        Self {
            key,
            config,
            leakage: LeakageAccountant::new(),
            passes: Vec::new(),
            biconf: None,
            estimation: EstimationState::new(),
            estimated_rate: None,
            passes_served: 0,
        }
    }

    /// The reference key (never mutated by the protocol).
    #[must_use]
    pub fn key(&self) -> &BitVector {
        &self.key
    }

    /// Bits disclosed so far.
    #[must_use]
    pub fn leaked_bits(&self) -> u64 {
        self.leakage.total()
    }

    /// Serve the peer until it triggers privacy amplification.
    ///
    /// # Errors
    ///
    /// All variants of [`CascadeError`]; the responder has no retry and a
    /// dead channel or inconsistent peer message ends the run.
    pub fn serve<C: MessageChannel>(
        &mut self,
        chan: &mut C,
    ) -> Result<ResponderReport, CascadeError> {
        loop {
            let msg = chan.recv()?;
            if msg.role != Role::Initiator {
                return Err(CascadeError::ProtocolDesync {
                    pass: self.current_pass(),
                    detail: "peer message does not carry the initiator role".into(),
                });
            }
            let tag = msg.tag;
            match msg.payload {
                Payload::QberSample { indices, bits } => {
                    self.handle_sample(chan, tag, &indices, &bits)?;
                }
                Payload::ParityRequest {
                    pass,
                    seed,
                    block_size,
                } => self.handle_parity_request(chan, tag, pass, seed, block_size)?,
                Payload::BinSearch {
                    pass,
                    block,
                    lo,
                    hi,
                    parity: None,
                } => self.handle_bisection(chan, tag, pass, block, lo, hi)?,
                Payload::BiconfRequest { seed, pairs } => {
                    self.handle_biconf(chan, tag, seed, pairs)?;
                }
                Payload::StartPrivAmp {
                    seed,
                    reconciled_len,
                    leaked,
                } => return self.finish(seed, reconciled_len, leaked),
                other => {
                    return Err(CascadeError::ProtocolDesync {
                        pass: self.current_pass(),
                        detail: format!("unexpected {} from initiator", other.kind()),
                    });
                }
            }
        }
    }

    fn current_pass(&self) -> u32 {
        self.passes.last().map_or(0, |(index, _)| *index)
    }

    fn handle_sample<C: MessageChannel>(
        &mut self,
        chan: &mut C,
        tag: u32,
        indices: &[u32],
        bits: &[u8],
    ) -> Result<(), CascadeError> {
        let reply = self
            .estimation
            .absorb(&self.key, indices, bits, &self.config)?;
        self.leakage.record(indices.len() as u32);
        match reply {
            EstimationReply::MoreSamples { additional } => {
                tracing::debug!(additional, "requesting more estimation samples");
                chan.send(Envelope {
                    tag,
                    role: Role::Responder,
                    payload: Payload::QberMoreSamples { additional },
                })?;
                Ok(())
            }
            EstimationReply::Accepted { tested, mismatches } => {
                chan.send(Envelope {
                    tag,
                    role: Role::Responder,
                    payload: Payload::QberAck { tested, mismatches },
                })?;
                let rate = f64::from(mismatches) / f64::from(tested.max(1));
                match ErrorRateEstimator::from_sample(tested, mismatches) {
                    Some(estimator) => {
                        tracing::info!(tested, mismatches, rate, "error estimate agreed");
                        self.estimated_rate = Some(estimator.initial());
                        Ok(())
                    }
                    None => Err(CascadeError::EstimateUnusable {
                        rate,
                        bound: USELESS_ERRORBOUND,
                    }),
                }
            }
        }
    }

    fn handle_parity_request<C: MessageChannel>(
        &mut self,
        chan: &mut C,
        tag: u32,
        pass: u32,
        seed: u64,
        block_size: u32,
    ) -> Result<(), CascadeError> {
        let n = self.key.len();
        let permutation = if pass == 1 {
            Permutation::identity(n)
        } else {
            Permutation::derive(seed, n)
        };
        let spans = partition(n, block_size as usize)?;
        let parities: Vec<bool> = spans
            .iter()
            .map(|span| {
                self.key
                    .parity_of_indices(span.positions().map(|p| permutation.raw_index(p)))
            })
            .collect();
        self.leakage.record(parities.len() as u32);
        self.passes_served += 1;
        self.passes.push((pass, permutation));
        tracing::debug!(pass, block_size, blocks = parities.len(), "serving parity list");
        chan.send(Envelope {
            tag,
            role: Role::Responder,
            payload: Payload::ParityList {
                pass,
                block_count: parities.len() as u32,
                parities: pack_bits(&parities),
            },
        })?;
        Ok(())
    }

    fn handle_bisection<C: MessageChannel>(
        &mut self,
        chan: &mut C,
        tag: u32,
        pass: u32,
        block: u32,
        lo: u32,
        hi: u32,
    ) -> Result<(), CascadeError> {
        let domain = if pass == BICONF_PASS {
            self.biconf.as_ref().ok_or_else(|| CascadeError::ProtocolDesync {
                pass,
                detail: "bisection for a confirmation subset that was never requested".into(),
            })?
        } else {
            self.passes
                .iter()
                .rev()
                .find(|(index, _)| *index == pass)
                .map(|(_, permutation)| permutation)
                .ok_or_else(|| CascadeError::ProtocolDesync {
                    pass,
                    detail: format!("bisection for unknown pass {pass}"),
                })?
        };
        if lo >= hi || hi as usize > domain.len() {
            return Err(CascadeError::ProtocolDesync {
                pass,
                detail: format!("bisection range [{lo}, {hi}) invalid for block {block}"),
            });
        }
        let parity = self
            .key
            .parity_of_indices((lo as usize..hi as usize).map(|p| domain.raw_index(p)));
        self.leakage.record(1);
        chan.send(Envelope {
            tag,
            role: Role::Responder,
            payload: Payload::BinSearch {
                pass,
                block,
                lo,
                hi,
                parity: Some(parity),
            },
        })?;
        Ok(())
    }

    fn handle_biconf<C: MessageChannel>(
        &mut self,
        chan: &mut C,
        tag: u32,
        seed: u64,
        pairs: u32,
    ) -> Result<(), CascadeError> {
        let n = self.key.len();
        if pairs == 0 || (pairs as usize) * 2 > n {
            return Err(CascadeError::ProtocolDesync {
                pass: BICONF_PASS,
                detail: format!("confirmation subset of {pairs} pairs does not fit {n} bits"),
            });
        }
        let subset = Permutation::derive(seed, n);
        let parities: Vec<bool> = (0..pairs as usize)
            .map(|p| self.key.get(subset.raw_index(2 * p)) ^ self.key.get(subset.raw_index(2 * p + 1)))
            .collect();
        self.leakage.record(pairs);
        self.biconf = Some(subset);
        tracing::debug!(pairs, "serving confirmation parities");
        chan.send(Envelope {
            tag,
            role: Role::Responder,
            payload: Payload::BiconfParities {
                parities: pack_bits(&parities),
            },
        })?;
        Ok(())
    }

    fn finish(
        &mut self,
        seed: u64,
        reconciled_len: u32,
        leaked: u64,
    ) -> Result<ResponderReport, CascadeError> {
        let n = self.key.len();
        if reconciled_len as usize != n {
            return Err(CascadeError::ProtocolDesync {
                pass: self.current_pass(),
                detail: format!("peer reconciled {reconciled_len} bits, reference holds {n}"),
            });
        }
        if leaked != self.leakage.total() {
            return Err(CascadeError::ProtocolDesync {
                pass: self.current_pass(),
                detail: format!(
                    "leak accounting disagrees: peer counted {leaked}, local tally {}",
                    self.leakage.total()
                ),
            });
        }
        let secret_key = amplify(&self.key, seed, leaked, self.config.margin)?;
        tracing::info!(
            leaked,
            key_bits = secret_key.len_bits(),
            "responder produced final key"
        );
        Ok(ResponderReport {
            secret_key,
            reconciled_len: n,
            leaked_bits: leaked,
            passes_served: self.passes_served,
            estimated_rate: self.estimated_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemoryChannel, memory_pair};

    fn request(
        chan: &mut MemoryChannel,
        tag: u32,
        payload: Payload,
    ) -> Envelope {
        chan.send(Envelope {
            tag,
            role: Role::Initiator,
            payload,
        })
        .unwrap();
        chan.recv().unwrap()
    }

    fn serve_in_thread(
        key: BitVector,
        chan: crate::channel::MemoryChannel,
    ) -> std::thread::JoinHandle<Result<ResponderReport, CascadeError>> {
        std::thread::spawn(move || {
            let mut chan = chan;
            CascadeResponder::new(key, CascadeConfig::default()).serve(&mut chan)
        })
    }

    #[test]
    fn test_parity_list_matches_local_computation() {
        let key = BitVector::from_bits(&[true, true, false, true, false, false, true, false]);
        let (mut driver, responder_chan) = memory_pair();
        let handle = serve_in_thread(key.clone(), responder_chan);

        let reply = request(
            &mut driver,
            1,
            Payload::ParityRequest {
                pass: 1,
                seed: 0,
                block_size: 4,
            },
        );
        assert_eq!(reply.tag, 1);
        assert_eq!(reply.role, Role::Responder);
        match reply.payload {
            Payload::ParityList {
                pass,
                block_count,
                parities,
            } => {
                assert_eq!(pass, 1);
                assert_eq!(block_count, 2);
                let bits = crate::message::unpack_bits(&parities, 2).unwrap();
                assert_eq!(bits[0], key.parity_range(0, 4));
                assert_eq!(bits[1], key.parity_range(4, 8));
            }
            other => panic!("unexpected reply {}", other.kind()),
        }
        drop(driver);
        assert!(matches!(
            handle.join().unwrap(),
            Err(CascadeError::ChannelLost(_))
        ));
    }

    #[test]
    fn test_bisection_for_unknown_pass_is_desync() {
        let key = BitVector::zeros(16);
        let (mut driver, responder_chan) = memory_pair();
        let handle = serve_in_thread(key, responder_chan);
        driver
            .send(Envelope {
                tag: 1,
                role: Role::Initiator,
                payload: Payload::BinSearch {
                    pass: 3,
                    block: 0,
                    lo: 0,
                    hi: 4,
                    parity: None,
                },
            })
            .unwrap();
        assert!(matches!(
            handle.join().unwrap(),
            Err(CascadeError::ProtocolDesync { pass: 3, .. })
        ));
    }

    #[test]
    fn test_leak_count_disagreement_is_desync() {
        let key = BitVector::zeros(64);
        let (mut driver, responder_chan) = memory_pair();
        let handle = serve_in_thread(key, responder_chan);
        driver
            .send(Envelope {
                tag: 1,
                role: Role::Initiator,
                payload: Payload::StartPrivAmp {
                    seed: 1,
                    reconciled_len: 64,
                    leaked: 40,
                },
            })
            .unwrap();
        assert!(matches!(
            handle.join().unwrap(),
            Err(CascadeError::ProtocolDesync { .. })
        ));
    }

    #[test]
    fn test_responder_role_check() {
        let key = BitVector::zeros(16);
        let (mut driver, responder_chan) = memory_pair();
        let handle = serve_in_thread(key, responder_chan);
        driver
            .send(Envelope {
                tag: 1,
                role: Role::Responder,
                payload: Payload::QberMoreSamples { additional: 1 },
            })
            .unwrap();
        assert!(matches!(
            handle.join().unwrap(),
            Err(CascadeError::ProtocolDesync { .. })
        ));
    }
}
