//! The initiator-side reconciliation state machine.
//!
//! One [`CascadeEngine`] instance owns all mutable state of a run: the noisy
//! key copy, the parity ledger, the correction log and the leakage counter.
//! Nothing is process-global, so several sessions can reconcile concurrently
//! in one process. The engine blocks on the peer at every exchange; the
//! whole-pass parity comparison is batched into a single round trip, while
//! bisection refines one sub-range per round trip as the protocol requires.

use distill_amp::{SecretKey, amplify};
use distill_bits::{BitVector, Permutation, partition};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;

use crate::bisect::locate_error;
use crate::channel::MessageChannel;
use crate::config::CascadeConfig;
use crate::error::CascadeError;
use crate::estimator::{ErrorRateEstimator, USELESS_ERRORBOUND};
use crate::leakage::LeakageAccountant;
use crate::ledger::{BlockState, ParityLedger};
use crate::message::{BICONF_PASS, Envelope, Payload, Role, unpack_bits};
use crate::qber;

/// Protocol phase of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not yet running.
    Idle,
    /// Exchanging the parity list of pass `k`.
    PassInProgress(u32),
    /// Correcting the mismatched blocks of pass `k`.
    Reconciling(u32),
    /// Running the final confirmation stage.
    BiconfPass,
    /// Reconciliation succeeded and the key was produced.
    Done,
    /// A fatal condition ended the run; no key was produced.
    Aborted,
}

impl EngineState {
    fn can_transition(self, to: Self) -> bool {
        match (self, to) {
            (Self::Idle, Self::PassInProgress(1)) => true,
            (Self::PassInProgress(k), Self::Reconciling(j)) => j == k,
            (Self::Reconciling(k), Self::PassInProgress(j)) => j == k + 1,
            (Self::Reconciling(_), Self::BiconfPass) => true,
            (Self::BiconfPass, Self::Done) => true,
            (_, Self::Aborted) => true,
            _ => false,
        }
    }
}

/// Where the starting error estimate comes from.
#[derive(Debug, Clone, Copy)]
pub enum InitialEstimate {
    /// A trusted a-priori rate handed in by the caller.
    Prior(f64),
    /// Run the sampling exchange before the first pass.
    Sampled,
}

/// One corrected bit, append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionEvent {
    /// Absolute index of the flipped bit.
    pub bit_index: u32,
    /// Pass that discovered it ([`BICONF_PASS`] for the confirmation stage).
    pub pass: u32,
}

/// Outcome of a successful initiator run.
#[derive(Debug)]
pub struct ReconciliationReport {
    /// The distilled secret key.
    pub secret_key: SecretKey,
    /// Length of the reconciled key fed into amplification.
    pub reconciled_len: usize,
    /// Total bits disclosed over the channel.
    pub leaked_bits: u64,
    /// Bits flipped to reach agreement.
    pub corrected_bits: usize,
    /// Cascade passes run (excluding confirmation).
    pub passes_run: u32,
    /// Confirmation rounds until a clean sample.
    pub biconf_rounds: u32,
}

/// The initiator side of a reconciliation run.
///
/// Holds the noisy key copy and flips its own bits toward the responder's
/// reference; the responder never mutates anything.
pub struct CascadeEngine {
    key: BitVector,
    config: CascadeConfig,
    estimate: InitialEstimate,
    state: EngineState,
    ledger: ParityLedger,
    leakage: LeakageAccountant,
    corrections: Vec<CorrectionEvent>,
    tag: u32,
    rng: ChaCha12Rng,
}

impl CascadeEngine {
    /// Create an engine over the local raw key.
    ///
    /// # Panics
    ///
    /// Panics if the OS entropy source fails while no
    /// [`CascadeConfig::protocol_seed`] is configured.
    #[must_use]
    pub fn new(key: BitVector, estimate: InitialEstimate, config: CascadeConfig) -> Self {
        let rng = match config.protocol_seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => {
                let mut seed = [0u8; 32];
                getrandom::getrandom(&mut seed).expect("CSPRNG failure");
                ChaCha12Rng::from_seed(seed)
            }
        };
        Self {
            key,
            config,
            estimate,
            state: EngineState::Idle,
            ledger: ParityLedger::new(),
            leakage: LeakageAccountant::new(),
            corrections: Vec::new(),
            tag: 0,
            rng,
        }
    }

    /// Current protocol phase.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The correction log so far.
    #[must_use]
    pub fn corrections(&self) -> &[CorrectionEvent] {
        &self.corrections
    }

    /// Bits disclosed so far.
    #[must_use]
    pub fn leaked_bits(&self) -> u64 {
        self.leakage.total()
    }

    /// The local key after reconciliation.
    #[must_use]
    pub fn reconciled_key(&self) -> &BitVector {
        &self.key
    }

    /// Run the full protocol to completion.
    ///
    /// # Errors
    ///
    /// All variants of [`CascadeError`]; any error aborts the run and leaves
    /// the engine in [`EngineState::Aborted`].
    pub fn run<C: MessageChannel>(
        &mut self,
        chan: &mut C,
    ) -> Result<ReconciliationReport, CascadeError> {
        if self.state != EngineState::Idle {
            return Err(CascadeError::ProtocolDesync {
                pass: 0,
                detail: "engine already ran".into(),
            });
        }
        match self.run_inner(chan) {
            Ok(report) => Ok(report),
            Err(err) => {
                self.state = EngineState::Aborted;
                tracing::warn!(error = %err, "reconciliation aborted");
                Err(err)
            }
        }
    }

    fn run_inner<C: MessageChannel>(
        &mut self,
        chan: &mut C,
    ) -> Result<ReconciliationReport, CascadeError> {
        let n = self.key.len();
        if n == 0 {
            return Err(distill_bits::BitsError::EmptyDomain.into());
        }

        let mut estimator = match self.estimate {
            InitialEstimate::Prior(rate) => {
                if rate >= USELESS_ERRORBOUND {
                    return Err(CascadeError::EstimateUnusable {
                        rate,
                        bound: USELESS_ERRORBOUND,
                    });
                }
                ErrorRateEstimator::from_prior(rate)
            }
            InitialEstimate::Sampled => qber::run_estimation_initiator(
                chan,
                &self.key,
                &mut self.rng,
                &mut self.leakage,
                &mut self.tag,
                &self.config,
            )?,
        };

        let mut passes_run = 0u32;
        loop {
            let pass = passes_run + 1;
            self.transition(EngineState::PassInProgress(pass));
            self.run_pass(pass, &mut estimator, chan)?;
            passes_run = pass;
            if estimator.ready_for_confirmation(passes_run, &self.config) {
                break;
            }
        }

        self.transition(EngineState::BiconfPass);
        let biconf_rounds = self.run_biconf(chan)?;

        let leaked = self.leakage.total();
        let amp_seed = self.rng.next_u64();
        self.tag += 1;
        chan.send(Envelope {
            tag: self.tag,
            role: Role::Initiator,
            payload: Payload::StartPrivAmp {
                seed: amp_seed,
                reconciled_len: n as u32,
                leaked,
            },
        })?;
        let secret_key = amplify(&self.key, amp_seed, leaked, self.config.margin)?;
        self.transition(EngineState::Done);
        tracing::info!(
            passes = passes_run,
            corrected = self.corrections.len(),
            leaked,
            key_bits = secret_key.len_bits(),
            "reconciliation complete"
        );
        Ok(ReconciliationReport {
            secret_key,
            reconciled_len: n,
            leaked_bits: leaked,
            corrected_bits: self.corrections.len(),
            passes_run,
            biconf_rounds,
        })
    }

    fn run_pass<C: MessageChannel>(
        &mut self,
        pass: u32,
        estimator: &mut ErrorRateEstimator,
        chan: &mut C,
    ) -> Result<(), CascadeError> {
        let n = self.key.len();
        let block_size = estimator.block_size(pass, n, &self.config);
        // Pass 1 runs over the unpermuted key; later passes reshuffle so
        // that error pairs masked by an earlier partition land in different
        // blocks with fresh probability.
        let seed = if pass == 1 { 0 } else { self.rng.next_u64() };
        let permutation = if pass == 1 {
            Permutation::identity(n)
        } else {
            Permutation::derive(seed, n)
        };
        let spans = partition(n, block_size as usize)?;
        let block_total = spans.len();
        let slot = self
            .ledger
            .begin_pass(pass, seed, block_size, permutation, spans, &self.key);

        let reply = self.exchange(
            chan,
            pass,
            Payload::ParityRequest {
                pass,
                seed,
                block_size,
            },
        )?;
        let (list_pass, block_count, packed) = match reply {
            Payload::ParityList {
                pass,
                block_count,
                parities,
            } => (pass, block_count, parities),
            other => {
                return Err(CascadeError::ProtocolDesync {
                    pass,
                    detail: format!("expected CASCADE_PARITY_LIST, got {}", other.kind()),
                });
            }
        };
        if list_pass != pass || block_count as usize != block_total {
            return Err(CascadeError::ProtocolDesync {
                pass,
                detail: format!(
                    "parity vector for pass {list_pass} has {block_count} entries, expected {block_total}"
                ),
            });
        }
        let parities = unpack_bits(&packed, block_total).ok_or_else(|| {
            CascadeError::ProtocolDesync {
                pass,
                detail: "parity vector shorter than declared".into(),
            }
        })?;
        self.leakage.record(block_total as u32);
        self.ledger.record_remote_parities(slot, &parities);

        self.transition(EngineState::Reconciling(pass));
        let mismatched = self.ledger.mismatched_blocks(slot);
        tracing::debug!(
            pass,
            block_size,
            blocks = block_total,
            mismatched = mismatched.len(),
            "parity lists compared"
        );

        let mut corrected_this_pass = 0u64;
        for block in mismatched {
            // A block can stay mismatched after a correction when it held
            // several errors; reprocess until it matches.
            loop {
                match self.ledger.reverify(slot, block, &self.key) {
                    BlockState::Matched => break,
                    BlockState::Mismatched => {}
                    state => {
                        return Err(CascadeError::ProtocolDesync {
                            pass,
                            detail: format!("block {block} stuck in state {state:?}"),
                        });
                    }
                }
                let span = self.ledger.pass(slot).spans[block];
                let Some(range_remote) = self.ledger.pass(slot).remote_parity(block) else {
                    return Err(CascadeError::ProtocolDesync {
                        pass,
                        detail: format!("no remote parity recorded for block {block}"),
                    });
                };
                let key = &self.key;
                let (pass_rec, cache) = self.ledger.pass_and_cache(slot);
                let members = |a: u32, b: u32| pass_rec.range_members(a as usize, b as usize);
                let local = |a: u32, b: u32| pass_rec.range_parity(key, a as usize, b as usize);
                let (bit, _) = locate_error(
                    chan,
                    cache,
                    &mut self.leakage,
                    &mut self.tag,
                    pass,
                    block as u32,
                    span.start,
                    span.end(),
                    range_remote,
                    members,
                    local,
                )?;

                if self
                    .corrections
                    .iter()
                    .any(|c| c.pass == pass && c.bit_index == bit as u32)
                {
                    return Err(CascadeError::Divergent {
                        pass,
                        corrections: corrected_this_pass,
                    });
                }
                self.key.flip(bit);
                corrected_this_pass += 1;
                if corrected_this_pass > n as u64 {
                    return Err(CascadeError::Divergent {
                        pass,
                        corrections: corrected_this_pass,
                    });
                }
                self.corrections.push(CorrectionEvent {
                    bit_index: bit as u32,
                    pass,
                });
                self.ledger.mark_corrected(slot, block);
                self.ledger.invalidate_bit(bit);
                tracing::debug!(pass, block, bit, "corrected bit");
            }
        }
        debug_assert!(self.ledger.all_matched(slot));
        estimator.observe_pass(corrected_this_pass as u32, n);
        tracing::info!(pass, corrected = corrected_this_pass, "pass complete");
        Ok(())
    }

    fn run_biconf<C: MessageChannel>(&mut self, chan: &mut C) -> Result<u32, CascadeError> {
        let n = self.key.len();
        let pairs = self.config.biconf_pairs.min((n / 2) as u32);
        if pairs == 0 {
            return Err(CascadeError::ProtocolDesync {
                pass: BICONF_PASS,
                detail: "key too short for confirmation sampling".into(),
            });
        }
        for round in 1..=self.config.biconf_retry_limit {
            let seed = self.rng.next_u64();
            let subset = Permutation::derive(seed, n);
            let reply = self.exchange(chan, BICONF_PASS, Payload::BiconfRequest { seed, pairs })?;
            let packed = match reply {
                Payload::BiconfParities { parities } => parities,
                other => {
                    return Err(CascadeError::ProtocolDesync {
                        pass: BICONF_PASS,
                        detail: format!("expected CASCADE_BICONF_PARITY_RESP, got {}", other.kind()),
                    });
                }
            };
            let remote = unpack_bits(&packed, pairs as usize).ok_or_else(|| {
                CascadeError::ProtocolDesync {
                    pass: BICONF_PASS,
                    detail: "confirmation parity list shorter than declared".into(),
                }
            })?;
            self.leakage.record(pairs);

            let mut mismatches = 0u32;
            for (p, &remote_parity) in remote.iter().enumerate() {
                let lo = (2 * p) as u32;
                let hi = lo + 2;
                let local_parity = self.key.get(subset.raw_index(lo as usize))
                    ^ self.key.get(subset.raw_index(lo as usize + 1));
                if local_parity == remote_parity {
                    continue;
                }
                mismatches += 1;
                let key = &self.key;
                let cache = self.ledger.cache_mut();
                let members = |a: u32, b: u32| {
                    let mut m = subset.raw_indices(a as usize, b as usize);
                    m.sort_unstable();
                    m
                };
                let local = |a: u32, b: u32| {
                    key.parity_of_indices((a as usize..b as usize).map(|pos| subset.raw_index(pos)))
                };
                let (bit, _) = locate_error(
                    chan,
                    cache,
                    &mut self.leakage,
                    &mut self.tag,
                    BICONF_PASS,
                    p as u32,
                    lo,
                    hi,
                    remote_parity,
                    members,
                    local,
                )?;
                self.key.flip(bit);
                self.corrections.push(CorrectionEvent {
                    bit_index: bit as u32,
                    pass: BICONF_PASS,
                });
                self.ledger.invalidate_bit(bit);
                tracing::debug!(round, pair = p, bit, "confirmation corrected residual bit");
            }
            if mismatches == 0 {
                tracing::info!(round, pairs, "confirmation clean");
                return Ok(round);
            }
            tracing::debug!(round, mismatches, "confirmation found residual errors, re-sampling");
        }
        Err(CascadeError::ResidualErrorTooHigh {
            rounds: self.config.biconf_retry_limit,
        })
    }

    fn exchange<C: MessageChannel>(
        &mut self,
        chan: &mut C,
        pass: u32,
        payload: Payload,
    ) -> Result<Payload, CascadeError> {
        self.tag += 1;
        let sent = self.tag;
        chan.send(Envelope {
            tag: sent,
            role: Role::Initiator,
            payload,
        })?;
        let reply = chan.recv()?;
        if reply.tag != sent {
            return Err(CascadeError::ProtocolDesync {
                pass,
                detail: format!("reply tag {} does not answer request {sent}", reply.tag),
            });
        }
        if reply.role != Role::Responder {
            return Err(CascadeError::ProtocolDesync {
                pass,
                detail: "peer answered with initiator role".into(),
            });
        }
        Ok(reply.payload)
    }

    fn transition(&mut self, to: EngineState) {
        debug_assert!(
            self.state.can_transition(to),
            "invalid transition {:?} -> {to:?}",
            self.state
        );
        tracing::debug!(from = ?self.state, to = ?to, "engine state transition");
        self.state = to;
    }
}
