//! Error-rate tracking and pass sizing.
//!
//! Estimation only ever consumes bare counts (bits compared, mismatches
//! found, corrections made). Feeding anything an adversary can shape beyond
//! those counts into the sizing policy would let a peer steer block sizes.

use crate::config::CascadeConfig;

/// Error rate at or above which reconciliation cannot extract key material.
pub const USELESS_ERRORBOUND: f64 = 0.15;

/// Smallest initial rate the sizing policy will work with.
pub const MIN_INITIAL_RATE: f64 = 0.005;

/// Standard deviations demanded of the initial estimate.
const INI_EST_SIGMA: f64 = 2.0;

/// Acceptable relative error on the first-pass block size.
const DESIRED_K0_ERROR: f64 = 0.18;

/// Running error-rate estimate driving the block-size schedule.
#[derive(Debug, Clone)]
pub struct ErrorRateEstimator {
    initial: f64,
    residual: f64,
}

impl ErrorRateEstimator {
    /// Start from a trusted a-priori estimate.
    #[must_use]
    pub fn from_prior(rate: f64) -> Self {
        let rate = rate.max(MIN_INITIAL_RATE);
        Self {
            initial: rate,
            residual: rate,
        }
    }

    /// Derive the starting estimate from a comparison sample.
    ///
    /// Returns `None` when the observed rate reaches [`USELESS_ERRORBOUND`];
    /// the caller aborts with `EstimateUnusable`.
    #[must_use]
    pub fn from_sample(tested: u32, mismatches: u32) -> Option<Self> {
        let rate = f64::from(mismatches) / f64::from(tested.max(1));
        if rate >= USELESS_ERRORBOUND {
            return None;
        }
        Some(Self::from_prior(rate))
    }

    /// The starting estimate.
    #[must_use]
    pub fn initial(&self) -> f64 {
        self.initial
    }

    /// Error density observed in the most recent pass.
    #[must_use]
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Fold in the outcome of a completed pass.
    pub fn observe_pass(&mut self, corrections: u32, bits_compared: usize) {
        self.residual = f64::from(corrections) / bits_compared.max(1) as f64;
    }

    /// Block size for cascade pass `pass` (1-based) over a key of `n` bits.
    ///
    /// The first pass uses `initial_block_coeff / initial_rate`; every later
    /// pass multiplies by the growth factor. Always clamped to
    /// `[min_block_size, n]`.
    #[must_use]
    pub fn block_size(&self, pass: u32, n: usize, config: &CascadeConfig) -> u32 {
        let base = (config.initial_block_coeff / self.initial).round() as u64;
        let grown = base.saturating_mul(u64::from(config.block_growth).saturating_pow(pass - 1));
        // max-then-min so a key shorter than the minimum block still gets a
        // single whole-key block instead of a clamp panic.
        grown
            .max(u64::from(config.min_block_size))
            .min(n as u64)
            .try_into()
            .unwrap_or(u32::MAX)
    }

    /// Whether the residual estimate is low enough to enter confirmation.
    #[must_use]
    pub fn ready_for_confirmation(&self, passes_run: u32, config: &CascadeConfig) -> bool {
        if passes_run < config.min_passes {
            return false;
        }
        passes_run >= config.max_passes || self.residual <= config.biconf_entry_threshold
    }

    /// Sample bits needed to pin down an error rate around `rate`.
    ///
    /// Takes the larger of the bound that separates `rate` from the useless
    /// region with [`INI_EST_SIGMA`] confidence and the bound giving the
    /// first-pass block size a relative error of [`DESIRED_K0_ERROR`].
    #[must_use]
    pub fn sample_bits_needed(rate: f64) -> u32 {
        let rate = rate.clamp(MIN_INITIAL_RATE, USELESS_ERRORBOUND - MIN_INITIAL_RATE);
        let ldi = USELESS_ERRORBOUND - rate;
        let separation = (rate * INI_EST_SIGMA / (ldi * ldi)).ceil();
        let sizing = (1.0 / (rate * DESIRED_K0_ERROR * DESIRED_K0_ERROR)).ceil();
        separation.max(sizing) as u32
    }
}
