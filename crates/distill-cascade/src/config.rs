//! Reconciliation tuning parameters.

/// Tuning parameters for one reconciliation session.
///
/// The defaults are the reference values; the growth multiplier and the
/// confirmation sample count are protocol tuning knobs that deployments may
/// override after validating against the property tests.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// First-pass block size is `initial_block_coeff / estimated_qber`,
    /// clamped to `[min_block_size, key_len]`.
    pub initial_block_coeff: f64,
    /// Lower clamp for the first-pass block size.
    pub min_block_size: u32,
    /// Block-size multiplier between consecutive passes.
    pub block_growth: u32,
    /// Always run at least this many cascade passes.
    pub min_passes: u32,
    /// Never run more than this many cascade passes before confirmation.
    pub max_passes: u32,
    /// Enter confirmation once a pass's observed error density drops to or
    /// below this.
    pub biconf_entry_threshold: f64,
    /// Pairs compared per confirmation round.
    pub biconf_pairs: u32,
    /// Confirmation rounds before giving up on the block.
    pub biconf_retry_limit: u32,
    /// A-priori rate used to size the first estimation sample when no
    /// trusted estimate is handed in.
    pub qber_prior_guess: f64,
    /// Sample rounds the estimation exchange may take.
    pub qber_max_rounds: u32,
    /// Statistical security margin subtracted on top of the leaked bits when
    /// sizing the final key.
    pub margin: usize,
    /// Fixed seed for all protocol randomness (block placement, confirmation
    /// subsets, the Toeplitz seed). `None` draws fresh entropy; tests pin it
    /// to make leakage totals reproducible.
    pub protocol_seed: Option<u64>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            initial_block_coeff: 0.73,
            min_block_size: 4,
            block_growth: 2,
            min_passes: 2,
            max_passes: 5,
            biconf_entry_threshold: 0.001,
            biconf_pairs: 128,
            biconf_retry_limit: 10,
            qber_prior_guess: 0.075,
            qber_max_rounds: 4,
            margin: 64,
            protocol_seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = CascadeConfig::default();
        assert!(cfg.min_passes <= cfg.max_passes);
        assert!(cfg.min_block_size >= 2);
        assert!(cfg.block_growth >= 2);
        assert!(cfg.biconf_pairs > 0 && cfg.biconf_retry_limit > 0);
    }
}
