//! Disclosed-bit accounting.

/// Counts every bit of reconciliation information disclosed over the channel.
///
/// One count per exchanged parity, per bisection round trip, per
/// confirmation pair and per disclosed estimation sample bit. The total is
/// handed verbatim to privacy amplification; no component performing a
/// disclosure may bypass it. The counter only ever grows.
#[derive(Debug, Default, Clone)]
pub struct LeakageAccountant {
    total: u64,
}

impl LeakageAccountant {
    /// A fresh counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `n` disclosed bits.
    pub fn record(&mut self, n: u32) {
        self.total += u64::from(n);
    }

    /// Total bits disclosed so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }
}
