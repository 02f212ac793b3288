//! Parity bookkeeping across passes.
//!
//! The ledger owns one [`PassRecord`] per cascade pass plus a cache of every
//! remote parity learned so far. Local parities go stale whenever a bit is
//! flipped; the reverse map from a bit to the blocks covering it is each
//! pass's inverse permutation (`block = inverse[bit] / block_size`), so
//! invalidation walks the passes instead of chasing pointers. Remote
//! parities never go stale: the reference side never mutates its key, which
//! is what lets the bisection shortcut reuse them freely.

use std::collections::HashMap;

use distill_bits::{BitVector, BlockSpan, Permutation, block_containing};

/// Lifecycle of one parity block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Local parity unknown or stale; must be recomputed before use.
    Pending,
    /// Local and remote parity agree.
    Matched,
    /// Local and remote parity differ; the block holds an odd number of
    /// errors.
    Mismatched,
    /// A bit inside the block was just flipped; the parity must be
    /// re-derived before the block can be trusted again.
    Corrected,
}

/// Parity state of one block of one pass.
#[derive(Debug, Clone)]
pub struct ParityEntry {
    /// Locally computed parity, `None` while stale.
    pub local: Option<bool>,
    /// Parity the peer disclosed for this block.
    pub remote: Option<bool>,
    /// Current lifecycle state.
    pub state: BlockState,
}

/// Everything the ledger keeps for one cascade pass.
#[derive(Debug)]
pub struct PassRecord {
    /// Pass index (1-based).
    pub index: u32,
    /// Seed the permutation was derived from (unused for pass 1).
    pub seed: u64,
    /// Block size of the pass.
    pub block_size: u32,
    /// Permutation mapping permuted positions to raw bit indices.
    pub permutation: Permutation,
    /// Contiguous block spans over the permuted order.
    pub spans: Vec<BlockSpan>,
    /// One entry per span.
    pub entries: Vec<ParityEntry>,
}

impl PassRecord {
    /// Local parity of the permuted position range `[lo, hi)`.
    #[must_use]
    pub fn range_parity(&self, key: &BitVector, lo: usize, hi: usize) -> bool {
        key.parity_of_indices((lo..hi).map(|p| self.permutation.raw_index(p)))
    }

    /// Sorted raw bit indices covered by `[lo, hi)`; the canonical cache key
    /// for that range's parity.
    #[must_use]
    pub fn range_members(&self, lo: usize, hi: usize) -> Vec<u32> {
        let mut members = self.permutation.raw_indices(lo, hi);
        members.sort_unstable();
        members
    }

    /// Remote parity of block `b`, if disclosed.
    #[must_use]
    pub fn remote_parity(&self, b: usize) -> Option<bool> {
        self.entries[b].remote
    }
}

/// Remote parities keyed by the canonical sorted member set they cover.
///
/// A hit means the peer already disclosed (or let us derive) the parity of
/// exactly this set of raw bits, so the bisection can skip an exchange.
#[derive(Debug, Default)]
pub struct RemoteParityCache {
    map: HashMap<Vec<u32>, bool>,
}

impl RemoteParityCache {
    /// Look up the remote parity of a member set.
    #[must_use]
    pub fn get(&self, members: &[u32]) -> Option<bool> {
        self.map.get(members).copied()
    }

    /// Record a learned (or derived) remote parity.
    pub fn insert(&mut self, members: Vec<u32>, parity: bool) {
        self.map.insert(members, parity);
    }

    /// Number of cached parities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether nothing is cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Parity state for a whole reconciliation run.
#[derive(Debug, Default)]
pub struct ParityLedger {
    passes: Vec<PassRecord>,
    cache: RemoteParityCache,
}

impl ParityLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new pass, computing local block parities. Returns the pass
    /// slot used by the other ledger operations.
    pub fn begin_pass(
        &mut self,
        index: u32,
        seed: u64,
        block_size: u32,
        permutation: Permutation,
        spans: Vec<BlockSpan>,
        key: &BitVector,
    ) -> usize {
        let entries = spans
            .iter()
            .map(|span| ParityEntry {
                local: Some(key.parity_of_indices(
                    span.positions().map(|p| permutation.raw_index(p)),
                )),
                remote: None,
                state: BlockState::Pending,
            })
            .collect();
        self.passes.push(PassRecord {
            index,
            seed,
            block_size,
            permutation,
            spans,
            entries,
        });
        self.passes.len() - 1
    }

    /// The record for a pass slot.
    #[must_use]
    pub fn pass(&self, slot: usize) -> &PassRecord {
        &self.passes[slot]
    }

    /// Number of passes opened.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Split access: one pass record plus the mutable remote cache.
    #[must_use]
    pub fn pass_and_cache(&mut self, slot: usize) -> (&PassRecord, &mut RemoteParityCache) {
        (&self.passes[slot], &mut self.cache)
    }

    /// The remote-parity cache.
    #[must_use]
    pub fn cache_mut(&mut self) -> &mut RemoteParityCache {
        &mut self.cache
    }

    /// Store the peer's block parities for a pass and classify every block.
    /// Each block's member set is cached for the bisection shortcut.
    pub fn record_remote_parities(&mut self, slot: usize, parities: &[bool]) {
        let pass = &mut self.passes[slot];
        debug_assert_eq!(parities.len(), pass.entries.len());
        for (b, (&remote, entry)) in parities.iter().zip(&mut pass.entries).enumerate() {
            entry.remote = Some(remote);
            entry.state = if entry.local == Some(remote) {
                BlockState::Matched
            } else {
                BlockState::Mismatched
            };
            let span = pass.spans[b];
            let mut members = pass
                .permutation
                .raw_indices(span.start as usize, span.end() as usize);
            members.sort_unstable();
            self.cache.insert(members, remote);
        }
    }

    /// Block ids of a pass currently classified `Mismatched`.
    #[must_use]
    pub fn mismatched_blocks(&self, slot: usize) -> Vec<usize> {
        self.passes[slot]
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state == BlockState::Mismatched)
            .map(|(b, _)| b)
            .collect()
    }

    /// Whether every block of a pass is `Matched`.
    #[must_use]
    pub fn all_matched(&self, slot: usize) -> bool {
        self.passes[slot]
            .entries
            .iter()
            .all(|e| e.state == BlockState::Matched)
    }

    /// Mark a block as just corrected; its parity is stale until re-derived.
    pub fn mark_corrected(&mut self, slot: usize, block: usize) {
        self.passes[slot].entries[block].state = BlockState::Corrected;
    }

    /// A raw bit was flipped: every block of every pass covering it loses
    /// its local parity and drops back to `Pending`.
    pub fn invalidate_bit(&mut self, raw: usize) {
        for pass in &mut self.passes {
            let pos = pass.permutation.position(raw);
            let block = block_containing(pos, pass.block_size as usize);
            let entry = &mut pass.entries[block];
            entry.local = None;
            entry.state = BlockState::Pending;
        }
    }

    /// Lazily re-derive a block's local parity and re-classify it against
    /// the stored remote parity. Returns the resulting state.
    pub fn reverify(&mut self, slot: usize, block: usize, key: &BitVector) -> BlockState {
        let pass = &mut self.passes[slot];
        let span = pass.spans[block];
        let entry_local = pass.entries[block].local;
        let local = entry_local.unwrap_or_else(|| {
            key.parity_of_indices(
                span.positions()
                    .map(|p| pass.permutation.raw_index(p)),
            )
        });
        let entry = &mut pass.entries[block];
        entry.local = Some(local);
        entry.state = match entry.remote {
            Some(remote) if remote == local => BlockState::Matched,
            Some(_) => BlockState::Mismatched,
            None => BlockState::Pending,
        };
        entry.state
    }
}
