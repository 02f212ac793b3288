//! Binary-search localization of a single error.
//!
//! A block known to hold an odd number of differing bits is narrowed by
//! repeated halving. Only the left half's parity is ever exchanged: the
//! right half's remote parity follows from the enclosing range
//! (`right = range XOR left`) and is cached without costing a disclosure.
//! Before asking the peer for any half, the remote-parity cache is consulted
//! under the half's canonical member set; parities learned in earlier passes
//! or earlier trips through the same block answer for free. A length-1 range
//! is the bit itself, which ends the recursion.

use crate::channel::MessageChannel;
use crate::error::CascadeError;
use crate::ledger::RemoteParityCache;
use crate::leakage::LeakageAccountant;
use crate::message::{Envelope, Payload, Role};

/// Split point of `[lo, hi)`: the left half is `[lo, mid)` and takes the
/// extra position when the range is odd.
#[must_use]
pub(crate) fn split_point(lo: u32, hi: u32) -> u32 {
    lo + (hi - lo).div_ceil(2)
}

/// Locate the erroneous bit in `[lo, hi)`, a range with known remote parity
/// `range_remote` that disagrees with the local parity.
///
/// `members(a, b)` yields the canonical sorted raw indices covered by the
/// position range `[a, b)` and `local_parity(a, b)` the local parity of the
/// same range; both close over whichever domain (pass permutation or
/// confirmation subset) the block lives in.
///
/// Returns the raw bit index to flip locally and the number of parity
/// exchanges actually performed (cache hits are free).
#[allow(clippy::too_many_arguments)]
pub(crate) fn locate_error<C: MessageChannel>(
    chan: &mut C,
    cache: &mut RemoteParityCache,
    leakage: &mut LeakageAccountant,
    tag: &mut u32,
    wire_pass: u32,
    wire_block: u32,
    mut lo: u32,
    mut hi: u32,
    mut range_remote: bool,
    members: impl Fn(u32, u32) -> Vec<u32>,
    local_parity: impl Fn(u32, u32) -> bool,
) -> Result<(usize, u32), CascadeError> {
    debug_assert!(lo < hi, "cannot bisect an empty range");
    let mut exchanges = 0u32;
    while hi - lo > 1 {
        let mid = split_point(lo, hi);
        let left_members = members(lo, mid);
        let remote_left = match cache.get(&left_members) {
            Some(parity) => parity,
            None => {
                let parity = query_parity(chan, tag, wire_pass, wire_block, lo, mid)?;
                leakage.record(1);
                exchanges += 1;
                cache.insert(left_members, parity);
                parity
            }
        };
        // The sibling's remote parity comes for free.
        cache.insert(members(mid, hi), range_remote ^ remote_left);

        if local_parity(lo, mid) != remote_left {
            hi = mid;
            range_remote = remote_left;
        } else {
            range_remote ^= remote_left;
            lo = mid;
        }
    }
    // Parity of a length-1 range is the bit itself.
    let singleton = members(lo, hi);
    let bit = singleton[0] as usize;
    cache.insert(singleton, range_remote);
    Ok((bit, exchanges))
}

fn query_parity<C: MessageChannel>(
    chan: &mut C,
    tag: &mut u32,
    pass: u32,
    block: u32,
    lo: u32,
    hi: u32,
) -> Result<bool, CascadeError> {
    *tag += 1;
    let sent = *tag;
    chan.send(Envelope {
        tag: sent,
        role: Role::Initiator,
        payload: Payload::BinSearch {
            pass,
            block,
            lo,
            hi,
            parity: None,
        },
    })?;
    let reply = chan.recv()?;
    match reply {
        Envelope {
            tag: reply_tag,
            role: Role::Responder,
            payload:
                Payload::BinSearch {
                    pass: reply_pass,
                    lo: reply_lo,
                    hi: reply_hi,
                    parity: Some(parity),
                    ..
                },
        } if reply_tag == sent && reply_pass == pass && reply_lo == lo && reply_hi == hi => {
            Ok(parity)
        }
        other => Err(CascadeError::ProtocolDesync {
            pass,
            detail: format!(
                "expected bisection parity for block {block} [{lo}, {hi}), got {} (tag {})",
                other.payload.kind(),
                other.tag
            ),
        }),
    }
}
