//! C2: the cuckoo-hashed flow classifier.
//!
//! Ported from the decision table and displacement loop in
//! `fq_codel_cuckoo_hash`/`cuckoo_rehash` (`examples/original_source/net/sched/debug/sch_fq_codel_cuckoo_bitmask.c`),
//! cleaned up per spec.md §4.2 and §9:
//!   * hashtable entries are `u32` here, not `u16` — `v = slot + 1` must
//!     reach `65536` at the top of the allowed flow-count range, which does
//!     not fit in 16 bits; using `u16` (as the original does) silently wraps
//!     at that boundary.
//!   * bucket-index bookkeeping for O(1) hashtable-entry clearing lives on
//!     the flow record (`FlowSlot::bucket0/1`), set here at install time,
//!     resolving Open Question #5.
use rand::Rng;

use crate::packet::Packet;

use super::bitmask::EmptySlotIndex;
use super::flow::FlowSlots;

#[derive(Debug, Clone)]
pub(crate) struct FlowTable {
    /// Two N-sized halves back to back: `table[0..n]` is H0's table,
    /// `table[n..2n]` is H1's. `0` means empty; `v > 0` means slot `v - 1`.
    table: Vec<u32>,
    seeds: [u32; 2],
    n: usize,
}

impl FlowTable {
    pub(crate) fn new(n: usize, rng: &mut impl Rng) -> Self {
        Self {
            table: vec![0; 2 * n],
            seeds: [rng.gen(), rng.gen()],
            n,
        }
    }

    pub(crate) fn reset(&mut self, rng: &mut impl Rng) {
        self.table.iter_mut().for_each(|v| *v = 0);
        self.seeds = [rng.gen(), rng.gen()];
    }

    fn h0(&self, hash: u32) -> usize {
        (hash.wrapping_add(self.seeds[0].wrapping_mul(2654435761))) as usize % self.n
    }

    fn h1(&self, hash: u32) -> usize {
        (hash.wrapping_add(self.seeds[1].wrapping_mul(2654435761))) as usize % self.n
    }

    #[inline]
    fn table0_idx(h0: usize) -> usize {
        h0
    }

    #[inline]
    fn table1_idx(&self, h1: usize) -> usize {
        self.n + h1
    }

    fn is_stale_or_match<P: Packet>(
        &self,
        bucket_value: u32,
        flows: &FlowSlots<P>,
        flow_hash: u32,
    ) -> Option<bool> {
        if bucket_value == 0 {
            return None;
        }
        let slot = (bucket_value - 1) as usize;
        let flow = flows.get(slot);
        match flow.head_flow_hash() {
            None => Some(true), // stale: reuse regardless of hash
            Some(head_hash) => Some(head_hash == flow_hash),
        }
    }

    /// Classify `packet` into a 0-based slot index, allocating or displacing
    /// as needed. Never fails (spec.md §4.2): in the worst case the packet
    /// is merged onto an existing, unrelated flow.
    pub(crate) fn classify<P: Packet>(
        &mut self,
        packet: &P,
        flows: &mut FlowSlots<P>,
        bitmask: &mut EmptySlotIndex,
    ) -> usize {
        let flow_hash = packet.flow_hash();
        let h0 = self.h0(packet.flow_hash_perturb(self.seeds[0]));
        let h1 = self.h1(packet.flow_hash_perturb(self.seeds[1]));
        let ta = Self::table0_idx(h0);
        let tb = self.table1_idx(h1);

        let a = self.table[ta];
        let b = self.table[tb];

        match (a, b) {
            (0, 0) => {
                let slot = self.allocate_or_fallback(flows, bitmask);
                self.table[ta] = slot as u32 + 1;
                self.install_bucket(flows, slot, Some(ta as u32), None);
                slot
            }
            (_, 0) => match self.is_stale_or_match(a, flows, flow_hash) {
                Some(true) => (a - 1) as usize,
                _ => {
                    let slot = self.allocate_or_fallback(flows, bitmask);
                    self.table[tb] = slot as u32 + 1;
                    self.install_bucket(flows, slot, None, Some(tb as u32));
                    slot
                }
            },
            (0, _) => match self.is_stale_or_match(b, flows, flow_hash) {
                Some(true) => (b - 1) as usize,
                _ => {
                    let slot = self.allocate_or_fallback(flows, bitmask);
                    self.table[ta] = slot as u32 + 1;
                    self.install_bucket(flows, slot, Some(ta as u32), None);
                    slot
                }
            },
            (_, _) => {
                let a_empty = flows.get((a - 1) as usize).is_empty();
                let b_empty = flows.get((b - 1) as usize).is_empty();
                if a_empty {
                    (a - 1) as usize
                } else if b_empty {
                    (b - 1) as usize
                } else if flows.get((a - 1) as usize).head_flow_hash() == Some(flow_hash) {
                    (a - 1) as usize
                } else if flows.get((b - 1) as usize).head_flow_hash() == Some(flow_hash) {
                    (b - 1) as usize
                } else {
                    let slot = self.allocate_or_fallback(flows, bitmask);
                    self.displace(packet, slot, flows);
                    slot
                }
            }
        }
    }

    fn allocate_or_fallback<P: Packet>(&self, flows: &FlowSlots<P>, bitmask: &mut EmptySlotIndex) -> usize {
        if let Some(slot) = bitmask.next_empty() {
            return slot;
        }
        // Boundary case (spec.md §8): every slot is occupied, but this
        // packet's two buckets both happened to be unclaimed. Merge onto the
        // first active flow we find rather than panicking; this is the
        // accepted stochastic-fair-queueing trade-off spec.md §4.2 names.
        for i in 0..flows.len() {
            if !flows.get(i).is_empty() {
                tracing::debug!(slot = i, "cuckoo table full, merging onto existing flow");
                return i;
            }
        }
        // Every flow is empty yet the bitmask reports no free slot: cannot
        // happen if bitmask and flows stay in sync, but slot 0 is the only
        // sane fallback rather than panicking on a logic bug.
        0
    }

    fn install_bucket<P: Packet>(
        &self,
        flows: &mut FlowSlots<P>,
        slot: usize,
        bucket0: Option<u32>,
        bucket1: Option<u32>,
    ) {
        let flow = flows.get_mut(slot);
        if let Some(b0) = bucket0 {
            flow.bucket0 = Some(b0);
        }
        if let Some(b1) = bucket1 {
            flow.bucket1 = Some(b1);
        }
    }

    /// Bounded cuckoo displacement (spec.md §4.2): alternately probe H0/H1 of
    /// the *current* representative packet, evicting whatever occupies the
    /// target bucket, until an empty bucket is found or `n` swaps have
    /// happened.
    fn displace<P: Packet>(&mut self, packet: &P, value_to_insert: usize, flows: &mut FlowSlots<P>) {
        let mut value = value_to_insert as u32 + 1;
        let mut current_perturb0 = packet.flow_hash_perturb(self.seeds[0]);
        let mut current_perturb1 = packet.flow_hash_perturb(self.seeds[1]);

        for step in 0..self.n {
            let table_num = step % 2;
            let idx = if table_num == 0 {
                Self::table0_idx(self.h0(current_perturb0))
            } else {
                self.table1_idx(self.h1(current_perturb1))
            };

            let evicted = self.table[idx];
            self.table[idx] = value;
            if table_num == 0 {
                self.install_bucket(flows, (value - 1) as usize, Some(idx as u32), None);
            } else {
                self.install_bucket(flows, (value - 1) as usize, None, Some(idx as u32));
            }

            if evicted == 0 {
                return;
            }
            value = evicted;
            let evicted_slot = (evicted - 1) as usize;
            match flows.get(evicted_slot).head_flow_hash() {
                Some(h) => {
                    current_perturb0 = packet_perturb_from_hash(h, self.seeds[0]);
                    current_perturb1 = packet_perturb_from_hash(h, self.seeds[1]);
                }
                None => return, // representative packet gone; abandon in place
            }
        }
        // Exhausted the swap budget: accept the collision silently, last
        // placement remains (spec.md §4.2).
    }

    /// Clear any hashtable entries that still reference `slot`, using the
    /// bucket indices recorded on the flow record (resolves Open Question #5).
    pub(crate) fn clear_slot<P>(&mut self, slot: usize, flows: &mut FlowSlots<P>) {
        let flow = flows.get_mut(slot);
        let expected = slot as u32 + 1;
        if let Some(b0) = flow.bucket0.take() {
            if self.table[b0 as usize] == expected {
                self.table[b0 as usize] = 0;
            }
        }
        if let Some(b1) = flow.bucket1.take() {
            if self.table[b1 as usize] == expected {
                self.table[b1 as usize] = 0;
            }
        }
    }
}

/// Approximation used only when re-deriving a displaced packet's hashes from
/// a flow-hash we no longer have the original packet for (the representative
/// packet is the flow's head, which only exposes `flow_hash`, not a fresh
/// `flow_hash_perturb` call bound to an arbitrary seed — so this mixes the
/// cached hash with the seed the same way a typical `flow_hash_perturb`
/// implementation would).
fn packet_perturb_from_hash(flow_hash: u32, seed: u32) -> u32 {
    flow_hash ^ seed.wrapping_mul(0x9E3779B9)
}
