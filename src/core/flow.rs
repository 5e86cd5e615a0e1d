//! C3: flow records and their packet queues.
//!
//! Per Design Notes §9, the original's intrusive `list_head flowchain` is
//! replaced with an owned membership tag (`Membership`) plus plain
//! `VecDeque<u32>` lists of slot indices held by the scheduler (C6) — DRR
//! only ever pushes to a list's tail and pops its head, so no sibling
//! prev/next indices are needed to get an allocation-free, reference-free
//! list.
use std::collections::VecDeque;
use std::time::Instant;

use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Membership {
    None,
    New,
    Old,
}

/// Per-flow CoDel control variables (spec.md §3/§4.4).
#[derive(Debug, Clone, Copy)]
pub(crate) struct CodelVars {
    pub first_above_time: Option<Instant>,
    pub drop_next: Instant,
    pub count: u32,
    pub lastcount: u32,
    pub dropping: bool,
    pub ldelay: std::time::Duration,
}

impl CodelVars {
    fn new(now: Instant) -> Self {
        Self {
            first_above_time: None,
            drop_next: now,
            count: 0,
            lastcount: 0,
            dropping: false,
            ldelay: std::time::Duration::ZERO,
        }
    }
}

/// A packet sitting in a flow's FIFO, stamped at enqueue time. `flow_hash` is
/// cached off the packet so `match(x)` in C2's classify decision table (and
/// CoDel's head inspection) never need a second trait call.
pub(crate) struct Enqueued<P> {
    pub packet: P,
    pub enqueue_time: Instant,
    pub flow_hash: u32,
    pub memory_footprint: u32,
}

pub(crate) struct FlowSlot<P> {
    pub queue: VecDeque<Enqueued<P>>,
    pub backlog: u32,
    pub deficit: i64,
    pub dropped: u32,
    pub cvars: CodelVars,
    pub membership: Membership,
    /// Bucket indices in the cuckoo hashtable that currently point at this
    /// slot, recorded at install time. Resolves Open Question #5: clearing
    /// on drain uses these instead of re-hashing the last dequeued packet.
    pub bucket0: Option<u32>,
    pub bucket1: Option<u32>,
}

impl<P> FlowSlot<P> {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            queue: VecDeque::new(),
            backlog: 0,
            deficit: 0,
            dropped: 0,
            cvars: CodelVars::new(now),
            membership: Membership::None,
            bucket0: None,
            bucket1: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn head_flow_hash(&self) -> Option<u32> {
        self.queue.front().map(|e| e.flow_hash)
    }
}

impl<P: Packet> FlowSlot<P> {
    /// O(1) tail append (C3 contract).
    pub fn enqueue_tail(&mut self, packet: P, now: Instant) {
        let flow_hash = packet.flow_hash();
        let len = packet.length();
        let memory_footprint = packet.memory_footprint();
        self.queue.push_back(Enqueued {
            packet,
            enqueue_time: now,
            flow_hash,
            memory_footprint,
        });
        self.backlog += len;
    }

    /// O(1) head pop (C3 contract). Caller is responsible for backlog/global
    /// bookkeeping tied to the context (CoDel drop vs. normal dequeue vs.
    /// fat-flow drop), so this only removes the node.
    pub fn dequeue_head(&mut self) -> Option<Enqueued<P>> {
        self.queue.pop_front()
    }
}

pub(crate) struct FlowSlots<P> {
    slots: Vec<FlowSlot<P>>,
}

impl<P: Packet> FlowSlots<P> {
    pub fn new(n: usize, now: Instant) -> Self {
        Self {
            slots: (0..n).map(|_| FlowSlot::new(now)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, i: usize) -> &FlowSlot<P> {
        &self.slots[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut FlowSlot<P> {
        &mut self.slots[i]
    }

    /// Drain every queued packet across all slots and re-initialize CoDel
    /// state, for `reset`/`destroy` (C7), returning the drained packets to
    /// the caller as the explicit "to-free" list described in spec.md §5.
    pub fn drain_all(&mut self, now: Instant) -> Vec<P> {
        let mut freed = Vec::new();
        for slot in self.slots.iter_mut() {
            freed.extend(slot.queue.drain(..).map(|e| e.packet));
            slot.backlog = 0;
            slot.deficit = 0;
            slot.dropped = 0;
            slot.cvars = CodelVars::new(now);
            slot.membership = Membership::None;
            slot.bucket0 = None;
            slot.bucket1 = None;
        }
        freed
    }
}
