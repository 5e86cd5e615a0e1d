//! The fair-queueing CoDel core: C1 (empty-slot index), C2 (cuckoo flow
//! table), C3 (flow records), C4 (CoDel engine), C5 (enqueue path), C6 (DRR
//! scheduler) and C7 (reset/destroy), assembled into one synchronous type.

pub(crate) mod bitmask;
pub(crate) mod codel;
pub(crate) mod cuckoo;
pub(crate) mod flow;

use std::collections::VecDeque;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::classifier::{ClassifyVerdict, ExternalClassifier};
use crate::config::{Config, ConfigUpdate};
use crate::error::CoreError;
use crate::packet::Packet;
use crate::stats::{FlowStats, GlobalStats, GlobalStatsInner};

use bitmask::EmptySlotIndex;
use cuckoo::FlowTable;
use flow::{FlowSlots, Membership};

/// Outcome of a single `enqueue` call (spec.md §7). Never fatal — the data
/// path never returns an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// The packet was admitted, but a fat-flow drop it triggered fell on its
    /// own flow; upstream should slow down.
    Congestion,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Overlimit,
    Overmemory,
    Codel,
    Classifier,
}

/// Result of `enqueue`: the outcome, plus any packets the core is handing
/// back ownership of (spec.md §5's "explicit to-free list").
pub struct EnqueueResult<P> {
    pub outcome: EnqueueOutcome,
    pub freed: Vec<P>,
}

/// Result of `dequeue`: the packet to transmit (if any), plus any packets
/// CoDel or fat-flow reclamation dropped while producing it.
pub struct DequeueResult<P> {
    pub packet: Option<P>,
    pub freed: Vec<P>,
}

pub struct FqCodel<P: Packet> {
    config: Config,
    flows: FlowSlots<P>,
    bitmask: EmptySlotIndex,
    cuckoo: FlowTable,
    new_flows: VecDeque<u32>,
    old_flows: VecDeque<u32>,
    classifier: Option<Box<dyn ExternalClassifier<P>>>,
    stats: GlobalStatsInner,
    rng: StdRng,
    flows_locked: bool,
}

impl<P: Packet> FqCodel<P> {
    /// Construct a new core. Mirrors `fq_codel_init`'s allocation: the flow
    /// table, backlog/bitmask, and hashtable are all sized from
    /// `config.flows` up front.
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let config = config.validated()?;
        let n = config.flows as usize;

        let mut table: Vec<u32> = Vec::new();
        table
            .try_reserve_exact(2 * n)
            .map_err(|_| CoreError::OutOfMemory { requested: n })?;

        let mut rng = StdRng::from_entropy();
        let now = Instant::now();

        Ok(Self {
            flows: FlowSlots::new(n, now),
            bitmask: EmptySlotIndex::new(n),
            cuckoo: FlowTable::new(n, &mut rng),
            new_flows: VecDeque::new(),
            old_flows: VecDeque::new(),
            classifier: None,
            stats: GlobalStatsInner::default(),
            rng,
            flows_locked: false,
            config,
        })
    }

    pub fn set_classifier(&mut self, classifier: impl ExternalClassifier<P> + 'static) {
        self.classifier = Some(Box::new(classifier));
    }

    pub fn clear_classifier(&mut self) {
        self.classifier = None;
    }

    pub fn configure(&mut self, update: ConfigUpdate) -> Result<(), CoreError> {
        if let Some(flows) = update.flows {
            if self.flows_locked {
                return Err(CoreError::InvalidConfig(
                    "flows can only be changed before the first enqueue".into(),
                ));
            }
            if flows == 0 || flows as usize > 65536 {
                return Err(CoreError::InvalidConfig(format!(
                    "flows must be in 1..=65536, got {flows}"
                )));
            }
            let n = flows as usize;
            self.flows = FlowSlots::new(n, Instant::now());
            self.bitmask = EmptySlotIndex::new(n);
            self.cuckoo = FlowTable::new(n, &mut self.rng);
            self.config.flows = flows;
        }
        if let Some(target) = update.target {
            self.config.target = target;
        }
        if let Some(interval) = update.interval {
            self.config.interval = interval;
        }
        if let Some(ce) = update.ce_threshold {
            self.config.ce_threshold = ce;
        }
        if let Some(ecn) = update.ecn {
            self.config.ecn = ecn;
        }
        if let Some(limit) = update.limit {
            self.config.limit = limit;
        }
        if let Some(mem) = update.memory_limit {
            self.config.memory_limit = mem.min(1u32 << 31);
        }
        if let Some(quantum) = update.quantum {
            self.config.quantum = quantum.max(256);
        }
        if let Some(batch) = update.drop_batch_size {
            self.config.drop_batch_size = batch.max(1);
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// C5: classify, append, admit, and (if over budget) run fat-flow drop.
    #[tracing::instrument(level = "trace", skip(self, now, packet))]
    pub fn enqueue(&mut self, now: Instant, mut packet: P) -> EnqueueResult<P> {
        self.flows_locked = true;

        let slot = match &self.classifier {
            Some(classifier) => match classifier.classify(&packet) {
                ClassifyVerdict::Class(id) if id > 0 && (id as usize) <= self.flows.len() => {
                    (id - 1) as usize
                }
                ClassifyVerdict::Bypass | ClassifyVerdict::Stolen => {
                    return EnqueueResult {
                        outcome: EnqueueOutcome::Dropped(DropReason::Classifier),
                        freed: vec![packet],
                    };
                }
                ClassifyVerdict::Shot | ClassifyVerdict::Class(_) => {
                    return EnqueueResult {
                        outcome: EnqueueOutcome::Dropped(DropReason::Classifier),
                        freed: vec![packet],
                    };
                }
            },
            None => self.cuckoo.classify(&packet, &mut self.flows, &mut self.bitmask),
        };

        let len = packet.length();
        let mem = packet.memory_footprint();

        self.flows.get_mut(slot).enqueue_tail(packet, now);
        self.bitmask.mark_occupied(slot);
        self.stats.backlog += len;
        self.stats.memory_usage += mem;
        self.stats.qlen += 1;

        if self.flows.get(slot).membership == Membership::None {
            self.flows.get_mut(slot).membership = Membership::New;
            self.flows.get_mut(slot).deficit = self.config.quantum as i64;
            self.flows.get_mut(slot).dropped = 0;
            self.new_flows.push_back(slot as u32);
            self.stats.new_flow_count += 1;
        }

        let memory_limited = self.stats.memory_usage > self.config.memory_limit;
        if self.stats.qlen <= self.config.limit && !memory_limited {
            return EnqueueResult {
                outcome: EnqueueOutcome::Accepted,
                freed: Vec::new(),
            };
        }

        let (victim_slot, freed) = self.fat_flow_drop();
        if memory_limited {
            self.stats.drop_overmemory += freed.len() as u32;
        } else {
            self.stats.drop_overlimit += freed.len() as u32;
        }

        let outcome = if victim_slot == Some(slot) {
            EnqueueOutcome::Congestion
        } else {
            EnqueueOutcome::Accepted
        };
        EnqueueResult { outcome, freed }
    }

    /// Linear scan for the largest backlog, then drop from its head until
    /// `drop_batch_size` packets are gone or half its backlog is reclaimed
    /// (spec.md §4.5, step 7).
    fn fat_flow_drop(&mut self) -> (Option<usize>, Vec<P>) {
        let mut max_backlog = 0u32;
        let mut victim = 0usize;
        for i in 0..self.flows.len() {
            let backlog = self.flows.get(i).backlog;
            if backlog > max_backlog {
                max_backlog = backlog;
                victim = i;
            }
        }
        if max_backlog == 0 {
            return (None, Vec::new());
        }

        tracing::debug!(slot = victim, backlog = max_backlog, "fat-flow drop triggered");

        let threshold = max_backlog / 2;
        let mut freed = Vec::new();
        let mut reclaimed = 0u32;

        loop {
            if freed.len() as u32 >= self.config.drop_batch_size || reclaimed >= threshold {
                break;
            }
            let Some(enq) = self.flows.get_mut(victim).dequeue_head() else {
                break;
            };
            let len = enq.packet.length();
            let flow = self.flows.get_mut(victim);
            flow.backlog = flow.backlog.saturating_sub(len);
            flow.dropped += 1;
            self.stats.backlog = self.stats.backlog.saturating_sub(len);
            self.stats.memory_usage = self.stats.memory_usage.saturating_sub(enq.memory_footprint);
            self.stats.qlen = self.stats.qlen.saturating_sub(1);
            reclaimed += len;
            freed.push(enq.packet);
        }

        // Don't retire the slot here even if it drained to empty: it may
        // still be linked in `new_flows`/`old_flows`, and retiring it now
        // (clearing its bitmask bit and hashtable entries) would let a
        // fresh flow reuse the slot while a stale list entry still points
        // at it. The DRR loop in `dequeue` retires empty slots once they
        // reach the front of a list and are unlinked.
        (Some(victim), freed)
    }

    /// C6: DRR across `new_flows` then `old_flows`, invoking CoDel (C4) on
    /// the chosen flow.
    #[tracing::instrument(level = "trace", skip(self, now))]
    pub fn dequeue(&mut self, now: Instant) -> DequeueResult<P> {
        let mut all_freed = Vec::new();

        loop {
            let (from_new, slot) = match self.new_flows.front().copied() {
                Some(s) => (true, s),
                None => match self.old_flows.front().copied() {
                    Some(s) => (false, s),
                    None => {
                        return DequeueResult {
                            packet: None,
                            freed: all_freed,
                        }
                    }
                },
            };

            if self.flows.get(slot as usize).deficit <= 0 {
                let quantum = self.config.quantum as i64;
                let flow = self.flows.get_mut(slot as usize);
                flow.deficit += quantum;
                if from_new {
                    self.new_flows.pop_front();
                } else {
                    self.old_flows.pop_front();
                }
                self.flows.get_mut(slot as usize).membership = Membership::Old;
                self.old_flows.push_back(slot);
                continue;
            }

            let (pkt, freed) = codel::dequeue(
                now,
                self.flows.get_mut(slot as usize),
                &self.config,
                &mut self.stats,
            );
            all_freed.extend(freed);

            match pkt {
                Some(pkt) => {
                    let len = pkt.length();
                    self.flows.get_mut(slot as usize).deficit -= len as i64;
                    self.stats.maxpacket = self.stats.maxpacket.max(len);

                    // The flow stays at the head of its list even if it just
                    // drained to empty; the next call discovers that in the
                    // `None` arm below and retires it then (spec.md §4.6).
                    return DequeueResult {
                        packet: Some(pkt),
                        freed: all_freed,
                    };
                }
                None => {
                    if from_new {
                        self.new_flows.pop_front();
                        if !self.old_flows.is_empty() {
                            // give it one pass through old_flows before retiring
                            self.flows.get_mut(slot as usize).membership = Membership::Old;
                            self.old_flows.push_back(slot);
                        } else {
                            self.deactivate_flow(slot as usize);
                        }
                    } else {
                        self.old_flows.pop_front();
                        self.deactivate_flow(slot as usize);
                    }
                    continue;
                }
            }
        }
    }

    /// Slot just drained to empty: mark it free in C1 and scrub its
    /// hashtable entries in C2 (spec.md §4.6, step 3 / §3 lifecycle).
    fn deactivate_flow(&mut self, slot: usize) {
        self.bitmask.mark_empty(slot);
        self.cuckoo.clear_slot(slot, &mut self.flows);
        self.flows.get_mut(slot).membership = Membership::None;
    }

    /// C7: purge every queue, reset CoDel vars, rehash seeds, and reopen
    /// every slot. Returns whatever packets were still queued, as the
    /// explicit to-free list (spec.md §5).
    pub fn reset(&mut self) -> Vec<P> {
        let freed = self.flows.drain_all(Instant::now());
        self.bitmask.reset();
        self.cuckoo.reset(&mut self.rng);
        self.new_flows.clear();
        self.old_flows.clear();
        self.stats = GlobalStatsInner::default();
        self.flows_locked = false;
        tracing::debug!(freed = freed.len(), "reset");
        freed
    }

    /// Consumes the scheduler, releasing all state after a final reset.
    pub fn destroy(mut self) -> Vec<P> {
        self.reset()
    }

    pub fn qlen(&self) -> usize {
        self.stats.qlen
    }

    pub fn backlog(&self) -> u32 {
        self.stats.backlog
    }

    pub fn stats(&self) -> GlobalStats {
        self.stats.snapshot(self.new_flows.len(), self.old_flows.len())
    }

    pub fn flow_stats(&self, slot: usize) -> Option<FlowStats> {
        if slot >= self.flows.len() {
            return None;
        }
        let flow = self.flows.get(slot);
        let drop_next_us = if flow.cvars.dropping {
            let now = Instant::now();
            if flow.cvars.drop_next >= now {
                flow.cvars.drop_next.duration_since(now).as_micros() as i64
            } else {
                -(now.duration_since(flow.cvars.drop_next).as_micros() as i64)
            }
        } else {
            0
        };
        Some(FlowStats {
            deficit: flow.deficit,
            ldelay_us: flow.cvars.ldelay.as_micros() as u64,
            count: flow.cvars.count,
            lastcount: flow.cvars.lastcount,
            dropping: flow.cvars.dropping,
            drop_next_us,
            dropped: flow.dropped,
            qlen: flow.queue.len(),
            backlog: flow.backlog,
        })
    }
}
