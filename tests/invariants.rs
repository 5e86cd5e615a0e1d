//! Property and scenario tests against spec.md §8's testable properties,
//! driven entirely through the public `fq_codel_core` API (the way an
//! embedder would exercise it, never reaching into `core::` internals).

use std::time::Instant;

use fq_codel_core::{Config, EnqueueOutcome, FqCodel, Packet};
use proptest::prelude::*;

#[derive(Clone, Debug)]
struct TestPacket {
    flow: u32,
    len: u32,
}

impl Packet for TestPacket {
    fn flow_hash(&self) -> u32 {
        self.flow.wrapping_mul(2654435761)
    }

    fn flow_hash_perturb(&self, seed: u32) -> u32 {
        self.flow_hash() ^ seed.wrapping_mul(0x9E3779B9)
    }

    fn length(&self) -> u32 {
        self.len
    }

    fn memory_footprint(&self) -> u32 {
        self.len + 64
    }

    fn mark_ce(&mut self) {}
}

/// Scenario 1 (spec.md §8): single-flow FIFO.
#[test]
fn single_flow_fifo_order() {
    let config = Config::default().with_flows(4).with_quantum(1500).with_limit(100);
    let mut core = FqCodel::<TestPacket>::new(config).unwrap();
    let now = Instant::now();

    for _ in 0..10 {
        let result = core.enqueue(now, TestPacket { flow: 42, len: 100 });
        assert_eq!(result.outcome, EnqueueOutcome::Accepted);
    }
    assert_eq!(core.qlen(), 10);

    for _ in 0..10 {
        let result = core.dequeue(now);
        assert!(result.packet.is_some());
    }
    assert_eq!(core.qlen(), 0);
    assert_eq!(core.backlog(), 0);
    assert!(core.dequeue(now).packet.is_none());
}

/// Scenario 2 (spec.md §8): two continuously-backlogged flows split bytes
/// within `quantum + maxpacket` of each other.
#[test]
fn two_flow_fairness() {
    let config = Config::default().with_flows(4).with_quantum(1000);
    let mut core = FqCodel::<TestPacket>::new(config).unwrap();
    let now = Instant::now();

    for _ in 0..20 {
        core.enqueue(now, TestPacket { flow: 1, len: 500 });
        core.enqueue(now, TestPacket { flow: 2, len: 500 });
    }

    let mut bytes_a = 0u32;
    let mut bytes_b = 0u32;
    for _ in 0..40 {
        let result = core.dequeue(now);
        let pkt = result.packet.expect("both flows still backlogged");
        if pkt.flow == 1 {
            bytes_a += pkt.len;
        } else {
            bytes_b += pkt.len;
        }
    }

    assert!((9500..=10500).contains(&bytes_a), "bytes_a={bytes_a}");
    assert!((9500..=10500).contains(&bytes_b), "bytes_b={bytes_b}");
}

/// Scenario 3 (spec.md §8): a flow that has exhausted its deficit (and so is
/// due to graduate to `old_flows`) yields to a freshly-enqueued flow before
/// it gets another turn.
#[test]
fn new_flow_priority_over_old_flow() {
    let config = Config::default().with_flows(4).with_quantum(600);
    let mut core = FqCodel::<TestPacket>::new(config).unwrap();
    let now = Instant::now();

    for _ in 0..3 {
        core.enqueue(now, TestPacket { flow: 1, len: 500 });
    }

    // deficit: 600 -> 100 (pkt1) -> -400 (pkt2). Flow 1 now owes a turn.
    assert_eq!(core.dequeue(now).packet.unwrap().flow, 1);
    assert_eq!(core.dequeue(now).packet.unwrap().flow, 1);

    core.enqueue(now, TestPacket { flow: 2, len: 200 });

    let next = core.dequeue(now).packet.expect("flow 2 should be ready");
    assert_eq!(next.flow, 2, "new flow must be served before old flow's next turn");
}

/// Scenario 4 (spec.md §8): over-limit enqueue drops a batch from the
/// largest-backlog flow, capped at `drop_batch_size`.
#[test]
fn fat_flow_drop_trims_largest_backlog() {
    let config = Config::default().with_flows(8).with_limit(10).with_drop_batch_size(4);
    let mut core = FqCodel::<TestPacket>::new(config).unwrap();
    let now = Instant::now();

    for _ in 0..9 {
        core.enqueue(now, TestPacket { flow: 100, len: 500 });
    }
    core.enqueue(now, TestPacket { flow: 200, len: 500 }); // 10th enqueue: qlen == limit, no drop yet

    // 11th enqueue: qlen would exceed limit(10), triggering fat-flow drop.
    let result = core.enqueue(now, TestPacket { flow: 200, len: 500 });

    assert_eq!(result.freed.len(), 4, "capped at drop_batch_size");
    for pkt in &result.freed {
        assert_eq!(pkt.flow, 100, "fat-flow drop targets the largest backlog");
    }
}

/// Scenario 5 (spec.md §8): forcing collisions in a 2-slot table never
/// panics and leaves every active slot reachable.
#[test]
fn cuckoo_displacement_under_forced_collisions() {
    let config = Config::default().with_flows(2);
    let mut core = FqCodel::<TestPacket>::new(config).unwrap();
    let now = Instant::now();

    for flow in [1u32, 2, 3] {
        let result = core.enqueue(now, TestPacket { flow, len: 500 });
        assert_eq!(result.outcome, EnqueueOutcome::Accepted);
    }
    assert!(core.qlen() <= 3);
}

/// Scenario 6 (spec.md §8): a drained slot is free for a different flow to
/// claim, and `reset` is idempotent.
#[test]
fn drained_slot_can_be_reused_and_reset_is_idempotent() {
    let config = Config::default().with_flows(4);
    let mut core = FqCodel::<TestPacket>::new(config).unwrap();
    let now = Instant::now();

    core.enqueue(now, TestPacket { flow: 1, len: 500 });
    assert!(core.dequeue(now).packet.is_some());
    assert_eq!(core.qlen(), 0);

    core.enqueue(now, TestPacket { flow: 2, len: 400 });
    assert_eq!(core.qlen(), 1);

    let freed1 = core.reset();
    assert_eq!(freed1.len(), 1);
    assert_eq!(core.qlen(), 0);

    let freed2 = core.reset();
    assert!(freed2.is_empty());
    assert_eq!(core.qlen(), 0);
}

/// spec.md §8 invariant 1: `qlen` always matches what an external observer
/// can derive from enqueue/dequeue outcomes alone.
proptest! {
    #[test]
    fn qlen_matches_external_accounting(
        ops in prop::collection::vec((0u32..6, 50u32..1500, any::<bool>()), 1..300)
    ) {
        let config = Config::default().with_flows(8).with_limit(64).with_quantum(1500);
        let mut core = FqCodel::<TestPacket>::new(config).unwrap();
        let now = Instant::now();
        let mut expected_qlen: i64 = 0;

        for (flow, len, do_dequeue) in ops {
            if do_dequeue {
                let result = core.dequeue(now);
                if result.packet.is_some() {
                    expected_qlen -= 1;
                }
                expected_qlen -= result.freed.len() as i64;
            } else {
                let result = core.enqueue(now, TestPacket { flow, len });
                expected_qlen += 1;
                expected_qlen -= result.freed.len() as i64;
            }
            prop_assert!(expected_qlen >= 0);
            prop_assert_eq!(core.qlen() as i64, expected_qlen);
        }
    }
}
