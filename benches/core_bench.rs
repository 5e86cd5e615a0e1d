//! Hot-path benchmarks for the enqueue/dequeue path (which, per spec.md
//! §4.2, dominates with the cuckoo classifier's `classify` call). Only the
//! public API is reachable from a bench binary, so `classify` is exercised
//! indirectly through `enqueue` rather than benchmarked in isolation.
use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fq_codel_core::{Config, FqCodel, Packet};

#[derive(Clone)]
struct BenchPacket {
    flow: u32,
    len: u32,
}

impl Packet for BenchPacket {
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

/// Classify + append cost under constant churn across the full 1024-flow
/// table (worst case for the cuckoo table: every slot eventually occupied).
fn bench_enqueue_distinct_flows(c: &mut Criterion) {
    let config = Config::default().with_flows(1024).with_limit(usize::MAX / 2);
    let mut core = FqCodel::<BenchPacket>::new(config).unwrap();
    let now = Instant::now();
    let mut flow = 0u32;

    c.bench_function("enqueue_distinct_flows", |b| {
        b.iter(|| {
            flow = flow.wrapping_add(1);
            black_box(core.enqueue(
                now,
                BenchPacket {
                    flow: flow % 1024,
                    len: 512,
                },
            ));
        })
    });
}

/// Steady-state round trip: one flow, already warm, enqueue immediately
/// followed by dequeue — the common case on a lightly-loaded link.
fn bench_enqueue_dequeue_roundtrip(c: &mut Criterion) {
    let config = Config::default().with_flows(256).with_limit(100_000);
    let mut core = FqCodel::<BenchPacket>::new(config).unwrap();
    let now = Instant::now();
    for flow in 0..256u32 {
        core.enqueue(now, BenchPacket { flow, len: 512 });
    }

    c.bench_function("enqueue_then_dequeue_roundtrip", |b| {
        b.iter(|| {
            core.enqueue(now, black_box(BenchPacket { flow: 7, len: 512 }));
            black_box(core.dequeue(now));
        })
    });
}

/// Dequeue throughput when many flows are backlogged and DRR must cycle
/// through `new_flows`/`old_flows` continuously.
fn bench_dequeue_many_backlogged_flows(c: &mut Criterion) {
    let config = Config::default().with_flows(512).with_limit(1_000_000).with_quantum(1500);
    let mut core = FqCodel::<BenchPacket>::new(config).unwrap();
    let now = Instant::now();
    for flow in 0..512u32 {
        for _ in 0..64 {
            core.enqueue(now, BenchPacket { flow, len: 512 });
        }
    }

    c.bench_function("dequeue_many_backlogged_flows", |b| {
        b.iter(|| {
            let result = black_box(core.dequeue(now));
            if result.packet.is_none() {
                for flow in 0..512u32 {
                    core.enqueue(now, BenchPacket { flow, len: 512 });
                }
            }
        })
    });
}

criterion_group!(
    benches,
    bench_enqueue_distinct_flows,
    bench_enqueue_dequeue_roundtrip,
    bench_dequeue_many_backlogged_flows
);
criterion_main!(benches);
