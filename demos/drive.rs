//! Synthetic load generator driving `fq_codel_core::FqCodel` end to end.
//!
//! Not part of the core's contract (SPEC_FULL.md §A) — it exists to prove
//! the library out under load, the way `Servus-Altissimi-FlockNet`'s
//! `Simulation` drove its `Strategy` trait: a `Run`/`Compare`/`List` CLI
//! (`clap`), a tokio tick loop with an `indicatif` progress bar, and
//! CSV/JSON exports of the run (`csv`, `serde_json`). The core itself stays
//! synchronous and lock-free; this binary is the only place `tokio` and
//! `parking_lot` appear, wrapping one `FqCodel` behind a single external
//! mutex exactly as spec.md §5 requires of any embedder.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use tracing::{debug, info, Level};

use fq_codel_core::{Config, EnqueueOutcome, FqCodel, GlobalStats, Packet};

#[derive(Parser)]
#[command(author, version, about = "Drives fq_codel_core with synthetic flows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit debug-level traces from the core (enqueue/dequeue/fat-flow-drop/reset spans).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one load profile against the scheduler and export a CSV/JSON trace.
    Run {
        /// Number of distinct synthetic flows generating traffic.
        #[arg(short = 'n', long, default_value_t = 32)]
        flows: u32,
        /// Simulated seconds to run.
        #[arg(short, long, default_value_t = 20)]
        duration: u64,
        /// DRR quantum, bytes.
        #[arg(long, default_value_t = 1500)]
        quantum: u32,
        /// Flow table size (N in spec.md §3).
        #[arg(long, default_value_t = 1024)]
        table_flows: u32,
        /// Aggregate offered load, packets/sec across all flows.
        #[arg(long, default_value_t = 4000)]
        rate_pps: u64,
        #[arg(short, long, default_value = "results")]
        out_dir: PathBuf,
    },
    /// Run the same load profile across a handful of quanta and compare.
    Compare {
        #[arg(short = 'n', long, default_value_t = 32)]
        flows: u32,
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
        #[arg(long, value_delimiter = ',', default_value = "256,1500,4096")]
        quanta: Vec<u32>,
        #[arg(long, default_value_t = 4000)]
        rate_pps: u64,
        #[arg(short, long, default_value = "results")]
        out_dir: PathBuf,
    },
    /// Print the default configuration surface (spec.md §6).
    List,
}

/// The opaque packet the demo feeds the core. Only `flow_id` matters to the
/// classifier; it is hashed rather than used directly so the cuckoo table
/// sees realistic 32-bit fingerprints instead of small dense integers.
#[derive(Clone)]
struct DemoPacket {
    flow_id: u32,
    len: u32,
    ce_marked: bool,
}

impl DemoPacket {
    fn new(flow_id: u32, len: u32) -> Self {
        Self {
            flow_id,
            len,
            ce_marked: false,
        }
    }
}

impl Packet for DemoPacket {
    fn flow_hash(&self) -> u32 {
        self.flow_id.wrapping_mul(2654435761)
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

    fn mark_ce(&mut self) {
        self.ce_marked = true;
    }
}

/// One second's worth of global stats, exported to CSV/JSON.
#[derive(Debug, Clone, Serialize)]
struct TickSnapshot {
    second: u64,
    qlen: usize,
    backlog: u32,
    memory_usage: u32,
    drop_overlimit: u32,
    drop_overmemory: u32,
    new_flow_count: u32,
    ecn_mark: u32,
    ce_mark: u32,
    drop_count: u32,
    drop_len: u32,
    new_flows_len: usize,
    old_flows_len: usize,
}

impl TickSnapshot {
    fn from_stats(second: u64, s: &GlobalStats) -> Self {
        Self {
            second,
            qlen: s.qlen,
            backlog: s.backlog,
            memory_usage: s.memory_usage,
            drop_overlimit: s.drop_overlimit,
            drop_overmemory: s.drop_overmemory,
            new_flow_count: s.new_flow_count,
            ecn_mark: s.ecn_mark,
            ce_mark: s.ce_mark,
            drop_count: s.drop_count,
            drop_len: s.drop_len,
            new_flows_len: s.new_flows_len,
            old_flows_len: s.old_flows_len,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct RunSummary {
    quantum: u32,
    table_flows: u32,
    duration_s: u64,
    avg_qlen: f64,
    avg_backlog: f64,
    total_drop_overlimit: u32,
    total_drop_overmemory: u32,
    total_ecn_mark: u32,
    total_ce_mark: u32,
    total_drop_count: u32,
}

impl RunSummary {
    fn from_snapshots(quantum: u32, table_flows: u32, snapshots: &[TickSnapshot]) -> Self {
        let n = snapshots.len().max(1) as f64;
        let sum_qlen: usize = snapshots.iter().map(|s| s.qlen).sum();
        let sum_backlog: u64 = snapshots.iter().map(|s| s.backlog as u64).sum();
        Self {
            quantum,
            table_flows,
            duration_s: snapshots.len() as u64,
            avg_qlen: sum_qlen as f64 / n,
            avg_backlog: sum_backlog as f64 / n,
            total_drop_overlimit: snapshots.last().map(|s| s.drop_overlimit).unwrap_or(0),
            total_drop_overmemory: snapshots.last().map(|s| s.drop_overmemory).unwrap_or(0),
            total_ecn_mark: snapshots.last().map(|s| s.ecn_mark).unwrap_or(0),
            total_ce_mark: snapshots.last().map(|s| s.ce_mark).unwrap_or(0),
            total_drop_count: snapshots.last().map(|s| s.drop_count).unwrap_or(0),
        }
    }
}

struct RunProfile {
    flows: u32,
    duration: u64,
    quantum: u32,
    table_flows: u32,
    rate_pps: u64,
}

/// Drives one load profile for `profile.duration` simulated seconds, ticking
/// once a second: each tick enqueues that second's offered load (skewed so
/// flow 0 is a persistent fat flow, exercising §4.5's fat-flow drop), then
/// drains the link's worth of packets through `dequeue` (C6 + C4).
async fn run_profile(profile: &RunProfile) -> Result<Vec<TickSnapshot>> {
    let config = Config::default()
        .with_flows(profile.table_flows)
        .with_quantum(profile.quantum);
    let core = Arc::new(Mutex::new(FqCodel::<DemoPacket>::new(config)?));

    let flow_weights: Vec<f64> = (0..profile.flows.max(1))
        .map(|i| if i == 0 { 8.0 } else { 1.0 })
        .collect();
    let weight_sum: f64 = flow_weights.iter().sum();

    let mtu = 1500u32;
    let link_bps = 100_000_000u64; // 100 Mbps simulated egress link
    let link_pps = (link_bps / 8 / mtu as u64).max(1);
    let size_dist = Normal::new(500.0, 200.0).expect("fixed, valid normal params");

    let pb = ProgressBar::new(profile.duration);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")?
            .progress_chars("#>-"),
    );

    let mut snapshots = Vec::with_capacity(profile.duration as usize);
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut rng = rand::thread_rng();

    for second in 0..profile.duration {
        tick.tick().await;
        let now = Instant::now();

        {
            let mut core = core.lock();
            for _ in 0..profile.rate_pps {
                let flow_id = pick_weighted(&mut rng, &flow_weights, weight_sum);
                let len = size_dist.sample(&mut rng).clamp(64.0, mtu as f64) as u32;
                let packet = DemoPacket::new(flow_id, len);
                let result = core.enqueue(now, packet);
                if let EnqueueOutcome::Congestion = result.outcome {
                    debug!(flow_id, "enqueue signalled congestion");
                }
            }
        }

        {
            let mut core = core.lock();
            for _ in 0..link_pps {
                if core.dequeue(now).packet.is_none() {
                    break;
                }
            }
        }

        let stats = core.lock().stats();
        pb.inc(1);
        pb.set_message(format!(
            "qlen={} backlog={}B ecn={} drops={}",
            stats.qlen, stats.backlog, stats.ecn_mark, stats.drop_count
        ));
        snapshots.push(TickSnapshot::from_stats(second, &stats));
    }

    pb.finish_with_message("done");
    Ok(snapshots)
}

fn pick_weighted(rng: &mut impl Rng, weights: &[f64], total: f64) -> u32 {
    let mut r = rng.gen_range(0.0..total);
    for (i, w) in weights.iter().enumerate() {
        if r < *w {
            return i as u32;
        }
        r -= w;
    }
    (weights.len() - 1) as u32
}

fn export(out_dir: &Path, stem: &str, snapshots: &[TickSnapshot], summary: &RunSummary) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let csv_path = out_dir.join(format!("{stem}.csv"));
    let mut writer = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("opening {}", csv_path.display()))?;
    for snapshot in snapshots {
        writer.serialize(snapshot)?;
    }
    writer.flush()?;
    info!(path = %csv_path.display(), "wrote tick trace");

    let json_path = out_dir.join(format!("{stem}_summary.json"));
    std::fs::write(&json_path, serde_json::to_string_pretty(summary)?)
        .with_context(|| format!("writing {}", json_path.display()))?;
    info!(path = %json_path.display(), "wrote run summary");

    Ok(())
}

async fn run_command(
    flows: u32,
    duration: u64,
    quantum: u32,
    table_flows: u32,
    rate_pps: u64,
    out_dir: PathBuf,
) -> Result<()> {
    let profile = RunProfile {
        flows,
        duration,
        quantum,
        table_flows,
        rate_pps,
    };
    let snapshots = run_profile(&profile).await?;
    let summary = RunSummary::from_snapshots(quantum, table_flows, &snapshots);
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    export(&out_dir, &format!("run_{stamp}"), &snapshots, &summary)?;

    info!(
        avg_qlen = summary.avg_qlen,
        avg_backlog = summary.avg_backlog,
        drops = summary.total_drop_count,
        "run complete"
    );
    Ok(())
}

async fn compare_command(
    flows: u32,
    duration: u64,
    quanta: Vec<u32>,
    rate_pps: u64,
    out_dir: PathBuf,
) -> Result<()> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut summaries = Vec::with_capacity(quanta.len());

    for quantum in quanta {
        info!(quantum, "running comparison profile");
        let profile = RunProfile {
            flows,
            duration,
            quantum,
            table_flows: 1024,
            rate_pps,
        };
        let snapshots = run_profile(&profile).await?;
        let summary = RunSummary::from_snapshots(quantum, profile.table_flows, &snapshots);
        export(&out_dir, &format!("compare_{stamp}_q{quantum}"), &snapshots, &summary)?;
        summaries.push(summary);
    }

    let compare_path = out_dir.join(format!("compare_{stamp}.json"));
    std::fs::write(&compare_path, serde_json::to_string_pretty(&summaries)?)?;
    info!(path = %compare_path.display(), "wrote comparison summary");

    for s in &summaries {
        info!(
            quantum = s.quantum,
            avg_qlen = s.avg_qlen,
            avg_backlog = s.avg_backlog,
            drops = s.total_drop_count,
            "quantum result"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match cli.command {
        Commands::Run {
            flows,
            duration,
            quantum,
            table_flows,
            rate_pps,
            out_dir,
        } => run_command(flows, duration, quantum, table_flows, rate_pps, out_dir).await?,
        Commands::Compare {
            flows,
            duration,
            quanta,
            rate_pps,
            out_dir,
        } => compare_command(flows, duration, quanta, rate_pps, out_dir).await?,
        Commands::List => {
            println!("{}", serde_json::to_string_pretty(&Config::default())?);
        }
    }

    Ok(())
}
