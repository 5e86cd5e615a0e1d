use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

/// Runtime-settable parameters, per spec.md §6's configuration surface.
///
/// `Config::default()` matches `fq_codel_init`'s defaults in the original
/// source: 1024 flows, a 10240-packet limit, a 32 MiB memory budget, ECN on,
/// and the classic 5ms/100ms CoDel target/interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub target: Duration,
    pub interval: Duration,
    pub ce_threshold: Option<Duration>,
    pub ecn: bool,
    pub mtu: u32,
    pub limit: usize,
    pub memory_limit: u32,
    pub quantum: u32,
    pub drop_batch_size: u32,
    pub flows: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(5),
            interval: Duration::from_millis(100),
            ce_threshold: None,
            ecn: true,
            mtu: 1500,
            limit: 10 * 1024,
            memory_limit: 32 << 20,
            quantum: 1500,
            drop_batch_size: 64,
            flows: 1024,
        }
    }
}

impl Config {
    /// Validate and normalize a fully-specified config before it is handed to
    /// the scheduler's constructor. `flows` is only checked for range here;
    /// "fixable only before first enqueue" is enforced by the scheduler.
    pub fn validated(mut self) -> Result<Self, CoreError> {
        if self.flows == 0 || self.flows as usize > 65536 {
            return Err(CoreError::InvalidConfig(format!(
                "flows must be in 1..=65536, got {}",
                self.flows
            )));
        }
        self.quantum = self.quantum.max(256);
        self.drop_batch_size = self.drop_batch_size.max(1);
        self.memory_limit = self.memory_limit.min(1u32 << 31);
        Ok(self)
    }

    pub fn with_flows(mut self, flows: u32) -> Self {
        self.flows = flows;
        self
    }

    pub fn with_quantum(mut self, quantum: u32) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_drop_batch_size(mut self, drop_batch_size: u32) -> Self {
        self.drop_batch_size = drop_batch_size;
        self
    }

    pub fn with_ecn(mut self, ecn: bool) -> Self {
        self.ecn = ecn;
        self
    }

    pub fn with_ce_threshold(mut self, ce_threshold: Option<Duration>) -> Self {
        self.ce_threshold = ce_threshold;
        self
    }
}

/// A sparse set of config changes applied at runtime via `FqCodel::configure`.
/// Mirrors `fq_codel_change`'s "only touch the attributes that were present"
/// behavior for each `TCA_FQ_CODEL_*` netlink attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub target: Option<Duration>,
    pub interval: Option<Duration>,
    pub ce_threshold: Option<Option<Duration>>,
    pub ecn: Option<bool>,
    pub limit: Option<usize>,
    pub memory_limit: Option<u32>,
    pub quantum: Option<u32>,
    pub drop_batch_size: Option<u32>,
    /// Changing flow count is only legal before the first enqueue.
    pub flows: Option<u32>,
}
