use serde::{Deserialize, Serialize};

/// Global counters export, mirroring `fq_codel_dump_stats`'s `tc_fq_codel_xstats`
/// (spec.md §6, "Statistics export").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalStats {
    pub qlen: usize,
    pub backlog: u32,
    pub memory_usage: u32,
    pub maxpacket: u32,
    pub drop_overlimit: u32,
    pub drop_overmemory: u32,
    pub new_flow_count: u32,
    pub ecn_mark: u32,
    pub ce_mark: u32,
    pub drop_count: u32,
    pub drop_len: u32,
    pub new_flows_len: usize,
    pub old_flows_len: usize,
}

/// Per-flow (per-class) stats dump, mirroring `fq_codel_dump_class_stats`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowStats {
    pub deficit: i64,
    pub ldelay_us: u64,
    pub count: u32,
    pub lastcount: u32,
    pub dropping: bool,
    /// Signed microseconds until the next scheduled drop; meaningless
    /// (always 0) when `dropping` is false.
    pub drop_next_us: i64,
    pub dropped: u32,
    pub qlen: usize,
    pub backlog: u32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GlobalStatsInner {
    pub qlen: usize,
    pub backlog: u32,
    pub memory_usage: u32,
    pub maxpacket: u32,
    pub drop_overlimit: u32,
    pub drop_overmemory: u32,
    pub new_flow_count: u32,
    pub ecn_mark: u32,
    pub ce_mark: u32,
    pub drop_count: u32,
    pub drop_len: u32,
}

impl GlobalStatsInner {
    pub(crate) fn snapshot(&self, new_flows_len: usize, old_flows_len: usize) -> GlobalStats {
        GlobalStats {
            qlen: self.qlen,
            backlog: self.backlog,
            memory_usage: self.memory_usage,
            maxpacket: self.maxpacket,
            drop_overlimit: self.drop_overlimit,
            drop_overmemory: self.drop_overmemory,
            new_flow_count: self.new_flow_count,
            ecn_mark: self.ecn_mark,
            ce_mark: self.ce_mark,
            drop_count: self.drop_count,
            drop_len: self.drop_len,
            new_flows_len,
            old_flows_len,
        }
    }
}
