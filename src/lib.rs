//! A fair-queueing packet scheduler core: per-flow CoDel active queue
//! management interleaved by deficit round robin across a cuckoo-hashed,
//! bitmask-indexed flow table.
//!
//! The crate has no I/O, no async runtime, and no internal locking (spec.md
//! §5) — it is a single `FqCodel<P>` value that a caller drives from its own
//! egress loop, serialized by whatever lock the caller already holds around
//! that loop. See `demos/drive.rs` for a worked example (a synthetic load
//! generator wrapping the core in `parking_lot::Mutex`).

pub mod classifier;
pub mod config;
mod core;
pub mod error;
pub mod packet;
pub mod stats;

pub use classifier::{ClassifyVerdict, ExternalClassifier};
pub use config::{Config, ConfigUpdate};
pub use core::{DequeueResult, DropReason, EnqueueOutcome, EnqueueResult, FqCodel};
pub use error::CoreError;
pub use packet::Packet;
pub use stats::{FlowStats, GlobalStats};

pub mod prelude {
    pub use crate::{
        ClassifyVerdict, Config, ConfigUpdate, CoreError, DequeueResult, DropReason,
        EnqueueOutcome, EnqueueResult, ExternalClassifier, FlowStats, FqCodel, GlobalStats, Packet,
    };
}
