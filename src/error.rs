use thiserror::Error;

/// Fatal error kinds surfaced to callers of the control-plane (init/configure) path.
///
/// Data-path outcomes (congestion, drops) are not errors — see [`crate::EnqueueOutcome`]
/// and [`crate::DropReason`]; the core never aborts on those.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("allocation failed while sizing the flow table for {requested} flows")]
    OutOfMemory { requested: usize },
}
