use crate::packet::Packet;

/// Result of consulting an installed [`ExternalClassifier`], modeled on the
/// `TC_ACT_*` outcomes the original's `fq_codel_classify` forwards from
/// `tcf_classify` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyVerdict {
    /// No verdict reached; treat as a bypass (drop without penalizing a flow).
    Bypass,
    /// The classifier consumed the packet itself (e.g. redirected elsewhere).
    Stolen,
    /// The classifier instructs the packet be dropped outright.
    Shot,
    /// Route the packet to this 1-based flow class.
    Class(u16),
}

/// Optional external classifier hook. When installed, it replaces the cuckoo
/// classifier (C2) for every packet; §6: "When installed, cuckoo
/// classification is not used for that packet."
pub trait ExternalClassifier<P: Packet> {
    fn classify(&self, packet: &P) -> ClassifyVerdict;
}
