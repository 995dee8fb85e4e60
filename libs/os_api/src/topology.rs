//! Plain topology records as read from the OS, before any interpretation.

/// One logical processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawProcessor {
    /// Position in the processor mask (bit index).
    pub index: usize,
    /// Identifier the native affinity call expects for this processor.
    pub platform_id: u32,
    /// Physical core number, shared by SMT siblings.
    pub core: usize,
    /// Die / core complex number, when the platform reports one.
    pub die: Option<usize>,
    /// Higher is faster. Hybrid parts report 1 for performance cores and 0 for efficient ones.
    pub efficiency_class: u8,
}

/// One L3 cache and the processors sharing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCache {
    pub size_bytes: u64,
    pub processors: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawTopology {
    pub model: String,
    /// Number of processor groups. Anything other than 1 cannot be expressed as a single mask.
    pub processor_groups: usize,
    pub processors: Vec<RawProcessor>,
    pub l3_caches: Vec<RawCache>,
}
