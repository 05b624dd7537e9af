/// A read-only snapshot of one engine heap space.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "inspect", derive(serde::Serialize))]
pub struct SpaceStatistics {
    pub name: &'static str,
    pub size: usize,
}

/// A read-only snapshot of engine heap and registry statistics.
///
/// Sizes are approximations derived from live heap values; counts are
/// exact. Taking a snapshot never mutates engine state.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "inspect", derive(serde::Serialize))]
pub struct HeapStatistics {
    pub total_heap_size: usize,
    pub used_heap_size: usize,

    /// Live heap slots.
    pub live_values: usize,

    /// Outstanding host references.
    pub reference_count: usize,

    /// Live callback contexts.
    pub callback_count: usize,

    /// Collection passes performed so far.
    pub gc_count: u64,

    pub spaces: Vec<SpaceStatistics>,
}
