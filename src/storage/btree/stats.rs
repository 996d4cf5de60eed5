/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of node splits performed, root splits included
    pub splits: u64,
    /// Number of root splits, each adding one level
    pub root_splits: u64,
    /// Number of keys rotated in from a sibling
    pub borrows: u64,
    /// Number of sibling pairs merged into one node
    pub merges: u64,
    /// Number of root collapses, each removing one level
    pub root_collapses: u64,
    /// Node reads served from the cache
    pub cache_hits: u64,
    /// Node reads that went to disk
    pub cache_misses: u64,
    /// Undo records appended since open
    pub log_records: u64,
    /// Node and value slots appended at the end of a file
    pub slots_appended: u64,
    /// Node and value slots taken off a free list
    pub slots_reused: u64,
    /// Node and value slots returned to a free list
    pub slots_released: u64,
}

impl TreeStats {
    /// Fraction of node reads served from the cache, or zero before any read.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        tracing::info!(
            target: "sombra_kv::stats",
            splits = self.splits,
            root_splits = self.root_splits,
            borrows = self.borrows,
            merges = self.merges,
            root_collapses = self.root_collapses,
            cache_hits = self.cache_hits,
            cache_misses = self.cache_misses,
            log_records = self.log_records,
            slots_appended = self.slots_appended,
            slots_reused = self.slots_reused,
            slots_released = self.slots_released,
            "btree stats snapshot"
        );
    }
}
