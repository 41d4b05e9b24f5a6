use std::fmt;

/// Aggregated counters for one pipeline run, logged per seed and summarized
/// at completion.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    /// Seeds fully processed (including ones with no listed items).
    pub seeds_processed: u64,
    /// Seeds with no listing at all.
    pub seeds_empty: u64,
    /// Seeds skipped because the checkpoint already covers them.
    pub seeds_skipped: u64,
    /// Seeds that exhausted their retries.
    pub seeds_failed: u64,
    /// Records staged for ingest.
    pub items_staged: u64,
    /// Records dropped as already present (composite-key dedup).
    pub items_duplicate: u64,
    /// Records committed to the store.
    pub items_committed: u64,
    /// Records dropped with a failed batch (dead-lettered).
    pub items_dead_lettered: u64,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seeds: {} processed ({} empty, {} skipped, {} failed); \
             items: {} staged, {} duplicate, {} committed, {} dead-lettered",
            self.seeds_processed,
            self.seeds_empty,
            self.seeds_skipped,
            self.seeds_failed,
            self.items_staged,
            self.items_duplicate,
            self.items_committed,
            self.items_dead_lettered,
        )
    }
}
