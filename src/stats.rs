/// Alignment statistics and search-effort metrics
use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

/// Per-worker search-effort counters.
///
/// Workers accumulate into a plain struct on the hot path and merge into the
/// shared [`Metrics`] once per read batch.
#[derive(Debug, Default, Clone)]
pub struct SearchMetrics {
    /// Attempts of local (per-anchor) search
    pub localatts: u64,
    /// Attempts of anchor search
    pub anchoratts: u64,
    /// Attempts of local FM-index search
    pub localindexatts: u64,
    /// Attempts of direct extension search
    pub localextatts: u64,
    /// Recursive hybrid-search invocations
    pub localsearchrecur: u64,
    /// SA elements resolved through the global index
    pub globalgenomecoords: u64,
    /// SA elements resolved through local indexes
    pub localgenomecoords: u64,
}

impl SearchMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Shared, thread-safe aggregate of [`SearchMetrics`] plus read tallies.
#[derive(Debug, Default)]
pub struct Metrics {
    pub localatts: AtomicU64,
    pub anchoratts: AtomicU64,
    pub localindexatts: AtomicU64,
    pub localextatts: AtomicU64,
    pub localsearchrecur: AtomicU64,
    pub globalgenomecoords: AtomicU64,
    pub localgenomecoords: AtomicU64,

    /// Total number of reads processed
    pub total_reads: AtomicU64,
    /// Reads with exactly one reported alignment
    pub uniquely_mapped: AtomicU64,
    /// Reads with more than one reported alignment
    pub multi_mapped: AtomicU64,
    /// Reads with no reported alignment
    pub unmapped: AtomicU64,
    /// Concordant pairs reported
    pub concordant_pairs: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a worker's counters (thread-safe).
    pub fn merge(&self, m: &SearchMetrics) {
        self.localatts.fetch_add(m.localatts, Ordering::Relaxed);
        self.anchoratts.fetch_add(m.anchoratts, Ordering::Relaxed);
        self.localindexatts
            .fetch_add(m.localindexatts, Ordering::Relaxed);
        self.localextatts
            .fetch_add(m.localextatts, Ordering::Relaxed);
        self.localsearchrecur
            .fetch_add(m.localsearchrecur, Ordering::Relaxed);
        self.globalgenomecoords
            .fetch_add(m.globalgenomecoords, Ordering::Relaxed);
        self.localgenomecoords
            .fetch_add(m.localgenomecoords, Ordering::Relaxed);
    }

    /// Record one read's outcome (thread-safe).
    pub fn record_read(&self, n_alignments: usize) {
        self.total_reads.fetch_add(1, Ordering::Relaxed);
        match n_alignments {
            0 => {
                self.unmapped.fetch_add(1, Ordering::Relaxed);
            }
            1 => {
                self.uniquely_mapped.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.multi_mapped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_concordant_pairs(&self, n: usize) {
        self.concordant_pairs.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Print a run summary to the log.
    pub fn print_summary(&self) {
        let total = self.total_reads.load(Ordering::Relaxed);
        if total == 0 {
            info!("No reads processed");
            return;
        }
        let unique = self.uniquely_mapped.load(Ordering::Relaxed);
        let multi = self.multi_mapped.load(Ordering::Relaxed);
        let unmapped = self.unmapped.load(Ordering::Relaxed);

        info!("=== Alignment summary ===");
        info!("Number of input reads: {}", total);
        info!(
            "Uniquely mapped reads: {} ({:.2}%)",
            unique,
            100.0 * unique as f64 / total as f64
        );
        info!(
            "Multi-mapped reads: {} ({:.2}%)",
            multi,
            100.0 * multi as f64 / total as f64
        );
        info!(
            "Unmapped reads: {} ({:.2}%)",
            unmapped,
            100.0 * unmapped as f64 / total as f64
        );
        info!(
            "Concordant pairs: {}",
            self.concordant_pairs.load(Ordering::Relaxed)
        );
        info!(
            "Search effort: anchor {} / local-index {} / extension {} / recursion {}",
            self.anchoratts.load(Ordering::Relaxed),
            self.localindexatts.load(Ordering::Relaxed),
            self.localextatts.load(Ordering::Relaxed),
            self.localsearchrecur.load(Ordering::Relaxed)
        );
    }
}
