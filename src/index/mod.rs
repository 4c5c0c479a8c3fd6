/// Hierarchical index: one global FM index plus an ordered run of local
/// FM-index tiles per reference
pub mod fm;
pub mod local;

use crate::error::Error;
use crate::genome::Reference;
use crate::params::Parameters;
use fm::FmIndex;
use local::LocalFmIndex;

/// Complete genome index handed to alignment workers.
pub struct GenomeIndex {
    pub reference: Reference,
    pub global: FmIndex,
    /// All tiles, grouped by reference, in reference order
    locals: Vec<LocalFmIndex>,
    /// Per-reference (first tile index, tile count)
    local_runs: Vec<(usize, usize)>,
    /// Distance between consecutive tile starts
    tile_step: u64,
    /// log4 of the joined reference length; unique-hit length floor
    pub min_k: usize,
    /// Same for local tiles (fixed)
    pub min_k_local: usize,
}

/// `⌈log₄(len)⌉` computed by the shift loop the search thresholds assume.
fn log4_ceil(mut len: u64) -> usize {
    let mut k = 0;
    while len > 0 {
        len >>= 2;
        k += 1;
    }
    k
}

impl GenomeIndex {
    /// Build the global index and the tile run from a loaded reference.
    pub fn build(reference: Reference, params: &Parameters) -> Result<Self, Error> {
        if reference.num_refs() == 0 {
            return Err(Error::Index("reference has no sequences".into()));
        }
        let total = reference.total_len();
        let min_k = log4_ceil(total);
        let min_k_local = 8;
        let ftab_chars = min_k.clamp(1, 10);

        log::info!("Building global FM index over {} bases", total);
        let global = FmIndex::from_reference(&reference, ftab_chars);

        let tile_len = params.local_index_len;
        let tile_step = tile_len - params.local_index_overlap;
        let local_ftab_chars = log4_ceil(tile_len).clamp(1, 8).min(ftab_chars);

        let mut locals = Vec::new();
        let mut local_runs = Vec::new();
        for (tidx, seq) in reference.seqs.iter().enumerate() {
            let first = locals.len();
            let mut start = 0u64;
            loop {
                let end = (start + tile_len).min(seq.len() as u64);
                locals.push(LocalFmIndex::new(
                    &seq[start as usize..end as usize],
                    tidx,
                    start,
                    local_ftab_chars,
                ));
                if end >= seq.len() as u64 {
                    break;
                }
                start += tile_step;
            }
            local_runs.push((first, locals.len() - first));
        }
        log::info!(
            "Built {} local index tiles (step {})",
            locals.len(),
            tile_step
        );

        Ok(Self {
            reference,
            global,
            locals,
            local_runs,
            tile_step,
            min_k,
            min_k_local,
        })
    }

    /// The tile containing (tidx, toff).
    pub fn get_local(&self, tidx: usize, toff: u64) -> Option<&LocalFmIndex> {
        let (first, count) = *self.local_runs.get(tidx)?;
        if count == 0 {
            return None;
        }
        let mut i = (toff / self.tile_step) as usize;
        if i >= count {
            i = count - 1;
        }
        // The overlap means the previous tile may still contain toff; prefer
        // the one whose start is at or before toff.
        while i > 0 && self.locals[first + i].local_offset > toff {
            i -= 1;
        }
        Some(&self.locals[first + i])
    }

    /// The tile immediately left of `tile` within the same reference.
    pub fn prev_local(&self, tile: &LocalFmIndex) -> Option<&LocalFmIndex> {
        let (first, _) = self.local_runs[tile.tidx];
        let i = (tile.local_offset / self.tile_step) as usize;
        if i == 0 {
            None
        } else {
            Some(&self.locals[first + i - 1])
        }
    }

    /// The tile immediately right of `tile` within the same reference.
    pub fn next_local(&self, tile: &LocalFmIndex) -> Option<&LocalFmIndex> {
        let (first, count) = self.local_runs[tile.tidx];
        let i = (tile.local_offset / self.tile_step) as usize;
        if i + 1 >= count {
            None
        } else {
            Some(&self.locals[first + i + 1])
        }
    }
}
