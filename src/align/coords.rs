/// SA-interval to genomic-coordinate resolution
use crate::index::fm::FmIndex;
use crate::index::local::LocalFmIndex;
use crate::stats::SearchMetrics;

/// A genomic placement: reference id, leftmost offset, strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Coord {
    pub tidx: usize,
    pub toff: u64,
    pub fw: bool,
}

/// Resolve up to `maxelt` elements of a global SA interval into coordinates.
///
/// `rdoff` is the read offset of the seed's first base; placements whose
/// reference offset is smaller would hang off the reference start and are
/// skipped. Returns false when a straddling hit was rejected.
#[allow(clippy::too_many_arguments)]
pub fn resolve_global(
    fm: &FmIndex,
    top: u64,
    bot: u64,
    fw: bool,
    maxelt: u64,
    rdoff: usize,
    rdlen: usize,
    coords: &mut Vec<Coord>,
    metrics: &mut SearchMetrics,
    reject_straddle: bool,
    straddled: &mut bool,
) -> bool {
    debug_assert!(bot > top);
    *straddled = false;
    coords.clear();
    metrics.globalgenomecoords += bot - top;
    let nelt = (bot - top).min(maxelt);
    for row in top..top + nelt {
        let joined = fm.walk_row(row);
        let mut straddled2 = false;
        let resolved = fm.joined_to_text_off(rdlen as u64, joined, reject_straddle, &mut straddled2);
        *straddled |= straddled2;
        let (tidx, toff, _tlen) = match resolved {
            Some(r) => r,
            // The hit straddles a reference boundary; the interval is
            // unusable.
            None => return false,
        };
        if toff < rdoff as u64 {
            continue;
        }
        coords.push(Coord { tidx, toff, fw });
    }
    true
}

/// Resolve a local-tile SA interval; tile offsets map to reference offsets
/// through the tile's placement.
#[allow(clippy::too_many_arguments)]
pub fn resolve_local(
    tile: &LocalFmIndex,
    top: u64,
    bot: u64,
    fw: bool,
    rdoff: usize,
    rdlen: usize,
    coords: &mut Vec<Coord>,
    metrics: &mut SearchMetrics,
) -> bool {
    debug_assert!(bot > top);
    coords.clear();
    metrics.localgenomecoords += bot - top;
    for row in top..bot {
        let local_off = tile.fm.walk_row(row);
        if local_off + rdlen as u64 > tile.len {
            // Runs past the tile's slice of the reference.
            continue;
        }
        let toff = tile.to_global(local_off);
        if toff < rdoff as u64 {
            continue;
        }
        coords.push(Coord {
            tidx: tile.tidx,
            toff,
            fw,
        });
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{encode_base, Reference};
    use crate::index::fm::FmIndex;
    use crate::index::local::LocalFmIndex;

    fn encode(s: &str) -> Vec<u8> {
        s.bytes().map(encode_base).collect()
    }

    #[test]
    fn global_resolution_filters_preceding_offsets() {
        // "ACG" occurs at 0 and 12; a seed with rdoff 2 cannot be placed at
        // reference offset 0.
        let reference =
            Reference::from_seqs(vec![("chr1".into(), encode("ACGGTACCGTTAACGT"))]);
        let fm = FmIndex::from_reference(&reference, 2);
        let (top, bot) = fm.backward_search(&encode("ACG"));
        assert_eq!(bot - top, 2);
        let mut coords = Vec::new();
        let mut metrics = SearchMetrics::new();
        let mut straddled = false;
        assert!(resolve_global(
            &fm,
            top,
            bot,
            true,
            bot - top,
            2,
            3,
            &mut coords,
            &mut metrics,
            true,
            &mut straddled
        ));
        assert_eq!(coords.len(), 1);
        assert_eq!(coords[0].toff, 12);
        assert_eq!(metrics.globalgenomecoords, 2);
    }

    #[test]
    fn global_resolution_rejects_straddlers() {
        let reference = Reference::from_seqs(vec![
            ("chr1".into(), encode("AACCGGTT")),
            ("chr2".into(), encode("GGTTAACC")),
        ]);
        let fm = FmIndex::from_reference(&reference, 2);
        // "TTGG" exists only across the chr1/chr2 junction.
        let (top, bot) = fm.backward_search(&encode("TTGG"));
        assert_eq!(bot - top, 1);
        let mut coords = Vec::new();
        let mut metrics = SearchMetrics::new();
        let mut straddled = false;
        let ok = resolve_global(
            &fm,
            top,
            bot,
            true,
            1,
            0,
            4,
            &mut coords,
            &mut metrics,
            true,
            &mut straddled,
        );
        assert!(!ok);
        assert!(straddled);
    }

    #[test]
    fn local_resolution_maps_into_reference() {
        let seq = encode("TTGACCGTAGGCATCATAAGGCCAATCGCA");
        let tile = LocalFmIndex::new(&seq[10..30], 0, 10, 2);
        let (top, bot) = tile.fm.backward_search(&encode("AGGCC"));
        assert_eq!(bot - top, 1);
        let mut coords = Vec::new();
        let mut metrics = SearchMetrics::new();
        assert!(resolve_local(
            &tile,
            top,
            bot,
            true,
            0,
            5,
            &mut coords,
            &mut metrics
        ));
        assert_eq!(coords.len(), 1);
        // "AGGCC" sits at reference offset 18.
        assert_eq!(coords[0].toff, 18);
        assert_eq!(metrics.localgenomecoords, 1);
    }
}
