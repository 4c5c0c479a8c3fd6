/// Seed discovery on the FM indexes
///
/// Right-to-left exact extension over the global index with pseudogene and
/// anchor stop conditions, plus the bounded global/local searches the
/// hybrid aligner issues while growing an alignment.
use crate::align::coords::Coord;
use crate::align::Read;
use crate::index::fm::FmIndex;
use crate::index::local::LocalFmIndex;

/// How a partial FM hit was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HitType {
    /// Interval collapsed or the read was exhausted
    Candidate = 1,
    /// Interval stayed small but non-unique over a long stretch
    Pseudogene = 2,
    /// Unique and long; strong anchor
    Anchor = 3,
}

/// A partial exact match represented by its SA interval. `bwoff` counts
/// from the read's 3' end in search order.
#[derive(Debug, Clone)]
pub struct PartialFmHit {
    pub top: u64,
    pub bot: u64,
    pub fw: bool,
    pub bwoff: usize,
    pub len: usize,
    pub hit_type: HitType,
    pub coords: Vec<Coord>,
    pub anchor_examined: bool,
}

impl PartialFmHit {
    fn empty_hit(fw: bool, bwoff: usize, len: usize) -> Self {
        Self {
            top: 0,
            bot: 0,
            fw,
            bwoff,
            len,
            hit_type: HitType::Candidate,
            coords: Vec::new(),
            anchor_examined: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bot <= self.top
    }

    /// Number of SA elements.
    pub fn size(&self) -> u64 {
        self.bot - self.top
    }

    pub fn has_genome_coords(&self) -> bool {
        !self.coords.is_empty()
    }

    /// Read offset (from the 5' end in search orientation) of the hit.
    pub fn rdoff(&self, read_len: usize) -> usize {
        read_len - self.bwoff - self.len
    }
}

/// Per-(read, strand) seeding state: partial hits tiling `[0, cur)` of the
/// read in search order, abutting exactly.
#[derive(Debug, Clone, Default)]
pub struct ReadBwtHits {
    pub fw: bool,
    pub len: usize,
    pub cur: usize,
    done: bool,
    pub num_partial_search: usize,
    pub num_unique_search: usize,
    pub partial_hits: Vec<PartialFmHit>,
}

impl ReadBwtHits {
    pub fn init(&mut self, fw: bool, len: usize) {
        debug_assert!(len > 0);
        self.fw = fw;
        self.len = len;
        self.cur = 0;
        self.done = false;
        self.num_partial_search = 0;
        self.num_unique_search = 0;
        self.partial_hits.clear();
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn set_done(&mut self) {
        self.done = true;
    }

    pub fn num_actual_partial_search(&self) -> usize {
        debug_assert!(self.num_unique_search <= self.num_partial_search);
        self.num_partial_search - self.num_unique_search
    }

    /// Width of the narrowest non-empty partial hit and its slot; ties
    /// prefer the longer hit.
    pub fn min_width(&self) -> (u64, usize) {
        let mut min_width = u64::MAX;
        let mut min_len = 0usize;
        let mut slot = 0usize;
        for (i, hit) in self.partial_hits.iter().enumerate() {
            if hit.is_empty() {
                continue;
            }
            if min_width > hit.size() || (min_width == hit.size() && min_len < hit.len) {
                min_width = hit.size();
                min_len = hit.len;
                slot = i;
            }
        }
        (min_width, slot)
    }

    /// Scheduler score: longer covered pieces help, extra non-unique
    /// searches cost quadratically and exponentially.
    pub fn search_score(&self, min_k: usize) -> i64 {
        let mut score = 0i64;
        for hit in &self.partial_hits {
            score += (hit.len * hit.len) as i64;
        }
        let actual = self.num_actual_partial_search();
        score -= (actual * min_k * min_k) as i64;
        score -= 1i64 << (2 * actual).min(62);
        score
    }

    /// Retract a trailing partial hit that is too short to anchor and move
    /// the cursor so the next search re-covers it from a better offset.
    pub fn adjust_offset(&mut self, min_k: usize) -> bool {
        debug_assert!(!self.partial_hits.is_empty());
        let hit_len = self.partial_hits.last().map(|h| h.len).unwrap_or(0);
        if hit_len >= min_k + 3 {
            return false;
        }
        debug_assert!(self.cur >= hit_len);
        let orig_cur = self.cur - hit_len;
        self.cur = orig_cur + hit_len.max(min_k + 1) - min_k;
        self.partial_hits.pop();
        true
    }

    pub fn has_all_genome_coords(&self) -> bool {
        if self.cur < self.len || self.partial_hits.is_empty() {
            return false;
        }
        self.partial_hits
            .iter()
            .all(|h| h.is_empty() || h.has_genome_coords())
    }

    #[cfg(debug_assertions)]
    pub fn rep_ok(&self) -> bool {
        for i in 0..self.partial_hits.len() {
            if i + 1 < self.partial_hits.len() {
                if self.partial_hits[i].bwoff + self.partial_hits[i].len
                    > self.partial_hits[i + 1].bwoff
                {
                    return false;
                }
            } else if self.partial_hits[i].bwoff + self.partial_hits[i].len != self.cur {
                return false;
            }
        }
        true
    }
}

/// Resume the right-to-left exact search at `state.cur`, appending exactly
/// one partial hit and advancing the cursor. Returns the number of SA
/// elements of the new hit.
///
/// `pseudogene_stop` / `anchor_stop` select the stop heuristics on entry
/// and report on return which one fired.
pub fn partial_search(
    fm: &FmIndex,
    read: &Read,
    fw: bool,
    min_k: usize,
    state: &mut ReadBwtHits,
    pseudogene_stop: &mut bool,
    anchor_stop: &mut bool,
) -> u64 {
    let mut want_pseudogene_stop = *pseudogene_stop;
    let mut want_anchor_stop = *anchor_stop;
    *pseudogene_stop = false;
    *anchor_stop = false;

    let ftab_chars = fm.ftab_chars();
    let len = read.len();
    let seq = read.strand_seq(fw);
    debug_assert!(state.cur < state.len);

    state.num_partial_search += 1;

    let offset = state.cur;
    let mut dep = offset;
    let left = len - dep;
    if left < ftab_chars {
        state.cur = state.len;
        state
            .partial_hits
            .push(PartialFmHit::empty_hit(fw, offset, state.cur - offset));
        state.set_done();
        return 0;
    }
    // An N inside the ftab window: skip past it with an empty hit.
    for i in 0..ftab_chars {
        if seq[len - dep - 1 - i] > 3 {
            state.cur += i + 1;
            state
                .partial_hits
                .push(PartialFmHit::empty_hit(fw, offset, state.cur - offset));
            if state.cur >= state.len {
                state.set_done();
            }
            return 0;
        }
    }

    let (mut top, mut bot) = fm.ftab_lo_hi(seq, len - dep - ftab_chars);
    dep += ftab_chars;
    if bot <= top {
        state.cur = dep;
        state
            .partial_hits
            .push(PartialFmHit::empty_hit(fw, offset, state.cur - offset));
        if state.cur >= state.len {
            state.set_done();
        }
        return 0;
    }

    let mut same_range = 0usize;
    let mut similar_range = 0usize;
    while dep < len {
        let c = seq[len - dep - 1];
        let (top_tmp, bot_tmp) = if c > 3 {
            (0, 0)
        } else if bot - top == 1 {
            match fm.map_lf1(top, c) {
                Some(t) => (t, t + 1),
                None => (0, 0),
            }
        } else {
            fm.map_range((top, bot), c)
        };
        if bot_tmp <= top_tmp {
            break;
        }

        if want_pseudogene_stop {
            if bot_tmp - top_tmp < bot - top && bot - top <= 5 {
                let min_len_for_pseudogene = min_k + 6;
                if dep - offset >= min_len_for_pseudogene && similar_range >= 5 {
                    state.num_unique_search += 1;
                    *pseudogene_stop = true;
                    break;
                }
            }
            if bot_tmp - top_tmp != 1 {
                if bot_tmp - top_tmp + 2 >= bot - top {
                    similar_range += 1;
                } else if bot_tmp - top_tmp + 4 < bot - top {
                    similar_range = 0;
                }
            } else {
                want_pseudogene_stop = false;
            }
        }

        if want_anchor_stop {
            if bot_tmp - top_tmp != 1 && bot - top == bot_tmp - top_tmp {
                same_range += 1;
                if same_range >= 5 {
                    want_anchor_stop = false;
                }
            } else {
                same_range = 0;
            }
            if dep - offset >= min_k + 8 && bot_tmp - top_tmp >= 4 {
                want_anchor_stop = false;
            }
        }

        top = top_tmp;
        bot = bot_tmp;
        dep += 1;

        if want_anchor_stop && dep - offset >= min_k + 12 && bot - top == 1 {
            state.num_unique_search += 1;
            *anchor_stop = true;
            break;
        }
    }

    let mut nelt = 0;
    if bot > top {
        debug_assert!(dep > offset);
        let hit_type = if *anchor_stop {
            HitType::Anchor
        } else if *pseudogene_stop {
            HitType::Pseudogene
        } else {
            HitType::Candidate
        };
        state.partial_hits.push(PartialFmHit {
            top,
            bot,
            fw,
            bwoff: offset,
            len: dep - offset,
            hit_type,
            coords: Vec::new(),
            anchor_examined: false,
        });
        nelt = bot - top;
        state.cur = dep;
        if state.cur >= state.len {
            if hit_type == HitType::Candidate {
                state.num_unique_search += 1;
            }
            state.set_done();
        }
    }
    nelt
}

/// Bounded right-to-left exact search on the global index, used for long
/// introns. `hitoff` is the rightmost read position (search orientation) to
/// start from. Returns (SA elements, hit length, top, bot).
pub fn global_search(
    fm: &FmIndex,
    read: &Read,
    fw: bool,
    hitoff: usize,
    min_k: usize,
    unique_stop: &mut bool,
) -> (u64, usize, u64, u64) {
    let want_unique_stop = *unique_stop;
    *unique_stop = false;
    let ftab_chars = fm.ftab_chars();
    let len = read.len();
    let seq = read.strand_seq(fw);

    let offset = len - hitoff - 1;
    let mut dep = offset;
    let left = len - dep;
    if left < ftab_chars {
        return (0, left, 0, 0);
    }
    for i in 0..ftab_chars {
        if seq[len - dep - 1 - i] > 3 {
            return (0, i + 1, 0, 0);
        }
    }
    let (mut top, mut bot) = fm.ftab_lo_hi(seq, len - dep - ftab_chars);
    dep += ftab_chars;
    if bot <= top {
        return (0, ftab_chars, 0, 0);
    }

    while dep < len {
        let c = seq[len - dep - 1];
        let (top_tmp, bot_tmp) = if c > 3 {
            (0, 0)
        } else if bot - top == 1 {
            match fm.map_lf1(top, c) {
                Some(t) => (t, t + 1),
                None => (0, 0),
            }
        } else {
            fm.map_range((top, bot), c)
        };
        if bot_tmp <= top_tmp {
            break;
        }
        top = top_tmp;
        bot = bot_tmp;
        dep += 1;
        if want_unique_stop && bot - top == 1 && dep - offset >= min_k {
            *unique_stop = true;
            break;
        }
    }
    (bot - top, dep - offset, top, bot)
}

/// Right-to-left exact search on one local tile, beginning at read position
/// `rdoff` (search orientation) and extending at most `max_hit_len` bases.
#[allow(clippy::too_many_arguments)]
pub fn local_search(
    tile: &LocalFmIndex,
    read: &Read,
    fw: bool,
    rdoff: usize,
    min_unique_len: usize,
    max_hit_len: usize,
    unique_stop: &mut bool,
) -> (u64, usize, u64, u64) {
    let want_unique_stop = *unique_stop;
    *unique_stop = false;
    let fm = &tile.fm;
    let ftab_chars = fm.ftab_chars();
    let len = read.len();
    let seq = read.strand_seq(fw);

    let offset = len - rdoff - 1;
    let mut dep = offset;
    let left = len - dep;
    if left < ftab_chars {
        return (0, left, 0, 0);
    }
    for i in 0..ftab_chars {
        if seq[len - dep - 1 - i] > 3 {
            return (0, i + 1, 0, 0);
        }
    }
    let (mut top, mut bot) = fm.ftab_lo_hi(seq, len - dep - ftab_chars);
    dep += ftab_chars;
    if bot <= top {
        return (0, ftab_chars, 0, 0);
    }

    while dep < len {
        let c = seq[len - dep - 1];
        let (top_tmp, bot_tmp) = if c > 3 {
            (0, 0)
        } else if bot - top == 1 {
            match fm.map_lf1(top, c) {
                Some(t) => (t, t + 1),
                None => (0, 0),
            }
        } else {
            fm.map_range((top, bot), c)
        };
        if bot_tmp <= top_tmp {
            break;
        }
        top = top_tmp;
        bot = bot_tmp;
        dep += 1;
        if want_unique_stop && bot - top == 1 && dep - offset >= min_unique_len {
            *unique_stop = true;
            break;
        }
        if dep - offset >= max_hit_len {
            break;
        }
    }
    (bot - top, dep - offset, top, bot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{encode_base, Reference};
    use crate::index::fm::FmIndex;

    fn encode(s: &str) -> Vec<u8> {
        s.bytes().map(encode_base).collect()
    }

    fn read_of(s: &str) -> Read {
        let seq = encode(s);
        let qual = vec![b'I'; seq.len()];
        Read::new("r".into(), 0, seq, qual)
    }

    fn fm_of(s: &str) -> FmIndex {
        let reference = Reference::from_seqs(vec![("chr1".into(), encode(s))]);
        FmIndex::from_reference(&reference, 3)
    }

    #[test]
    fn anchor_stop_fires_on_long_unique_hit() {
        // A non-repetitive reference; the read is a planted exact copy. The
        // suffix goes unique early, so the anchor stop fires at min_k + 12.
        let fm = fm_of("TTGACCGTAGGCATCATAAGGCCAATCGCA");
        let read = read_of("ACCGTAGGCATCATAAGGCC");
        let mut state = ReadBwtHits::default();
        state.init(true, read.len());
        let mut ps = true;
        let mut astop = true;
        partial_search(&fm, &read, true, 3, &mut state, &mut ps, &mut astop);
        assert!(astop);
        assert_eq!(state.num_unique_search, 1);
        assert_eq!(state.partial_hits.len(), 1);
        let hit = &state.partial_hits[0];
        assert_eq!(hit.hit_type, HitType::Anchor);
        assert_eq!(hit.len, 15);
        assert_eq!(hit.size(), 1);
        // The resolved coordinate is the planted position of the suffix.
        let joined = fm.walk_row(hit.top);
        assert_eq!(joined as usize, 3 + hit.rdoff(read.len()));
        #[cfg(debug_assertions)]
        assert!(state.rep_ok());
    }

    #[test]
    fn repetitive_exact_read_fully_covered() {
        // Repetitive reads disarm the anchor stop (interval stays wide), so
        // the search runs the read to completion in one unique hit.
        let fm = fm_of("ACGTACGTACGTACGTACGTACGTACGT");
        let read = read_of("ACGTACGTACGTACGTACGTACGTACGT");
        let mut state = ReadBwtHits::default();
        state.init(true, read.len());
        let mut guard = 0;
        while !state.done() && guard < 32 {
            let mut ps = true;
            let mut astop = true;
            partial_search(&fm, &read, true, 3, &mut state, &mut ps, &mut astop);
            if astop {
                state.set_done();
            } else if !ps && !state.done() && state.cur + 1 < state.len {
                state.cur += 1;
            }
            guard += 1;
        }
        assert!(state.done());
        // Every base is covered and some hit reaches the read start.
        assert_eq!(state.cur, read.len());
        #[cfg(debug_assertions)]
        assert!(state.rep_ok());
    }

    #[test]
    fn mismatch_splits_seeding_into_two_hits() {
        let ref_str = "TTGACCGTAGGCATCATAAGGCCAATCGCA";
        // Read = reference[3..23] with position 10 (read-local) changed.
        let mut read_str = ref_str[3..23].to_string();
        read_str.replace_range(10..11, "A"); // ref has T here
        let fm = fm_of(ref_str);
        let read = read_of(&read_str);
        let mut state = ReadBwtHits::default();
        state.init(true, read.len());

        let mut ps = true;
        let mut astop = true;
        partial_search(&fm, &read, true, 3, &mut state, &mut ps, &mut astop);
        assert!(!state.done());
        assert_eq!(state.partial_hits.len(), 1);
        // First hit covers the suffix up to the mismatch.
        assert_eq!(state.partial_hits[0].len, 9);

        // Skip the mismatching base the way the search driver does.
        if !ps && state.cur + 1 < state.len {
            state.cur += 1;
        }
        let mut ps = true;
        let mut astop = true;
        partial_search(&fm, &read, true, 3, &mut state, &mut ps, &mut astop);
        assert!(state.done());
        assert_eq!(state.partial_hits.len(), 2);
        assert_eq!(state.partial_hits[1].len, 10);
        #[cfg(debug_assertions)]
        assert!(state.rep_ok());
    }

    #[test]
    fn n_bases_produce_empty_hits() {
        let fm = fm_of("TTGACCGTAGGCATCATAAGGCCAATCGCA");
        let read = read_of("ACCGTAGGNNCATCATAAGG");
        let mut state = ReadBwtHits::default();
        state.init(true, read.len());
        let mut guard = 0;
        while !state.done() && guard < 32 {
            let mut ps = true;
            let mut astop = true;
            partial_search(&fm, &read, true, 3, &mut state, &mut ps, &mut astop);
            if !ps && !state.done() && state.cur + 1 < state.len {
                state.cur += 1;
            }
            if astop {
                state.set_done();
            }
            guard += 1;
        }
        assert!(state.done());
        // The hits tile the read; at least one is empty (the N skip).
        assert!(state.partial_hits.iter().any(|h| h.is_empty()));
        #[cfg(debug_assertions)]
        assert!(state.rep_ok());
    }

    #[test]
    fn search_score_formula() {
        let mut state = ReadBwtHits::default();
        state.init(true, 100);
        state.partial_hits.push(PartialFmHit::empty_hit(true, 0, 0));
        state.partial_hits[0].len = 20;
        state.partial_hits.push(PartialFmHit::empty_hit(true, 20, 0));
        state.partial_hits[1].len = 10;
        state.num_partial_search = 3;
        state.num_unique_search = 1;
        // 2 actual searches: 400 + 100 - 2*25 - 2^4
        assert_eq!(state.search_score(5), 400 + 100 - 50 - 16);
    }

    #[test]
    fn adjust_offset_retracts_short_trailing_hit() {
        let mut state = ReadBwtHits::default();
        state.init(true, 50);
        let mut h = PartialFmHit::empty_hit(true, 0, 0);
        h.len = 4;
        state.partial_hits.push(h);
        state.cur = 4;
        assert!(state.adjust_offset(8));
        assert!(state.partial_hits.is_empty());
        // cur = 0 + max(4, 9) - 8
        assert_eq!(state.cur, 1);
    }

    #[test]
    fn global_search_unique_stop() {
        let fm = fm_of("TTGACCGTAGGCATCATAAGGCCAATCGCA");
        let read = read_of("ACCGTAGGCATCATAAGGCC");
        let mut unique = true;
        let (nelt, hitlen, top, _bot) =
            global_search(&fm, &read, true, read.len() - 1, 3, &mut unique);
        assert!(unique);
        assert_eq!(nelt, 1);
        assert!(hitlen >= 3);
        let joined = fm.walk_row(top);
        // Unique stop fires partway into the read; the suffix it covers
        // starts at reference offset 3 + (read_len - hitlen).
        assert_eq!(joined, 3 + (read.len() - hitlen) as u64);
    }

    #[test]
    fn local_search_respects_max_hit_len() {
        use crate::index::local::LocalFmIndex;
        let seq = encode("TTGACCGTAGGCATCATAAGGCCAATCGCA");
        let tile = LocalFmIndex::new(&seq, 0, 0, 3);
        let read = read_of("ACCGTAGGCATCATAAGGCC");
        let mut unique = false;
        let (nelt, hitlen, _, _) =
            local_search(&tile, &read, true, read.len() - 1, 8, 5, &mut unique);
        assert!(nelt > 0);
        assert_eq!(hitlen, 5);
    }
}
