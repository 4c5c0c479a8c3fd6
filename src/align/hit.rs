/// Partial-alignment hits and the operations that grow them
///
/// A [`GenomeHit`] covers a read window `[rdoff, rdoff+len)` placed at
/// `(tidx, toff)` with an explicit edit script. Two hits covering disjoint
/// read ranges can be combined, discovering the intervening mismatches,
/// short indel, or intron; a hit can also be extended outward against the
/// reference with a bounded mismatch budget.
use std::rc::Rc;

use crate::align::arena::{EditPool, EditsHandle, SharedTempVars};
use crate::align::edit::{Edit, EditKind, SpliceDir};
use crate::align::scoring::Scoring;
use crate::align::Read;
use crate::genome::Reference;
use crate::junction::{
    SpliceSite, SpliceSiteDB, ACCEPTOR_EXONIC_LEN, ACCEPTOR_INTRONIC_LEN, DONOR_EXONIC_LEN,
    DONOR_INTRONIC_LEN, INTRONIC_LEN,
};

/// Maximum insertion discovered by combining hits.
pub const MAX_INS_LEN: usize = 3;
/// Maximum deletion discovered by combining hits.
pub const MAX_DEL_LEN: usize = 3;
/// Minimum anchor length for canonical splice sites.
pub const MIN_ANCHOR_LEN: usize = 7;
/// Minimum anchor length for non-canonical splice sites.
pub const MIN_ANCHOR_LEN_NONCAN: usize = 14;

/// Returned by score recomputation when an anchor-dependent intron bound or
/// a splice-site probability gate fails; always below any usable `minsc`.
pub const SCORE_SENTINEL: i64 = -1000;

/// Permitted intron length for a canonical splice with the given anchor.
pub fn max_intron_len_for_anchor(anchor: usize) -> u64 {
    if anchor >= MIN_ANCHOR_LEN {
        let shift = ((anchor * 2).saturating_sub(4)).clamp(13, 30);
        1u64 << shift
    } else {
        0
    }
}

/// Permitted intron length for a non-canonical splice.
pub fn max_intron_len_for_anchor_noncan(anchor: usize) -> u64 {
    if anchor >= MIN_ANCHOR_LEN_NONCAN {
        let shift = ((anchor * 2).saturating_sub(10)).min(30);
        1u64 << shift
    } else {
        0
    }
}

/// Ratio of the observed intron length to the longest intron the anchor
/// makes plausible, capped at 1.
pub fn intron_len_prob(anchor: usize, intron_len: u64, max_intron_len: u64) -> f32 {
    let mut expected = max_intron_len;
    if anchor < 14 {
        expected = 1u64 << (anchor * 2 + 4);
    }
    expected = expected.min(max_intron_len).max(1);
    (intron_len as f32 / expected as f32).min(1.0)
}

pub fn intron_len_prob_noncan(anchor: usize, intron_len: u64, max_intron_len: u64) -> f32 {
    let mut expected = max_intron_len;
    if anchor < 16 {
        expected = 1u64 << (anchor * 2).min(62);
    }
    expected = expected.min(max_intron_len).max(1);
    (intron_len as f32 / expected as f32).min(1.0)
}

// Donor/acceptor dinucleotides, two bases packed one per nibble.
const DINUC_GT: u8 = 0x23;
const DINUC_AG: u8 = 0x02;
const DINUC_GT_RC: u8 = 0x01;
const DINUC_AG_RC: u8 = 0x13;
const DINUC_GC: u8 = 0x21;
const DINUC_GC_RC: u8 = 0x21;
const DINUC_AT: u8 = 0x03;
const DINUC_AC: u8 = 0x01;
const DINUC_AT_RC: u8 = 0x03;
const DINUC_AC_RC: u8 = 0x20;

#[derive(Debug, Clone)]
pub struct GenomeHit {
    pub fw: bool,
    pub rdoff: usize,
    pub len: usize,
    pub trim5: usize,
    pub trim3: usize,
    pub tidx: usize,
    pub toff: u64,
    pub edits: EditsHandle,
    pub score: i64,
    pub splicescore: f64,
    /// Multiplicity accumulated by anchor deduplication
    pub hitcount: usize,
}

impl PartialEq for GenomeHit {
    fn eq(&self, other: &Self) -> bool {
        self.fw == other.fw
            && self.rdoff == other.rdoff
            && self.len == other.len
            && self.tidx == other.tidx
            && self.toff == other.toff
            && self.trim5 == other.trim5
            && self.trim3 == other.trim3
            && self.edits == other.edits
    }
}

impl GenomeHit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fw: bool,
        rdoff: usize,
        len: usize,
        trim5: usize,
        trim3: usize,
        tidx: usize,
        toff: u64,
        pool: &Rc<EditPool>,
    ) -> Self {
        Self {
            fw,
            rdoff,
            len,
            trim5,
            trim3,
            tidx,
            toff,
            edits: EditsHandle::new(pool),
            score: 0,
            splicescore: 0.0,
            hitcount: 1,
        }
    }

    /// Genomic offset one past the rightmost aligned reference base.
    pub fn right_off(&self) -> u64 {
        let mut toff = self.toff + self.len as u64;
        for e in self.edits.iter() {
            match e.kind {
                EditKind::Splice { skip_len, .. } => toff += skip_len,
                EditKind::ReadGap { .. } => toff += 1,
                EditKind::RefGap { .. } => toff -= 1,
                EditKind::Mismatch { .. } => {}
            }
        }
        toff
    }

    /// Leftmost gapless partial: (rdoff, len, toff) up to the first
    /// indel/splice edit.
    pub fn get_left(&self) -> (usize, usize, u64) {
        let mut len = self.len;
        for e in self.edits.iter() {
            if e.is_gap() || e.is_splice() {
                len = e.pos;
                break;
            }
        }
        (self.rdoff, len, self.toff)
    }

    /// Like [`Self::get_left`] plus the summed mismatch penalties inside it.
    pub fn get_left_scored(&self, rd: &Read, sc: &Scoring) -> (usize, usize, u64, i64) {
        let qual = rd.strand_qual(self.fw);
        let mut len = self.len;
        let mut score = 0i64;
        for e in self.edits.iter() {
            if e.is_gap() || e.is_splice() {
                len = e.pos;
                break;
            }
            if let EditKind::Mismatch { rdc, rfc } = e.kind {
                score += sc.mismatch(rdc, rfc, qual[self.rdoff + e.pos]);
            }
        }
        (self.rdoff, len, self.toff, score)
    }

    /// Rightmost gapless partial: (rdoff, len, toff) back to the nearest
    /// indel/splice edit.
    pub fn get_right(&self) -> (usize, usize, u64) {
        let (rdoff, len, toff, _) = self.get_right_inner(None, None);
        (rdoff, len, toff)
    }

    pub fn get_right_scored(&self, rd: &Read, sc: &Scoring) -> (usize, usize, u64, i64) {
        self.get_right_inner(Some(rd), Some(sc))
    }

    fn get_right_inner(&self, rd: Option<&Read>, sc: Option<&Scoring>) -> (usize, usize, u64, i64) {
        let mut rdoff = self.rdoff;
        let mut len = self.len;
        let mut toff = self.toff;
        let mut score = 0i64;
        for e in self.edits.iter().rev() {
            if e.is_gap() || e.is_splice() {
                rdoff = self.rdoff + e.pos;
                len = self.len - e.pos;
                if e.is_ref_gap() {
                    rdoff += 1;
                    len -= 1;
                }
                toff = self.right_off() - len as u64;
                break;
            }
            if let (EditKind::Mismatch { rdc, rfc }, Some(rd), Some(sc)) = (&e.kind, rd, sc) {
                let qual = rd.strand_qual(self.fw);
                score += sc.mismatch(*rdc, *rfc, qual[self.rdoff + e.pos]);
            }
        }
        (rdoff, len, toff, score)
    }

    /// Length of the leftmost anchor (up to the first splice) and the number
    /// of mismatch/indel edits inside it.
    pub fn get_left_anchor(&self) -> (usize, usize) {
        let mut anchor = self.len;
        let mut nedits = 0;
        for e in self.edits.iter() {
            if e.is_splice() {
                anchor = e.pos;
                break;
            }
            nedits += 1;
        }
        (anchor, nedits)
    }

    pub fn get_right_anchor(&self) -> (usize, usize) {
        let mut anchor = self.len;
        let mut nedits = 0;
        for e in self.edits.iter().rev() {
            if e.is_splice() {
                anchor = self.len - e.pos - 1;
                break;
            }
            nedits += 1;
        }
        (anchor, nedits)
    }

    pub fn spliced(&self) -> bool {
        self.edits.iter().any(|e| e.is_splice())
    }

    pub fn spliced_count(&self) -> usize {
        self.edits.iter().filter(|e| e.is_splice()).count()
    }

    pub fn mms(&self) -> usize {
        self.edits.iter().filter(|e| e.is_mismatch()).count()
    }

    pub fn ngaps(&self) -> usize {
        self.edits.iter().filter(|e| e.is_gap()).count()
    }

    /// All splices in the alignment agree in direction.
    pub fn spliced_consistently(&self) -> bool {
        let mut dir = SpliceDir::Unknown;
        for e in self.edits.iter() {
            if e.is_splice() {
                let d = e.splice_dir();
                if dir != SpliceDir::Unknown && d != SpliceDir::Unknown && d != dir {
                    return false;
                }
                if dir == SpliceDir::Unknown {
                    dir = d;
                }
            }
        }
        true
    }

    /// Whether `other` can be appended to `self` (read order: self before
    /// other) given the indel and intron constraints.
    pub fn compatible_with(
        &self,
        other: &GenomeHit,
        min_intron_len: u64,
        max_intron_len: u64,
        no_spliced_alignment: bool,
    ) -> bool {
        if self.fw != other.fw || self.tidx != other.tidx {
            return false;
        }
        if self.rdoff > other.rdoff {
            return false;
        }
        if self.rdoff + self.len > other.rdoff + other.len {
            return false;
        }
        if self.toff > other.toff {
            return false;
        }

        let (this_rdoff, this_len, this_toff) = self.get_right();
        let (other_rdoff, other_len, other_toff) = other.get_left();

        if this_rdoff > other_rdoff {
            return false;
        }
        if this_rdoff + this_len > other_rdoff + other_len {
            return false;
        }
        if this_toff > other_toff {
            return false;
        }

        let refdif = other_toff - this_toff;
        let rddif = (other_rdoff - this_rdoff) as u64;

        if rddif != refdif {
            if rddif > refdif {
                if rddif > refdif + MAX_INS_LEN as u64 {
                    return false;
                }
            } else if refdif - rddif < min_intron_len {
                if refdif - rddif > MAX_DEL_LEN as u64 {
                    return false;
                }
            } else {
                if no_spliced_alignment {
                    return false;
                }
                if refdif - rddif > max_intron_len {
                    return false;
                }
            }
        }
        true
    }

    /// Splice two compatible hits, discovering the intervening mismatches,
    /// indel, or intron and rescoring. On success `self` covers
    /// `self.rdoff .. other.rdoff + other.len`; on failure `self` is
    /// unchanged except where noted by the edit-truncation contract (failure
    /// paths all precede mutation).
    #[allow(clippy::too_many_arguments)]
    pub fn combine_with(
        &mut self,
        other: &GenomeHit,
        rd: &Read,
        reference: &Reference,
        sc: &Scoring,
        minsc: i64,
        min_intron_len: u64,
        max_intron_len: u64,
        can_mal: usize,
        noncan_mal: usize,
        splice_site: Option<&SpliceSite>,
        no_spliced_alignment: bool,
        tmp: &mut SharedTempVars,
    ) -> bool {
        debug_assert!(self.compatible_with(
            other,
            min_intron_len,
            max_intron_len,
            no_spliced_alignment
        ));
        debug_assert_eq!(self.tidx, other.tidx);

        let (this_rdoff, this_len, this_toff, this_mmsc) = self.get_right_scored(rd, sc);
        let (other_rdoff, other_len, other_toff, other_mmsc) = other.get_left_scored(rd, sc);

        if this_rdoff > other_rdoff || other_toff < this_toff {
            return false;
        }
        if this_len != 0 && other_len != 0 && this_rdoff + this_len >= other_rdoff + other_len {
            return false;
        }
        let len = other_rdoff - this_rdoff + other_len;
        let reflen = reference.approx_len(self.tidx);
        if this_toff + len as u64 > reflen {
            return false;
        }

        // Classify the gap between the two gapless partials.
        let refdif = other_toff - this_toff;
        let rddif = (other_rdoff - this_rdoff) as u64;
        let mut spliced = false;
        let mut ins = false;
        let mut del = false;
        if refdif != rddif {
            if refdif > rddif {
                if refdif - rddif >= min_intron_len {
                    spliced = true;
                } else {
                    del = true;
                }
            } else {
                ins = true;
            }
        }
        if no_spliced_alignment && spliced {
            return false;
        }

        // Abutting partials with no gap: append and rescore.
        if !spliced && !ins && !del && this_rdoff + this_len == other_rdoff {
            let addoff = other.rdoff - self.rdoff;
            for e in other.edits.iter() {
                let mut e = e.clone();
                e.pos += addoff;
                self.edits.push(e);
            }
            self.len += other.len;
            self.score = self.calculate_score(rd, sc, max_intron_len);
            debug_assert!(self.matches_reference(rd, reference));
            return true;
        }

        let seq = rd.strand_seq(self.fw);
        let qual = rd.strand_qual(self.fw);
        let mut remainsc = minsc - (self.score - this_mmsc) - (other.score - other_mmsc);
        if remainsc > 0 {
            remainsc = 0;
        }

        let read_gaps = if spliced {
            sc.max_read_gaps((-remainsc - sc.pen_can_splice).max(0), rd.len())
        } else {
            0
        };
        let mut this_ref_ext = read_gaps + if spliced { INTRONIC_LEN } else { 0 };
        if this_toff + (len + this_ref_ext) as u64 > reflen {
            this_ref_ext = (reflen - this_toff) as usize - len;
        }

        let SharedTempVars {
            ref_buf,
            ref_buf2,
            temp_scores,
            temp_scores2,
            ..
        } = tmp;
        reference.get_stretch(ref_buf, self.tidx, this_toff, len + this_ref_ext);
        let rb = |i: usize| ref_buf[i];

        let mut maxscorei: Option<usize> = None;
        let mut maxscore = i64::MIN;
        let mut maxspldir = SpliceDir::Unknown;
        let mut maxsplscore = 0.0f32;
        let mut donor_seq = 0u64;
        let mut acceptor_seq = 0u64;
        let mut other_ref_ext = 0usize;

        if spliced || ins || del {
            let other_end = other_toff as i64 + other_len as i64;
            other_ref_ext =
                (read_gaps + INTRONIC_LEN).min((other_end - len as i64).max(0) as usize);
            // Window index i maps to reference offset other_end - len + i on
            // the other side; insertions near the reference start can push
            // the fetch before offset 0, which pads as N.
            let start2 = other_end - (len + other_ref_ext) as i64;
            ref_buf2.clear();
            for k in 0..(len + other_ref_ext) {
                let p = start2 + k as i64;
                ref_buf2.push(if p < 0 {
                    crate::genome::BASE_N
                } else {
                    reference.get_base(other.tidx, p as u64)
                });
            }
            let rb2 = |i: isize| ref_buf2[(i + other_ref_ext as isize) as usize];

            temp_scores.resize(len, 0);
            temp_scores2.resize(len, 0);

            if spliced {
                // Cumulative mismatch scores from the left on self's side.
                let mut i = 0usize;
                while i < len {
                    let rdc = seq[this_rdoff + i];
                    let rfc = rb(i);
                    temp_scores[i] = if i > 0 { temp_scores[i - 1] } else { 0 };
                    if rdc != rfc {
                        temp_scores[i] += sc.mismatch(rdc, rfc, qual[this_rdoff + i]);
                    }
                    if temp_scores[i] < remainsc {
                        break;
                    }
                    i += 1;
                }
                let mut i_limit = i.min(len);

                // Cumulative mismatch scores from the right on other's side.
                let mut i2 = len as isize - 1;
                while i2 >= 0 {
                    let rdc = seq[this_rdoff + i2 as usize];
                    let rfc = rb2(i2);
                    temp_scores2[i2 as usize] = if (i2 as usize + 1) < len {
                        temp_scores2[i2 as usize + 1]
                    } else {
                        0
                    };
                    if rdc != rfc {
                        temp_scores2[i2 as usize] +=
                            sc.mismatch(rdc, rfc, qual[this_rdoff + i2 as usize]);
                    }
                    if temp_scores2[i2 as usize] < remainsc {
                        break;
                    }
                    i2 -= 1;
                }
                let mut i2_limit = i2.max(0) as usize;

                if let Some(ss) = splice_site {
                    // A known site pins the split position.
                    if ss.left() < this_toff {
                        return false;
                    }
                    let pinned = (ss.left() - this_toff) as usize;
                    if i2_limit <= pinned {
                        i2_limit = pinned;
                        i_limit = i2_limit + 1;
                    } else {
                        i_limit = i2_limit;
                    }
                }

                let mut i = i2_limit;
                while i < i_limit && i + 1 < len {
                    let i2 = i + 1;
                    let tempscore = temp_scores[i] + temp_scores2[i2];
                    let mut donor = 0xffu8;
                    let mut acceptor = 0xffu8;
                    if i + 2 < len + this_ref_ext {
                        donor = (rb(i + 1) << 4) | rb(i + 2);
                    }
                    if i2 as isize - 2 >= -(other_ref_ext as isize) {
                        acceptor = (rb2(i2 as isize - 2) << 4) | rb2(i2 as isize - 1);
                    }
                    let spldir = if donor == DINUC_GT && acceptor == DINUC_AG {
                        SpliceDir::Forward
                    } else if donor == DINUC_AG_RC && acceptor == DINUC_GT_RC {
                        SpliceDir::Reverse
                    } else {
                        SpliceDir::Unknown
                    };
                    let semi_canonical = (donor == DINUC_GC && acceptor == DINUC_AG)
                        || (donor == DINUC_AT && acceptor == DINUC_AC)
                        || (donor == DINUC_AG_RC && acceptor == DINUC_GC_RC)
                        || (donor == DINUC_AC_RC && acceptor == DINUC_AT_RC);
                    let tempscore = tempscore
                        - if spldir == SpliceDir::Unknown {
                            sc.pen_noncan_splice
                        } else {
                            sc.pen_can_splice
                        };

                    let mut temp_donor_seq = 0u64;
                    let mut temp_acceptor_seq = 0u64;
                    let mut splscore = 0.0f32;
                    if spldir != SpliceDir::Unknown {
                        // Extract the fixed windows around donor and acceptor
                        // to score the splicing event.
                        match spldir {
                            SpliceDir::Forward => {
                                if i + 1 >= DONOR_EXONIC_LEN
                                    && len + this_ref_ext > i + DONOR_INTRONIC_LEN
                                    && i2 + other_ref_ext >= ACCEPTOR_INTRONIC_LEN
                                    && len > i2 + ACCEPTOR_EXONIC_LEN - 1
                                {
                                    let from = i + 1 - DONOR_EXONIC_LEN;
                                    let to = i + DONOR_INTRONIC_LEN;
                                    for j in from..=to {
                                        let base = rb(j);
                                        temp_donor_seq = (temp_donor_seq << 2)
                                            | (if base > 3 { 0 } else { base }) as u64;
                                    }
                                    let from = i2 as isize - ACCEPTOR_INTRONIC_LEN as isize;
                                    let to = i2 as isize + ACCEPTOR_EXONIC_LEN as isize - 1;
                                    for j in from..=to {
                                        let base = rb2(j);
                                        temp_acceptor_seq = (temp_acceptor_seq << 2)
                                            | (if base > 3 { 0 } else { base }) as u64;
                                    }
                                }
                            }
                            SpliceDir::Reverse => {
                                if i + 1 >= ACCEPTOR_EXONIC_LEN
                                    && len + this_ref_ext > i + ACCEPTOR_INTRONIC_LEN
                                    && i2 + other_ref_ext >= DONOR_INTRONIC_LEN
                                    && len > i2 + DONOR_EXONIC_LEN - 1
                                {
                                    let from = i + 1 - ACCEPTOR_EXONIC_LEN;
                                    let to = i + ACCEPTOR_INTRONIC_LEN;
                                    for j in (from..=to).rev() {
                                        let base = rb(j);
                                        let base = if base > 3 { 0 } else { base ^ 0x3 };
                                        temp_acceptor_seq = (temp_acceptor_seq << 2) | base as u64;
                                    }
                                    let from = i2 as isize - DONOR_INTRONIC_LEN as isize;
                                    let to = i2 as isize + DONOR_EXONIC_LEN as isize - 1;
                                    for j in (from..=to).rev() {
                                        let base = rb2(j);
                                        let base = if base > 3 { 0 } else { base ^ 0x3 };
                                        temp_donor_seq = (temp_donor_seq << 2) | base as u64;
                                    }
                                }
                            }
                            SpliceDir::Unknown => unreachable!(),
                        }
                        splscore = SpliceSiteDB::probscore(temp_donor_seq, temp_acceptor_seq);
                    }

                    // Prefer higher score, then canonical over unknown, then
                    // higher splice-site probability; semi-canonical breaks
                    // exact ties among unknowns.
                    let take = (maxspldir == SpliceDir::Unknown
                        && spldir == SpliceDir::Unknown
                        && (maxscore < tempscore || (maxscore == tempscore && semi_canonical)))
                        || (maxspldir != SpliceDir::Unknown
                            && spldir != SpliceDir::Unknown
                            && (maxscore < tempscore
                                || (maxscore == tempscore && maxsplscore < splscore)))
                        || (maxspldir == SpliceDir::Unknown && spldir != SpliceDir::Unknown);
                    if take {
                        maxscore = tempscore;
                        maxscorei = Some(i);
                        maxspldir = spldir;
                        maxsplscore = splscore;
                        if spldir != SpliceDir::Unknown {
                            donor_seq = temp_donor_seq;
                            acceptor_seq = temp_acceptor_seq;
                        } else {
                            donor_seq = 0;
                            acceptor_seq = 0;
                        }
                    }
                    i += 1;
                }
            } else {
                // Discover the placement of the insertion or deletion.
                let ins_len = if ins { (rddif - refdif) as usize } else { 0 };
                let del_len = if del { (refdif - rddif) as usize } else { 0 };
                let gap_penalty = if ins {
                    -(sc.ref_gap_open + sc.ref_gap_extend * (ins_len as i64 - 1))
                } else {
                    -(sc.read_gap_open + sc.read_gap_extend * (del_len as i64 - 1))
                };
                if gap_penalty < remainsc {
                    return false;
                }
                let mut i = 0usize;
                while i < len {
                    let rdc = seq[this_rdoff + i];
                    let rfc = rb(i);
                    temp_scores[i] = if i > 0 { temp_scores[i - 1] } else { 0 };
                    if rdc != rfc {
                        temp_scores[i] += sc.mismatch(rdc, rfc, qual[this_rdoff + i]);
                    }
                    if temp_scores[i] + gap_penalty < remainsc {
                        break;
                    }
                    i += 1;
                }
                let i_limit = i.min(len);
                let mut i2 = len as isize - 1;
                while i2 >= 0 {
                    let rdc = seq[this_rdoff + i2 as usize];
                    let rfc = rb2(i2);
                    temp_scores2[i2 as usize] = if (i2 as usize + 1) < len {
                        temp_scores2[i2 as usize + 1]
                    } else {
                        0
                    };
                    if rdc != rfc {
                        temp_scores2[i2 as usize] +=
                            sc.mismatch(rdc, rfc, qual[this_rdoff + i2 as usize]);
                    }
                    if temp_scores2[i2 as usize] + gap_penalty < remainsc {
                        break;
                    }
                    i2 -= 1;
                }
                let i2_limit = if i2 < ins_len as isize {
                    0
                } else {
                    (i2 - ins_len as isize) as usize
                };
                let mut i = i2_limit;
                let mut i2 = i2_limit + 1 + ins_len;
                while i < i_limit && i2 < len {
                    let tempscore = temp_scores[i] + temp_scores2[i2] + gap_penalty;
                    if maxscore < tempscore {
                        maxscore = tempscore;
                        maxscorei = Some(i);
                    }
                    i += 1;
                    i2 += 1;
                }
            }

            if maxscore == i64::MIN || maxscorei.is_none() {
                return false;
            }
            if spliced && splice_site.is_none() {
                let mi = maxscorei.unwrap();
                let shorter_anchor_len = (mi + 1).min(len - mi - 1);
                let intron_len = other_toff - this_toff;
                if maxspldir == SpliceDir::Unknown {
                    if shorter_anchor_len < noncan_mal
                        && intron_len_prob_noncan(shorter_anchor_len, intron_len, max_intron_len)
                            > 0.01
                    {
                        return false;
                    }
                } else if shorter_anchor_len < can_mal
                    && intron_len_prob(shorter_anchor_len, intron_len, max_intron_len) > 0.01
                {
                    return false;
                }
            }
            if maxscore < remainsc {
                return false;
            }
        }

        // Keep self's edits up through its last indel/splice edit; the
        // overlap emission below re-derives everything to the right of it.
        let mut keep = 0;
        for (i, e) in self.edits.iter().enumerate().rev() {
            if e.is_gap() || e.is_splice() {
                keep = i + 1;
                break;
            }
        }
        self.edits.truncate(keep);

        let rb2 = |i: isize| ref_buf2[(i + other_ref_ext as isize) as usize];
        let addoff = this_rdoff - self.rdoff;
        let on_a_side = |i: usize| maxscorei.map_or(true, |m| i <= m);

        if spliced {
            let mi = maxscorei.unwrap();
            for i in 0..len {
                let rdc = seq[this_rdoff + i];
                let rfc = if on_a_side(i) { rb(i) } else { rb2(i as isize) };
                if rdc != rfc {
                    self.edits.push(Edit::mismatch(i + addoff, rdc, rfc));
                }
                if i == mi {
                    let left = this_toff + i as u64 + 1;
                    let right = other_toff + other_len as u64 - (len - i - 1) as u64;
                    debug_assert!(left < right);
                    let skip_len = right - left;
                    self.edits.push(Edit::splice(
                        i + 1 + addoff,
                        skip_len,
                        maxspldir,
                        donor_seq,
                        acceptor_seq,
                        splice_site.is_some(),
                    ));
                }
            }
        } else {
            let mut i = 0usize;
            while i < len {
                let rdc = seq[this_rdoff + i];
                let rfc = if on_a_side(i) { rb(i) } else { rb2(i as isize) };
                if rdc != rfc {
                    self.edits.push(Edit::mismatch(i + addoff, rdc, rfc));
                }
                if maxscorei == Some(i) {
                    let left = this_toff + i as u64 + 1;
                    let right = other_toff + other_len as u64 - (len - i - 1) as u64;
                    if del {
                        debug_assert!(left < right);
                        let skip_len = (right - left) as usize;
                        debug_assert!(skip_len <= MAX_DEL_LEN);
                        for j in 0..skip_len {
                            let rfc_j = if i + 1 + j < len {
                                rb(i + 1 + j)
                            } else {
                                reference.get_base(self.tidx, this_toff + (i + 1 + j) as u64)
                            };
                            self.edits.push(Edit::read_gap(i + 1 + addoff, rfc_j));
                        }
                    } else {
                        debug_assert!(ins);
                        debug_assert!(right < left);
                        let skip_len = (left - right) as usize;
                        debug_assert!(skip_len <= MAX_INS_LEN);
                        for j in 0..skip_len {
                            let rdc_j = seq[this_rdoff + i + 1 + j];
                            self.edits.push(Edit::ref_gap(i + 1 + j + addoff, rdc_j));
                        }
                        i += skip_len;
                    }
                }
                i += 1;
            }
        }

        // Append other's edits from its first indel/splice edit onward; its
        // leading mismatches were re-derived by the overlap emission.
        let mut fsi = other.edits.len();
        for (i, e) in other.edits.iter().enumerate() {
            if e.is_gap() || e.is_splice() {
                fsi = i;
                break;
            }
        }
        let addoff2 = other.rdoff - self.rdoff;
        for e in other.edits.iter().skip(fsi) {
            let mut e = e.clone();
            e.pos += addoff2;
            self.edits.push(e);
        }

        if ins || del {
            self.left_align(rd);
        }

        debug_assert!(self.rdoff + self.len <= other.rdoff + other.len);
        self.len = other.rdoff + other.len - self.rdoff;
        self.score = self.calculate_score(rd, sc, max_intron_len);
        debug_assert_eq!(self.trim3, 0);
        self.trim3 += other.trim3;
        debug_assert!(
            self.score == SCORE_SENTINEL || self.matches_reference(rd, reference),
            "combined hit does not reconstruct the reference"
        );
        true
    }

    /// Grow the hit outward by up to `max_leftext` / `max_rightext` read
    /// bases, allowing up to `mm` mismatches per side. Returns the actual
    /// (left, right) growth.
    #[allow(clippy::too_many_arguments)]
    pub fn extend(
        &mut self,
        rd: &Read,
        reference: &Reference,
        sc: &Scoring,
        min_k_local: usize,
        max_intron_len: u64,
        max_leftext: usize,
        max_rightext: usize,
        mm: usize,
        tmp: &mut SharedTempVars,
    ) -> (usize, usize) {
        let seq = rd.strand_seq(self.fw);
        let rdlen = rd.len();
        let reflen = reference.approx_len(self.tidx);
        let mut leftext = 0usize;
        let mut rightext = 0usize;

        if max_leftext > 0 && self.rdoff > 0 {
            if (self.rdoff as u64) > self.toff {
                // The unaligned prefix would run off the reference start.
                return (0, 0);
            }
            let rl = self.toff - self.rdoff as u64;
            reference.get_stretch(&mut tmp.ref_buf, self.tidx, rl, self.rdoff);

            // Probe the first min_k_local bases to decide whether extending
            // is worthwhile within the mismatch budget.
            let mut ext = 0usize;
            let mut mmcnt = 0usize;
            let mut mm_ext = 0usize;
            while ext < self.rdoff && ext < min_k_local {
                let rdc = seq[self.rdoff - ext - 1];
                let rfc = tmp.ref_buf[self.rdoff - ext - 1];
                if rdc != rfc {
                    mmcnt += 1;
                }
                if mmcnt <= mm {
                    mm_ext += 1;
                }
                ext += 1;
            }
            if mm_ext > 0 {
                let mut new_edits: Vec<Edit> = Vec::new();
                let mut lext = 0usize;
                let mut left_mm = 0usize;
                while lext < self.rdoff && lext < max_leftext {
                    let rdc = seq[self.rdoff - lext - 1];
                    let rfc = tmp.ref_buf[self.rdoff - lext - 1];
                    if rdc != rfc {
                        left_mm += 1;
                        if left_mm > mm {
                            break;
                        }
                        // Distance left of the old start; remapped below.
                        new_edits.push(Edit::mismatch(lext + 1, rdc, rfc));
                    }
                    lext += 1;
                }
                if lext > 0 {
                    self.toff -= lext as u64;
                    self.rdoff -= lext;
                    self.len += lext;
                    for e in self.edits.iter_mut() {
                        e.pos += lext;
                    }
                    for e in new_edits.iter_mut() {
                        e.pos = lext - e.pos;
                    }
                    new_edits.reverse();
                    self.edits.splice(0..0, new_edits);
                    leftext = lext;
                }
            }
        }

        if max_rightext > 0 && self.rdoff + self.len < rdlen {
            let (_, r_len, r_toff) = self.get_right();
            debug_assert!(r_len > 0);
            let rl = r_toff + r_len as u64;
            let rr = rdlen - (self.rdoff + self.len);
            if rl + rr as u64 <= reflen {
                reference.get_stretch(&mut tmp.ref_buf, self.tidx, rl, rr);

                let mut ext = 0usize;
                let mut mmcnt = 0usize;
                let mut mm_ext = 0usize;
                while ext < rr && ext < min_k_local {
                    let rdc = seq[self.rdoff + self.len + ext];
                    let rfc = tmp.ref_buf[ext];
                    if rdc != rfc {
                        mmcnt += 1;
                    }
                    if mmcnt <= mm {
                        mm_ext += 1;
                    }
                    ext += 1;
                }
                if mm_ext > 0 {
                    let mut rext = 0usize;
                    let mut right_mm = 0usize;
                    while rext < rr && rext < max_rightext {
                        let rdc = seq[self.rdoff + self.len + rext];
                        let rfc = tmp.ref_buf[rext];
                        if rdc != rfc {
                            right_mm += 1;
                            if right_mm > mm {
                                break;
                            }
                            self.edits.push(Edit::mismatch(self.len + rext, rdc, rfc));
                        }
                        rext += 1;
                    }
                    self.len += rext;
                    rightext = rext;
                }
            }
        }

        if leftext > 0 || rightext > 0 {
            self.score = self.calculate_score(rd, sc, max_intron_len);
            debug_assert!(
                self.score == SCORE_SENTINEL || self.matches_reference(rd, reference),
                "extended hit does not reconstruct the reference"
            );
        }
        (leftext, rightext)
    }

    /// Shift each run of same-direction indel edits to the leftmost
    /// reference position consistent with the sequence.
    pub fn left_align(&mut self, rd: &Read) {
        let seq = rd.strand_seq(self.fw);
        let mut ei = 0usize;
        while ei < self.edits.len() {
            if !self.edits[ei].is_gap() {
                ei += 1;
                continue;
            }
            let read_gap = self.edits[ei].is_read_gap();
            let run_pos = self.edits[ei].pos;
            let mut ei2 = ei + 1;
            while ei2 < self.edits.len() {
                let e2 = &self.edits[ei2];
                if !e2.is_gap() || e2.is_read_gap() != read_gap {
                    break;
                }
                if read_gap {
                    if e2.pos != run_pos {
                        break;
                    }
                } else if e2.pos != run_pos + (ei2 - ei) {
                    break;
                }
                ei2 += 1;
            }
            let ei2 = ei2 - 1;

            let lower = if ei > 0 { self.edits[ei - 1].pos } else { 0 };
            let mut l = self.edits[ei].pos as i64 - 1;
            while l > lower as i64 {
                let rdc = seq[self.rdoff + l as usize];
                let tailc = match self.edits[ei2].kind {
                    EditKind::ReadGap { rfc } => rfc,
                    EditKind::RefGap { rdc } => rdc,
                    _ => unreachable!(),
                };
                if tailc != rdc {
                    break;
                }
                // Rotate the displaced character through the run and slide
                // the whole run one position left.
                for e3 in (ei + 1..=ei2).rev() {
                    let prevc = match self.edits[e3 - 1].kind {
                        EditKind::ReadGap { rfc } => rfc,
                        EditKind::RefGap { rdc } => rdc,
                        _ => unreachable!(),
                    };
                    match &mut self.edits[e3].kind {
                        EditKind::ReadGap { rfc } => *rfc = prevc,
                        EditKind::RefGap { rdc } => *rdc = prevc,
                        _ => unreachable!(),
                    }
                    self.edits[e3].pos -= 1;
                }
                match &mut self.edits[ei].kind {
                    EditKind::ReadGap { rfc } => *rfc = rdc,
                    EditKind::RefGap { rdc: c } => *c = rdc,
                    _ => unreachable!(),
                }
                self.edits[ei].pos -= 1;
                l -= 1;
            }
            ei = ei2 + 1;
        }
    }

    /// Recompute the alignment score from the edit script, applying the
    /// anchor-dependent intron bounds and splice-probability gates. Returns
    /// [`SCORE_SENTINEL`] (and caches it) when a gate fails.
    pub fn calculate_score(&mut self, rd: &Read, sc: &Scoring, max_intron_len: u64) -> i64 {
        let score = self.calculate_score_inner(rd, sc, max_intron_len);
        self.score = score;
        score
    }

    fn calculate_score_inner(&mut self, rd: &Read, sc: &Scoring, max_intron_len: u64) -> i64 {
        let seq_len = rd.len();
        let qual = rd.strand_qual(self.fw);
        let mut score = 0i64;
        let mut splicescore = 0f64;
        let mut numsplices = 0usize;
        let mut mm = 0usize;
        let mut conflict = false;
        let mut whichsense = SpliceDir::Unknown;

        for i in 0..self.edits.len() {
            let edit = self.edits[i].clone();
            debug_assert!(edit.pos < self.len);
            match edit.kind {
                EditKind::Mismatch { rdc, rfc } => {
                    score += sc.mismatch(rdc, rfc, qual[self.rdoff + edit.pos]);
                    mm += 1;
                }
                EditKind::Splice {
                    skip_len,
                    dir,
                    donor_seq,
                    acceptor_seq,
                    known,
                } => {
                    if !known {
                        let left_anchor_len = (self.rdoff + edit.pos) as i64;
                        let right_anchor_len = seq_len as i64 - left_anchor_len;
                        let mm2 = self.edits[i + 1..]
                            .iter()
                            .filter(|e| e.is_mismatch() || e.is_gap())
                            .count();
                        let la = left_anchor_len - 2 * mm as i64;
                        let ra = right_anchor_len - 2 * mm2 as i64;
                        let shorter = la.min(ra).max(1) as usize;
                        let thresh = if dir != SpliceDir::Unknown {
                            max_intron_len_for_anchor(shorter)
                        } else {
                            max_intron_len_for_anchor_noncan(shorter)
                        };
                        if thresh < max_intron_len {
                            if skip_len > thresh {
                                return SCORE_SENTINEL;
                            }
                            if dir != SpliceDir::Unknown {
                                let probscore = SpliceSiteDB::probscore(donor_seq, acceptor_seq);
                                let thresh = if skip_len >> 16 != 0 {
                                    0.99
                                } else if skip_len >> 15 != 0 {
                                    0.97
                                } else if skip_len >> 14 != 0 {
                                    0.94
                                } else if skip_len >> 13 != 0 {
                                    0.91
                                } else if skip_len >> 12 != 0 {
                                    0.88
                                } else {
                                    0.80
                                };
                                if probscore < thresh {
                                    return SCORE_SENTINEL;
                                }
                            }
                            // A short anchor must be edit-free (and untrimmed).
                            if shorter as i64 == la {
                                if self.trim5 > 0 {
                                    return SCORE_SENTINEL;
                                }
                                if self.edits[..i]
                                    .iter()
                                    .any(|e| e.is_mismatch() || e.is_gap())
                                {
                                    return SCORE_SENTINEL;
                                }
                            } else {
                                if self.trim3 > 0 {
                                    return SCORE_SENTINEL;
                                }
                                if self.edits[i + 1..]
                                    .iter()
                                    .any(|e| e.is_mismatch() || e.is_gap())
                                {
                                    return SCORE_SENTINEL;
                                }
                            }
                        }
                        score -= if dir != SpliceDir::Unknown {
                            sc.can_spl(skip_len)
                        } else {
                            sc.noncan_spl(skip_len)
                        };
                        if shorter <= 15 {
                            numsplices += 1;
                            splicescore += skip_len as f64;
                        }
                    }
                    if !conflict {
                        if whichsense == SpliceDir::Unknown {
                            whichsense = dir;
                        } else if dir != SpliceDir::Unknown && whichsense != dir {
                            conflict = true;
                        }
                    }
                }
                EditKind::ReadGap { .. } => {
                    let open = !(i > 0
                        && self.edits[i - 1].is_read_gap()
                        && self.edits[i - 1].pos == edit.pos);
                    score -= if open {
                        sc.read_gap_open
                    } else {
                        sc.read_gap_extend
                    };
                }
                EditKind::RefGap { .. } => {
                    let open = !(i > 0
                        && self.edits[i - 1].is_ref_gap()
                        && self.edits[i - 1].pos + 1 == edit.pos);
                    score -= if open {
                        sc.ref_gap_open
                    } else {
                        sc.ref_gap_extend
                    };
                }
            }
        }

        if conflict {
            score -= sc.conflict_spl();
        }
        if numsplices > 1 {
            splicescore /= numsplices as f64;
        }
        score += (self.len - mm) as i64 * sc.match_bonus;
        self.splicescore = splicescore;
        score
    }

    /// Round-trip check: applying the edit script to the aligned read
    /// substring reproduces the reference, modulo splice skips.
    pub fn matches_reference(&self, rd: &Read, reference: &Reference) -> bool {
        let seq = rd.strand_seq(self.fw);
        let mut i = 0usize;
        let mut refpos = self.toff;
        let mut eidx = 0usize;
        while i < self.len {
            if eidx < self.edits.len() && self.edits[eidx].pos == i {
                match self.edits[eidx].kind {
                    EditKind::ReadGap { rfc } => {
                        if reference.get_base(self.tidx, refpos) != rfc {
                            return false;
                        }
                        refpos += 1;
                        eidx += 1;
                        continue;
                    }
                    EditKind::Splice { skip_len, .. } => {
                        refpos += skip_len;
                        eidx += 1;
                        continue;
                    }
                    EditKind::RefGap { rdc } => {
                        if seq[self.rdoff + i] != rdc {
                            return false;
                        }
                        i += 1;
                        eidx += 1;
                        continue;
                    }
                    EditKind::Mismatch { rdc, rfc } => {
                        if seq[self.rdoff + i] != rdc || reference.get_base(self.tidx, refpos) != rfc
                        {
                            return false;
                        }
                        refpos += 1;
                        i += 1;
                        eidx += 1;
                        continue;
                    }
                }
            }
            if seq[self.rdoff + i] != reference.get_base(self.tidx, refpos) {
                return false;
            }
            refpos += 1;
            i += 1;
        }
        eidx == self.edits.len()
    }
}
