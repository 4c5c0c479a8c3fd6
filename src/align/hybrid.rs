/// Hybrid recursive spliced aligner
///
/// Drives a read (or pair) from seeding through anchor selection and the
/// recursive bidirectional growth that consults, in order: the splice-site
/// database, local FM-index tiles, the global FM index, and direct
/// extension with a read-skip fallback.
use std::rc::Rc;

use crate::align::arena::SharedTempVars;
use crate::align::coords::{resolve_global, resolve_local, Coord};
use crate::align::edit::{EditKind, SpliceDir};
use crate::align::hit::{GenomeHit, MIN_ANCHOR_LEN, MIN_ANCHOR_LEN_NONCAN};
use crate::align::scoring::Scoring;
use crate::align::seed::{global_search, local_search, partial_search, HitType, ReadBwtHits};
use crate::align::sink::{AlnRes, AlnSink, ReportingParams};
use crate::align::Read;
use crate::index::GenomeIndex;
use crate::junction::{SpliceSite, SpliceSiteDB};
use crate::params::Parameters;
use crate::stats::SearchMetrics;

/// Exonic alignments prefer loci with splice sites within this flank.
const MAX_EXON_SIZE: u64 = 2000;

/// Per-worker aligner configuration (library layout included; nothing here
/// is global state).
#[derive(Debug, Clone)]
pub struct AlignerConfig {
    pub min_intron_len: u64,
    pub max_intron_len: u64,
    pub secondary: bool,
    pub no_spliced_alignment: bool,
    pub mate1_fw: bool,
    pub mate2_fw: bool,
    pub khits: usize,
    /// Novel splice sites are reused only across reads at least this far
    /// apart in input order
    pub thread_rids_mindist: u64,
}

impl AlignerConfig {
    pub fn from_params(params: &Parameters) -> Self {
        Self {
            min_intron_len: params.min_intron_len,
            max_intron_len: params.max_intron_len,
            secondary: params.secondary,
            no_spliced_alignment: params.no_spliced_alignment,
            mate1_fw: params.mate1_fw,
            mate2_fw: params.mate2_fw,
            khits: params.khits,
            thread_rids_mindist: 0,
        }
    }
}

/// One worker's spliced aligner. Owns all per-read state and scratch; the
/// index, splice DB, and scoring are shared immutable.
pub struct SplicedAligner<'a> {
    index: &'a GenomeIndex,
    ssdb: &'a SpliceSiteDB,
    scoring: &'a Scoring,
    cfg: AlignerConfig,
    pub metrics: SearchMetrics,
    tmp: SharedTempVars,

    reads: [Option<Rc<Read>>; 2],
    paired: bool,
    nofw: [bool; 2],
    norc: [bool; 2],
    minsc: [i64; 2],
    hits: [[ReadBwtHits; 2]; 2],
    sink: AlnSink,

    genome_hits: Vec<GenomeHit>,
    genome_hits_done: Vec<bool>,
    // Depth-indexed scratch so each recursion frame reuses its own arrays.
    coords_stack: Vec<Vec<Coord>>,
    local_hits_stack: Vec<Vec<GenomeHit>>,
    splice_sites_stack: Vec<Vec<SpliceSite>>,
    hits_searched: [Vec<GenomeHit>; 2],
    max_localindexatts: u64,
}

impl<'a> SplicedAligner<'a> {
    pub fn new(
        index: &'a GenomeIndex,
        ssdb: &'a SpliceSiteDB,
        scoring: &'a Scoring,
        cfg: AlignerConfig,
    ) -> Self {
        let khits = cfg.khits;
        Self {
            index,
            ssdb,
            scoring,
            cfg,
            metrics: SearchMetrics::new(),
            tmp: SharedTempVars::new(),
            reads: [None, None],
            paired: false,
            nofw: [false; 2],
            norc: [false; 2],
            minsc: [0; 2],
            hits: Default::default(),
            sink: AlnSink::new(ReportingParams {
                khits,
                secondary: false,
            }),
            genome_hits: Vec::new(),
            genome_hits_done: Vec::new(),
            coords_stack: Vec::new(),
            local_hits_stack: Vec::new(),
            splice_sites_stack: Vec::new(),
            hits_searched: [Vec::new(), Vec::new()],
            max_localindexatts: 10,
        }
    }

    pub fn init_read(&mut self, rd: Read, nofw: bool, norc: bool, minsc: i64) {
        let len = rd.len();
        self.reads = [Some(Rc::new(rd)), None];
        self.paired = false;
        self.nofw = [nofw, true];
        self.norc = [norc, true];
        self.minsc = [minsc, i64::MAX];
        for fwi in 0..2 {
            self.hits[0][fwi].init(fwi == 0, len);
        }
        self.reset_search_state();
    }

    pub fn init_pair(
        &mut self,
        rd1: Read,
        rd2: Read,
        nofw: [bool; 2],
        norc: [bool; 2],
        minsc: [i64; 2],
    ) {
        let lens = [rd1.len(), rd2.len()];
        self.reads = [Some(Rc::new(rd1)), Some(Rc::new(rd2))];
        self.paired = true;
        self.nofw = nofw;
        self.norc = norc;
        self.minsc = minsc;
        for rdi in 0..2 {
            for fwi in 0..2 {
                self.hits[rdi][fwi].init(fwi == 0, lens[rdi]);
            }
        }
        self.reset_search_state();
    }

    fn reset_search_state(&mut self) {
        self.sink = AlnSink::new(ReportingParams {
            khits: self.cfg.khits,
            secondary: self.cfg.secondary,
        });
        self.genome_hits.clear();
        self.genome_hits_done.clear();
        self.hits_searched[0].clear();
        self.hits_searched[1].clear();
        self.max_localindexatts = self.metrics.localindexatts + 10;
    }

    pub fn sink(&self) -> &AlnSink {
        &self.sink
    }

    pub fn read_rc(&self, rdi: usize) -> Rc<Read> {
        Rc::clone(self.reads[rdi].as_ref().expect("read initialized"))
    }

    /// Align the read (or pair) end to end; results accumulate in the sink.
    pub fn go(&mut self) {
        let mut found = [true, self.paired];
        while let Some((rdi, fw)) = self.next_partial() {
            found[rdi] = self.align_strand(rdi, fw);
            if !found[0] && !found[1] {
                break;
            }
            if self.paired {
                self.pair_reads();
            }
        }

        // No concordant pair but one end aligned: use it as an anchor for a
        // local search on the other end's expected region.
        if self.paired
            && self.sink.concordant_pairs().is_empty()
            && (self.sink.best_unp(0) >= self.minsc[0] || self.sink.best_unp(1) >= self.minsc[1])
        {
            let mut mate_found = false;
            for rdi in 0..2 {
                let anchors: Vec<(bool, usize, u64)> = self
                    .sink
                    .results(rdi)
                    .iter()
                    .map(|r| (r.fw, r.tidx, r.toff))
                    .collect();
                for (fw, tidx, toff) in anchors {
                    mate_found |= self.align_mate(rdi, fw, tidx, toff);
                }
            }
            if mate_found {
                self.pair_reads();
            }
        }
    }

    /// Ceiling of a score deficit in units of the worst mismatch penalty.
    fn max_mismatches_for(&self, best_score: i64) -> usize {
        let deficit = (-best_score).max(0);
        ((deficit + self.scoring.mmp_max() - 1) / self.scoring.mmp_max()) as usize
    }

    /// Pick the (read, strand) with the best search score; an unstarted
    /// strand always wins.
    fn pick_next_read_to_search(&self) -> Option<(usize, bool)> {
        let mut best: Option<(usize, bool)> = None;
        let mut max_score = i64::MIN;
        let nrd = if self.paired { 2 } else { 1 };
        for rdi in 0..nrd {
            for fwi in 0..2 {
                if (fwi == 0 && self.nofw[rdi]) || (fwi == 1 && self.norc[rdi]) {
                    continue;
                }
                if self.hits[rdi][fwi].done() {
                    continue;
                }
                let mut score = self.hits[rdi][fwi].search_score(self.index.min_k);
                if self.hits[rdi][fwi].cur == 0 {
                    score = i64::MAX;
                }
                if score > max_score {
                    max_score = score;
                    best = Some((rdi, fwi == 0));
                }
            }
        }
        best
    }

    /// Run one more partial search on the most promising strand; returns the
    /// strand once its seeding is complete and worth aligning.
    fn next_partial(&mut self) -> Option<(usize, bool)> {
        let index = self.index;
        while let Some((rdi, fw)) = self.pick_next_read_to_search() {
            let fwi = if fw { 0 } else { 1 };
            if !self.cfg.secondary {
                let num_searched = self.hits[rdi][fwi].num_actual_partial_search();
                let best_score = self.sink.best_unp(rdi);
                if best_score >= self.minsc[rdi] {
                    // Stop seeding once more attempts cannot beat the best.
                    let maxmm = self.max_mismatches_for(best_score);
                    if num_searched > maxmm + self.sink.best_spliced_unp(rdi) + 1 {
                        self.hits[rdi][fwi].set_done();
                        if self.paired {
                            if self.sink.best_unp(1 - rdi) >= self.minsc[1 - rdi]
                                && !self.sink.concordant_pairs().is_empty()
                            {
                                return None;
                            }
                            continue;
                        } else {
                            return None;
                        }
                    }
                }
                let rc = &self.hits[rdi][1 - fwi];
                if rc.done()
                    && best_score < self.minsc[rdi]
                    && num_searched > rc.num_actual_partial_search() + 1
                {
                    self.hits[rdi][fwi].set_done();
                    return None;
                }
            }

            let rd = Rc::clone(self.reads[rdi].as_ref().expect("read initialized"));
            let mut pseudogene_stop = true;
            let mut anchor_stop = true;
            let state = &mut self.hits[rdi][fwi];
            partial_search(
                &index.global,
                &rd,
                fw,
                index.min_k,
                state,
                &mut pseudogene_stop,
                &mut anchor_stop,
            );
            #[cfg(debug_assertions)]
            debug_assert!(state.rep_ok());
            if state.done() {
                return Some((rdi, fw));
            }
            // Step over the base that collapsed the interval; pseudogene
            // stops re-search the same offset instead.
            if !pseudogene_stop && state.cur + 1 < state.len {
                state.cur += 1;
            }
            if anchor_stop {
                state.set_done();
                return Some((rdi, fw));
            }
        }
        None
    }

    /// Turn a finished seeding pass into anchors and run the hybrid search.
    fn align_strand(&mut self, rdi: usize, fw: bool) -> bool {
        let fwi = if fw { 0 } else { 1 };
        let rp = self.sink.reporting_params();
        debug_assert!(self.hits[rdi][fwi].done());
        let (min_width, _) = self.hits[rdi][fwi].min_width();
        if min_width > (rp.khits * 2) as u64 {
            return false;
        }

        let mut best_score = self.sink.best_unp(rdi);
        let num_spliced = self.sink.best_spliced_unp(rdi);
        if best_score < self.minsc[rdi] {
            best_score = self.minsc[rdi];
        }
        let maxmm = self.max_mismatches_for(best_score);
        let num_actual = self.hits[rdi][fwi].num_actual_partial_search();
        if !self.cfg.secondary && num_actual > maxmm + num_spliced + 1 {
            return true;
        }

        let num_hits = self.get_anchor_hits(rdi, fw, rp.khits);
        if num_hits == 0 {
            return false;
        }

        // Per-read local-index attempt budget, scaled by the score floor.
        let per_anchor = ((-self.minsc[rdi]).max(0) / self.scoring.mmp_max()) as u64;
        let mut add = per_anchor * num_hits as u64;
        if self.cfg.secondary {
            add *= 2;
        }
        self.max_localindexatts = self.metrics.localindexatts + add.max(10);

        self.hybrid_search(rdi, fw);
        true
    }

    /// Choose up to `maxsize` anchor hits from the finished partial-hit
    /// list, best slots first, deduplicating placements of the same locus.
    fn get_anchor_hits(&mut self, rdi: usize, fw: bool, maxsize: usize) -> usize {
        let index = self.index;
        let fwi = if fw { 0 } else { 1 };
        let read_len = self.hits[rdi][fwi].len;
        self.genome_hits.clear();
        let nslots = self.hits[rdi][fwi].partial_hits.len();
        let rd = Rc::clone(self.reads[rdi].as_ref().expect("read initialized"));

        for _ in 0..nslots {
            // Best remaining slot: anchor > pseudogene > candidate, then
            // fewer SA elements, then longer.
            let mut hj: Option<usize> = None;
            {
                let slots = &self.hits[rdi][fwi].partial_hits;
                for (hk, h) in slots.iter().enumerate() {
                    if h.is_empty() || h.anchor_examined {
                        continue;
                    }
                    match hj {
                        None => hj = Some(hk),
                        Some(j) => {
                            let cur = &slots[j];
                            let better = if h.hit_type == cur.hit_type {
                                h.size() < cur.size()
                                    || (h.size() == cur.size() && h.len > cur.len)
                            } else {
                                h.hit_type > cur.hit_type
                            };
                            if better {
                                hj = Some(hk);
                            }
                        }
                    }
                }
            }
            let Some(hj) = hj else { break };

            let (top, bot, bwoff, hlen, hit_type) = {
                let h = &self.hits[rdi][fwi].partial_hits[hj];
                (h.top, h.bot, h.bwoff, h.len, h.hit_type)
            };
            let rdoff = read_len - bwoff - hlen;
            let mut coords = Vec::new();
            let mut straddled = false;
            resolve_global(
                &index.global,
                top,
                bot,
                fw,
                bot - top,
                rdoff,
                hlen,
                &mut coords,
                &mut self.metrics,
                false,
                &mut straddled,
            );
            {
                let h = &mut self.hits[rdi][fwi].partial_hits[hj];
                h.anchor_examined = true;
                h.coords = coords.clone();
            }
            if coords.is_empty() {
                continue;
            }

            let existing = self.genome_hits.len();
            for coord in &coords {
                let len = if straddled { 1 } else { hlen };
                let mut overlapped = false;
                for gh in self.genome_hits[..existing].iter_mut() {
                    if gh.tidx != coord.tidx || gh.fw != coord.fw {
                        continue;
                    }
                    let proj1 = gh.toff + (read_len - gh.rdoff) as u64;
                    let proj2 = coord.toff + (read_len - rdoff) as u64;
                    if proj1.abs_diff(proj2) <= self.cfg.max_intron_len {
                        overlapped = true;
                        gh.hitcount += 1;
                        break;
                    }
                }
                if !overlapped {
                    let mut gh = GenomeHit::new(
                        coord.fw,
                        rdoff,
                        len,
                        0,
                        0,
                        coord.tidx,
                        coord.toff,
                        &self.tmp.pool,
                    );
                    gh.calculate_score(&rd, self.scoring, self.cfg.max_intron_len);
                    self.genome_hits.push(gh);
                }
                if hit_type == HitType::Candidate && self.genome_hits.len() >= maxsize {
                    break;
                }
            }
            if hit_type == HitType::Candidate && self.genome_hits.len() >= maxsize {
                break;
            }
        }
        self.genome_hits.len()
    }

    /// Extend each anchor without mismatches, then recurse on anchors in
    /// (hitcount, length) order.
    fn hybrid_search(&mut self, rdi: usize, _fw: bool) {
        self.metrics.localatts += 1;
        let index = self.index;
        let sc = self.scoring;
        let rd = Rc::clone(self.reads[rdi].as_ref().expect("read initialized"));

        for i in 0..self.genome_hits.len() {
            let gh = &mut self.genome_hits[i];
            gh.extend(
                &rd,
                &index.reference,
                sc,
                index.min_k_local,
                self.cfg.max_intron_len,
                usize::MAX,
                usize::MAX,
                0,
                &mut self.tmp,
            );
        }

        self.genome_hits_done.clear();
        self.genome_hits_done.resize(self.genome_hits.len(), false);
        loop {
            let mut hj: Option<usize> = None;
            for hk in 0..self.genome_hits.len() {
                if self.genome_hits_done[hk] {
                    continue;
                }
                match hj {
                    None => hj = Some(hk),
                    Some(j) => {
                        let a = &self.genome_hits[hk];
                        let b = &self.genome_hits[j];
                        if a.hitcount > b.hitcount
                            || (a.hitcount == b.hitcount && a.len > b.len)
                        {
                            hj = Some(hk);
                        }
                    }
                }
            }
            let Some(hj) = hj else { break };
            self.metrics.anchoratts += 1;
            let gh = self.genome_hits[hj].clone();
            self.hybrid_search_recur(rdi, &gh, gh.rdoff, gh.len, 0);
            self.genome_hits_done[hj] = true;
        }
    }

    /// Recursive bidirectional growth. `[hitoff, hitoff+hitlen)` is the
    /// committed read window containing the hit.
    pub fn hybrid_search_recur(
        &mut self,
        rdi: usize,
        hit: &GenomeHit,
        hitoff: usize,
        hitlen: usize,
        dep: usize,
    ) -> i64 {
        while self.coords_stack.len() <= dep {
            self.coords_stack.push(Vec::new());
            self.local_hits_stack.push(Vec::new());
            self.splice_sites_stack.push(Vec::new());
        }
        let mut coords = std::mem::take(&mut self.coords_stack[dep]);
        let mut local_hits = std::mem::take(&mut self.local_hits_stack[dep]);
        let mut splice_sites = std::mem::take(&mut self.splice_sites_stack[dep]);
        let result = self.hybrid_search_recur_inner(
            rdi,
            hit,
            hitoff,
            hitlen,
            dep,
            &mut coords,
            &mut local_hits,
            &mut splice_sites,
        );
        self.coords_stack[dep] = coords;
        self.local_hits_stack[dep] = local_hits;
        self.splice_sites_stack[dep] = splice_sites;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn hybrid_search_recur_inner(
        &mut self,
        rdi: usize,
        hit: &GenomeHit,
        hitoff: usize,
        hitlen: usize,
        dep: usize,
        coords: &mut Vec<Coord>,
        local_hits: &mut Vec<GenomeHit>,
        splice_sites: &mut Vec<SpliceSite>,
    ) -> i64 {
        let mut maxsc = i64::MIN;
        self.metrics.localsearchrecur += 1;
        let index = self.index;
        let sc = self.scoring;
        let rd = Rc::clone(self.reads[rdi].as_ref().expect("read initialized"));
        let rdlen = rd.len();
        let min_intron = self.cfg.min_intron_len;
        let max_intron = self.cfg.max_intron_len;
        let no_spliced = self.cfg.no_spliced_alignment;

        if hit.score < self.minsc[rdi] {
            return maxsc;
        }

        // Memoize fully-committed hits per read.
        if hitoff == hit.rdoff - hit.trim5 && hitlen == hit.len + hit.trim5 + hit.trim3 {
            if self.is_searched(rdi, hit) {
                return maxsc;
            }
            self.add_searched(rdi, hit);
        }

        debug_assert!(hitoff + hitlen <= rdlen);

        if hitoff == 0 && hitlen == rdlen {
            // (A) fully covered: attach extra DB splices, then report.
            if self.redundant(rdi, hit) {
                return maxsc;
            }
            if self.ssdb.is_empty() {
                if self.report_hit(rdi, hit) {
                    // Sink saturated; nothing more to produce.
                }
                return maxsc.max(hit.score);
            }

            let mut best_score = hit.score;
            local_hits.clear();
            local_hits.push(hit.clone());
            let mut anchors_added: Vec<usize> = vec![0];

            let min_match_len = index.min_k;
            let (_, fraglen, left) = hit.get_left();
            if fraglen >= min_match_len
                && left >= min_match_len as u64
                && hit.trim5 == 0
                && !no_spliced
            {
                self.ssdb.get_left_splice_sites(
                    hit.tidx,
                    left + min_match_len as u64,
                    min_match_len as u64,
                    splice_sites,
                );
                for ss in splice_sites.clone() {
                    if !ss.from_file && ss.read_id + self.cfg.thread_rids_mindist > rd.rdid {
                        continue;
                    }
                    if left + fraglen as u64 - 1 < ss.right() {
                        continue;
                    }
                    // Ref offset where the attached exon would end.
                    let frag2off = ss.left() as i64 + left as i64 - ss.right() as i64;
                    if frag2off < 0 {
                        continue;
                    }
                    let frag2off = frag2off as u64;
                    let mut temp = GenomeHit::new(
                        hit.fw,
                        0,
                        hitoff,
                        0,
                        0,
                        hit.tidx,
                        frag2off + 1,
                        &self.tmp.pool,
                    );
                    temp.calculate_score(&rd, sc, max_intron);
                    if !temp.compatible_with(hit, min_intron, max_intron, no_spliced) {
                        continue;
                    }
                    let combine_minsc = self.minsc[rdi].max(best_score);
                    let combined = temp.combine_with(
                        hit,
                        &rd,
                        &index.reference,
                        sc,
                        combine_minsc,
                        min_intron,
                        max_intron,
                        1,
                        1,
                        Some(&ss),
                        no_spliced,
                        &mut self.tmp,
                    );
                    let gate = combine_minsc.max(self.sink.best_unp(rdi));
                    let (left_anchor_len, nedits) = temp.get_left_anchor();
                    if combined
                        && temp.score >= gate
                        && nedits <= left_anchor_len / 4
                        && !self.redundant(rdi, &temp)
                    {
                        if temp.score > best_score {
                            best_score = temp.score;
                        }
                        local_hits.push(temp);
                        anchors_added.push(1);
                    }
                }
            }

            let num_before_right = local_hits.len();
            for i in 0..num_before_right {
                let (fragoff, fraglen, right) = local_hits[i].get_right();
                if local_hits[i].score < best_score {
                    continue;
                }
                if fraglen < min_match_len || local_hits[i].trim3 != 0 || no_spliced {
                    continue;
                }
                if right + (fraglen as u64) < min_match_len as u64 {
                    continue;
                }
                self.ssdb.get_right_splice_sites(
                    local_hits[i].tidx,
                    right + fraglen as u64 - min_match_len as u64,
                    min_match_len as u64,
                    splice_sites,
                );
                for ss in splice_sites.clone() {
                    let can_hit = local_hits[i].clone();
                    if !ss.from_file && ss.read_id + self.cfg.thread_rids_mindist > rd.rdid {
                        continue;
                    }
                    if right > ss.left() {
                        continue;
                    }
                    let frag2off = ss.right() - ss.left() + right + fraglen as u64 - 1;
                    let mut temp = GenomeHit::new(
                        can_hit.fw,
                        fragoff + fraglen,
                        rdlen - fragoff - fraglen,
                        0,
                        0,
                        can_hit.tidx,
                        frag2off,
                        &self.tmp.pool,
                    );
                    temp.calculate_score(&rd, sc, max_intron);
                    if !can_hit.compatible_with(&temp, min_intron, max_intron, no_spliced) {
                        continue;
                    }
                    let mut combined_hit = can_hit;
                    let combine_minsc = self.minsc[rdi].max(best_score);
                    let combined = combined_hit.combine_with(
                        &temp,
                        &rd,
                        &index.reference,
                        sc,
                        combine_minsc,
                        min_intron,
                        max_intron,
                        1,
                        1,
                        Some(&ss),
                        no_spliced,
                        &mut self.tmp,
                    );
                    let gate = combine_minsc.max(self.sink.best_unp(rdi));
                    let (right_anchor_len, nedits) = combined_hit.get_right_anchor();
                    if combined
                        && combined_hit.score >= gate
                        && nedits <= right_anchor_len / 4
                        && !self.redundant(rdi, &combined_hit)
                    {
                        if combined_hit.score > best_score {
                            best_score = combined_hit.score;
                        }
                        local_hits.push(combined_hit);
                        anchors_added.push(anchors_added[i] + 1);
                    }
                }
            }

            let most_added = *anchors_added.last().unwrap_or(&0);
            for (i, can_hit) in local_hits.iter().enumerate() {
                if !self.cfg.secondary && can_hit.score < best_score {
                    continue;
                }
                if anchors_added[i] < most_added {
                    continue;
                }
                if !self.redundant(rdi, can_hit) {
                    let can_hit = can_hit.clone();
                    self.report_hit(rdi, &can_hit);
                    maxsc = maxsc.max(can_hit.score);
                }
            }
            return maxsc;
        }

        let left_side = hitoff > 0 && (hitoff + hitlen == rdlen || 2 * hitoff < rdlen - hitlen);
        if left_side {
            // (B) grow leftward.
            if !self.ssdb.is_empty() {
                let (fragoff, fraglen, left) = hit.get_left();
                let mml = index.min_k_local;
                if fraglen >= mml && left >= mml as u64 && !no_spliced {
                    self.ssdb.get_left_splice_sites(
                        hit.tidx,
                        left + mml as u64,
                        (mml + mml.min(fragoff)) as u64,
                        splice_sites,
                    );
                    for ss in splice_sites.clone() {
                        if !ss.from_file && ss.read_id + self.cfg.thread_rids_mindist > rd.rdid {
                            continue;
                        }
                        if left + fraglen as u64 - 1 < ss.right() {
                            continue;
                        }
                        let frag2off = ss.left() as i64 + left as i64 - ss.right() as i64;
                        if frag2off + 1 < fragoff as i64 {
                            continue;
                        }
                        let frag2off = frag2off as u64;
                        let mut temp = GenomeHit::new(
                            hit.fw,
                            0,
                            fragoff,
                            0,
                            0,
                            hit.tidx,
                            frag2off + 1 - fragoff as u64,
                            &self.tmp.pool,
                        );
                        temp.calculate_score(&rd, sc, max_intron);
                        if !temp.compatible_with(hit, min_intron, max_intron, no_spliced) {
                            continue;
                        }
                        let combined = temp.combine_with(
                            hit,
                            &rd,
                            &index.reference,
                            sc,
                            self.minsc[rdi],
                            min_intron,
                            max_intron,
                            1,
                            1,
                            Some(&ss),
                            no_spliced,
                            &mut self.tmp,
                        );
                        let gate = self.gate(rdi);
                        let (left_anchor_len, nedits) = temp.get_left_anchor();
                        if combined && temp.score >= gate && nedits <= left_anchor_len / 4 {
                            let r = self.hybrid_search_recur(
                                rdi,
                                &temp.clone(),
                                temp.rdoff,
                                temp.len + temp.trim3,
                                dep + 1,
                            );
                            maxsc = maxsc.max(r);
                        }
                    }
                }
            }

            // Skip the local indexes when direct extension can already reach
            // the read start.
            let mut use_localindex = true;
            if hitoff == hit.rdoff && hitoff <= index.min_k {
                let mut probe = hit.clone();
                probe.extend(
                    &rd,
                    &index.reference,
                    sc,
                    index.min_k_local,
                    max_intron,
                    usize::MAX,
                    0,
                    1,
                    &mut self.tmp,
                );
                if probe.rdoff == 0 {
                    use_localindex = false;
                }
            }

            let mut tile_opt = index.get_local(hit.tidx, hit.toff);
            let mut success = false;
            let mut first = true;
            let mut count = 0usize;
            let max_count = 2usize;
            let prev_score = hit.score;
            local_hits.clear();
            while !success && count < max_count && use_localindex {
                count += 1;
                if self.metrics.localindexatts >= self.max_localindexatts {
                    break;
                }
                if first {
                    first = false;
                } else {
                    tile_opt = tile_opt.and_then(|t| index.prev_local(t));
                }
                let Some(tile) = tile_opt else { break };
                if tile.is_empty() {
                    break;
                }

                let mut extlen = 0usize;
                let mut top = 0u64;
                let mut bot = 0u64;
                let mut nelt = u64::MAX;
                let mut no_extension = false;
                let mut unique_stop = false;
                let mut extoff = hitoff - 1;
                if extoff > 0 {
                    extoff -= 1;
                }
                if extoff < MIN_ANCHOR_LEN {
                    extoff = MIN_ANCHOR_LEN;
                }
                while extoff < rdlen {
                    unique_stop = true;
                    self.metrics.localindexatts += 1;
                    let (n, el, t, b) = local_search(
                        tile,
                        &rd,
                        hit.fw,
                        extoff,
                        index.min_k_local,
                        usize::MAX,
                        &mut unique_stop,
                    );
                    nelt = n;
                    extlen = el;
                    top = t;
                    bot = b;
                    if extoff + 1 - extlen >= hitoff {
                        no_extension = true;
                        break;
                    }
                    if nelt <= 5 {
                        break;
                    }
                    extoff += 1;
                }

                if nelt > 0 && nelt <= 5 && extlen >= MIN_ANCHOR_LEN && !no_extension {
                    resolve_local(
                        tile,
                        top,
                        bot,
                        hit.fw,
                        extoff + 1 - extlen,
                        extlen,
                        coords,
                        &mut self.metrics,
                    );
                    coords.sort();
                    for ci in (0..coords.len()).rev() {
                        let coord = coords[ci];
                        let mut temp = GenomeHit::new(
                            coord.fw,
                            extoff + 1 - extlen,
                            extlen,
                            0,
                            0,
                            coord.tidx,
                            coord.toff,
                            &self.tmp.pool,
                        );
                        temp.calculate_score(&rd, sc, max_intron);
                        if !temp.compatible_with(hit, min_intron, max_intron, no_spliced) {
                            if count == 1 {
                                continue;
                            } else {
                                break;
                            }
                        }
                        if unique_stop {
                            temp.extend(
                                &rd,
                                &index.reference,
                                sc,
                                index.min_k_local,
                                max_intron,
                                usize::MAX,
                                0,
                                0,
                                &mut self.tmp,
                            );
                        }
                        let combined = temp.combine_with(
                            hit,
                            &rd,
                            &index.reference,
                            sc,
                            self.minsc[rdi],
                            min_intron,
                            max_intron,
                            MIN_ANCHOR_LEN,
                            MIN_ANCHOR_LEN_NONCAN,
                            None,
                            no_spliced,
                            &mut self.tmp,
                        );
                        let gate = self.gate(rdi);
                        if combined && temp.score >= gate {
                            if temp.score >= prev_score - sc.mmp_max() {
                                let r = self.hybrid_search_recur(
                                    rdi,
                                    &temp.clone(),
                                    temp.rdoff,
                                    temp.len + temp.trim3,
                                    dep + 1,
                                );
                                maxsc = maxsc.max(r);
                            } else {
                                local_hits.push(temp);
                            }
                        }
                    }
                }

                if maxsc >= prev_score - sc.mmp_max() {
                    success = true;
                }
                let exhausted = self.metrics.localindexatts >= self.max_localindexatts
                    || count == max_count
                    || tile_opt.map_or(true, |t| index.prev_local(t).is_none());
                if !success && exhausted {
                    for ti in 0..local_hits.len() {
                        let temp = local_hits[ti].clone();
                        if temp.score >= self.gate(rdi) {
                            let r = self.hybrid_search_recur(
                                rdi,
                                &temp,
                                temp.rdoff,
                                temp.len + temp.trim3,
                                dep + 1,
                            );
                            maxsc = maxsc.max(r);
                        }
                    }
                }
            }

            if !success {
                // Global search for long introns.
                if hitoff > index.min_k
                    && self.metrics.localindexatts < self.max_localindexatts
                {
                    let extoff = hitoff - 1;
                    let mut unique_stop = true;
                    let (nelt, extlen, top, bot) =
                        global_search(&index.global, &rd, hit.fw, extoff, index.min_k, &mut unique_stop);
                    if nelt > 0 && nelt <= 5 && extlen >= index.min_k {
                        let mut straddled = false;
                        resolve_global(
                            &index.global,
                            top,
                            bot,
                            hit.fw,
                            nelt,
                            extoff + 1 - extlen,
                            extlen,
                            coords,
                            &mut self.metrics,
                            true,
                            &mut straddled,
                        );
                        coords.sort();
                        for ci in (0..coords.len()).rev() {
                            let coord = coords[ci];
                            let mut temp = GenomeHit::new(
                                coord.fw,
                                extoff + 1 - extlen,
                                extlen,
                                0,
                                0,
                                coord.tidx,
                                coord.toff,
                                &self.tmp.pool,
                            );
                            temp.calculate_score(&rd, sc, max_intron);
                            if !temp.compatible_with(hit, min_intron, max_intron, no_spliced) {
                                continue;
                            }
                            if unique_stop {
                                temp.extend(
                                    &rd,
                                    &index.reference,
                                    sc,
                                    index.min_k_local,
                                    max_intron,
                                    usize::MAX,
                                    0,
                                    0,
                                    &mut self.tmp,
                                );
                            }
                            let combined = temp.combine_with(
                                hit,
                                &rd,
                                &index.reference,
                                sc,
                                self.minsc[rdi],
                                min_intron,
                                max_intron,
                                MIN_ANCHOR_LEN,
                                MIN_ANCHOR_LEN_NONCAN,
                                None,
                                no_spliced,
                                &mut self.tmp,
                            );
                            if combined && temp.score >= self.gate(rdi) {
                                let r = self.hybrid_search_recur(
                                    rdi,
                                    &temp.clone(),
                                    temp.rdoff,
                                    temp.len + temp.trim3,
                                    dep + 1,
                                );
                                maxsc = maxsc.max(r);
                            }
                        }
                    }
                }

                // Direct extension with a mismatch allowance.
                let mut temp = hit.clone();
                let minsc0 = self.minsc[rdi];
                let mm = ((temp.score - minsc0).max(0) / sc.mmp_max()) as usize;
                let mut num_mm_allowed = 1usize;
                if hitoff <= index.min_k_local {
                    num_mm_allowed = temp.rdoff.min(mm);
                }
                self.metrics.localextatts += 1;
                let (leftext, _) = temp.extend(
                    &rd,
                    &index.reference,
                    sc,
                    index.min_k_local,
                    max_intron,
                    usize::MAX,
                    0,
                    num_mm_allowed,
                    &mut self.tmp,
                );
                let gate = self.gate(rdi);
                if temp.score >= gate && leftext >= index.min_k_local.min(hit.rdoff) {
                    let r = self.hybrid_search_recur(
                        rdi,
                        &temp.clone(),
                        temp.rdoff,
                        temp.len + temp.trim3,
                        dep + 1,
                    );
                    maxsc = maxsc.max(r);
                } else if hitoff > index.min_k_local {
                    // Skip some read bases and retry.
                    let jumplen = if hitoff > index.min_k {
                        index.min_k
                    } else {
                        index.min_k_local
                    };
                    let expected_score = hit.score
                        - ((hit.rdoff - hitoff) / jumplen) as i64 * sc.mmp_max()
                        - sc.mmp_max();
                    if expected_score >= gate {
                        let r = self.hybrid_search_recur(
                            rdi,
                            hit,
                            hitoff - jumplen,
                            hitlen + jumplen,
                            dep + 1,
                        );
                        maxsc = maxsc.max(r);
                    }
                }
            }
        } else {
            // (C) grow rightward; mirror of (B) using the next tiles and
            // appending combines.
            debug_assert!(hitoff + hitlen < rdlen);
            if !self.ssdb.is_empty() {
                let (fragoff, fraglen, right) = hit.get_right();
                let mml = index.min_k_local;
                if fraglen >= mml && !no_spliced && right + fraglen as u64 >= mml as u64 {
                    let right_unmapped = rdlen - fragoff - fraglen;
                    self.ssdb.get_right_splice_sites(
                        hit.tidx,
                        right + fraglen as u64 - mml as u64,
                        (mml + mml.min(right_unmapped)) as u64,
                        splice_sites,
                    );
                    for ss in splice_sites.clone() {
                        if !ss.from_file && ss.read_id + self.cfg.thread_rids_mindist > rd.rdid {
                            continue;
                        }
                        if right > ss.left() {
                            continue;
                        }
                        let frag2off = ss.right() - ss.left() + right + fraglen as u64 - 1;
                        let mut temp = GenomeHit::new(
                            hit.fw,
                            fragoff + fraglen,
                            rdlen - fragoff - fraglen,
                            0,
                            0,
                            hit.tidx,
                            frag2off,
                            &self.tmp.pool,
                        );
                        temp.calculate_score(&rd, sc, max_intron);
                        if !hit.compatible_with(&temp, min_intron, max_intron, no_spliced) {
                            continue;
                        }
                        let mut combined_hit = hit.clone();
                        let combined = combined_hit.combine_with(
                            &temp,
                            &rd,
                            &index.reference,
                            sc,
                            self.minsc[rdi],
                            min_intron,
                            max_intron,
                            1,
                            1,
                            Some(&ss),
                            no_spliced,
                            &mut self.tmp,
                        );
                        let gate = self.gate(rdi);
                        let (right_anchor_len, nedits) = combined_hit.get_right_anchor();
                        if combined && combined_hit.score >= gate && nedits <= right_anchor_len / 4
                        {
                            let r = self.hybrid_search_recur(
                                rdi,
                                &combined_hit.clone(),
                                combined_hit.rdoff - combined_hit.trim5,
                                combined_hit.len + combined_hit.trim5,
                                dep + 1,
                            );
                            maxsc = maxsc.max(r);
                        }
                    }
                }
            }

            let mut use_localindex = true;
            if hit.len == hitlen && hitoff + hitlen + index.min_k > rdlen {
                let mut probe = hit.clone();
                probe.extend(
                    &rd,
                    &index.reference,
                    sc,
                    index.min_k_local,
                    max_intron,
                    0,
                    usize::MAX,
                    1,
                    &mut self.tmp,
                );
                if probe.rdoff + probe.len == rdlen {
                    use_localindex = false;
                }
            }

            let mut tile_opt = index.get_local(hit.tidx, hit.toff);
            let mut success = false;
            let mut first = true;
            let mut count = 0usize;
            let max_count = 2usize;
            let prev_score = hit.score;
            local_hits.clear();
            while !success && count < max_count && use_localindex {
                count += 1;
                if self.metrics.localindexatts >= self.max_localindexatts {
                    break;
                }
                if first {
                    first = false;
                } else {
                    tile_opt = tile_opt.and_then(|t| index.next_local(t));
                }
                let Some(tile) = tile_opt else { break };
                if tile.is_empty() {
                    break;
                }

                let mut extlen = 0usize;
                let mut top = 0u64;
                let mut bot = 0u64;
                let mut nelt = u64::MAX;
                let mut no_extension = false;
                let mut unique_stop = false;
                let mut extoff = hitoff + hitlen + index.min_k_local;
                if extoff + 1 < rdlen {
                    extoff += 1;
                }
                if extoff >= rdlen {
                    extoff = rdlen - 1;
                }
                let mut max_hit_len = (extoff - hitoff - hitlen).max(index.min_k_local);
                while max_hit_len < extoff + 1 && extoff < rdlen {
                    unique_stop = false;
                    self.metrics.localindexatts += 1;
                    let (n, el, t, b) = local_search(
                        tile,
                        &rd,
                        hit.fw,
                        extoff,
                        index.min_k_local,
                        max_hit_len,
                        &mut unique_stop,
                    );
                    nelt = n;
                    extlen = el;
                    top = t;
                    bot = b;
                    if extoff < hitoff + hitlen {
                        no_extension = true;
                        break;
                    }
                    if nelt <= 5 {
                        break;
                    }
                    if extoff + 1 < rdlen {
                        extoff += 1;
                    } else if extlen < max_hit_len {
                        break;
                    } else {
                        max_hit_len += 1;
                    }
                }

                if nelt > 0 && nelt <= 5 && extlen >= MIN_ANCHOR_LEN && !no_extension {
                    resolve_local(
                        tile,
                        top,
                        bot,
                        hit.fw,
                        extoff + 1 - extlen,
                        extlen,
                        coords,
                        &mut self.metrics,
                    );
                    coords.sort();
                    for ci in 0..coords.len() {
                        let coord = coords[ci];
                        let mut temp = GenomeHit::new(
                            coord.fw,
                            extoff + 1 - extlen,
                            extlen,
                            0,
                            0,
                            coord.tidx,
                            coord.toff,
                            &self.tmp.pool,
                        );
                        temp.calculate_score(&rd, sc, max_intron);
                        if !hit.compatible_with(&temp, min_intron, max_intron, no_spliced) {
                            if count == 1 {
                                continue;
                            } else {
                                break;
                            }
                        }
                        temp.extend(
                            &rd,
                            &index.reference,
                            sc,
                            index.min_k_local,
                            max_intron,
                            0,
                            usize::MAX,
                            0,
                            &mut self.tmp,
                        );
                        let mut combined_hit = hit.clone();
                        let combined = combined_hit.combine_with(
                            &temp,
                            &rd,
                            &index.reference,
                            sc,
                            self.minsc[rdi],
                            min_intron,
                            max_intron,
                            MIN_ANCHOR_LEN,
                            MIN_ANCHOR_LEN_NONCAN,
                            None,
                            no_spliced,
                            &mut self.tmp,
                        );
                        let gate = self.gate(rdi);
                        if combined && combined_hit.score >= gate {
                            if combined_hit.score >= prev_score - sc.mmp_max() {
                                let r = self.hybrid_search_recur(
                                    rdi,
                                    &combined_hit.clone(),
                                    combined_hit.rdoff - combined_hit.trim5,
                                    combined_hit.len + combined_hit.trim5,
                                    dep + 1,
                                );
                                maxsc = maxsc.max(r);
                            } else {
                                local_hits.push(combined_hit);
                            }
                        }
                    }
                }

                if maxsc >= prev_score - sc.mmp_max() {
                    success = true;
                }
                let exhausted = self.metrics.localindexatts >= self.max_localindexatts
                    || count == max_count
                    || tile_opt.map_or(true, |t| index.next_local(t).is_none());
                if !success && exhausted {
                    for ti in 0..local_hits.len() {
                        let temp = local_hits[ti].clone();
                        if temp.score >= self.gate(rdi) {
                            let r = self.hybrid_search_recur(
                                rdi,
                                &temp,
                                temp.rdoff - temp.trim5,
                                temp.len + temp.trim5,
                                dep + 1,
                            );
                            maxsc = maxsc.max(r);
                        }
                    }
                }
            }

            if !success {
                if hitoff + hitlen + index.min_k + 1 < rdlen
                    && self.metrics.localindexatts < self.max_localindexatts
                {
                    let extoff = hitoff + hitlen + index.min_k + 1;
                    let mut unique_stop = true;
                    let (nelt, extlen, top, bot) =
                        global_search(&index.global, &rd, hit.fw, extoff, index.min_k, &mut unique_stop);
                    if nelt > 0 && nelt <= 5 && extlen >= index.min_k {
                        let mut straddled = false;
                        resolve_global(
                            &index.global,
                            top,
                            bot,
                            hit.fw,
                            nelt,
                            extoff + 1 - extlen,
                            extlen,
                            coords,
                            &mut self.metrics,
                            true,
                            &mut straddled,
                        );
                        coords.sort();
                        for ci in 0..coords.len() {
                            let coord = coords[ci];
                            let mut temp = GenomeHit::new(
                                coord.fw,
                                extoff + 1 - extlen,
                                extlen,
                                0,
                                0,
                                coord.tidx,
                                coord.toff,
                                &self.tmp.pool,
                            );
                            temp.calculate_score(&rd, sc, max_intron);
                            if !hit.compatible_with(&temp, min_intron, max_intron, no_spliced) {
                                continue;
                            }
                            temp.extend(
                                &rd,
                                &index.reference,
                                sc,
                                index.min_k_local,
                                max_intron,
                                0,
                                usize::MAX,
                                0,
                                &mut self.tmp,
                            );
                            let mut combined_hit = hit.clone();
                            let combined = combined_hit.combine_with(
                                &temp,
                                &rd,
                                &index.reference,
                                sc,
                                self.minsc[rdi],
                                min_intron,
                                max_intron,
                                MIN_ANCHOR_LEN,
                                MIN_ANCHOR_LEN_NONCAN,
                                None,
                                no_spliced,
                                &mut self.tmp,
                            );
                            if combined && combined_hit.score >= self.gate(rdi) {
                                let r = self.hybrid_search_recur(
                                    rdi,
                                    &combined_hit.clone(),
                                    combined_hit.rdoff - combined_hit.trim5,
                                    combined_hit.len + combined_hit.trim5,
                                    dep + 1,
                                );
                                maxsc = maxsc.max(r);
                            }
                        }
                    }
                }

                let mut temp = hit.clone();
                let minsc0 = self.minsc[rdi];
                let mm = ((temp.score - minsc0).max(0) / sc.mmp_max()) as usize;
                let mut num_mm_allowed = 1usize;
                if rdlen - hitoff - hitlen <= index.min_k_local {
                    num_mm_allowed = (rdlen - temp.rdoff - temp.len).min(mm);
                }
                self.metrics.localextatts += 1;
                let (_, rightext) = temp.extend(
                    &rd,
                    &index.reference,
                    sc,
                    index.min_k_local,
                    max_intron,
                    0,
                    usize::MAX,
                    num_mm_allowed,
                    &mut self.tmp,
                );
                let gate = self.gate(rdi);
                if temp.score >= gate
                    && rightext >= index.min_k_local.min(rdlen - hit.len - hit.rdoff)
                {
                    let r = self.hybrid_search_recur(
                        rdi,
                        &temp.clone(),
                        temp.rdoff - temp.trim5,
                        temp.len + temp.trim5,
                        dep + 1,
                    );
                    maxsc = maxsc.max(r);
                } else if hitoff + hitlen + index.min_k_local < rdlen {
                    let jumplen = if hitoff + hitlen + index.min_k < rdlen {
                        index.min_k
                    } else {
                        index.min_k_local
                    };
                    let expected_score = hit.score
                        - ((hitlen - hit.len) / jumplen) as i64 * sc.mmp_max()
                        - sc.mmp_max();
                    if expected_score >= gate {
                        let r = self.hybrid_search_recur(
                            rdi,
                            hit,
                            hitoff,
                            hitlen + jumplen,
                            dep + 1,
                        );
                        maxsc = maxsc.max(r);
                    }
                }
            }
        }

        maxsc
    }

    /// Score floor for accepting new partial alignments: the configured
    /// minimum, raised to the current best unless secondary alignments are
    /// requested.
    fn gate(&self, rdi: usize) -> i64 {
        let mut gate = self.minsc[rdi];
        if !self.cfg.secondary {
            gate = gate.max(self.sink.best_unp(rdi));
        }
        gate
    }

    /// Use the aligned mate's coordinate to anchor a local search for the
    /// unaligned mate: scan up to two tiles leftward, keep the longest
    /// placements, extend and recurse on each.
    pub fn align_mate(&mut self, rdi: usize, fw: bool, tidx: usize, toff: u64) -> bool {
        debug_assert!(self.paired);
        let index = self.index;
        let sc = self.scoring;
        let ordi = 1 - rdi;
        let ofw = if fw == self.cfg.mate2_fw {
            self.cfg.mate1_fw
        } else {
            self.cfg.mate2_fw
        };
        let ord = Rc::clone(self.reads[ordi].as_ref().expect("mate initialized"));
        let rdlen = ord.len();

        self.genome_hits.clear();
        let mut coords = Vec::new();
        let mut tile_opt = index.get_local(tidx, toff);
        let mut first = true;
        let mut count = 0usize;
        let mut max_hitlen = 0usize;
        while count < 2 {
            count += 1;
            if first {
                first = false;
            } else {
                tile_opt = tile_opt.and_then(|t| index.prev_local(t));
            }
            let Some(tile) = tile_opt else { break };
            if tile.is_empty() {
                break;
            }
            let mut hitoff = rdlen - 1;
            while hitoff + 1 >= index.min_k_local {
                let mut unique_stop = false;
                let (nelt, hitlen, top, bot) = local_search(
                    tile,
                    &ord,
                    ofw,
                    hitoff,
                    index.min_k_local,
                    usize::MAX,
                    &mut unique_stop,
                );
                if nelt > 0 && nelt <= 5 && hitlen > max_hitlen {
                    resolve_local(
                        tile,
                        top,
                        bot,
                        ofw,
                        hitoff + 1 - hitlen,
                        hitlen,
                        &mut coords,
                        &mut self.metrics,
                    );
                    self.genome_hits.clear();
                    for coord in &coords {
                        if self.redundant_coord(ordi, coord.tidx, coord.toff) {
                            continue;
                        }
                        let mut gh = GenomeHit::new(
                            coord.fw,
                            hitoff + 1 - hitlen,
                            hitlen,
                            0,
                            0,
                            coord.tidx,
                            coord.toff,
                            &self.tmp.pool,
                        );
                        gh.calculate_score(&ord, sc, self.cfg.max_intron_len);
                        self.genome_hits.push(gh);
                    }
                    max_hitlen = hitlen;
                }
                if hitlen == 0 {
                    break;
                }
                hitoff -= hitlen - 1;
                if hitoff > 0 {
                    hitoff -= 1;
                } else {
                    break;
                }
            }
        }

        if max_hitlen < index.min_k_local {
            return false;
        }
        self.genome_hits.truncate(5);

        for hi in 0..self.genome_hits.len() {
            self.metrics.anchoratts += 1;
            let mut gh = self.genome_hits[hi].clone();
            gh.extend(
                &ord,
                &index.reference,
                sc,
                index.min_k_local,
                self.cfg.max_intron_len,
                usize::MAX,
                usize::MAX,
                0,
                &mut self.tmp,
            );
            self.hybrid_search_recur(ordi, &gh, gh.rdoff, gh.len, 0);
        }
        true
    }

    /// Pair single-end results into concordant pairs per the library layout.
    pub fn pair_reads(&mut self) -> bool {
        debug_assert!(self.paired);
        fn snapshot(sink: &AlnSink, rdi: usize) -> Vec<(u64, u64, bool, i64, usize)> {
            sink.results(rdi)
                .iter()
                .map(|r| (r.toff, r.right_off, r.fw, r.score, r.tidx))
                .collect()
        }
        let rs1 = snapshot(&self.sink, 0);
        let rs2 = snapshot(&self.sink, 1);

        for i in 0..rs1.len() {
            for j in 0..rs2.len() {
                if self.sink.concordant_pairs().contains(&(i, j)) {
                    continue;
                }
                if self.sink.done_concordant() {
                    return true;
                }
                if rs1[i].4 != rs2[j].4 {
                    continue;
                }
                let (mut left, mut right, fw1) = (rs1[i].0, rs1[i].1, rs1[i].2);
                let (mut left2, mut right2, fw2) = (rs2[j].0, rs2[j].1, rs2[j].2);
                if fw1 == self.cfg.mate1_fw {
                    if fw2 != self.cfg.mate2_fw {
                        continue;
                    }
                } else {
                    if fw2 == self.cfg.mate2_fw {
                        continue;
                    }
                    std::mem::swap(&mut left, &mut left2);
                    std::mem::swap(&mut right, &mut right2);
                }
                if left > left2 || right > right2 {
                    continue;
                }
                if right + self.cfg.max_intron_len < left2 {
                    continue;
                }
                if rs1[i].3 + rs2[j].3 >= self.sink.best_pair() || self.cfg.secondary {
                    self.sink.report_pair(i, j);
                }
            }
        }
        true
    }

    /// Report a full-coverage hit to the sink; novel splice sites feed the
    /// shared database so later reads (and mates) can reuse them.
    fn report_hit(&mut self, rdi: usize, hit: &GenomeHit) -> bool {
        let rd = Rc::clone(self.reads[rdi].as_ref().expect("read initialized"));
        let rdlen = rd.len();
        if hit.rdoff - hit.trim5 > 0 || hit.len + hit.trim5 + hit.trim3 < rdlen {
            return false;
        }
        if hit.score < self.minsc[rdi] {
            return false;
        }

        let mut near_splice_sites = hit.spliced();
        if !self.cfg.no_spliced_alignment {
            if hit.spliced() {
                // Record the discovered splice sites for reuse.
                let mut delta = 0i64;
                for e in hit.edits.iter() {
                    match e.kind {
                        EditKind::Splice { skip_len, dir, .. } => {
                            let left =
                                (hit.toff as i64 + e.pos as i64 + delta - 1) as u64;
                            let right = left + skip_len + 1;
                            let site_fw = match dir {
                                SpliceDir::Forward => hit.fw,
                                SpliceDir::Reverse => !hit.fw,
                                SpliceDir::Unknown => true,
                            };
                            self.ssdb.add(SpliceSite {
                                tidx: hit.tidx,
                                left,
                                right,
                                fw: site_fw,
                                read_id: rd.rdid,
                                from_file: false,
                            });
                            delta += skip_len as i64;
                        }
                        EditKind::ReadGap { .. } => delta += 1,
                        EditKind::RefGap { .. } => delta -= 1,
                        EditKind::Mismatch { .. } => {}
                    }
                }
            } else {
                // Prefer exonic alignments near splice sites over pseudogene
                // copies.
                let right1 = hit.toff;
                let left1 = right1.saturating_sub(MAX_EXON_SIZE);
                let left2 = hit.toff + hit.len as u64 - 1;
                let right2 = left2 + MAX_EXON_SIZE;
                near_splice_sites = self
                    .ssdb
                    .has_splice_sites(hit.tidx, left1, right1, left2, right2, true);
            }
        }

        let res = AlnRes::from_hit(hit, &rd, near_splice_sites);
        self.sink.report(rdi, res)
    }

    /// Alignment with identical placement and edits already reported.
    fn redundant(&self, rdi: usize, hit: &GenomeHit) -> bool {
        for r in self.sink.results(rdi) {
            if r.tidx == hit.tidx
                && r.toff == hit.toff
                && r.fw == hit.fw
                && r.edits.len() == hit.edits.len()
                && r.edits.iter().zip(hit.edits.iter()).all(|(a, b)| a == b)
            {
                return true;
            }
        }
        false
    }

    /// Coordinate falls inside an already-reported alignment's span.
    fn redundant_coord(&self, rdi: usize, tidx: usize, toff: u64) -> bool {
        self.sink
            .results(rdi)
            .iter()
            .any(|r| r.tidx == tidx && toff >= r.toff && toff <= r.right_off)
    }

    fn is_searched(&self, rdi: usize, hit: &GenomeHit) -> bool {
        self.hits_searched[rdi].iter().any(|h| h == hit)
    }

    fn add_searched(&mut self, rdi: usize, hit: &GenomeHit) {
        debug_assert!(!self.is_searched(rdi, hit));
        self.hits_searched[rdi].push(hit.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{encode_base, Reference};
    use clap::Parser;

    fn encode(s: &str) -> Vec<u8> {
        s.bytes().map(encode_base).collect()
    }

    fn read_of(name: &str, s: &str) -> Read {
        let seq = encode(s);
        let qual = vec![b'I'; seq.len()];
        Read::new(name.into(), 0, seq, qual)
    }

    fn params(extra: &[&str]) -> Parameters {
        let mut args = vec![
            "rusplice",
            "--readFilesIn",
            "r.fq",
            "--localIndexLen",
            "1024",
            "--localIndexOverlap",
            "64",
        ];
        args.extend_from_slice(extra);
        Parameters::parse_from(args)
    }

    fn build_index(ref_str: &str, p: &Parameters) -> GenomeIndex {
        let reference = Reference::from_seqs(vec![("chr1".into(), encode(ref_str))]);
        GenomeIndex::build(reference, p).unwrap()
    }

    /// 400 bp with all 12-mers unique; shared by the end-to-end tests.
    const REF400: &str = "TCAGAGGCTCGTACAAACGTATGCCCTAGCTTTTACCACTTAACGCCGTCAAAATGTGCCTATTTTGGAACGAAGGATTCTGAAGTGGGAGGGACATTAGTATGCCCATTATTGGAAACTGACTGTGTATTTCAAAATGCGGGCTCGCGGACTCTTTCAATCCCCTACAGCCTAATTTTAAGCTGAAACTAGGATACCAATGAGGTTGGATTACAGAAAGTTATCCGTTGAACCCCTCACGCCGGATATGGCACAGTCGAGGAAAACGAATCTGCAGTAGTCATTACTATCTGGGCTTTTCTTGCTGCGTCTGAAGTCCTATCACCAGCTTTGCGCTTTAGATGGGCTTAACTCATACCAGTCATATACGGAGGTCGGATTAGTAGGAGACAACATTGTT";

    #[test]
    fn exact_read_aligns_end_to_end() {
        let p = params(&[]);
        let index = build_index(REF400, &p);
        let ssdb = SpliceSiteDB::new();
        let sc = Scoring::from_params(&p);
        let cfg = AlignerConfig::from_params(&p);
        let mut aligner = SplicedAligner::new(&index, &ssdb, &sc, cfg);

        // 28 bp planted at offset 100.
        aligner.init_read(read_of("r1", &REF400[100..128]), false, false, 0);
        aligner.go();
        let best = aligner
            .sink()
            .ranked(0)
            .first()
            .cloned()
            .cloned()
            .expect("alignment reported");
        assert_eq!(best.score, 28 * sc.match_bonus);
        assert_eq!(best.toff, 100);
        assert!(best.edits.is_empty());
        assert!(best.fw);
    }

    #[test]
    fn reverse_complement_read_aligns_rc() {
        let p = params(&[]);
        let index = build_index(REF400, &p);
        let ssdb = SpliceSiteDB::new();
        let sc = Scoring::from_params(&p);
        let cfg = AlignerConfig::from_params(&p);
        let mut aligner = SplicedAligner::new(&index, &ssdb, &sc, cfg);

        let planted = encode(&REF400[60..92]);
        let rc: Vec<u8> = crate::genome::reverse_complement(&planted);
        let rc_str: String =
            rc.iter().map(|&b| crate::genome::decode_base(b) as char).collect();
        aligner.init_read(read_of("r1", &rc_str), false, false, 0);
        aligner.go();
        let best = aligner
            .sink()
            .ranked(0)
            .first()
            .cloned()
            .cloned()
            .expect("alignment reported");
        assert!(!best.fw);
        assert_eq!(best.toff, 60);
        assert!(best.edits.is_empty());
    }

    #[test]
    fn paired_reads_report_concordant_pair() {
        let p = params(&[]);
        let index = build_index(REF400, &p);
        let ssdb = SpliceSiteDB::new();
        let sc = Scoring::from_params(&p);
        let cfg = AlignerConfig::from_params(&p);
        let mut aligner = SplicedAligner::new(&index, &ssdb, &sc, cfg);

        let mate1 = read_of("p/1", &REF400[50..100]);
        let m2_fw = encode(&REF400[200..250]);
        let m2_rc: Vec<u8> = crate::genome::reverse_complement(&m2_fw);
        let m2_str: String = m2_rc
            .iter()
            .map(|&b| crate::genome::decode_base(b) as char)
            .collect();
        let mate2 = read_of("p/2", &m2_str);

        aligner.init_pair(mate1, mate2, [false; 2], [false; 2], [0, 0]);
        aligner.go();
        assert_eq!(aligner.sink().concordant_pairs().len(), 1);
        let (i, j) = aligner.sink().concordant_pairs()[0];
        let r1 = &aligner.sink().results(0)[i];
        let r2 = &aligner.sink().results(1)[j];
        assert!(r1.fw);
        assert!(!r2.fw);
        assert_eq!(r1.toff, 50);
        assert_eq!(r2.toff, 200);
    }

    #[test]
    fn mate_anchored_rescue_aligns_other_end() {
        let p = params(&[]);
        let index = build_index(REF400, &p);
        let ssdb = SpliceSiteDB::new();
        let sc = Scoring::from_params(&p);
        let cfg = AlignerConfig::from_params(&p);
        let mut aligner = SplicedAligner::new(&index, &ssdb, &sc, cfg);

        let mate1 = read_of("p/1", &REF400[50..100]);
        let m2_fw = encode(&REF400[200..250]);
        let m2_rc: Vec<u8> = crate::genome::reverse_complement(&m2_fw);
        let m2_str: String = m2_rc
            .iter()
            .map(|&b| crate::genome::decode_base(b) as char)
            .collect();
        let mate2 = read_of("p/2", &m2_str);
        aligner.init_pair(mate1, mate2, [false; 2], [false; 2], [0, 0]);

        // Drive the rescue path directly from mate1's placement.
        assert!(aligner.align_mate(0, true, 0, 50));
        let results = aligner.sink().results(1);
        assert!(!results.is_empty());
        assert_eq!(results[0].toff, 200);
        assert!(!results[0].fw);
    }

    #[test]
    fn one_mismatch_read_aligns_with_single_edit() {
        let p = params(&[]);
        let ref_str = "TTGACCGTAGGCATCATAAGGCCAATCGCATTGCAAGGCT";
        let index = build_index(ref_str, &p);
        let ssdb = SpliceSiteDB::new();
        let sc = Scoring::from_params(&p);
        let cfg = AlignerConfig::from_params(&p);
        let mut aligner = SplicedAligner::new(&index, &ssdb, &sc, cfg);

        // reference[5..33] with one substitution at read position 14.
        let mut read_str = ref_str[5..33].to_string();
        let orig = read_str.as_bytes()[14];
        let sub = if orig == b'A' { "C" } else { "A" };
        read_str.replace_range(14..15, sub);
        aligner.init_read(read_of("r1", &read_str), false, false, -20);
        aligner.go();
        let best = aligner
            .sink()
            .ranked(0)
            .first()
            .cloned()
            .cloned()
            .expect("alignment reported");
        assert_eq!(best.toff, 5);
        assert_eq!(best.edits.len(), 1);
        assert!(best.edits[0].is_mismatch());
        assert_eq!(best.edits[0].pos, 14);
        assert_eq!(
            best.score,
            27 * sc.match_bonus + sc.mismatch(0, 1, b'I')
        );
    }

    #[test]
    fn dna_mode_never_emits_splices() {
        let p = params(&["--noSplicedAlignment"]);
        let ref_str = "TTGACCGTAGGCATCATAAGGCCAATCGCATTGCAAGGCT";
        let index = build_index(ref_str, &p);
        let ssdb = SpliceSiteDB::new();
        let sc = Scoring::from_params(&p);
        let cfg = AlignerConfig::from_params(&p);
        let mut aligner = SplicedAligner::new(&index, &ssdb, &sc, cfg);

        aligner.init_read(read_of("r1", &ref_str[5..33]), false, false, 0);
        aligner.go();
        for r in aligner.sink().results(0) {
            assert_eq!(r.spliced_count, 0);
        }
        assert!(!aligner.sink().results(0).is_empty());
    }
}
