/// Per-read alignment results and reporting policy
use crate::align::edit::{Edit, EditKind, SpliceDir};
use crate::align::hit::GenomeHit;
use crate::align::Read;

/// Hard cap on retained alignments per mate, as a multiple of `khits`.
const RESULT_CAP_FACTOR: usize = 4;

/// A finalized alignment record for one mate.
#[derive(Debug, Clone, PartialEq)]
pub struct AlnRes {
    pub fw: bool,
    pub tidx: usize,
    pub toff: u64,
    pub score: i64,
    pub splicescore: f64,
    /// Edit script over the aligned window, alignment order
    pub edits: Vec<Edit>,
    pub trim5: usize,
    pub trim3: usize,
    pub read_len: usize,
    pub spliced_count: usize,
    /// Exonic alignment sitting near known/novel splice sites
    pub near_splice_sites: bool,
    /// One past the rightmost aligned reference offset
    pub right_off: u64,
}

impl AlnRes {
    pub fn from_hit(hit: &GenomeHit, read: &Read, near_splice_sites: bool) -> Self {
        Self {
            fw: hit.fw,
            tidx: hit.tidx,
            toff: hit.toff,
            score: hit.score,
            splicescore: hit.splicescore,
            edits: hit.edits.to_vec(),
            trim5: hit.trim5,
            trim3: hit.trim3,
            read_len: read.len(),
            spliced_count: hit.spliced_count(),
            near_splice_sites,
            right_off: hit.right_off(),
        }
    }

    pub fn spliced(&self) -> bool {
        self.spliced_count > 0
    }

    /// Number of mismatches plus gap bases (SAM NM).
    pub fn edit_distance(&self) -> usize {
        self.edits
            .iter()
            .filter(|e| e.is_mismatch() || e.is_gap())
            .count()
    }

    /// Transcription strand implied by the splices, if any ('+'/'-').
    pub fn splice_strand(&self) -> Option<char> {
        for e in &self.edits {
            match e.splice_dir() {
                SpliceDir::Forward => return Some(if self.fw { '+' } else { '-' }),
                SpliceDir::Reverse => return Some(if self.fw { '-' } else { '+' }),
                SpliceDir::Unknown => {}
            }
        }
        None
    }

    /// CIGAR operations implied by the edit script (M/I/D/N plus soft
    /// clips for trims).
    pub fn cigar(&self) -> Vec<(u32, char)> {
        let mut ops: Vec<(u32, char)> = Vec::new();
        let push = |ops: &mut Vec<(u32, char)>, n: u32, op: char| {
            if n == 0 {
                return;
            }
            if let Some(last) = ops.last_mut() {
                if last.1 == op {
                    last.0 += n;
                    return;
                }
            }
            ops.push((n, op));
        };
        let window = self.read_len - self.trim5 - self.trim3;
        push(&mut ops, self.trim5 as u32, 'S');
        let mut last = 0usize;
        let mut i = 0usize;
        while i < self.edits.len() {
            let e = &self.edits[i];
            match e.kind {
                EditKind::Mismatch { .. } => {
                    i += 1;
                }
                EditKind::RefGap { .. } => {
                    // Run of insertions at consecutive positions.
                    let mut run = 1usize;
                    while i + run < self.edits.len()
                        && self.edits[i + run].is_ref_gap()
                        && self.edits[i + run].pos == e.pos + run
                    {
                        run += 1;
                    }
                    push(&mut ops, (e.pos - last) as u32, 'M');
                    push(&mut ops, run as u32, 'I');
                    last = e.pos + run;
                    i += run;
                }
                EditKind::ReadGap { .. } => {
                    // Run of deletions share one read position.
                    let mut run = 1usize;
                    while i + run < self.edits.len()
                        && self.edits[i + run].is_read_gap()
                        && self.edits[i + run].pos == e.pos
                    {
                        run += 1;
                    }
                    push(&mut ops, (e.pos - last) as u32, 'M');
                    push(&mut ops, run as u32, 'D');
                    last = e.pos;
                    i += run;
                }
                EditKind::Splice { skip_len, .. } => {
                    push(&mut ops, (e.pos - last) as u32, 'M');
                    push(&mut ops, skip_len as u32, 'N');
                    last = e.pos;
                    i += 1;
                }
            }
        }
        push(&mut ops, (window - last) as u32, 'M');
        push(&mut ops, self.trim3 as u32, 'S');
        ops
    }

    pub fn cigar_string(&self) -> String {
        self.cigar()
            .iter()
            .map(|(n, op)| format!("{n}{op}"))
            .collect()
    }
}

/// Reporting knobs shared by the aligner and the sink.
#[derive(Debug, Clone, Copy)]
pub struct ReportingParams {
    pub khits: usize,
    pub secondary: bool,
}

/// Collects alignments for one read (or pair) and answers the best-score
/// queries the search uses for pruning. Indices into the per-mate result
/// lists are stable; concordant pairs reference them.
#[derive(Debug)]
pub struct AlnSink {
    rp: ReportingParams,
    results: [Vec<AlnRes>; 2],
    concordant: Vec<(usize, usize)>,
}

impl AlnSink {
    pub fn new(rp: ReportingParams) -> Self {
        Self {
            rp,
            results: [Vec::new(), Vec::new()],
            concordant: Vec::new(),
        }
    }

    pub fn reporting_params(&self) -> ReportingParams {
        self.rp
    }

    /// Record one alignment; returns true when the caller can stop
    /// producing more for this mate.
    pub fn report(&mut self, rdi: usize, res: AlnRes) -> bool {
        debug_assert!(rdi < 2);
        self.results[rdi].push(res);
        self.results[rdi].len() >= self.rp.khits * RESULT_CAP_FACTOR
    }

    pub fn report_pair(&mut self, i: usize, j: usize) {
        self.concordant.push((i, j));
    }

    pub fn results(&self, rdi: usize) -> &[AlnRes] {
        &self.results[rdi]
    }

    pub fn concordant_pairs(&self) -> &[(usize, usize)] {
        &self.concordant
    }

    pub fn best_unp(&self, rdi: usize) -> i64 {
        self.results[rdi]
            .iter()
            .map(|r| r.score)
            .max()
            .unwrap_or(i64::MIN)
    }

    /// Splice count of the best-scoring alignment for the mate.
    pub fn best_spliced_unp(&self, rdi: usize) -> usize {
        self.results[rdi]
            .iter()
            .max_by_key(|r| r.score)
            .map(|r| r.spliced_count)
            .unwrap_or(0)
    }

    pub fn best_pair(&self) -> i64 {
        self.concordant
            .iter()
            .map(|&(i, j)| self.results[0][i].score + self.results[1][j].score)
            .max()
            .unwrap_or(i64::MIN)
    }

    pub fn done_concordant(&self) -> bool {
        self.concordant.len() >= self.rp.khits
    }

    /// The up-to-khits alignments to emit for a mate, best first; spliced or
    /// near-splice alignments win ties (pseudogene avoidance).
    pub fn ranked(&self, rdi: usize) -> Vec<&AlnRes> {
        let mut out: Vec<&AlnRes> = self.results[rdi].iter().collect();
        out.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| {
                    let a_near = a.spliced() || a.near_splice_sites;
                    let b_near = b.spliced() || b.near_splice_sites;
                    b_near.cmp(&a_near)
                })
                .then_with(|| a.toff.cmp(&b.toff))
        });
        out.truncate(self.rp.khits);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::edit::SpliceDir;

    fn res(score: i64, toff: u64) -> AlnRes {
        AlnRes {
            fw: true,
            tidx: 0,
            toff,
            score,
            splicescore: 0.0,
            edits: Vec::new(),
            trim5: 0,
            trim3: 0,
            read_len: 50,
            spliced_count: 0,
            near_splice_sites: false,
            right_off: toff + 50,
        }
    }

    #[test]
    fn best_score_queries() {
        let mut sink = AlnSink::new(ReportingParams {
            khits: 2,
            secondary: false,
        });
        assert_eq!(sink.best_unp(0), i64::MIN);
        sink.report(0, res(10, 100));
        sink.report(0, res(30, 200));
        sink.report(1, res(20, 300));
        assert_eq!(sink.best_unp(0), 30);
        assert_eq!(sink.best_unp(1), 20);
        sink.report_pair(1, 0);
        assert_eq!(sink.best_pair(), 50);
        assert!(!sink.done_concordant());
    }

    #[test]
    fn ranked_prefers_score_then_splice_proximity() {
        let mut sink = AlnSink::new(ReportingParams {
            khits: 2,
            secondary: false,
        });
        let mut near = res(30, 100);
        near.near_splice_sites = true;
        sink.report(0, res(30, 50));
        sink.report(0, near);
        sink.report(0, res(10, 10));
        let ranked = sink.ranked(0);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].toff, 100);
        assert_eq!(ranked[1].toff, 50);
    }

    #[test]
    fn cigar_from_edit_script() {
        let mut r = res(0, 0);
        r.read_len = 50;
        r.edits
            .push(Edit::splice(30, 1002, SpliceDir::Forward, 0, 0, false));
        assert_eq!(r.cigar_string(), "30M1002N20M");

        let mut r = res(0, 0);
        r.read_len = 21;
        r.edits.push(Edit::ref_gap(10, 1));
        assert_eq!(r.cigar_string(), "10M1I10M");

        let mut r = res(0, 0);
        r.read_len = 20;
        r.edits.push(Edit::read_gap(10, 1));
        r.edits.push(Edit::read_gap(10, 1));
        assert_eq!(r.cigar_string(), "10M2D10M");

        let mut r = res(0, 0);
        r.read_len = 30;
        r.trim5 = 3;
        r.edits.push(Edit::mismatch(5, 0, 1));
        assert_eq!(r.cigar_string(), "3S27M");
    }

    #[test]
    fn splice_strand_follows_direction_and_read_strand() {
        let mut r = res(0, 0);
        r.edits
            .push(Edit::splice(10, 500, SpliceDir::Forward, 0, 0, false));
        assert_eq!(r.splice_strand(), Some('+'));
        r.fw = false;
        assert_eq!(r.splice_strand(), Some('-'));
        let r2 = res(0, 0);
        assert_eq!(r2.splice_strand(), None);
    }
}
