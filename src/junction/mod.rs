/// Splice-site database
///
/// Holds known (file-provided) and novel (alignment-discovered) splice
/// sites, queryable by flanking position, plus the donor/acceptor
/// probability model used to gate canonical splices. The structure is
/// internally synchronized; workers share one instance.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use dashmap::DashMap;

use crate::error::Error;
use crate::genome::Reference;

/// Bases of exon kept on the donor side of the scoring window.
pub const DONOR_EXONIC_LEN: usize = 3;
/// Bases of intron kept on the donor side.
pub const DONOR_INTRONIC_LEN: usize = 6;
/// Bases of intron kept on the acceptor side.
pub const ACCEPTOR_INTRONIC_LEN: usize = 6;
/// Bases of exon kept on the acceptor side.
pub const ACCEPTOR_EXONIC_LEN: usize = 3;
/// Largest intron-side window; reference fetch margin for splice discovery.
pub const INTRONIC_LEN: usize = 6;

const DONOR_LEN: usize = DONOR_EXONIC_LEN + DONOR_INTRONIC_LEN;
const ACCEPTOR_LEN: usize = ACCEPTOR_INTRONIC_LEN + ACCEPTOR_EXONIC_LEN;

/// One splice site: `left` is the last exonic base before the intron,
/// `right` the first exonic base after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceSite {
    pub tidx: usize,
    pub left: u64,
    pub right: u64,
    pub fw: bool,
    /// Read that discovered the site (novel sites only)
    pub read_id: u64,
    /// True when loaded from an annotation file
    pub from_file: bool,
}

impl SpliceSite {
    pub fn left(&self) -> u64 {
        self.left
    }

    pub fn right(&self) -> u64 {
        self.right
    }

    /// Reference bases skipped by the intron.
    pub fn skip_len(&self) -> u64 {
        self.right - self.left - 1
    }
}

/// Donor-side consensus over the scoring window (exonic then intronic).
const DONOR_CONSENSUS: [u8; DONOR_LEN] = [0, 0, 2, 2, 3, 0, 0, 2, 3]; // AAG | GTAAGT prefix
/// Acceptor-side consensus (intronic then exonic).
const ACCEPTOR_CONSENSUS: [u8; ACCEPTOR_LEN] = [3, 3, 3, 1, 0, 2, 2, 3, 3]; // TTTCAG | G..

#[derive(Debug, Default)]
pub struct SpliceSiteDB {
    /// Sites per reference, append-only
    sites: DashMap<usize, Vec<SpliceSite>>,
    count: std::sync::atomic::AtomicUsize,
}

impl SpliceSiteDB {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load known sites from a tab-separated file: `chrom left right strand`.
    pub fn from_file(path: &Path, reference: &Reference) -> Result<Self, Error> {
        let db = Self::new();
        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| Error::io(e, path))?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(Error::Parameter(format!(
                    "malformed splice-site line at {}:{}",
                    path.display(),
                    line_num + 1
                )));
            }
            let tidx = reference
                .names
                .iter()
                .position(|n| n == fields[0])
                .ok_or_else(|| {
                    Error::Parameter(format!("unknown chromosome '{}' in splice sites", fields[0]))
                })?;
            let left: u64 = fields[1]
                .parse()
                .map_err(|_| Error::Parameter(format!("bad left offset '{}'", fields[1])))?;
            let right: u64 = fields[2]
                .parse()
                .map_err(|_| Error::Parameter(format!("bad right offset '{}'", fields[2])))?;
            if right <= left + 1 {
                return Err(Error::Parameter(format!(
                    "splice site with empty intron at {}:{}",
                    path.display(),
                    line_num + 1
                )));
            }
            db.add(SpliceSite {
                tidx,
                left,
                right,
                fw: fields[3] != "-",
                read_id: 0,
                from_file: true,
            });
        }
        log::info!("Loaded {} known splice sites", db.len());
        Ok(db)
    }

    pub fn add(&self, site: SpliceSite) {
        let mut entry = self.sites.entry(site.tidx).or_default();
        if !entry.contains(&site) {
            entry.push(site);
            self.count
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sites whose acceptor (`right`) lies within `(pos - range, pos]`:
    /// candidates for attaching an exon to the left of an alignment whose
    /// left edge is near `pos`.
    pub fn get_left_splice_sites(
        &self,
        tidx: usize,
        pos: u64,
        range: u64,
        out: &mut Vec<SpliceSite>,
    ) {
        out.clear();
        if let Some(sites) = self.sites.get(&tidx) {
            for s in sites.iter() {
                if s.right <= pos && s.right + range > pos {
                    out.push(s.clone());
                }
            }
        }
    }

    /// Sites whose donor (`left`) lies within `[pos, pos + range)`:
    /// candidates for attaching an exon to the right.
    pub fn get_right_splice_sites(
        &self,
        tidx: usize,
        pos: u64,
        range: u64,
        out: &mut Vec<SpliceSite>,
    ) {
        out.clear();
        if let Some(sites) = self.sites.get(&tidx) {
            for s in sites.iter() {
                if s.left >= pos && s.left < pos + range {
                    out.push(s.clone());
                }
            }
        }
    }

    /// Whether any site flanks the windows `[left1, right1]` / `[left2,
    /// right2]`; used to keep exonic alignments near splice sites over
    /// pseudogene copies.
    pub fn has_splice_sites(
        &self,
        tidx: usize,
        left1: u64,
        right1: u64,
        left2: u64,
        right2: u64,
        include_novel: bool,
    ) -> bool {
        if let Some(sites) = self.sites.get(&tidx) {
            for s in sites.iter() {
                if !s.from_file && !include_novel {
                    continue;
                }
                let in1 = (s.right >= left1 && s.right <= right1)
                    || (s.left >= left1 && s.left <= right1);
                let in2 = (s.right >= left2 && s.right <= right2)
                    || (s.left >= left2 && s.left <= right2);
                if in1 || in2 {
                    return true;
                }
            }
        }
        false
    }

    /// Probability-like score in [0, 1] for a candidate splice, from the
    /// packed donor/acceptor windows (2 bits per base, first base highest).
    ///
    /// A GT..AG core earns a high floor; the remaining window positions move
    /// the score toward 1.0 as they match the consensus.
    pub fn probscore(donor_seq: u64, acceptor_seq: u64) -> f32 {
        let donor = unpack(donor_seq, DONOR_LEN);
        let acceptor = unpack(acceptor_seq, ACCEPTOR_LEN);

        let core_gt = donor[DONOR_EXONIC_LEN] == 2 && donor[DONOR_EXONIC_LEN + 1] == 3;
        let core_ag =
            acceptor[ACCEPTOR_INTRONIC_LEN - 2] == 0 && acceptor[ACCEPTOR_INTRONIC_LEN - 1] == 2;

        let mut matches = 0usize;
        let mut total = 0usize;
        for (i, &b) in donor.iter().enumerate() {
            if i == DONOR_EXONIC_LEN || i == DONOR_EXONIC_LEN + 1 {
                continue;
            }
            total += 1;
            if b == DONOR_CONSENSUS[i] {
                matches += 1;
            }
        }
        for (i, &b) in acceptor.iter().enumerate() {
            if i == ACCEPTOR_INTRONIC_LEN - 2 || i == ACCEPTOR_INTRONIC_LEN - 1 {
                continue;
            }
            total += 1;
            if b == ACCEPTOR_CONSENSUS[i] {
                matches += 1;
            }
        }
        let flank = matches as f32 / total as f32;

        if core_gt && core_ag {
            0.9 + 0.1 * flank
        } else {
            0.5 * flank
        }
    }
}

fn unpack(packed: u64, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((packed >> (2 * (len - 1 - i))) & 0x3) as u8)
        .collect()
}

/// Pack a base window 2 bits per base, first base highest; N maps to A as
/// the extraction sites do.
pub fn pack_window(bases: &[u8]) -> u64 {
    let mut packed = 0u64;
    for &b in bases {
        packed = (packed << 2) | (if b > 3 { 0 } else { b }) as u64;
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(tidx: usize, left: u64, right: u64) -> SpliceSite {
        SpliceSite {
            tidx,
            left,
            right,
            fw: true,
            read_id: 0,
            from_file: true,
        }
    }

    #[test]
    fn add_dedups_and_counts() {
        let db = SpliceSiteDB::new();
        db.add(site(0, 100, 200));
        db.add(site(0, 100, 200));
        db.add(site(0, 100, 300));
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn left_and_right_queries() {
        let db = SpliceSiteDB::new();
        db.add(site(0, 100, 200));
        db.add(site(0, 500, 900));

        let mut out = Vec::new();
        db.get_left_splice_sites(0, 205, 10, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].right, 200);

        db.get_left_splice_sites(0, 205, 2, &mut out);
        assert!(out.is_empty());

        db.get_right_splice_sites(0, 95, 10, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].left, 100);

        db.get_right_splice_sites(1, 95, 10, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn has_splice_sites_window() {
        let db = SpliceSiteDB::new();
        db.add(site(0, 1000, 2000));
        assert!(db.has_splice_sites(0, 900, 1100, 5000, 6000, true));
        assert!(!db.has_splice_sites(0, 0, 100, 5000, 6000, true));
    }

    #[test]
    fn probscore_prefers_canonical_consensus() {
        // Perfect consensus windows.
        let donor = pack_window(&DONOR_CONSENSUS);
        let acceptor = pack_window(&ACCEPTOR_CONSENSUS);
        let perfect = SpliceSiteDB::probscore(donor, acceptor);
        assert!(perfect > 0.99);

        // Canonical core with arbitrary flanks still scores >= 0.9.
        let donor = pack_window(&[1, 1, 1, 2, 3, 1, 1, 1, 1]);
        let acceptor = pack_window(&[2, 2, 2, 2, 0, 2, 0, 0, 0]);
        let canonical = SpliceSiteDB::probscore(donor, acceptor);
        assert!((0.9..=1.0).contains(&canonical));

        // Non-canonical core scores low.
        let donor = pack_window(&[1, 1, 1, 1, 1, 1, 1, 1, 1]);
        let acceptor = pack_window(&[2, 2, 2, 2, 2, 2, 0, 0, 0]);
        assert!(SpliceSiteDB::probscore(donor, acceptor) < 0.5);
    }

    #[test]
    fn skip_len_excludes_flanking_exonic_bases() {
        let s = site(0, 49, 1052);
        assert_eq!(s.skip_len(), 1002);
    }
}
