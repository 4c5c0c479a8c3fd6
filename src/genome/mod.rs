/// Reference genome storage and access
pub mod fasta;

use crate::error::Error;
use crate::params::Parameters;

/// Base codes: 0=A, 1=C, 2=G, 3=T, 4=N.
pub const BASE_A: u8 = 0;
pub const BASE_C: u8 = 1;
pub const BASE_G: u8 = 2;
pub const BASE_T: u8 = 3;
pub const BASE_N: u8 = 4;

/// Encode an ASCII nucleotide to its 0-4 code.
pub fn encode_base(b: u8) -> u8 {
    match b {
        b'A' | b'a' => BASE_A,
        b'C' | b'c' => BASE_C,
        b'G' | b'g' => BASE_G,
        b'T' | b't' => BASE_T,
        _ => BASE_N,
    }
}

/// Decode a 0-4 code to ASCII.
pub fn decode_base(c: u8) -> u8 {
    match c {
        BASE_A => b'A',
        BASE_C => b'C',
        BASE_G => b'G',
        BASE_T => b'T',
        _ => b'N',
    }
}

/// Complement of a 0-4 code (N maps to N).
pub fn complement_base(c: u8) -> u8 {
    if c < 4 {
        3 - c
    } else {
        c
    }
}

/// Reverse-complement an encoded sequence.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&c| complement_base(c)).collect()
}

/// The reference genome: one encoded sequence per chromosome.
///
/// Access near chromosome ends pads with N so window arithmetic in the
/// aligner never has to special-case the boundary.
#[derive(Debug, Clone, Default)]
pub struct Reference {
    /// Chromosome names, in input order
    pub names: Vec<String>,
    /// Encoded sequences (0-4), one per chromosome
    pub seqs: Vec<Vec<u8>>,
}

impl Reference {
    /// Load all chromosomes from the configured FASTA files.
    pub fn from_fasta(params: &Parameters) -> Result<Self, Error> {
        let mut reference = Reference::default();
        for path in &params.genome_fasta_files {
            fasta::read_fasta_into(path, &mut reference)?;
        }
        if reference.seqs.is_empty() {
            return Err(Error::Fasta("no sequences found in FASTA input".into()));
        }
        Ok(reference)
    }

    /// Build directly from encoded sequences (tests, mate fixtures).
    pub fn from_seqs(named: Vec<(String, Vec<u8>)>) -> Self {
        let mut reference = Reference::default();
        for (name, seq) in named {
            reference.names.push(name);
            reference.seqs.push(seq);
        }
        reference
    }

    pub fn num_refs(&self) -> usize {
        self.seqs.len()
    }

    /// Length of one chromosome.
    pub fn approx_len(&self, tidx: usize) -> u64 {
        self.seqs[tidx].len() as u64
    }

    /// Total length across chromosomes.
    pub fn total_len(&self) -> u64 {
        self.seqs.iter().map(|s| s.len() as u64).sum()
    }

    pub fn name(&self, tidx: usize) -> &str {
        &self.names[tidx]
    }

    /// Single base at (tidx, toff); N past the end.
    pub fn get_base(&self, tidx: usize, toff: u64) -> u8 {
        let seq = &self.seqs[tidx];
        if (toff as usize) < seq.len() {
            seq[toff as usize]
        } else {
            BASE_N
        }
    }

    /// Fill `dst` with `len` bases starting at (tidx, toff), padding with N
    /// beyond the chromosome end. Returns the offset of the first base in
    /// `dst` (always 0 here; kept so call sites read like the packed-stretch
    /// interface they implement).
    pub fn get_stretch(&self, dst: &mut Vec<u8>, tidx: usize, toff: u64, len: usize) -> usize {
        dst.clear();
        let seq = &self.seqs[tidx];
        let start = toff as usize;
        for i in 0..len {
            let p = start + i;
            dst.push(if p < seq.len() { seq[p] } else { BASE_N });
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> Vec<u8> {
        s.bytes().map(encode_base).collect()
    }

    #[test]
    fn encode_decode_roundtrip() {
        for (chr, code) in [(b'A', 0u8), (b'C', 1), (b'G', 2), (b'T', 3), (b'N', 4)] {
            assert_eq!(encode_base(chr), code);
            assert_eq!(decode_base(code), chr);
        }
        assert_eq!(encode_base(b'x'), BASE_N);
    }

    #[test]
    fn reverse_complement_basics() {
        assert_eq!(reverse_complement(&encode("AACC")), encode("GGTT"));
        assert_eq!(reverse_complement(&encode("ACGT")), encode("ACGT"));
        assert_eq!(reverse_complement(&[0, 4, 1]), vec![2, 4, 3]);
    }

    #[test]
    fn stretch_pads_past_end() {
        let r = Reference::from_seqs(vec![("chr1".into(), encode("ACG"))]);
        let mut buf = Vec::new();
        let off = r.get_stretch(&mut buf, 0, 1, 5);
        assert_eq!(off, 0);
        assert_eq!(buf, vec![BASE_C, BASE_G, BASE_N, BASE_N, BASE_N]);
        assert_eq!(r.get_base(0, 2), BASE_G);
        assert_eq!(r.get_base(0, 3), BASE_N);
    }
}
