use std::path::PathBuf;

use clap::Parser;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Run mode enum
// ---------------------------------------------------------------------------

/// `--runMode` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    AlignReads,
    GenomeGenerate,
}

impl std::str::FromStr for RunMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alignReads" => Ok(Self::AlignReads),
            "genomeGenerate" => Ok(Self::GenomeGenerate),
            _ => Err(format!(
                "unknown runMode '{s}'; expected 'alignReads' or 'genomeGenerate'"
            )),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlignReads => write!(f, "alignReads"),
            Self::GenomeGenerate => write!(f, "genomeGenerate"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Command-line parameters.
///
/// Flag names follow the upstream aligner conventions so existing pipelines
/// translate directly.
#[derive(Debug, Clone, Parser)]
#[command(name = "rusplice", version, about)]
pub struct Parameters {
    /// Run mode: alignReads or genomeGenerate
    #[arg(long = "runMode", default_value = "alignReads")]
    pub run_mode: RunMode,

    /// Directory holding (or receiving) the genome index
    #[arg(long = "genomeDir", default_value = "./genome_index")]
    pub genome_dir: PathBuf,

    /// FASTA files for genomeGenerate
    #[arg(long = "genomeFastaFiles", num_args = 1..)]
    pub genome_fasta_files: Vec<PathBuf>,

    /// Input FASTQ file(s): one for single-end, two for paired-end
    #[arg(long = "readFilesIn", num_args = 1..=2)]
    pub read_files_in: Vec<PathBuf>,

    /// Output SAM path ("-" for stdout)
    #[arg(long = "outFileName", default_value = "Aligned.out.sam")]
    pub out_file_name: PathBuf,

    /// Number of worker threads
    #[arg(long = "runThreadN", default_value_t = 1)]
    pub run_thread_n: usize,

    /// Minimum intron length; smaller reference gaps are deletions
    #[arg(long = "minIntronLen", default_value_t = 20)]
    pub min_intron_len: u64,

    /// Maximum intron length
    #[arg(long = "maxIntronLen", default_value_t = 500_000)]
    pub max_intron_len: u64,

    /// Constant term of the minimum alignment score threshold
    /// (minsc = scoreMinConst + scoreMinLinear * read_length)
    #[arg(long = "scoreMinConst", default_value_t = 0.0)]
    pub score_min_const: f64,

    /// Linear term of the minimum alignment score threshold
    #[arg(long = "scoreMinLinear", default_value_t = -0.2)]
    pub score_min_linear: f64,

    /// Report up to this many alignments per read
    #[arg(short = 'k', long = "khits", default_value_t = 5)]
    pub khits: usize,

    /// Report secondary alignments beyond the score budget heuristics
    #[arg(long = "secondary", default_value_t = false)]
    pub secondary: bool,

    /// Disable splice-aware alignment (DNA mode)
    #[arg(long = "noSplicedAlignment", default_value_t = false)]
    pub no_spliced_alignment: bool,

    /// Do not search the forward strand of reads
    #[arg(long = "nofw", default_value_t = false)]
    pub nofw: bool,

    /// Do not search the reverse-complement strand of reads
    #[arg(long = "norc", default_value_t = false)]
    pub norc: bool,

    /// Match bonus per aligned base
    #[arg(long = "matchBonus", default_value_t = 2)]
    pub match_bonus: i64,

    /// Maximum (worst) mismatch penalty
    #[arg(long = "penMismatchMax", default_value_t = 6)]
    pub pen_mismatch_max: i64,

    /// Minimum (best) mismatch penalty
    #[arg(long = "penMismatchMin", default_value_t = 2)]
    pub pen_mismatch_min: i64,

    /// Canonical (GT-AG) splice penalty
    #[arg(long = "penCanSplice", default_value_t = 0)]
    pub pen_can_splice: i64,

    /// Non-canonical splice penalty
    #[arg(long = "penNoncanSplice", default_value_t = 12)]
    pub pen_noncan_splice: i64,

    /// Read gap open / extend penalties
    #[arg(long = "penReadGapOpen", default_value_t = 5)]
    pub pen_read_gap_open: i64,
    #[arg(long = "penReadGapExtend", default_value_t = 3)]
    pub pen_read_gap_extend: i64,

    /// Reference gap open / extend penalties
    #[arg(long = "penRefGapOpen", default_value_t = 5)]
    pub pen_ref_gap_open: i64,
    #[arg(long = "penRefGapExtend", default_value_t = 3)]
    pub pen_ref_gap_extend: i64,

    /// Mate 1 / mate 2 expected orientations (library layout)
    #[arg(long = "mate1fw", default_value_t = true, action = clap::ArgAction::Set)]
    pub mate1_fw: bool,
    #[arg(long = "mate2fw", default_value_t = false, action = clap::ArgAction::Set)]
    pub mate2_fw: bool,

    /// Known splice sites, tab-separated: chrom left right strand
    #[arg(long = "knownSpliceSiteInfile")]
    pub known_splice_infile: Option<PathBuf>,

    /// Local FM-index tile length (bases, power of two)
    #[arg(long = "localIndexLen", default_value_t = 1 << 16)]
    pub local_index_len: u64,

    /// Overlap between adjacent local index tiles
    #[arg(long = "localIndexOverlap", default_value_t = 1024)]
    pub local_index_overlap: u64,
}

impl Parameters {
    /// Sanity-check parameter combinations before running.
    pub fn validate(&self) -> Result<(), Error> {
        if self.run_thread_n == 0 {
            return Err(Error::Parameter("runThreadN must be >= 1".into()));
        }
        match self.run_mode {
            RunMode::GenomeGenerate => {
                if self.genome_fasta_files.is_empty() {
                    return Err(Error::Parameter(
                        "genomeGenerate requires --genomeFastaFiles".into(),
                    ));
                }
            }
            RunMode::AlignReads => {
                if self.read_files_in.is_empty() {
                    return Err(Error::Parameter(
                        "alignReads requires --readFilesIn".into(),
                    ));
                }
            }
        }
        if self.min_intron_len >= self.max_intron_len {
            return Err(Error::Parameter(format!(
                "minIntronLen ({}) must be < maxIntronLen ({})",
                self.min_intron_len, self.max_intron_len
            )));
        }
        if self.khits == 0 {
            return Err(Error::Parameter("khits must be >= 1".into()));
        }
        if self.nofw && self.norc {
            return Err(Error::Parameter(
                "--nofw and --norc together leave nothing to search".into(),
            ));
        }
        if !self.local_index_len.is_power_of_two() {
            return Err(Error::Parameter(
                "localIndexLen must be a power of two".into(),
            ));
        }
        if self.local_index_overlap >= self.local_index_len {
            return Err(Error::Parameter(
                "localIndexOverlap must be smaller than localIndexLen".into(),
            ));
        }
        Ok(())
    }

    /// Minimum acceptable alignment score for a read of the given length.
    pub fn min_score(&self, read_len: usize) -> i64 {
        (self.score_min_const + self.score_min_linear * read_len as f64).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let p = Parameters::parse_from(["rusplice", "--readFilesIn", "reads.fq"]);
        assert_eq!(p.run_mode, RunMode::AlignReads);
        assert_eq!(p.run_thread_n, 1);
        assert_eq!(p.min_intron_len, 20);
        assert_eq!(p.max_intron_len, 500_000);
        assert!(p.mate1_fw);
        assert!(!p.mate2_fw);
        p.validate().unwrap();
    }

    #[test]
    fn genome_generate_requires_fasta() {
        let p = Parameters::parse_from(["rusplice", "--runMode", "genomeGenerate"]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn intron_bounds_checked() {
        let p = Parameters::parse_from([
            "rusplice",
            "--readFilesIn",
            "reads.fq",
            "--minIntronLen",
            "1000",
            "--maxIntronLen",
            "500",
        ]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn min_score_scales_with_read_length() {
        let p = Parameters::parse_from(["rusplice", "--readFilesIn", "r.fq"]);
        assert_eq!(p.min_score(100), -20);
        let p2 = Parameters::parse_from([
            "rusplice",
            "--readFilesIn",
            "r.fq",
            "--scoreMinConst",
            "10",
            "--scoreMinLinear",
            "0",
        ]);
        assert_eq!(p2.min_score(100), 10);
    }
}
