//! End-to-end alignment scenarios driven through the library API.

use clap::Parser;

use rusplice::align::hybrid::AlignerConfig;
use rusplice::align::{EditKind, Read, Scoring, SpliceDir, SplicedAligner};
use rusplice::genome::{decode_base, encode_base, reverse_complement, Reference};
use rusplice::index::GenomeIndex;
use rusplice::junction::{SpliceSite, SpliceSiteDB};
use rusplice::params::Parameters;

/// 400 bp with all 12-mers unique.
const REF400: &str = "TCAGAGGCTCGTACAAACGTATGCCCTAGCTTTTACCACTTAACGCCGTCAAAATGTGCCTATTTTGGAACGAAGGATTCTGAAGTGGGAGGGACATTAGTATGCCCATTATTGGAAACTGACTGTGTATTTCAAAATGCGGGCTCGCGGACTCTTTCAATCCCCTACAGCCTAATTTTAAGCTGAAACTAGGATACCAATGAGGTTGGATTACAGAAAGTTATCCGTTGAACCCCTCACGCCGGATATGGCACAGTCGAGGAAAACGAATCTGCAGTAGTCATTACTATCTGGGCTTTTCTTGCTGCGTCTGAAGTCCTATCACCAGCTTTGCGCTTTAGATGGGCTTAACTCATACCAGTCATATACGGAGGTCGGATTAGTAGGAGACAACATTGTT";

const EXON1: &str = "ATCGGATCCTAGGCATTCAGGAACCTGAGTCCAAGTTCAACGCCATCTAC";
const EXON2: &str = "CATGGTTCTGACCAAGGAGATCAACCGTAAGCTGGACTTCGATGGTCCAT";

fn encode(s: &str) -> Vec<u8> {
    s.bytes().map(encode_base).collect()
}

fn read_of(name: &str, s: &str) -> Read {
    let seq = encode(s);
    let qual = vec![b'I'; seq.len()];
    Read::new(name.into(), 0, seq, qual)
}

fn params() -> Parameters {
    Parameters::parse_from(["rusplice", "--readFilesIn", "reads.fq"])
}

fn index_of(ref_str: &str, p: &Parameters) -> GenomeIndex {
    let reference = Reference::from_seqs(vec![("chr1".into(), encode(ref_str))]);
    GenomeIndex::build(reference, p).unwrap()
}

/// exon1 (50) | GT..intron..AG (1002 skipped bases) | exon2 (50)
fn splice_ref() -> String {
    let mut intron = String::from("GT");
    while intron.len() < 1000 {
        intron.push_str("CTCTT");
    }
    intron.truncate(1000);
    intron.push_str("AG");
    format!("{EXON1}{intron}{EXON2}")
}

fn align_single(
    ref_str: &str,
    read: Read,
    minsc: i64,
    ssdb: &SpliceSiteDB,
    p: &Parameters,
) -> Vec<rusplice::align::AlnRes> {
    let index = index_of(ref_str, p);
    let scoring = Scoring::from_params(p);
    let cfg = AlignerConfig::from_params(p);
    let mut aligner = SplicedAligner::new(&index, ssdb, &scoring, cfg);
    aligner.init_read(read, false, false, minsc);
    aligner.go();
    aligner.sink().ranked(0).into_iter().cloned().collect()
}

#[test]
fn exact_scenario() {
    let p = params();
    let ssdb = SpliceSiteDB::new();
    let results = align_single(REF400, read_of("r", &REF400[100..128]), 0, &ssdb, &p);
    assert!(!results.is_empty());
    let best = &results[0];
    assert_eq!(best.score, 28 * p.match_bonus);
    assert_eq!(best.toff, 100);
    assert!(best.edits.is_empty());
    assert!(best.fw);
    assert_eq!(best.cigar_string(), "28M");
}

#[test]
fn one_mismatch_scenario() {
    let p = params();
    let ssdb = SpliceSiteDB::new();
    let mut read_str = REF400[60..88].to_string();
    assert_eq!(&read_str[14..15], "G");
    read_str.replace_range(14..15, "A");
    let results = align_single(REF400, read_of("r", &read_str), -20, &ssdb, &p);
    assert!(!results.is_empty());
    let best = &results[0];
    assert_eq!(best.toff, 60);
    assert_eq!(best.edits.len(), 1);
    assert!(best.edits[0].is_mismatch());
    assert_eq!(best.edits[0].pos, 14);
    let sc = Scoring::from_params(&p);
    assert_eq!(best.score, 27 * p.match_bonus + sc.mismatch(0, 2, b'I'));
}

#[test]
fn short_insertion_scenario() {
    let p = params();
    let ssdb = SpliceSiteDB::new();
    // One extra C between reference offsets 109 and 110.
    let read_str = format!("{}C{}", &REF400[100..110], &REF400[110..120]);
    let results = align_single(REF400, read_of("r", &read_str), -20, &ssdb, &p);
    assert!(!results.is_empty());
    let best = &results[0];
    assert_eq!(best.toff, 100);
    let gaps: Vec<_> = best.edits.iter().filter(|e| e.is_ref_gap()).collect();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].pos, 10);
    assert_eq!(best.cigar_string(), "10M1I10M");
    assert_eq!(
        best.score,
        21 * p.match_bonus - p.pen_ref_gap_open
    );
}

#[test]
fn short_deletion_scenario() {
    let p = params();
    let ssdb = SpliceSiteDB::new();
    // Reference offsets 110..112 ("AT") are skipped by the read; the
    // deletion left-aligns one step because read position 9 matches the
    // displaced base.
    let read_str = format!("{}{}", &REF400[100..110], &REF400[112..122]);
    let results = align_single(REF400, read_of("r", &read_str), -20, &ssdb, &p);
    assert!(!results.is_empty());
    let best = &results[0];
    assert_eq!(best.toff, 100);
    let dels: Vec<_> = best.edits.iter().filter(|e| e.is_read_gap()).collect();
    assert_eq!(dels.len(), 2);
    assert_eq!(best.cigar_string(), "9M2D11M");
    assert_eq!(
        best.score,
        20 * p.match_bonus - p.pen_read_gap_open - p.pen_read_gap_extend
    );
}

#[test]
fn canonical_splice_scenario() {
    let p = params();
    let ssdb = SpliceSiteDB::new();
    let ref_str = splice_ref();
    let read_str = format!("{}{}", &EXON1[20..50], &EXON2[0..20]);
    let results = align_single(&ref_str, read_of("r", &read_str), -20, &ssdb, &p);
    assert!(!results.is_empty());
    let best = &results[0];
    assert_eq!(best.toff, 20);
    assert_eq!(best.spliced_count, 1);
    let spl = best.edits.iter().find(|e| e.is_splice()).unwrap();
    assert_eq!(spl.pos, 30);
    assert_eq!(spl.skip_len(), 1002);
    match spl.kind {
        EditKind::Splice { dir, known, .. } => {
            assert_eq!(dir, SpliceDir::Forward);
            assert!(!known);
        }
        _ => unreachable!(),
    }
    assert_eq!(best.cigar_string(), "30M1002N20M");
}

#[test]
fn splice_rejected_when_anchor_too_short() {
    let p = params();
    let ssdb = SpliceSiteDB::new();
    let ref_str = splice_ref();
    // Only 3 bases of exon2: anchor below the canonical minimum of 7.
    let read_str = format!("{}{}", &EXON1[20..50], &EXON2[0..3]);
    let results = align_single(&ref_str, read_of("r", &read_str), -20, &ssdb, &p);
    for r in &results {
        assert_eq!(r.spliced_count, 0, "no alignment may span the splice");
    }
}

#[test]
fn known_splice_site_rescues_short_anchor() {
    let p = params();
    let ref_str = splice_ref();
    // 4 bases of exon1, 26 of exon2: too short for a novel splice.
    let read_str = format!("{}{}", &EXON1[46..50], &EXON2[0..26]);

    // Without the database no spliced alignment appears.
    let empty = SpliceSiteDB::new();
    let results = align_single(&ref_str, read_of("r", &read_str), -20, &empty, &p);
    assert!(results.iter().all(|r| r.spliced_count == 0));

    // With the known site the spliced alignment wins.
    let ssdb = SpliceSiteDB::new();
    ssdb.add(SpliceSite {
        tidx: 0,
        left: 49,
        right: 1052,
        fw: true,
        read_id: 0,
        from_file: true,
    });
    let results = align_single(&ref_str, read_of("r", &read_str), -20, &ssdb, &p);
    assert!(!results.is_empty());
    let best = &results[0];
    assert_eq!(best.spliced_count, 1);
    let spl = best.edits.iter().find(|e| e.is_splice()).unwrap();
    assert_eq!(spl.skip_len(), 1002);
    match spl.kind {
        EditKind::Splice { known, .. } => assert!(known),
        _ => unreachable!(),
    }
}

#[test]
fn paired_concordant_scenario() {
    let p = params();
    let index = index_of(REF400, &p);
    let ssdb = SpliceSiteDB::new();
    let scoring = Scoring::from_params(&p);
    let cfg = AlignerConfig::from_params(&p);
    let mut aligner = SplicedAligner::new(&index, &ssdb, &scoring, cfg);

    // 50 nt mates, inner distance 100, reverse-complement second mate.
    let mate1 = read_of("p/1", &REF400[50..100]);
    let m2_rc = reverse_complement(&encode(&REF400[200..250]));
    let m2_str: String = m2_rc.iter().map(|&b| decode_base(b) as char).collect();
    let mate2 = read_of("p/2", &m2_str);

    aligner.init_pair(mate1, mate2, [false; 2], [false; 2], [0, 0]);
    aligner.go();

    assert_eq!(aligner.sink().concordant_pairs().len(), 1);
    let (i, j) = aligner.sink().concordant_pairs()[0];
    let r1 = &aligner.sink().results(0)[i];
    let r2 = &aligner.sink().results(1)[j];
    assert!(r1.fw && !r2.fw);
    assert_eq!(r1.toff, 50);
    assert_eq!(r2.toff, 200);
    assert_eq!(r1.right_off, 100);
    assert_eq!(r2.right_off, 250);
}

#[test]
fn discovered_splice_sites_are_recorded() {
    let p = params();
    let ssdb = SpliceSiteDB::new();
    let ref_str = splice_ref();
    let read_str = format!("{}{}", &EXON1[20..50], &EXON2[0..20]);
    assert!(ssdb.is_empty());
    let results = align_single(&ref_str, read_of("r", &read_str), -20, &ssdb, &p);
    assert!(!results.is_empty());
    // Reporting the spliced alignment added the novel site.
    assert!(!ssdb.is_empty());
    let mut out = Vec::new();
    ssdb.get_right_splice_sites(0, 49, 1, &mut out);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].left, 49);
    assert_eq!(out[0].right, 1052);
    assert!(!out[0].from_file);
}

mod files {
    use super::*;
    use std::io::Write;

    #[test]
    fn run_aligns_fastq_to_sam() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("genome.fa");
        let fastq = dir.path().join("reads.fq");
        let sam = dir.path().join("out.sam");

        let mut f = std::fs::File::create(&fasta).unwrap();
        writeln!(f, ">chr1").unwrap();
        writeln!(f, "{REF400}").unwrap();

        let mut f = std::fs::File::create(&fastq).unwrap();
        writeln!(f, "@exact1").unwrap();
        writeln!(f, "{}", &REF400[100..128]).unwrap();
        writeln!(f, "+").unwrap();
        writeln!(f, "{}", "I".repeat(28)).unwrap();
        writeln!(f, "@junk1").unwrap();
        writeln!(f, "{}", "N".repeat(28)).unwrap();
        writeln!(f, "+").unwrap();
        writeln!(f, "{}", "I".repeat(28)).unwrap();

        let p = Parameters::parse_from([
            "rusplice",
            "--runMode",
            "alignReads",
            "--genomeFastaFiles",
            fasta.to_str().unwrap(),
            "--readFilesIn",
            fastq.to_str().unwrap(),
            "--outFileName",
            sam.to_str().unwrap(),
            "--runThreadN",
            "2",
        ]);
        rusplice::run(&p).unwrap();

        let out = std::fs::read_to_string(&sam).unwrap();
        assert!(out.contains("@SQ\tSN:chr1\tLN:400"));
        let exact_line = out
            .lines()
            .find(|l| l.starts_with("exact1"))
            .expect("exact read reported");
        let fields: Vec<&str> = exact_line.split('\t').collect();
        assert_eq!(fields[2], "chr1");
        assert_eq!(fields[3], "101"); // 1-based leftmost position
        assert_eq!(fields[5], "28M");
        let junk_line = out
            .lines()
            .find(|l| l.starts_with("junk1"))
            .expect("junk read reported");
        let fields: Vec<&str> = junk_line.split('\t').collect();
        assert_eq!(fields[1], "4"); // unmapped flag
    }
}
