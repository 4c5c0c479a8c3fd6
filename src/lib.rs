pub mod align;
pub mod error;
pub mod genome;
pub mod index;
pub mod io;
pub mod junction;
pub mod params;
pub mod stats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::info;

use crate::align::hybrid::AlignerConfig;
use crate::align::{Read, Scoring, SplicedAligner};
use crate::error::Error;
use crate::genome::Reference;
use crate::index::GenomeIndex;
use crate::io::fastq::{EncodedRead, FastqReader, PairedFastqReader};
use crate::io::sam::{
    build_alignment_records, build_unmapped_record, BufferedSamRecords, PairContext, SamWriter,
};
use crate::junction::SpliceSiteDB;
use crate::params::{Parameters, RunMode};
use crate::stats::Metrics;

/// Reads handed to a worker per reader lock.
const BATCH_SIZE: usize = 64;

/// Top-level dispatcher. Called from `main()` after CLI parsing.
pub fn run(params: &Parameters) -> anyhow::Result<()> {
    params.validate()?;

    info!("rusplice v{}", env!("CARGO_PKG_VERSION"));
    info!("runMode: {}", params.run_mode);
    info!("runThreadN: {}", params.run_thread_n);

    match params.run_mode {
        RunMode::GenomeGenerate => genome_generate(params),
        RunMode::AlignReads => align_reads(params),
    }
}

fn genome_generate(params: &Parameters) -> anyhow::Result<()> {
    info!("genomeDir: {}", params.genome_dir.display());
    let reference = Reference::from_fasta(params)?;
    info!(
        "Loaded {} chromosomes, {} bases",
        reference.num_refs(),
        reference.total_len()
    );
    let index = GenomeIndex::build(reference, params)?;
    info!(
        "Index built: minK={}, minK_local={}",
        index.min_k, index.min_k_local
    );
    // The core owns no file format; alignReads rebuilds the index in
    // process from --genomeFastaFiles.
    info!("Genome generation complete");
    Ok(())
}

fn align_reads(params: &Parameters) -> anyhow::Result<()> {
    if params.genome_fasta_files.is_empty() {
        return Err(Error::Parameter(
            "alignReads requires --genomeFastaFiles (the index is built in process)".into(),
        )
        .into());
    }
    info!(
        "readFilesIn: {:?}",
        params
            .read_files_in
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
    );

    let reference = Reference::from_fasta(params)?;
    let index = GenomeIndex::build(reference, params)?;
    let ssdb = match &params.known_splice_infile {
        Some(path) => SpliceSiteDB::from_file(path, &index.reference)?,
        None => SpliceSiteDB::new(),
    };
    let scoring = Scoring::from_params(params);
    let cfg = AlignerConfig::from_params(params);

    let writer = Mutex::new(SamWriter::create(&params.out_file_name, &index.reference)?);
    let metrics = Metrics::new();
    let next_rdid = AtomicU64::new(0);

    let paired = params.read_files_in.len() == 2;
    if paired {
        let reader = Mutex::new(PairedFastqReader::open(
            &params.read_files_in[0],
            &params.read_files_in[1],
        )?);
        run_paired_workers(
            params, &index, &ssdb, &scoring, &cfg, &reader, &writer, &metrics, &next_rdid,
        )?;
    } else {
        let reader = Mutex::new(FastqReader::open(&params.read_files_in[0])?);
        run_single_workers(
            params, &index, &ssdb, &scoring, &cfg, &reader, &writer, &metrics, &next_rdid,
        )?;
    }

    writer.lock().expect("writer lock").flush()?;
    metrics.print_summary();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_single_workers(
    params: &Parameters,
    index: &GenomeIndex,
    ssdb: &SpliceSiteDB,
    scoring: &Scoring,
    cfg: &AlignerConfig,
    reader: &Mutex<FastqReader>,
    writer: &Mutex<SamWriter>,
    metrics: &Metrics,
    next_rdid: &AtomicU64,
) -> Result<(), Error> {
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..params.run_thread_n {
            handles.push(scope.spawn(move || -> Result<(), Error> {
                let mut aligner = SplicedAligner::new(index, ssdb, scoring, cfg.clone());
                let mut batch: Vec<EncodedRead> = Vec::new();
                let mut records = BufferedSamRecords::new();
                loop {
                    let n = reader
                        .lock()
                        .expect("reader lock")
                        .next_batch(BATCH_SIZE, &mut batch)?;
                    if n == 0 {
                        break;
                    }
                    for er in batch.drain(..) {
                        let rdid = next_rdid.fetch_add(1, Ordering::Relaxed);
                        let read = Read::new(er.name, rdid, er.sequence, er.quality);
                        if read.is_empty() {
                            continue;
                        }
                        let minsc = params.min_score(read.len());
                        aligner.init_read(read, params.nofw, params.norc, minsc);
                        aligner.go();
                        let read = aligner.read_rc(0);
                        let ranked = aligner.sink().ranked(0);
                        metrics.record_read(ranked.len());
                        if ranked.is_empty() {
                            records.push(build_unmapped_record(&read));
                        } else {
                            for record in
                                build_alignment_records(&read, &ranked, PairContext::default())?
                            {
                                records.push(record);
                            }
                        }
                    }
                    let worker_metrics = std::mem::take(&mut aligner.metrics);
                    metrics.merge(&worker_metrics);
                    writer.lock().expect("writer lock").write_batch(&records)?;
                    records.clear();
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked")?;
        }
        Ok(())
    })
}

#[allow(clippy::too_many_arguments)]
fn run_paired_workers(
    params: &Parameters,
    index: &GenomeIndex,
    ssdb: &SpliceSiteDB,
    scoring: &Scoring,
    cfg: &AlignerConfig,
    reader: &Mutex<PairedFastqReader>,
    writer: &Mutex<SamWriter>,
    metrics: &Metrics,
    next_rdid: &AtomicU64,
) -> Result<(), Error> {
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..params.run_thread_n {
            handles.push(scope.spawn(move || -> Result<(), Error> {
                let mut aligner = SplicedAligner::new(index, ssdb, scoring, cfg.clone());
                let mut batch: Vec<(EncodedRead, EncodedRead)> = Vec::new();
                let mut records = BufferedSamRecords::new();
                loop {
                    let n = reader
                        .lock()
                        .expect("reader lock")
                        .next_batch(BATCH_SIZE, &mut batch)?;
                    if n == 0 {
                        break;
                    }
                    for (er1, er2) in batch.drain(..) {
                        let rdid = next_rdid.fetch_add(1, Ordering::Relaxed);
                        let rd1 = Read::new(er1.name, rdid, er1.sequence, er1.quality);
                        let rd2 = Read::new(er2.name, rdid, er2.sequence, er2.quality);
                        if rd1.is_empty() || rd2.is_empty() {
                            continue;
                        }
                        let minsc = [
                            params.min_score(rd1.len()),
                            params.min_score(rd2.len()),
                        ];
                        aligner.init_pair(
                            rd1,
                            rd2,
                            [params.nofw; 2],
                            [params.norc; 2],
                            minsc,
                        );
                        aligner.go();
                        emit_pair_records(&aligner, metrics, &mut records)?;
                    }
                    let worker_metrics = std::mem::take(&mut aligner.metrics);
                    metrics.merge(&worker_metrics);
                    writer.lock().expect("writer lock").write_batch(&records)?;
                    records.clear();
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked")?;
        }
        Ok(())
    })
}

fn emit_pair_records(
    aligner: &SplicedAligner,
    metrics: &Metrics,
    records: &mut BufferedSamRecords,
) -> Result<(), Error> {
    let sink = aligner.sink();
    let pairs = sink.concordant_pairs();
    metrics.record_concordant_pairs(pairs.len());

    if let Some(&(best_i, best_j)) = pairs.iter().max_by_key(|&&(i, j)| {
        sink.results(0)[i].score + sink.results(1)[j].score
    }) {
        // Emit the best concordant pair, each mate pointing at the other.
        let r1 = &sink.results(0)[best_i];
        let r2 = &sink.results(1)[best_j];
        for (rdi, res, mate) in [(0usize, r1, r2), (1usize, r2, r1)] {
            let read = aligner.read_rc(rdi);
            metrics.record_read(1);
            let ctx = PairContext {
                paired: true,
                first_in_pair: rdi == 0,
                proper_pair: true,
                mate_unmapped: false,
                mate_reverse: !mate.fw,
                mate_tidx: Some(mate.tidx),
                mate_pos: Some(mate.toff),
            };
            for record in build_alignment_records(&read, &[res], ctx)? {
                records.push(record);
            }
        }
        return Ok(());
    }

    // No concordant pair: report each mate independently.
    for rdi in 0..2 {
        let read = aligner.read_rc(rdi);
        let ranked = sink.ranked(rdi);
        metrics.record_read(ranked.len());
        let other_ranked = sink.ranked(1 - rdi);
        let mate_best = other_ranked.first();
        let ctx = PairContext {
            paired: true,
            first_in_pair: rdi == 0,
            proper_pair: false,
            mate_unmapped: mate_best.is_none(),
            mate_reverse: mate_best.map(|m| !m.fw).unwrap_or(false),
            mate_tidx: mate_best.map(|m| m.tidx),
            mate_pos: mate_best.map(|m| m.toff),
        };
        if ranked.is_empty() {
            records.push(build_unmapped_record(&read));
        } else {
            for record in build_alignment_records(&read, &ranked, ctx)? {
                records.push(record);
            }
        }
    }
    Ok(())
}
