/// SAM output writer built on noodles
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::num::NonZeroUsize;
use std::path::Path;

use noodles::sam;
use noodles::sam::alignment::io::Write;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::MappingQuality;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::alignment::record_buf::{QualityScores, RecordBuf, Sequence};
use noodles::sam::header::record::value::{map::Program, Map};

use crate::align::{AlnRes, Read};
use crate::error::Error;
use crate::genome::{decode_base, Reference};

/// Buffer for SAM records built by parallel workers and flushed under the
/// writer lock.
#[derive(Default)]
pub struct BufferedSamRecords {
    pub records: Vec<RecordBuf>,
}

impl BufferedSamRecords {
    pub fn new() -> Self {
        Self {
            records: Vec::with_capacity(10_000),
        }
    }

    pub fn push(&mut self, record: RecordBuf) {
        self.records.push(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// SAM file writer.
pub struct SamWriter {
    writer: sam::io::Writer<BufWriter<Box<dyn std::io::Write + Send>>>,
    header: sam::Header,
}

impl SamWriter {
    /// Create a writer with a header derived from the reference;
    /// "-" writes to stdout.
    pub fn create(output_path: &Path, reference: &Reference) -> Result<Self, Error> {
        let out: Box<dyn std::io::Write + Send> = if output_path.as_os_str() == "-" {
            Box::new(std::io::stdout())
        } else {
            Box::new(File::create(output_path).map_err(|e| Error::io(e, output_path))?)
        };
        let header = build_sam_header(reference)?;
        let mut writer = sam::io::Writer::new(BufWriter::new(out));
        writer.write_header(&header)?;
        Ok(Self { writer, header })
    }

    /// Write a batch of buffered records.
    pub fn write_batch(&mut self, batch: &BufferedSamRecords) -> Result<(), Error> {
        for record in &batch.records {
            self.writer.write_alignment_record(&self.header, record)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.get_mut().flush()?;
        Ok(())
    }
}

fn build_sam_header(reference: &Reference) -> Result<sam::Header, Error> {
    let mut builder = sam::Header::builder().set_header(Default::default());
    for tidx in 0..reference.num_refs() {
        let len = NonZeroUsize::new(reference.approx_len(tidx) as usize).ok_or_else(|| {
            Error::Index(format!(
                "chromosome {} has zero length",
                reference.name(tidx)
            ))
        })?;
        builder = builder.add_reference_sequence(
            reference.name(tidx),
            Map::<sam::header::record::value::map::ReferenceSequence>::new(len),
        );
    }
    builder = builder.add_program("rusplice", Map::<Program>::default());
    Ok(builder.build())
}

/// Pair-context flags for one mate's records.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairContext {
    pub paired: bool,
    pub first_in_pair: bool,
    pub proper_pair: bool,
    pub mate_unmapped: bool,
    pub mate_reverse: bool,
    pub mate_tidx: Option<usize>,
    pub mate_pos: Option<u64>,
}

/// Build the records for one mate's ranked alignments.
pub fn build_alignment_records(
    read: &Read,
    alignments: &[&AlnRes],
    pair: PairContext,
) -> Result<Vec<RecordBuf>, Error> {
    let n = alignments.len();
    let mapq: u8 = if n == 1 { 60 } else { 1 };
    let mut records = Vec::with_capacity(n);
    for (hit_index, res) in alignments.iter().enumerate() {
        let mut record = RecordBuf::default();
        record.name_mut().replace(read.name.clone().into());

        let mut flags = Flags::empty();
        if !res.fw {
            flags |= Flags::REVERSE_COMPLEMENTED;
        }
        if hit_index > 0 {
            flags |= Flags::SECONDARY;
        }
        if pair.paired {
            flags |= Flags::SEGMENTED;
            flags |= if pair.first_in_pair {
                Flags::FIRST_SEGMENT
            } else {
                Flags::LAST_SEGMENT
            };
            if pair.proper_pair {
                flags |= Flags::PROPERLY_SEGMENTED;
            }
            if pair.mate_unmapped {
                flags |= Flags::MATE_UNMAPPED;
            }
            if pair.mate_reverse {
                flags |= Flags::MATE_REVERSE_COMPLEMENTED;
            }
        }
        *record.flags_mut() = flags;

        *record.reference_sequence_id_mut() = Some(res.tidx);
        let pos = res.toff as usize + 1;
        *record.alignment_start_mut() = Some(
            pos.try_into()
                .map_err(|e| Error::Alignment(format!("invalid position {pos}: {e}")))?,
        );
        *record.mapping_quality_mut() = MappingQuality::new(mapq);

        let mut cigar = sam::alignment::record_buf::Cigar::default();
        for (len, op) in res.cigar() {
            use sam::alignment::record::cigar::op::Kind;
            let kind = match op {
                'M' => Kind::Match,
                'I' => Kind::Insertion,
                'D' => Kind::Deletion,
                'N' => Kind::Skip,
                'S' => Kind::SoftClip,
                _ => return Err(Error::Alignment(format!("unexpected CIGAR op {op}"))),
            };
            cigar
                .as_mut()
                .push(sam::alignment::record::cigar::Op::new(kind, len as usize));
        }
        *record.cigar_mut() = cigar;

        if pair.paired {
            *record.mate_reference_sequence_id_mut() = pair.mate_tidx;
            if let Some(mpos) = pair.mate_pos {
                let mpos = mpos as usize + 1;
                *record.mate_alignment_start_mut() = Some(mpos.try_into().map_err(|e| {
                    Error::Alignment(format!("invalid mate position {mpos}: {e}"))
                })?);
            }
        }

        // Sequence and qualities in alignment orientation.
        let seq_bytes: Vec<u8> = read
            .strand_seq(res.fw)
            .iter()
            .map(|&b| decode_base(b))
            .collect();
        *record.sequence_mut() = Sequence::from(seq_bytes);
        let qual: Vec<u8> = read
            .strand_qual(res.fw)
            .iter()
            .map(|&q| q.saturating_sub(33))
            .collect();
        *record.quality_scores_mut() = QualityScores::from(qual);

        let data = record.data_mut();
        data.insert(Tag::ALIGNMENT_HIT_COUNT, Value::from(n as i32));
        data.insert(Tag::ALIGNMENT_SCORE, Value::from(res.score as i32));
        data.insert(
            Tag::EDIT_DISTANCE,
            Value::from(res.edit_distance() as i32),
        );
        if let Some(strand) = res.splice_strand() {
            data.insert(
                Tag::new(b'X', b'S'),
                Value::Character(strand as u8),
            );
        }

        records.push(record);
    }
    Ok(records)
}

/// Record for an unmapped read.
pub fn build_unmapped_record(read: &Read) -> RecordBuf {
    let mut record = RecordBuf::default();
    record.name_mut().replace(read.name.clone().into());
    *record.flags_mut() = Flags::UNMAPPED;
    let seq_bytes: Vec<u8> = read.seq.iter().map(|&b| decode_base(b)).collect();
    *record.sequence_mut() = Sequence::from(seq_bytes);
    let qual: Vec<u8> = read.qual.iter().map(|&q| q.saturating_sub(33)).collect();
    *record.quality_scores_mut() = QualityScores::from(qual);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::edit::{Edit, SpliceDir};
    use crate::genome::encode_base;

    fn encode(s: &str) -> Vec<u8> {
        s.bytes().map(encode_base).collect()
    }

    fn test_read() -> Read {
        Read::new("r1".into(), 0, encode("ACGTACGT"), vec![b'I'; 8])
    }

    fn res_at(toff: u64) -> AlnRes {
        AlnRes {
            fw: true,
            tidx: 0,
            toff,
            score: 16,
            splicescore: 0.0,
            edits: Vec::new(),
            trim5: 0,
            trim3: 0,
            read_len: 8,
            spliced_count: 0,
            near_splice_sites: false,
            right_off: toff + 8,
        }
    }

    #[test]
    fn header_lists_reference_sequences() {
        let reference = Reference::from_seqs(vec![
            ("chr1".into(), encode("ACGTACGT")),
            ("chr2".into(), encode("TTTT")),
        ]);
        let header = build_sam_header(&reference).unwrap();
        assert_eq!(header.reference_sequences().len(), 2);
    }

    #[test]
    fn spliced_record_gets_skip_cigar_and_xs() {
        let read = test_read();
        let mut res = res_at(10);
        res.edits
            .push(Edit::splice(4, 100, SpliceDir::Forward, 0, 0, false));
        res.spliced_count = 1;
        let records =
            build_alignment_records(&read, &[&res], PairContext::default()).unwrap();
        assert_eq!(records.len(), 1);
        let cigar = &records[0].cigar();
        assert_eq!(cigar.as_ref().len(), 3); // 4M 100N 4M
        assert!(records[0].data().get(&Tag::new(b'X', b'S')).is_some());
    }

    #[test]
    fn secondary_flag_set_past_first() {
        let read = test_read();
        let a = res_at(10);
        let b = res_at(50);
        let records =
            build_alignment_records(&read, &[&a, &b], PairContext::default()).unwrap();
        assert!(!records[0].flags().is_secondary());
        assert!(records[1].flags().is_secondary());
    }
}
