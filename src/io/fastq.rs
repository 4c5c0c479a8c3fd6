/// FASTQ reader with base encoding and decompression support
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;
use noodles::fastq;

use crate::error::Error;
use crate::genome::encode_base;

/// A read from a FASTQ file with encoded bases.
#[derive(Debug, Clone)]
pub struct EncodedRead {
    pub name: String,
    /// Bases encoded as 0=A, 1=C, 2=G, 3=T, 4=N
    pub sequence: Vec<u8>,
    /// Raw FASTQ quality characters
    pub quality: Vec<u8>,
}

/// FASTQ reader that handles gzip decompression and base encoding.
pub struct FastqReader {
    inner: fastq::Reader<Box<dyn BufRead + Send>>,
}

impl FastqReader {
    /// Open a FASTQ file, plain or gzip-compressed by extension.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let path_str = path.to_string_lossy();
        let is_gzipped = path_str.ends_with(".gz") || path_str.ends_with(".gzip");
        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let reader: Box<dyn BufRead + Send> = if is_gzipped {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self {
            inner: fastq::Reader::new(reader),
        })
    }

    /// Next read with encoded bases, or `None` at end of input.
    pub fn next_encoded(&mut self) -> Result<Option<EncodedRead>, Error> {
        match self.inner.records().next() {
            Some(Ok(record)) => {
                let name = String::from_utf8_lossy(record.name()).to_string();
                let sequence = record.sequence().iter().map(|&b| encode_base(b)).collect();
                let quality = record.quality_scores().to_vec();
                Ok(Some(EncodedRead {
                    name,
                    sequence,
                    quality,
                }))
            }
            Some(Err(e)) => Err(Error::from(e)),
            None => Ok(None),
        }
    }

    /// Pull up to `n` reads into `out`; returns how many were read.
    pub fn next_batch(&mut self, n: usize, out: &mut Vec<EncodedRead>) -> Result<usize, Error> {
        out.clear();
        while out.len() < n {
            match self.next_encoded()? {
                Some(read) => out.push(read),
                None => break,
            }
        }
        Ok(out.len())
    }
}

/// Paired reader pulling mates in lockstep from two files.
pub struct PairedFastqReader {
    r1: FastqReader,
    r2: FastqReader,
}

impl PairedFastqReader {
    pub fn open(path1: &Path, path2: &Path) -> Result<Self, Error> {
        Ok(Self {
            r1: FastqReader::open(path1)?,
            r2: FastqReader::open(path2)?,
        })
    }

    pub fn next_pair(&mut self) -> Result<Option<(EncodedRead, EncodedRead)>, Error> {
        match (self.r1.next_encoded()?, self.r2.next_encoded()?) {
            (Some(a), Some(b)) => Ok(Some((a, b))),
            (None, None) => Ok(None),
            _ => Err(Error::Parameter(
                "paired FASTQ files have different read counts".into(),
            )),
        }
    }

    pub fn next_batch(
        &mut self,
        n: usize,
        out: &mut Vec<(EncodedRead, EncodedRead)>,
    ) -> Result<usize, Error> {
        out.clear();
        while out.len() < n {
            match self.next_pair()? {
                Some(pair) => out.push(pair),
                None => break,
            }
        }
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_plain_fastq() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "@read1").unwrap();
        writeln!(file, "ACGTN").unwrap();
        writeln!(file, "+").unwrap();
        writeln!(file, "IIIII").unwrap();

        let mut reader = FastqReader::open(file.path()).unwrap();
        let read = reader.next_encoded().unwrap().unwrap();
        assert_eq!(read.name, "read1");
        assert_eq!(read.sequence, vec![0, 1, 2, 3, 4]);
        assert_eq!(read.quality, vec![b'I'; 5]);
        assert!(reader.next_encoded().unwrap().is_none());
    }

    #[test]
    fn batches_cap_at_request() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..5 {
            writeln!(file, "@r{i}").unwrap();
            writeln!(file, "ACGT").unwrap();
            writeln!(file, "+").unwrap();
            writeln!(file, "IIII").unwrap();
        }
        let mut reader = FastqReader::open(file.path()).unwrap();
        let mut batch = Vec::new();
        assert_eq!(reader.next_batch(3, &mut batch).unwrap(), 3);
        assert_eq!(reader.next_batch(3, &mut batch).unwrap(), 2);
        assert_eq!(reader.next_batch(3, &mut batch).unwrap(), 0);
    }
}
