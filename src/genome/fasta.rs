use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Error;
use crate::genome::{encode_base, Reference};

/// Parse one FASTA file and append its chromosomes to `reference`.
///
/// - Base encoding: A=0, C=1, G=2, T=3, N/other=4
/// - Control characters (ASCII < 32) are skipped
/// - Case-insensitive (a == A)
pub fn read_fasta_into(path: &Path, reference: &mut Reference) -> Result<(), Error> {
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let reader = BufReader::new(file);

    let mut current_name: Option<String> = None;
    let mut current_seq: Vec<u8> = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| Error::io(e, path))?;
        if line.is_empty() {
            continue;
        }

        if let Some(stripped) = line.strip_prefix('>') {
            if let Some(name) = current_name.take() {
                reference.names.push(name);
                reference.seqs.push(std::mem::take(&mut current_seq));
            }
            let name = stripped
                .split_whitespace()
                .next()
                .ok_or_else(|| {
                    Error::Fasta(format!(
                        "empty chromosome name at {}:{}",
                        path.display(),
                        line_num + 1
                    ))
                })?
                .to_string();
            current_name = Some(name);
        } else {
            if current_name.is_none() {
                return Err(Error::Fasta(format!(
                    "sequence data before first header at {}:{}",
                    path.display(),
                    line_num + 1
                )));
            }
            for &byte in line.as_bytes() {
                if byte < 32 {
                    continue;
                }
                current_seq.push(encode_base(byte));
            }
        }
    }

    if let Some(name) = current_name {
        reference.names.push(name);
        reference.seqs.push(current_seq);
    }

    Ok(())
}
