use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use seq_io::fasta::{Reader as FastaReader, Record};

use crate::config::defs::CONTIG_DELIMITER;
use crate::utils::file::{open_maybe_gzipped, write_fasta_record};

/// Contigs contributed by one organism to the combined reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ContigCount {
    pub prefix: String,
    pub contigs: usize,
    pub bases: u64,
}

pub fn contig_name(prefix: &str, index: usize) -> String {
    format!("{}{}{}", prefix, CONTIG_DELIMITER, index)
}

/// Writes every reference into one FASTA, renaming each record to `<prefix>_contig_<n>`.
/// Sequence lines are joined so each record is written on a single line.
///
/// # Arguments
///
/// * `references` - (prefix, reference path) pairs in run order. Plain or gzipped FASTA.
/// * `out_path` - Combined FASTA, truncated first.
///
/// # Returns
///
/// One ContigCount per reference, in input order.
pub fn concatenate_references(references: &[(String, PathBuf)], out_path: &Path) -> Result<Vec<ContigCount>> {
    let out_file = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let mut writer = BufWriter::new(out_file);
    let mut counts = Vec::with_capacity(references.len());

    for (prefix, path) in references {
        let reader = open_maybe_gzipped(path)
            .with_context(|| format!("Failed to open reference {}", path.display()))?;
        let mut reader = FastaReader::new(reader);
        let mut count = ContigCount {
            prefix: prefix.clone(),
            contigs: 0,
            bases: 0,
        };

        while let Some(record) = reader.next() {
            let record = record.map_err(|e| anyhow!("Invalid FASTA in {}: {}", path.display(), e))?;
            let seq = record.full_seq();
            debug!(
                "{}: {} -> {}",
                prefix,
                record.id().unwrap_or("?"),
                contig_name(prefix, count.contigs)
            );
            write_fasta_record(&mut writer, &contig_name(prefix, count.contigs), None, &seq)
                .with_context(|| format!("Failed to write {}", out_path.display()))?;
            count.contigs += 1;
            count.bases += seq.len() as u64;
        }

        if count.contigs == 0 {
            warn!("Reference {} for prefix {} contains no sequences", path.display(), prefix);
        }
        counts.push(count);
    }

    writer.flush().with_context(|| format!("Failed to flush {}", out_path.display()))?;
    Ok(counts)
}
