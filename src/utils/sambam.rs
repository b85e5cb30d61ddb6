use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fxhash::FxHashMap;
use log::{debug, info, warn};

use crate::config::defs::{CONTIG_DELIMITER, SAM_EXT};

/// Record counts written to each partition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartitionSummary {
    /// In the order the prefixes were given.
    pub per_prefix: Vec<(String, u64)>,
    /// Unmapped records plus records on a reference no prefix owns.
    pub unassigned: u64,
}

impl PartitionSummary {
    pub fn count(&self, prefix: &str) -> Option<u64> {
        self.per_prefix
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, n)| *n)
    }

    pub fn assigned(&self) -> u64 {
        self.per_prefix.iter().map(|(_, n)| n).sum()
    }
}

/// Prefix of the organism a renamed contig belongs to.
pub fn reference_owner(rname: &str) -> Option<&str> {
    rname.find(CONTIG_DELIMITER).map(|i| &rname[..i])
}

pub fn partition_path(out_dir: &Path, prefix: &str) -> PathBuf {
    out_dir.join(format!("{}.{}", prefix, SAM_EXT))
}

/// Splits a SAM file into one SAM per prefix in a single pass.
///
/// Non-`@SQ` header lines go to every partition, `@SQ` lines only to the partition owning
/// the sequence, alignment records to the partition owning their RNAME. Every partition is
/// created even when it receives no records.
///
/// # Arguments
///
/// * `sam_path` - Combined SAM from the mapper.
/// * `out_dir` - Directory receiving `<prefix>.sam` files.
/// * `prefixes` - Declared organism prefixes.
///
/// # Returns
///
/// PartitionSummary with per-prefix and unassigned record counts.
pub fn partition_alignments(sam_path: &Path, out_dir: &Path, prefixes: &[String]) -> Result<PartitionSummary> {
    let input = File::open(sam_path)
        .with_context(|| format!("Failed to open {}", sam_path.display()))?;
    let mut reader = BufReader::new(input);

    let mut index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut writers = Vec::with_capacity(prefixes.len());
    for (i, prefix) in prefixes.iter().enumerate() {
        let path = partition_path(out_dir, prefix);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writers.push(BufWriter::new(file));
        index.insert(prefix.as_str(), i);
    }

    let mut counts = vec![0u64; prefixes.len()];
    let mut unassigned = 0u64;
    let mut line = String::new();
    let mut line_number = 0usize;

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .with_context(|| format!("Failed to read {}", sam_path.display()))?;
        if read == 0 {
            break;
        }
        line_number += 1;
        if line.trim_end().is_empty() {
            continue;
        }
        if !line.ends_with('\n') {
            line.push('\n');
        }

        if line.starts_with('@') {
            if line.starts_with("@SQ\t") {
                let owner = line
                    .trim_end()
                    .split('\t')
                    .find_map(|field| field.strip_prefix("SN:"))
                    .and_then(reference_owner)
                    .and_then(|owner| index.get(owner).copied());
                match owner {
                    Some(i) => writers[i].write_all(line.as_bytes())?,
                    None => debug!("Dropping header line without owner: {}", line.trim_end()),
                }
            } else {
                for writer in writers.iter_mut() {
                    writer.write_all(line.as_bytes())?;
                }
            }
            continue;
        }

        let rname = line
            .split('\t')
            .nth(2)
            .ok_or_else(|| anyhow!("Malformed SAM record at line {} of {}", line_number, sam_path.display()))?;
        match reference_owner(rname).and_then(|owner| index.get(owner).copied()) {
            Some(i) => {
                writers[i].write_all(line.as_bytes())?;
                counts[i] += 1;
            }
            None => unassigned += 1,
        }
    }

    for writer in writers.iter_mut() {
        writer.flush()?;
    }

    let summary = PartitionSummary {
        per_prefix: prefixes.iter().cloned().zip(counts).collect(),
        unassigned,
    };
    for (prefix, count) in &summary.per_prefix {
        info!("{}: {} alignment records", prefix, count);
        if *count == 0 {
            warn!("No alignments assigned to {}", prefix);
        }
    }
    if summary.unassigned > 0 {
        info!("{} alignment records unmapped or without a known organism", summary.unassigned);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAM: &str = "@HD\tVN:1.6\tSO:unsorted\n\
@SQ\tSN:a_contig_0\tLN:100\n\
@SQ\tSN:ab_contig_0\tLN:50\n\
@SQ\tSN:a_contig_1\tLN:10\n\
@PG\tID:bwa\tPN:bwa\n\
r1\t0\ta_contig_0\t1\t60\t4M\t*\t0\t0\tACGT\tIIII\n\
r2\t0\tab_contig_0\t1\t60\t4M\t*\t0\t0\tACGT\tIIII\n\
r3\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII\n\
r4\t16\ta_contig_1\t3\t60\t4M\t*\t0\t0\tACGT\tIIII\n\
r5\t0\tzz_contig_0\t3\t60\t4M\t*\t0\t0\tACGT\tIIII";

    #[test]
    fn test_reference_owner() {
        assert_eq!(reference_owner("a_contig_12"), Some("a"));
        assert_eq!(reference_owner("my-org_contig_0"), Some("my-org"));
        assert_eq!(reference_owner("*"), None);
        assert_eq!(reference_owner("chr1"), None);
    }

    #[test]
    fn test_partition_does_not_confuse_overlapping_prefixes() -> Result<()> {
        let dir = tempdir()?;
        let sam = dir.path().join("mapped.sam");
        fs::write(&sam, SAM)?;
        let prefixes = vec!["a".to_string(), "ab".to_string(), "c".to_string()];

        let summary = partition_alignments(&sam, dir.path(), &prefixes)?;
        assert_eq!(summary.count("a"), Some(2));
        assert_eq!(summary.count("ab"), Some(1));
        assert_eq!(summary.count("c"), Some(0));
        assert_eq!(summary.unassigned, 2);
        assert_eq!(summary.assigned() + summary.unassigned, 5);

        let a = fs::read_to_string(dir.path().join("a.sam"))?;
        assert!(a.starts_with("@HD\tVN:1.6"));
        assert!(a.contains("@SQ\tSN:a_contig_1"));
        assert!(!a.contains("ab_contig_0"));
        assert!(a.contains("@PG\tID:bwa"));
        assert!(a.ends_with("r4\t16\ta_contig_1\t3\t60\t4M\t*\t0\t0\tACGT\tIIII\n"));

        let ab = fs::read_to_string(dir.path().join("ab.sam"))?;
        assert_eq!(ab.lines().filter(|l| !l.starts_with('@')).count(), 1);

        let c = fs::read_to_string(dir.path().join("c.sam"))?;
        assert_eq!(c, "@HD\tVN:1.6\tSO:unsorted\n@PG\tID:bwa\tPN:bwa\n");
        Ok(())
    }

    #[test]
    fn test_partition_rejects_truncated_record() -> Result<()> {
        let dir = tempdir()?;
        let sam = dir.path().join("mapped.sam");
        fs::write(&sam, "@HD\tVN:1.6\nbroken-line\n")?;
        let err = partition_alignments(&sam, dir.path(), &["a".to_string()]).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        Ok(())
    }
}
