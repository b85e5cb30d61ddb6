/// Per-organism alignment summaries, read from the statistics tools' output files
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Headline numbers of one organism's alignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentSummary {
    pub raw_total_sequences: u64,
    pub filtered_sequences: u64,
    pub non_primary_alignments: u64,
    pub reads_duplicated: u64,
    pub reads_mapped: u64,
    pub reads_mq0: u64,
    pub average_length: f64,
    pub total_length: u64,
    pub bases_mapped_cigar: u64,
    pub error_rate: f64,
}

impl AlignmentSummary {
    pub fn percent_mapped(&self) -> f64 {
        if self.raw_total_sequences == 0 {
            0.0
        } else {
            self.reads_mapped as f64 * 100.0 / self.raw_total_sequences as f64
        }
    }

    /// Label and formatted value pairs, in display order.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Raw total sequences", self.raw_total_sequences.to_string()),
            ("Filtered sequences", self.filtered_sequences.to_string()),
            ("Non-primary alignments", self.non_primary_alignments.to_string()),
            ("Reads duplicated", self.reads_duplicated.to_string()),
            ("Reads mapped", self.reads_mapped.to_string()),
            ("Percent mapped", format!("{:.2}%", self.percent_mapped())),
            ("Reads MQ0", self.reads_mq0.to_string()),
            ("Average length", format!("{:.1}", self.average_length)),
            ("Total length", self.total_length.to_string()),
            ("Bases mapped (cigar)", self.bases_mapped_cigar.to_string()),
            ("Error rate", format!("{:e}", self.error_rate)),
        ]
    }
}

/// Source of alignment summaries. The report only depends on this seam.
pub trait SummaryReader: Send + Sync {
    fn read_summary(&self, path: &Path) -> Result<AlignmentSummary>;
}

/// Reads the `SN` section of `samtools stats` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SamtoolsStatsReader;

impl SummaryReader for SamtoolsStatsReader {
    fn read_summary(&self, path: &Path) -> Result<AlignmentSummary> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        parse_samtools_stats(&text).with_context(|| format!("Invalid statistics in {}", path.display()))
    }
}

pub fn parse_samtools_stats(text: &str) -> Result<AlignmentSummary> {
    let mut summary = AlignmentSummary::default();
    let mut seen = 0usize;

    for line in text.lines() {
        let Some(rest) = line.strip_prefix("SN\t") else {
            continue;
        };
        let mut fields = rest.split('\t');
        let key = fields.next().unwrap_or("").trim_end_matches(':');
        let value = fields.next().unwrap_or("").trim();
        seen += 1;

        let int = || -> Result<u64> {
            value.parse::<u64>().map_err(|e| anyhow!("'{}' for '{}': {}", value, key, e))
        };
        let float = || -> Result<f64> {
            value.parse::<f64>().map_err(|e| anyhow!("'{}' for '{}': {}", value, key, e))
        };
        match key {
            "raw total sequences" => summary.raw_total_sequences = int()?,
            "filtered sequences" => summary.filtered_sequences = int()?,
            "non-primary alignments" => summary.non_primary_alignments = int()?,
            "reads duplicated" => summary.reads_duplicated = int()?,
            "reads mapped" => summary.reads_mapped = int()?,
            "reads MQ0" => summary.reads_mq0 = int()?,
            "average length" => summary.average_length = float()?,
            "total length" => summary.total_length = int()?,
            "bases mapped (cigar)" => summary.bases_mapped_cigar = int()?,
            "error rate" => summary.error_rate = float()?,
            _ => {}
        }
    }

    if seen == 0 {
        return Err(anyhow!("no SN summary lines"));
    }
    Ok(summary)
}
