use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use lazy_static::lazy_static;
use thiserror::Error;

// External software
pub const BWA_TAG: &str = "bwa";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const PORETOOLS_TAG: &str = "poretools";
pub const PLOT_BAMSTATS_TAG: &str = "plot-bamstats";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    Sort,
    Index,
    Stats,
    Flagstat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BwaSubcommand {
    Index,
    Mem,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoretoolsSubcommand {
    Fasta,
    Fastq,
}

// Static folder names
pub const LOG_FOLDERNAME: &str = "log";
pub const STATS_FOLDERNAME: &str = "stats";
pub const SPLITTED_FOLDERNAME: &str = "splitted";
pub const FAST5_TEMP_FOLDERNAME: &str = "nanopore_fast5";

pub const DEFAULT_TEMP_FOLDERNAME: &str = "gru-temp";
pub const DEFAULT_READS_FOLDERNAME: &str = "reads";
pub const DEFAULT_READS_FILENAME: &str = "nanopore_reads";
pub const DEFAULT_INDEX_FOLDERNAME: &str = "index";
pub const DEFAULT_MAPPING_FOLDERNAME: &str = "mapping";

// Static filenames
pub const CONTIGS_FILENAME: &str = "_contigs.fasta";
pub const MAPPED_FILENAME: &str = "mapped.sam";
pub const REPORT_FILENAME: &str = "gru-output.html";

pub const FAST5_EXT: &str = "fast5";
pub const FASTA_EXT: &str = "fasta";
pub const FASTQ_EXT: &str = "fastq";
pub const SAM_EXT: &str = "sam";
pub const BAM_EXT: &str = "bam";
pub const BAI_EXT: &str = "bai";
pub const STATS_EXT: &str = "stats";
pub const FLAGSTAT_EXT: &str = "flagstat";
pub const PART_EXT: &str = "part";
pub const PNG_EXT: &str = "png";
pub const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz"];

// Static parameters
pub const CONTIG_DELIMITER: &str = "_contig_";
pub const BWA_ONT_PRESET: &str = "ont2d";
pub const HDF5_VERSION_CHECK: (&str, &str) = ("HDF5_DISABLE_VERSION_CHECK", "2");

/// Chart stems written by plot-bamstats, in report order.
pub const CHART_STEMS: &[&str] = &[
    "gc-content",
    "coverage",
    "quals",
    "quals2",
    "quals3",
    "quals-hm",
    "acgt-cycles",
    "gc-depth",
    "indel-cycles",
    "indel-dist",
];

lazy_static! {
    pub static ref CHART_CAPTIONS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("gc-content", "GC Content");
        m.insert("coverage", "Coverage");
        m.insert("quals", "Quality per cycle");
        m.insert("quals2", "Quality per cycle");
        m.insert("quals3", "Quality per cycle");
        m.insert("quals-hm", "Quality per cycle");
        m.insert("acgt-cycles", "Per-base sequence content");
        m.insert("gc-depth", "Mapped depth vs GC");
        m.insert("indel-cycles", "InDels per cycle");
        m.insert("indel-dist", "InDel length");
        m
    };
}

/// External programs the pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Extractor,
    Mapper,
    Samtools,
    Plotter,
}

impl Tool {
    pub fn tag(self) -> &'static str {
        match self {
            Tool::Extractor => PORETOOLS_TAG,
            Tool::Mapper => BWA_TAG,
            Tool::Samtools => SAMTOOLS_TAG,
            Tool::Plotter => PLOT_BAMSTATS_TAG,
        }
    }

    fn code_offset(self) -> i32 {
        match self {
            Tool::Extractor => 0,
            Tool::Mapper => 1,
            Tool::Samtools => 2,
            Tool::Plotter => 3,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Named steps of a run. The first three are the coarse pipeline stages,
/// the rest are per-organism fan-out steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extract,
    BuildIndex,
    MapReads,
    Sort,
    BamIndex,
    Stats,
    Flagstat,
    Plot,
    Collect,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Extract => "extract reads",
            Stage::BuildIndex => "build reference index",
            Stage::MapReads => "map reads",
            Stage::Sort => "sort alignments",
            Stage::BamIndex => "index alignments",
            Stage::Stats => "alignment statistics",
            Stage::Flagstat => "flag statistics",
            Stage::Plot => "plot charts",
            Stage::Collect => "collect artifacts",
        }
    }

    /// Diagnostic log file name. Fan-out steps are keyed by organism prefix.
    pub fn log_filename(self, prefix: Option<&str>) -> String {
        let base = match self {
            Stage::Extract => "poretools_error",
            Stage::BuildIndex => "bwa_index_error",
            Stage::MapReads => "bwa_mem_error",
            Stage::Sort => "samtools_sort",
            Stage::BamIndex => "samtools_index",
            Stage::Stats => "samtools_stats",
            Stage::Flagstat => "samtools_flagstat",
            Stage::Plot => "plot_bamstats",
            Stage::Collect => "collect",
        };
        match prefix {
            Some(prefix) => format!("{}_{}.log", prefix, base),
            None => format!("{}.log", base),
        }
    }

    fn code_offset(self) -> i32 {
        match self {
            Stage::Extract => 0,
            Stage::BuildIndex => 1,
            Stage::MapReads => 2,
            Stage::Sort => 3,
            Stage::BamIndex => 4,
            Stage::Stats => 5,
            Stage::Flagstat => 6,
            Stage::Plot => 7,
            Stage::Collect => 8,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One organism's fan-out failure, kept alongside the others until the join.
#[derive(Debug)]
pub struct OrganismFailure {
    pub prefix: String,
    /// Unknown when the organism's task died without reporting a step.
    pub step: Option<Stage>,
    pub error: PipelineError,
}

impl fmt::Display for OrganismFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "[{}] {}: {}", self.prefix, step, self.error),
            None => write!(f, "[{}] {}", self.prefix, self.error),
        }
    }
}

fn join_failures(failures: &[OrganismFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Usage(String),

    #[error("Could not read the config file {path}: {detail}")]
    ConfigRead { path: PathBuf, detail: String },

    #[error("Invalid configuration field {field}: {detail}")]
    ConfigInvalid { field: String, detail: String },

    #[error("Project output folder {0} exists, but overwrite_folder is not enabled")]
    ProjectFolderConflict(PathBuf),

    #[error("Nanopore input {0} does not exist. Wrong path?")]
    InputNotFound(PathBuf),

    #[error("Illumina reads folder {0} does not exist, but is enabled. Wrong path?")]
    SecondaryInputNotFound(PathBuf),

    #[error("References folder {0} does not exist, but is enabled. Wrong path?")]
    ReferenceFolderNotFound(PathBuf),

    #[error("Reference genome for {organism} is not given, but references are enabled")]
    ReferenceNotDeclared { organism: String },

    #[error("The reference file for {organism} ({path}) does not exist")]
    MissingReference { organism: String, path: PathBuf },

    #[error("The Illumina file for {organism} ({path}) does not exist")]
    MissingSecondaryRead { organism: String, path: PathBuf },

    #[error("Prefix '{prefix}' of {organism} is invalid: {reason}")]
    InvalidPrefix {
        organism: String,
        prefix: String,
        reason: &'static str,
    },

    #[error("Prefix '{prefix}' is used by both {first} and {second}")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String,
    },

    #[error("No organisms declared in file_mapping, but references are enabled")]
    NoOrganisms,

    #[error("Could not {operation} {path}: {source}")]
    Workspace {
        operation: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    #[error("I/O failure during {stage} ({path}): {detail}")]
    Io {
        stage: Stage,
        path: PathBuf,
        detail: String,
    },

    #[error("{tool} executable '{program}' could not be started. Wrong path?")]
    ToolNotFound { tool: Tool, program: String },

    #[error("{tool} executable '{program}' failed to start: {source}")]
    ToolLaunch {
        tool: Tool,
        program: String,
        source: io::Error,
    },

    #[error("{stage} failed: '{program}' exited with {status} (see {})", .log.display())]
    ToolFailure {
        stage: Stage,
        program: String,
        status: ExitStatus,
        log: PathBuf,
    },

    #[error("Could not split mappings into single files: {detail}")]
    Partition { detail: String },

    #[error("{} of {total} organisms failed: {}", .failures.len(), join_failures(.failures))]
    FanOutFailed {
        total: usize,
        failures: Vec<OrganismFailure>,
    },

    #[error("{stage} did not produce {path}")]
    MissingArtifact { stage: Stage, path: PathBuf },

    #[error("Processing of {prefix} stopped unexpectedly: {detail}")]
    TaskAborted { prefix: String, detail: String },

    #[error("Could not render the report: {detail}")]
    Report { detail: String },
}

impl PipelineError {
    /// Process exit code for this failure class. Stable across runs.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Usage(_) => 1,
            PipelineError::ConfigRead { .. } | PipelineError::ConfigInvalid { .. } => 2,
            PipelineError::ProjectFolderConflict(_) => 3,
            PipelineError::InputNotFound(_) => 4,
            PipelineError::SecondaryInputNotFound(_) => 5,
            PipelineError::ReferenceFolderNotFound(_) => 6,
            PipelineError::ReferenceNotDeclared { .. } | PipelineError::MissingReference { .. } => 7,
            PipelineError::MissingSecondaryRead { .. } => 8,
            PipelineError::InvalidPrefix { .. } => 9,
            PipelineError::DuplicatePrefix { .. } => 10,
            PipelineError::NoOrganisms => 11,
            PipelineError::Workspace { .. } => 20,
            PipelineError::Io { .. } => 21,
            PipelineError::ToolNotFound { tool, .. } => 30 + tool.code_offset(),
            PipelineError::ToolLaunch { tool, .. } => 35 + tool.code_offset(),
            PipelineError::ToolFailure { stage, .. } => 40 + stage.code_offset(),
            PipelineError::Partition { .. } => 50,
            PipelineError::FanOutFailed { .. } => 51,
            PipelineError::MissingArtifact { .. } => 52,
            PipelineError::TaskAborted { .. } => 53,
            PipelineError::Report { .. } => 60,
        }
    }

    /// Argument-shape errors are followed by the usage text.
    pub fn shows_usage(&self) -> bool {
        matches!(
            self,
            PipelineError::Usage(_) | PipelineError::ConfigRead { .. } | PipelineError::ProjectFolderConflict(_)
        )
    }

    pub fn io(stage: Stage, path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        PipelineError::Io {
            stage,
            path: path.into(),
            detail: err.to_string(),
        }
    }
}
