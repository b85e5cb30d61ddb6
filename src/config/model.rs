//! Raw configuration document and the validated, immutable run description.

use std::path::PathBuf;

use serde::Deserialize;

use crate::config::defs::{
    BWA_TAG, DEFAULT_INDEX_FOLDERNAME, DEFAULT_MAPPING_FOLDERNAME, DEFAULT_READS_FILENAME,
    DEFAULT_READS_FOLDERNAME, DEFAULT_TEMP_FOLDERNAME, PLOT_BAMSTATS_TAG, PORETOOLS_TAG,
    SAMTOOLS_TAG,
};

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub project_settings: ProjectSettings,
    pub nanopore_input: PathBuf,
    #[serde(default)]
    pub illumina_reads: IlluminaSettings,
    #[serde(default)]
    pub references: ReferenceSettings,
    #[serde(default)]
    pub software_general: SoftwareGeneral,
    #[serde(default)]
    pub software_settings: SoftwareSettings,
    #[serde(default)]
    pub gru_settings: GruSettings,
    /// Kept as a raw mapping so document order survives deserialization.
    #[serde(default)]
    pub file_mapping: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
pub struct ProjectSettings {
    pub project_folder: PathBuf,
    #[serde(default)]
    pub overwrite_folder: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct IlluminaSettings {
    #[serde(default)]
    pub enable_illumina: bool,
    pub folder: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReferenceSettings {
    #[serde(default)]
    pub enable_references: bool,
    pub folder: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SoftwareGeneral {
    pub bwa: String,
    pub samtools: String,
    pub poretools: String,
    pub plot_bamstats: String,
}

impl Default for SoftwareGeneral {
    fn default() -> Self {
        SoftwareGeneral {
            bwa: BWA_TAG.to_string(),
            samtools: SAMTOOLS_TAG.to_string(),
            poretools: PORETOOLS_TAG.to_string(),
            plot_bamstats: PLOT_BAMSTATS_TAG.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SoftwareSettings {
    pub mapping_threads: Option<usize>,
    pub sorting_threads: Option<usize>,
    pub max_parallel_jobs: Option<usize>,
    #[serde(default)]
    pub gru_debug: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GruSettings {
    pub temp_foldername: String,
    pub nanopore_reads_foldername: String,
    pub nanopore_reads_filename: String,
    pub bwa_reference_index_foldername: String,
    pub mapping_foldername: String,
    pub template: Option<PathBuf>,
}

impl Default for GruSettings {
    fn default() -> Self {
        GruSettings {
            temp_foldername: DEFAULT_TEMP_FOLDERNAME.to_string(),
            nanopore_reads_foldername: DEFAULT_READS_FOLDERNAME.to_string(),
            nanopore_reads_filename: DEFAULT_READS_FILENAME.to_string(),
            bwa_reference_index_foldername: DEFAULT_INDEX_FOLDERNAME.to_string(),
            mapping_foldername: DEFAULT_MAPPING_FOLDERNAME.to_string(),
            template: None,
        }
    }
}

/// One `file_mapping` entry as written in the document.
#[derive(Debug, Deserialize)]
pub struct RawOrganism {
    pub prefix: String,
    pub reference: Option<PathBuf>,
    pub illumina: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<PathBuf> {
        match self {
            OneOrMany::One(path) => vec![path],
            OneOrMany::Many(paths) => paths,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl RawInput {
    pub fn path(&self) -> &PathBuf {
        match self {
            RawInput::Directory(path) | RawInput::Archive(path) => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub extractor: String,
    pub mapper: String,
    pub samtools: String,
    pub plotter: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ThreadHints {
    pub mapping: usize,
    pub sorting: usize,
    pub max_parallel_jobs: usize,
}

#[derive(Debug, Clone)]
pub struct FolderNames {
    pub temp: String,
    pub reads: String,
    pub reads_filename: String,
    pub index: String,
    pub mapping: String,
}

#[derive(Debug, Clone)]
pub struct OrganismEntry {
    pub name: String,
    pub prefix: String,
    /// Declared file name, as shown in the report.
    pub reference_name: Option<String>,
    /// Resolved under the references folder; present whenever references are enabled.
    pub reference: Option<PathBuf>,
    pub secondary_reads: Vec<PathBuf>,
}

/// Validated description of a run. Shared read-only (behind an `Arc`) by every stage.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub config_path: PathBuf,
    pub project_folder: PathBuf,
    pub overwrite: bool,
    pub raw_input: RawInput,
    /// Set only when secondary reads are enabled.
    pub secondary_reads_folder: Option<PathBuf>,
    /// Set only when reference-based analysis is enabled.
    pub references_folder: Option<PathBuf>,
    pub tools: ToolPaths,
    pub threads: ThreadHints,
    pub folders: FolderNames,
    pub template: Option<PathBuf>,
    pub organisms: Vec<OrganismEntry>,
    pub debug: bool,
}

impl RunConfiguration {
    pub fn references_enabled(&self) -> bool {
        self.references_folder.is_some()
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.organisms.iter().map(|o| o.prefix.clone()).collect()
    }
}
