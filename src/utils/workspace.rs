//! Directory layout of a run and its one-time creation.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::defs::{
    PipelineError, Stage, BAI_EXT, BAM_EXT, CONTIGS_FILENAME, FAST5_TEMP_FOLDERNAME,
    FLAGSTAT_EXT, LOG_FOLDERNAME, MAPPED_FILENAME, REPORT_FILENAME, SPLITTED_FOLDERNAME,
    STATS_EXT, STATS_FOLDERNAME,
};
use crate::config::model::RunConfiguration;
use crate::utils::sambam::partition_path;

#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub temp: PathBuf,
    pub log: PathBuf,
    pub reads: PathBuf,
    pub index: PathBuf,
    pub mapping: PathBuf,
    pub splitted: PathBuf,
    pub stats: PathBuf,
    reads_filename: String,
    prefixes: Vec<String>,
}

impl Workspace {
    /// Paths only; nothing is created.
    pub fn layout(config: &RunConfiguration) -> Self {
        let root = config.project_folder.clone();
        let mapping = root.join(&config.folders.mapping);
        Workspace {
            temp: root.join(&config.folders.temp),
            log: root.join(LOG_FOLDERNAME),
            reads: root.join(&config.folders.reads),
            index: root.join(&config.folders.index),
            splitted: mapping.join(SPLITTED_FOLDERNAME),
            mapping,
            stats: root.join(STATS_FOLDERNAME),
            reads_filename: config.folders.reads_filename.clone(),
            prefixes: config.prefixes(),
            root,
        }
    }

    /// Creates every folder of the run. An existing project folder is removed first, but
    /// only when overwriting was explicitly allowed.
    pub fn provision(config: &RunConfiguration) -> Result<Self, PipelineError> {
        let workspace = Workspace::layout(config);
        let root = &workspace.root;

        if root.exists() {
            if !config.overwrite {
                return Err(PipelineError::ProjectFolderConflict(root.clone()));
            }
            warn!("Removing existing project folder {}", root.display());
            fs::remove_dir_all(root).map_err(|source| PipelineError::Workspace {
                operation: "remove",
                path: root.clone(),
                source,
            })?;
        }

        for folder in workspace.folders() {
            create_folder(&folder)?;
        }
        info!("Project folder {} created", root.display());
        Ok(workspace)
    }

    fn folders(&self) -> Vec<PathBuf> {
        let mut folders = vec![
            self.root.clone(),
            self.temp.clone(),
            self.log.clone(),
            self.reads.clone(),
            self.index.clone(),
            self.mapping.clone(),
            self.splitted.clone(),
            self.stats.clone(),
        ];
        folders.extend(self.prefixes.iter().map(|p| self.organism_stats_dir(p)));
        folders
    }

    pub fn log_file(&self, stage: Stage, prefix: Option<&str>) -> PathBuf {
        self.log.join(stage.log_filename(prefix))
    }

    pub fn fast5_temp(&self) -> PathBuf {
        self.temp.join(FAST5_TEMP_FOLDERNAME)
    }

    pub fn reads_file(&self, ext: &str) -> PathBuf {
        self.reads.join(format!("{}.{}", self.reads_filename, ext))
    }

    pub fn contigs(&self) -> PathBuf {
        self.index.join(CONTIGS_FILENAME)
    }

    pub fn mapped_sam(&self) -> PathBuf {
        self.mapping.join(MAPPED_FILENAME)
    }

    pub fn partition_sam(&self, prefix: &str) -> PathBuf {
        partition_path(&self.splitted, prefix)
    }

    pub fn sorted_bam(&self, prefix: &str) -> PathBuf {
        self.splitted.join(format!("{}.{}", prefix, BAM_EXT))
    }

    pub fn bam_index(&self, prefix: &str) -> PathBuf {
        self.splitted.join(format!("{}.{}.{}", prefix, BAM_EXT, BAI_EXT))
    }

    pub fn stats_file(&self, prefix: &str) -> PathBuf {
        self.splitted.join(format!("{}.{}.{}", prefix, BAM_EXT, STATS_EXT))
    }

    pub fn flagstat_file(&self, prefix: &str) -> PathBuf {
        self.splitted.join(format!("{}.{}.{}", prefix, BAM_EXT, FLAGSTAT_EXT))
    }

    pub fn organism_stats_dir(&self, prefix: &str) -> PathBuf {
        self.stats.join(prefix)
    }

    pub fn report(&self) -> PathBuf {
        self.root.join(REPORT_FILENAME)
    }
}

fn create_folder(path: &Path) -> Result<(), PipelineError> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(source) => Err(PipelineError::Workspace {
            operation: "create",
            path: path.to_path_buf(),
            source,
        }),
    }
}
