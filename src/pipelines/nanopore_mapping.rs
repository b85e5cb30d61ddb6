use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use crate::config::defs::{
    BwaSubcommand, PipelineError, PoretoolsSubcommand, Stage, FAST5_EXT, FASTA_EXT, FASTQ_EXT,
};
use crate::config::model::{RawInput, RunConfiguration};
use crate::pipelines::{fanout, report};
use crate::utils::command::{bwa, poretools, preflight};
use crate::utils::fastx::concatenate_references;
use crate::utils::file::{extract_tar_gz_flat, files_with_extension};
use crate::utils::process::{CommandChain, OutputTarget, StageResult};
use crate::utils::stats::SamtoolsStatsReader;
use crate::utils::workspace::Workspace;

/// Runs the coarse stages one after another. Each stage only starts once the previous
/// one has finished, and the first failure ends the run.
pub struct StageRunner {
    config: Arc<RunConfiguration>,
    workspace: Arc<Workspace>,
}

impl StageRunner {
    pub fn new(config: Arc<RunConfiguration>, workspace: Arc<Workspace>) -> Self {
        StageRunner { config, workspace }
    }

    /// Converts every `.fast5` file of the input into the combined FASTA and FASTQ reads.
    pub async fn extract_reads(&self) -> Result<StageResult, PipelineError> {
        let start = Instant::now();
        let log = self.workspace.log_file(Stage::Extract, None);

        let input_dir = match &self.config.raw_input {
            RawInput::Directory(dir) => dir.clone(),
            RawInput::Archive(archive) => self.unpack_archive(archive.clone()).await?,
        };

        let fasta = self.workspace.reads_file(FASTA_EXT);
        let fastq = self.workspace.reads_file(FASTQ_EXT);
        for reads in [&fasta, &fastq] {
            File::create(reads).map_err(|e| PipelineError::io(Stage::Extract, reads, e))?;
        }

        let fast5_files = files_with_extension(&input_dir, FAST5_EXT)
            .map_err(|e| PipelineError::io(Stage::Extract, &input_dir, e))?;
        if fast5_files.is_empty() {
            warn!("No .{} files found in {}", FAST5_EXT, input_dir.display());
        }
        info!("Extracting reads from {} files", fast5_files.len());

        let mut status = None;
        for fast5 in &fast5_files {
            for (subcommand, target) in [(PoretoolsSubcommand::Fasta, &fasta), (PoretoolsSubcommand::Fastq, &fastq)] {
                let result = CommandChain::new(Stage::Extract, &log)
                    .pipe(poretools::invocation(&self.config.tools.extractor, subcommand, fast5))
                    .stdout(OutputTarget::Append(target.clone()))
                    .run()
                    .await?;
                status = result.status;
            }
        }

        let result = StageResult {
            stage: Stage::Extract,
            status,
            log,
            elapsed: start.elapsed(),
        };
        info!("{} finished in {:.2?}", result.stage, result.elapsed);
        Ok(result)
    }

    async fn unpack_archive(&self, archive: PathBuf) -> Result<PathBuf, PipelineError> {
        let target = self.workspace.fast5_temp();
        std::fs::create_dir_all(&target).map_err(|source| PipelineError::Workspace {
            operation: "create",
            path: target.clone(),
            source,
        })?;
        info!("Unpacking {}", archive.display());

        let destination = target.clone();
        let extracted = tokio::task::spawn_blocking(move || extract_tar_gz_flat(&archive, &destination))
            .await
            .map_err(|e| PipelineError::io(Stage::Extract, &target, e))?
            .map_err(|e| PipelineError::io(Stage::Extract, &target, format!("{:#}", e)))?;
        info!("Unpacked {} files into {}", extracted, target.display());
        Ok(target)
    }

    /// Writes the renamed, combined reference and indexes it.
    pub async fn build_index(&self) -> Result<StageResult, PipelineError> {
        let contigs = self.workspace.contigs();
        let mut references = Vec::with_capacity(self.config.organisms.len());
        for organism in &self.config.organisms {
            let reference = organism.reference.clone().ok_or_else(|| PipelineError::ReferenceNotDeclared {
                organism: organism.name.clone(),
            })?;
            references.push((organism.prefix.clone(), reference));
        }

        let out_path = contigs.clone();
        let counts = tokio::task::spawn_blocking(move || concatenate_references(&references, &out_path))
            .await
            .map_err(|e| PipelineError::io(Stage::BuildIndex, &contigs, e))?
            .map_err(|e| PipelineError::io(Stage::BuildIndex, &contigs, format!("{:#}", e)))?;
        for count in &counts {
            info!("{}: {} contigs, {} bases", count.prefix, count.contigs, count.bases);
        }

        let config = bwa::BwaConfig {
            subcommand: BwaSubcommand::Index,
            contigs: &contigs,
            reads: None,
            threads: self.config.threads.mapping,
        };
        CommandChain::new(Stage::BuildIndex, self.workspace.log_file(Stage::BuildIndex, None))
            .pipe(bwa::invocation(&self.config.tools.mapper, &config))
            .run()
            .await
    }

    pub async fn map_reads(&self) -> Result<StageResult, PipelineError> {
        let contigs = self.workspace.contigs();
        let reads = self.workspace.reads_file(FASTQ_EXT);
        let config = bwa::BwaConfig {
            subcommand: BwaSubcommand::Mem,
            contigs: &contigs,
            reads: Some(&reads),
            threads: self.config.threads.mapping,
        };
        CommandChain::new(Stage::MapReads, self.workspace.log_file(Stage::MapReads, None))
            .pipe(bwa::invocation(&self.config.tools.mapper, &config))
            .stdout(OutputTarget::Atomic(self.workspace.mapped_sam()))
            .run()
            .await
    }
}

/// Runs the whole pipeline for a validated configuration.
///
/// The report is written even when some organisms failed, or their statistics could not
/// be read; the aggregated failure is returned afterwards.
pub async fn run(config: Arc<RunConfiguration>) -> Result<PathBuf, PipelineError> {
    preflight(&config).await?;
    let workspace = Arc::new(Workspace::provision(&config)?);
    let runner = StageRunner::new(Arc::clone(&config), Arc::clone(&workspace));

    runner.extract_reads().await?;

    let outcome = if config.references_enabled() {
        runner.build_index().await?;
        runner.map_reads().await?;
        Some(fanout::run(Arc::clone(&config), Arc::clone(&workspace)).await?)
    } else {
        warn!("References are disabled: skipping index, mapping and per-organism statistics");
        None
    };

    let completed = outcome.as_ref().map(|o| o.completed.as_slice()).unwrap_or(&[]);
    let report = report::assemble(&config, &workspace, completed, &SamtoolsStatsReader)?;
    info!("Report written to {}", report.path.display());

    if let Some(mut outcome) = outcome {
        outcome.failures.extend(report.failures);
        outcome.into_result(config.organisms.len())?;
    }
    Ok(report.path)
}
