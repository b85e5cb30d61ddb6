//! Per-organism processing of the combined alignment: partition, then one isolated task
//! per organism (sort, index, statistics, charts), joined before anything reads the results.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::config::defs::{
    OrganismFailure, PipelineError, SamtoolsSubcommand, Stage, CHART_STEMS, PNG_EXT,
};
use crate::config::model::RunConfiguration;
use crate::utils::command::{plot_bamstats, samtools};
use crate::utils::process::{CommandChain, OutputTarget};
use crate::utils::sambam::{partition_alignments, PartitionSummary};
use crate::utils::workspace::Workspace;

/// Everything one organism produced. Only built once every step succeeded.
#[derive(Debug, Clone)]
pub struct GenomeArtifacts {
    pub prefix: String,
    pub partition: PathBuf,
    pub bam: PathBuf,
    pub bam_index: PathBuf,
    pub stats: PathBuf,
    pub flagstat: PathBuf,
    /// (stem, path) of every chart that was rendered, in chart order.
    pub charts: Vec<(&'static str, PathBuf)>,
    pub missing_charts: Vec<&'static str>,
}

#[derive(Debug)]
pub struct FanOutOutcome {
    pub partition: PartitionSummary,
    /// In configuration order.
    pub completed: Vec<GenomeArtifacts>,
    pub failures: Vec<OrganismFailure>,
}

impl FanOutOutcome {
    /// Turns collected failures into the aggregate error.
    pub fn into_result(self, total: usize) -> Result<Vec<GenomeArtifacts>, PipelineError> {
        if self.failures.is_empty() {
            Ok(self.completed)
        } else {
            Err(PipelineError::FanOutFailed {
                total,
                failures: self.failures,
            })
        }
    }
}

/// Splits the combined SAM into `<splitted>/<prefix>.sam`, off the async runtime.
pub async fn partition(config: &RunConfiguration, workspace: &Workspace) -> Result<PartitionSummary, PipelineError> {
    let sam = workspace.mapped_sam();
    let out_dir = workspace.splitted.clone();
    let prefixes = config.prefixes();
    info!("Splitting {} into {} partitions", sam.display(), prefixes.len());

    tokio::task::spawn_blocking(move || partition_alignments(&sam, &out_dir, &prefixes))
        .await
        .map_err(|e| PipelineError::Partition { detail: e.to_string() })?
        .map_err(|e| PipelineError::Partition { detail: format!("{:#}", e) })
}

/// Runs every organism concurrently, bounded by `max_parallel_jobs`, and waits for all of
/// them. A failing organism never cancels the others.
pub async fn process_genomes(
    config: Arc<RunConfiguration>,
    workspace: Arc<Workspace>,
) -> (Vec<GenomeArtifacts>, Vec<OrganismFailure>) {
    let semaphore = Arc::new(Semaphore::new(config.threads.max_parallel_jobs.max(1)));
    let mut handles = Vec::with_capacity(config.organisms.len());

    for organism in &config.organisms {
        let prefix = organism.prefix.clone();
        let config = Arc::clone(&config);
        let workspace = Arc::clone(&workspace);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|e| OrganismFailure {
                prefix: prefix.clone(),
                step: Some(Stage::Sort),
                error: PipelineError::io(Stage::Sort, workspace.partition_sam(&prefix), e),
            })?;
            process_organism(&prefix, &config, &workspace).await
        }));
    }

    let mut completed = Vec::new();
    let mut failures = Vec::new();
    for (organism, joined) in config.organisms.iter().zip(join_all(handles).await) {
        match joined {
            Ok(Ok(artifacts)) => completed.push(artifacts),
            Ok(Err(failure)) => {
                error!("{}", failure);
                failures.push(failure);
            }
            Err(join_err) => {
                let failure = aborted(&organism.prefix, &join_err);
                error!("{}", failure);
                failures.push(failure);
            }
        }
    }
    (completed, failures)
}

/// Partition followed by the per-organism fan-out.
pub async fn run(config: Arc<RunConfiguration>, workspace: Arc<Workspace>) -> Result<FanOutOutcome, PipelineError> {
    let start = Instant::now();
    let partition = partition(&config, &workspace).await?;
    let (completed, failures) = process_genomes(Arc::clone(&config), Arc::clone(&workspace)).await;
    info!(
        "Processed {} of {} organisms in {:.2?}",
        completed.len(),
        config.organisms.len(),
        start.elapsed()
    );
    Ok(FanOutOutcome {
        partition,
        completed,
        failures,
    })
}

fn failed(prefix: &str, step: Stage) -> impl Fn(PipelineError) -> OrganismFailure + '_ {
    move |error| OrganismFailure {
        prefix: prefix.to_string(),
        step: Some(step),
        error,
    }
}

fn aborted(prefix: &str, join_err: &JoinError) -> OrganismFailure {
    let detail = if join_err.is_panic() {
        "task panicked"
    } else {
        "task was cancelled"
    };
    OrganismFailure {
        prefix: prefix.to_string(),
        step: None,
        error: PipelineError::TaskAborted {
            prefix: prefix.to_string(),
            detail: detail.to_string(),
        },
    }
}

async fn process_organism(
    prefix: &str,
    config: &RunConfiguration,
    workspace: &Workspace,
) -> Result<GenomeArtifacts, OrganismFailure> {
    let samtools_bin = config.tools.samtools.as_str();
    let partition = workspace.partition_sam(prefix);
    let bam = workspace.sorted_bam(prefix);
    let bam_index = workspace.bam_index(prefix);
    let stats = workspace.stats_file(prefix);
    let flagstat = workspace.flagstat_file(prefix);
    let chart_dir = workspace.organism_stats_dir(prefix);

    info!("[{}] Sorting alignments", prefix);
    let sort = samtools::SamtoolsConfig {
        subcommand: SamtoolsSubcommand::Sort,
        input: &partition,
        output: Some(&bam),
        threads: config.threads.sorting,
    };
    CommandChain::new(Stage::Sort, workspace.log_file(Stage::Sort, Some(prefix)))
        .pipe(samtools::invocation(samtools_bin, &sort))
        .run()
        .await
        .map_err(failed(prefix, Stage::Sort))?;
    require_artifact(Stage::Sort, &bam).map_err(failed(prefix, Stage::Sort))?;

    let index = samtools::SamtoolsConfig {
        subcommand: SamtoolsSubcommand::Index,
        input: &bam,
        output: None,
        threads: 1,
    };
    CommandChain::new(Stage::BamIndex, workspace.log_file(Stage::BamIndex, Some(prefix)))
        .pipe(samtools::invocation(samtools_bin, &index))
        .run()
        .await
        .map_err(failed(prefix, Stage::BamIndex))?;
    require_artifact(Stage::BamIndex, &bam_index).map_err(failed(prefix, Stage::BamIndex))?;

    info!("[{}] Computing statistics", prefix);
    let stats_job = summary_job(Stage::Stats, SamtoolsSubcommand::Stats, samtools_bin, &bam, &stats, workspace, prefix);
    let flagstat_job = summary_job(
        Stage::Flagstat,
        SamtoolsSubcommand::Flagstat,
        samtools_bin,
        &bam,
        &flagstat,
        workspace,
        prefix,
    );
    // Both run to completion so neither leaves a .part file behind.
    let (stats_done, flagstat_done) = tokio::join!(stats_job, flagstat_job);
    stats_done?;
    flagstat_done?;

    info!("[{}] Plotting charts", prefix);
    CommandChain::new(Stage::Plot, workspace.log_file(Stage::Plot, Some(prefix)))
        .pipe(plot_bamstats::invocation(&config.tools.plotter, &chart_dir, &stats))
        .run()
        .await
        .map_err(failed(prefix, Stage::Plot))?;
    let (charts, missing_charts) = find_charts(&chart_dir);
    if charts.is_empty() {
        return Err(failed(prefix, Stage::Plot)(PipelineError::MissingArtifact {
            stage: Stage::Plot,
            path: chart_dir,
        }));
    }
    if !missing_charts.is_empty() {
        warn!("[{}] Charts not rendered: {}", prefix, missing_charts.join(", "));
    }

    for artifact in [&stats, &flagstat] {
        copy_into(artifact, &chart_dir).map_err(failed(prefix, Stage::Collect))?;
    }

    info!("[{}] Done", prefix);
    Ok(GenomeArtifacts {
        prefix: prefix.to_string(),
        partition,
        bam,
        bam_index,
        stats,
        flagstat,
        charts,
        missing_charts,
    })
}

async fn summary_job(
    stage: Stage,
    subcommand: SamtoolsSubcommand,
    program: &str,
    bam: &Path,
    output: &Path,
    workspace: &Workspace,
    prefix: &str,
) -> Result<(), OrganismFailure> {
    let config = samtools::SamtoolsConfig {
        subcommand,
        input: bam,
        output: None,
        threads: 1,
    };
    CommandChain::new(stage, workspace.log_file(stage, Some(prefix)))
        .pipe(samtools::invocation(program, &config))
        .stdout(OutputTarget::Atomic(output.to_path_buf()))
        .run()
        .await
        .map_err(failed(prefix, stage))?;
    Ok(())
}

fn require_artifact(stage: Stage, path: &Path) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingArtifact {
            stage,
            path: path.to_path_buf(),
        })
    }
}

/// Splits the fixed chart set into rendered charts and missing stems.
pub fn find_charts(chart_dir: &Path) -> (Vec<(&'static str, PathBuf)>, Vec<&'static str>) {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for stem in CHART_STEMS {
        let path = chart_dir.join(format!("{}.{}", stem, PNG_EXT));
        if path.is_file() {
            present.push((*stem, path));
        } else {
            missing.push(*stem);
        }
    }
    (present, missing)
}

fn copy_into(file: &Path, dir: &Path) -> Result<(), PipelineError> {
    let name = file
        .file_name()
        .ok_or_else(|| PipelineError::io(Stage::Collect, file, "not a file"))?;
    fs::copy(file, dir.join(name))
        .map(|_| ())
        .map_err(|e| PipelineError::io(Stage::Collect, dir.join(name), e))
}
