/// Functions for building the command lines of the external tools

use log::info;

use crate::config::defs::{PipelineError, Tool};
use crate::config::model::RunConfiguration;
use crate::utils::process::probe;

pub mod poretools {
    use std::path::Path;
    use crate::config::defs::{PoretoolsSubcommand, Tool, HDF5_VERSION_CHECK};
    use crate::utils::process::Invocation;

    pub const PROBE_ARGS: &[&str] = &["-h"];

    pub fn arg_generator(subcommand: PoretoolsSubcommand, fast5: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match subcommand {
            PoretoolsSubcommand::Fasta => args_vec.push("fasta".to_string()),
            PoretoolsSubcommand::Fastq => args_vec.push("fastq".to_string()),
        }
        args_vec.push(fast5.to_string_lossy().into_owned());
        args_vec
    }

    pub fn invocation(program: &str, subcommand: PoretoolsSubcommand, fast5: &Path) -> Invocation {
        let (key, value) = HDF5_VERSION_CHECK;
        Invocation::new(Tool::Extractor, program)
            .args(arg_generator(subcommand, fast5))
            .env(key, value)
    }
}

pub mod bwa {
    use std::path::Path;
    use crate::config::defs::{BwaSubcommand, Tool, BWA_ONT_PRESET};
    use crate::utils::process::Invocation;

    /// bwa prints its usage and exits non-zero without arguments.
    pub const PROBE_ARGS: &[&str] = &[];

    pub struct BwaConfig<'a> {
        pub subcommand: BwaSubcommand,
        pub contigs: &'a Path,
        pub reads: Option<&'a Path>,
        pub threads: usize,
    }

    pub fn arg_generator(config: &BwaConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match config.subcommand {
            BwaSubcommand::Index => {
                args_vec.push("index".to_string());
                args_vec.push(config.contigs.to_string_lossy().into_owned());
            }
            BwaSubcommand::Mem => {
                args_vec.push("mem".to_string());
                args_vec.push("-x".to_string());
                args_vec.push(BWA_ONT_PRESET.to_string());
                args_vec.push("-t".to_string());
                args_vec.push(config.threads.to_string());
                args_vec.push(config.contigs.to_string_lossy().into_owned());
                if let Some(reads) = config.reads {
                    args_vec.push(reads.to_string_lossy().into_owned());
                }
            }
        }
        args_vec
    }

    pub fn invocation(program: &str, config: &BwaConfig) -> Invocation {
        Invocation::new(Tool::Mapper, program).args(arg_generator(config))
    }
}

pub mod samtools {
    use std::path::Path;
    use crate::config::defs::{SamtoolsSubcommand, Tool};
    use crate::utils::process::Invocation;

    pub const PROBE_ARGS: &[&str] = &["--version"];

    pub struct SamtoolsConfig<'a> {
        pub subcommand: SamtoolsSubcommand,
        pub input: &'a Path,
        /// Only `sort` writes to a named output, the others go to stdout or beside the input.
        pub output: Option<&'a Path>,
        pub threads: usize,
    }

    pub fn arg_generator(config: &SamtoolsConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match config.subcommand {
            SamtoolsSubcommand::Sort => {
                args_vec.push("sort".to_string());
                args_vec.push("-@".to_string());
                args_vec.push(config.threads.to_string());
                if let Some(output) = config.output {
                    args_vec.push("-o".to_string());
                    args_vec.push(output.to_string_lossy().into_owned());
                }
            }
            SamtoolsSubcommand::Index => args_vec.push("index".to_string()),
            SamtoolsSubcommand::Stats => args_vec.push("stats".to_string()),
            SamtoolsSubcommand::Flagstat => args_vec.push("flagstat".to_string()),
        }
        args_vec.push(config.input.to_string_lossy().into_owned());
        args_vec
    }

    pub fn invocation(program: &str, config: &SamtoolsConfig) -> Invocation {
        Invocation::new(Tool::Samtools, program).args(arg_generator(config))
    }
}

pub mod plot_bamstats {
    use std::path::{Path, MAIN_SEPARATOR};
    use crate::config::defs::Tool;
    use crate::utils::process::Invocation;

    pub const PROBE_ARGS: &[&str] = &["-h"];

    /// `-p` takes a file name prefix, so the chart directory keeps its trailing separator.
    pub fn arg_generator(chart_dir: &Path, stats: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        let mut prefix = chart_dir.to_string_lossy().into_owned();
        if !prefix.ends_with(MAIN_SEPARATOR) {
            prefix.push(MAIN_SEPARATOR);
        }
        args_vec.push("-p".to_string());
        args_vec.push(prefix);
        args_vec.push(stats.to_string_lossy().into_owned());
        args_vec
    }

    pub fn invocation(program: &str, chart_dir: &Path, stats: &Path) -> Invocation {
        Invocation::new(Tool::Plotter, program).args(arg_generator(chart_dir, stats))
    }
}

pub fn probe_args(tool: Tool) -> &'static [&'static str] {
    match tool {
        Tool::Extractor => poretools::PROBE_ARGS,
        Tool::Mapper => bwa::PROBE_ARGS,
        Tool::Samtools => samtools::PROBE_ARGS,
        Tool::Plotter => plot_bamstats::PROBE_ARGS,
    }
}

/// Tools a run needs, paired with the configured program.
pub fn required_tools(config: &RunConfiguration) -> Vec<(Tool, &str)> {
    let mut tools = vec![(Tool::Extractor, config.tools.extractor.as_str())];
    if config.references_enabled() {
        tools.push((Tool::Mapper, config.tools.mapper.as_str()));
        tools.push((Tool::Samtools, config.tools.samtools.as_str()));
        tools.push((Tool::Plotter, config.tools.plotter.as_str()));
    }
    tools
}

/// Verifies every required tool can be started before anything is written to disk.
pub async fn preflight(config: &RunConfiguration) -> Result<(), PipelineError> {
    for (tool, program) in required_tools(config) {
        probe(tool, program, probe_args(tool)).await?;
    }
    info!("All required software found");
    Ok(())
}
