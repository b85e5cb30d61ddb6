#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::{tempdir, TempDir};

/// Behaviour knobs baked into the fake tool scripts.
#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    pub fail_index: bool,
    pub fail_stats_for: Option<String>,
    pub no_charts_for: Option<String>,
    /// `samtools stats` succeeds for this prefix but prints no summary numbers.
    pub garbled_stats_for: Option<String>,
    /// Milliseconds `samtools stats` pauses halfway through its output, per prefix.
    pub stats_delays_ms: Vec<(String, u64)>,
}

pub const CHARTS_RENDERED: &[&str] = &["gc-content", "coverage", "quals"];

/// A scratch directory holding fake tools, raw reads, references and a run config.
pub struct Fixture {
    pub dir: TempDir,
    pub prefixes: Vec<String>,
}

pub fn organism_name(prefix: &str) -> String {
    format!("org{}", prefix.to_uppercase())
}

fn write_script(path: &Path, body: &str) -> Result<()> {
    fs::write(path, format!("#!/bin/sh\n{}", body))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn poretools_script() -> String {
    "\
case \"$1\" in
  -h) echo 'usage: poretools'; exit 0 ;;
  fasta) name=$(basename \"$2\" .fast5); printf '>%s\\nACGTACGT\\n' \"$name\" ;;
  fastq) name=$(basename \"$2\" .fast5); printf '@%s\\nACGTACGT\\n+\\nIIIIIIII\\n' \"$name\" ;;
  *) echo \"unknown command $1\" >&2; exit 2 ;;
esac
"
    .to_string()
}

fn bwa_script(options: &FakeOptions) -> String {
    let index = if options.fail_index {
        "echo '[bwa_index] failed to read reference' >&2; exit 1"
    } else {
        "touch \"$2.bwt\"; echo '[bwa_index] done' >&2"
    };
    format!(
        "\
case \"$1\" in
  index) {index} ;;
  mem)
    contigs=\"$6\"
    printf '@HD\\tVN:1.6\\tSO:unsorted\\n'
    grep '^>' \"$contigs\" | sed 's/^>//' | while read -r name; do printf '@SQ\\tSN:%s\\tLN:8\\n' \"$name\"; done
    printf '@PG\\tID:bwa\\tPN:bwa\\n'
    grep '^>' \"$contigs\" | sed 's/^>//' | while read -r name; do
      printf 'read_%s\\t0\\t%s\\t1\\t60\\t4M\\t*\\t0\\t0\\tACGT\\tIIII\\n' \"$name\" \"$name\"
    done
    printf 'unmapped\\t4\\t*\\t0\\t0\\t*\\t*\\t0\\t0\\tACGT\\tIIII\\n'
    ;;
  *) echo 'Usage: bwa <command> [options]' >&2; exit 1 ;;
esac
"
    )
}

fn samtools_script(options: &FakeOptions) -> String {
    let mut stats_guard = String::new();
    if let Some(prefix) = &options.fail_stats_for {
        let _ = write!(
            stats_guard,
            "    if [ \"$p\" = \"{}\" ]; then echo 'stats: truncated file' >&2; exit 7; fi\n",
            prefix
        );
    }
    if let Some(prefix) = &options.garbled_stats_for {
        let _ = write!(
            stats_guard,
            "    if [ \"$p\" = \"{}\" ]; then echo '# samtools stats: nothing to report'; exit 0; fi\n",
            prefix
        );
    }
    let mut delays = String::from("    case \"$p\" in\n");
    for (prefix, ms) in &options.stats_delays_ms {
        let _ = writeln!(delays, "      {}) sleep {}.{:03} ;;", prefix, ms / 1000, ms % 1000);
    }
    delays.push_str("    esac\n");

    format!(
        "\
cmd=\"$1\"; shift
case \"$cmd\" in
  --version) echo 'samtools 1.19'; exit 0 ;;
  sort) cp \"$5\" \"$4\" ;;
  index) touch \"$1.bai\" ;;
  stats)
    p=$(basename \"$1\" .bam)
{stats_guard}    total=$(grep -vc '^@' \"$1\")
    printf 'SN\\traw total sequences:\\t%s\\n' \"$total\"
{delays}    printf 'SN\\treads mapped:\\t%s\\n' \"$total\"
    printf 'SN\\taverage length:\\t4\\n'
    printf 'SN\\terror rate:\\t0.000000e+00\\n'
    ;;
  flagstat) echo \"$(grep -vc '^@' \"$1\") + 0 in total (QC-passed reads + QC-failed reads)\" ;;
  *) echo \"unknown command $cmd\" >&2; exit 1 ;;
esac
"
    )
}

fn plot_bamstats_script(options: &FakeOptions) -> String {
    let skip = match &options.no_charts_for {
        Some(prefix) => format!("case \"$2\" in */{}/) exit 0 ;; esac\n", prefix),
        None => String::new(),
    };
    format!(
        "\
if [ \"$1\" = \"-h\" ]; then echo 'Usage: plot-bamstats'; exit 0; fi
{skip}for stem in {charts}; do printf '\\211PNG' > \"$2$stem.png\"; done
",
        charts = CHARTS_RENDERED.join(" ")
    )
}

impl Fixture {
    pub fn new(prefixes: &[&str], options: &FakeOptions) -> Result<Self> {
        let dir = tempdir()?;
        let root = dir.path();

        let bin = root.join("bin");
        fs::create_dir(&bin)?;
        write_script(&bin.join("poretools"), &poretools_script())?;
        write_script(&bin.join("bwa"), &bwa_script(options))?;
        write_script(&bin.join("samtools"), &samtools_script(options))?;
        write_script(&bin.join("plot-bamstats"), &plot_bamstats_script(options))?;

        let raw = root.join("raw");
        fs::create_dir(&raw)?;
        fs::write(raw.join("run_1.fast5"), b"\x89HDF")?;
        fs::write(raw.join("run_2.fast5"), b"\x89HDF")?;
        fs::write(raw.join("notes.txt"), "not a read file")?;

        let refs = root.join("refs");
        fs::create_dir(&refs)?;
        for prefix in prefixes {
            fs::write(
                refs.join(format!("{}.fasta", prefix)),
                format!(">{0}_chromosome\nACGTACGT\nACGT\n>{0}_plasmid\nGGCC\n", prefix),
            )?;
        }

        Ok(Fixture {
            dir,
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn project(&self) -> PathBuf {
        self.path().join("project")
    }

    /// Run document with every organism enabled and tools taken from `bin/`.
    pub fn config_yaml(&self) -> String {
        let mut yaml = String::from(
            "\
project_settings:
  project_folder: project
  overwrite_folder: false
nanopore_input: raw
references:
  enable_references: true
  folder: refs
software_general:
  bwa: bin/bwa
  samtools: bin/samtools
  poretools: bin/poretools
  plot_bamstats: bin/plot-bamstats
software_settings:
  mapping_threads: 2
  sorting_threads: 1
  max_parallel_jobs: 4
file_mapping:
",
        );
        for prefix in &self.prefixes {
            let _ = write!(
                yaml,
                "  {}:\n    prefix: {}\n    reference: {}.fasta\n",
                organism_name(prefix),
                prefix,
                prefix
            );
        }
        yaml
    }

    pub fn write_config(&self, yaml: &str) -> Result<PathBuf> {
        let path = self.path().join("gru.yml");
        fs::write(&path, yaml)?;
        Ok(path)
    }

    /// Alignment records (non-header lines) of a SAM file.
    pub fn records(path: &Path) -> Result<Vec<String>> {
        Ok(fs::read_to_string(path)?
            .lines()
            .filter(|line| !line.starts_with('@'))
            .map(str::to_string)
            .collect())
    }
}
