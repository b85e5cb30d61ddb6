//! Turns a raw document into a `RunConfiguration`.
//!
//! Checks run in a fixed order and the first failure aborts. Nothing here touches the
//! filesystem beyond existence checks, so a failed validation never leaves files behind.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use log::warn;

use crate::config::defs::{PipelineError, ARCHIVE_SUFFIXES};
use crate::config::model::{
    FolderNames, OrganismEntry, RawConfig, RawInput, RawOrganism, RunConfiguration,
    SoftwareSettings, ThreadHints, ToolPaths,
};
use crate::utils::file::{resolve_path, resolve_program};
use crate::utils::system::{default_parallel_jobs, detect_physical_cores};

pub fn validate(
    raw: RawConfig,
    config_path: &Path,
    base_dir: &Path,
) -> Result<RunConfiguration, PipelineError> {
    let project_folder = resolve_path(base_dir, &raw.project_settings.project_folder);
    let overwrite = raw.project_settings.overwrite_folder;
    if project_folder.exists() && !overwrite {
        return Err(PipelineError::ProjectFolderConflict(project_folder));
    }

    let raw_input = check_raw_input(&resolve_path(base_dir, &raw.nanopore_input))?;

    let secondary_reads_folder = if raw.illumina_reads.enable_illumina {
        let folder = required_folder(base_dir, raw.illumina_reads.folder.as_ref(), "illumina_reads.folder")?;
        if !folder.is_dir() {
            return Err(PipelineError::SecondaryInputNotFound(folder));
        }
        Some(folder)
    } else {
        None
    };

    let references_folder = if raw.references.enable_references {
        let folder = required_folder(base_dir, raw.references.folder.as_ref(), "references.folder")?;
        if !folder.is_dir() {
            return Err(PipelineError::ReferenceFolderNotFound(folder));
        }
        Some(folder)
    } else {
        None
    };

    let organisms = check_organisms(
        &raw.file_mapping,
        references_folder.as_deref(),
        secondary_reads_folder.as_deref(),
    )?;
    if references_folder.is_some() && organisms.is_empty() {
        return Err(PipelineError::NoOrganisms);
    }
    if references_folder.is_none() && !organisms.is_empty() {
        warn!("References are disabled; the file_mapping entries are not checked and will not be mapped");
    }

    let template = match &raw.gru_settings.template {
        Some(template) => {
            let template = resolve_path(base_dir, template);
            if !template.is_file() {
                return Err(PipelineError::InputNotFound(template));
            }
            Some(template)
        }
        None => None,
    };

    let tools = ToolPaths {
        extractor: resolve_program(base_dir, &raw.software_general.poretools),
        mapper: resolve_program(base_dir, &raw.software_general.bwa),
        samtools: resolve_program(base_dir, &raw.software_general.samtools),
        plotter: resolve_program(base_dir, &raw.software_general.plot_bamstats),
    };

    let gru = &raw.gru_settings;
    let folders = FolderNames {
        temp: folder_name("gru_settings.temp_foldername", &gru.temp_foldername)?,
        reads: folder_name("gru_settings.nanopore_reads_foldername", &gru.nanopore_reads_foldername)?,
        reads_filename: folder_name("gru_settings.nanopore_reads_filename", &gru.nanopore_reads_filename)?,
        index: folder_name("gru_settings.bwa_reference_index_foldername", &gru.bwa_reference_index_foldername)?,
        mapping: folder_name("gru_settings.mapping_foldername", &gru.mapping_foldername)?,
    };

    Ok(RunConfiguration {
        config_path: config_path.to_path_buf(),
        project_folder,
        overwrite,
        raw_input,
        secondary_reads_folder,
        references_folder,
        tools,
        threads: thread_hints(&raw.software_settings)?,
        folders,
        template,
        organisms,
        debug: raw.software_settings.gru_debug,
    })
}

/// An archive must be an existing file, anything else an existing directory.
fn check_raw_input(path: &Path) -> Result<RawInput, PipelineError> {
    let name = path.to_string_lossy();
    if ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        if !path.is_file() {
            return Err(PipelineError::InputNotFound(path.to_path_buf()));
        }
        Ok(RawInput::Archive(path.to_path_buf()))
    } else {
        if !path.is_dir() {
            return Err(PipelineError::InputNotFound(path.to_path_buf()));
        }
        Ok(RawInput::Directory(path.to_path_buf()))
    }
}

fn required_folder(base_dir: &Path, folder: Option<&PathBuf>, field: &str) -> Result<PathBuf, PipelineError> {
    folder
        .map(|folder| resolve_path(base_dir, folder))
        .ok_or_else(|| PipelineError::ConfigInvalid {
            field: field.to_string(),
            detail: "required when the feature is enabled".to_string(),
        })
}

fn check_organisms(
    mapping: &serde_yaml::Mapping,
    references_folder: Option<&Path>,
    secondary_reads_folder: Option<&Path>,
) -> Result<Vec<OrganismEntry>, PipelineError> {
    let mut organisms = Vec::with_capacity(mapping.len());
    let mut seen: HashMap<String, String> = HashMap::new();

    for (key, value) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| PipelineError::ConfigInvalid {
                field: "file_mapping".to_string(),
                detail: format!("organism names must be strings, got {:?}", key),
            })?
            .to_string();
        let raw: RawOrganism = serde_yaml::from_value(value.clone()).map_err(|e| PipelineError::ConfigInvalid {
            field: format!("file_mapping.{}", name),
            detail: e.to_string(),
        })?;

        check_prefix(&name, &raw.prefix)?;
        if let Some(first) = seen.insert(raw.prefix.clone(), name.clone()) {
            return Err(PipelineError::DuplicatePrefix {
                prefix: raw.prefix,
                first,
                second: name,
            });
        }

        let reference_name = raw.reference.as_ref().map(|r| r.to_string_lossy().into_owned());
        let reference = match references_folder {
            Some(folder) => {
                let declared = raw
                    .reference
                    .as_ref()
                    .ok_or_else(|| PipelineError::ReferenceNotDeclared { organism: name.clone() })?;
                let path = folder.join(declared);
                if !path.is_file() {
                    return Err(PipelineError::MissingReference { organism: name, path });
                }
                Some(path)
            }
            None => None,
        };

        let declared_reads = raw.illumina.map(|reads| reads.into_vec()).unwrap_or_default();
        let secondary_reads = match secondary_reads_folder {
            Some(folder) => {
                let mut reads = Vec::with_capacity(declared_reads.len());
                for file in &declared_reads {
                    let path = folder.join(file);
                    if !path.is_file() {
                        return Err(PipelineError::MissingSecondaryRead { organism: name, path });
                    }
                    reads.push(path);
                }
                reads
            }
            None => declared_reads,
        };

        organisms.push(OrganismEntry {
            name,
            prefix: raw.prefix,
            reference_name,
            reference,
            secondary_reads,
        });
    }
    Ok(organisms)
}

/// Prefixes name folders and key the partition filter, so they are kept to `[A-Za-z0-9-]`.
/// `_` is reserved: it starts the `_contig_` delimiter in rewritten reference names.
pub fn check_prefix(organism: &str, prefix: &str) -> Result<(), PipelineError> {
    let reason = if prefix.is_empty() {
        Some("must not be empty")
    } else if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        Some("only ASCII letters, digits and '-' are allowed")
    } else if prefix.starts_with('-') {
        Some("must not start with '-'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PipelineError::InvalidPrefix {
            organism: organism.to_string(),
            prefix: prefix.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn folder_name(field: &str, value: &str) -> Result<String, PipelineError> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(value.to_string()),
        _ => Err(PipelineError::ConfigInvalid {
            field: field.to_string(),
            detail: format!("'{}' must be a single folder or file name", value),
        }),
    }
}

fn thread_hints(settings: &SoftwareSettings) -> Result<ThreadHints, PipelineError> {
    let positive = |field: &str, value: Option<usize>| -> Result<Option<usize>, PipelineError> {
        match value {
            Some(0) => Err(PipelineError::ConfigInvalid {
                field: format!("software_settings.{}", field),
                detail: "must be at least 1".to_string(),
            }),
            other => Ok(other),
        }
    };
    let mapping = positive("mapping_threads", settings.mapping_threads)?;
    let sorting = positive("sorting_threads", settings.sorting_threads)?;
    let jobs = positive("max_parallel_jobs", settings.max_parallel_jobs)?;

    let cores = detect_physical_cores();
    let sorting = sorting.unwrap_or(cores);
    Ok(ThreadHints {
        mapping: mapping.unwrap_or(cores),
        sorting,
        max_parallel_jobs: jobs.unwrap_or_else(|| default_parallel_jobs(cores, sorting)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::read_config;
    use anyhow::Result;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let dir = tempdir()?;
            fs::create_dir_all(dir.path().join("raw"))?;
            fs::create_dir_all(dir.path().join("refs"))?;
            fs::create_dir_all(dir.path().join("illumina"))?;
            fs::write(dir.path().join("refs/a.fasta"), ">c1\nACGT\n")?;
            fs::write(dir.path().join("refs/b.fasta"), ">c1\nTTGG\n")?;
            fs::write(dir.path().join("illumina/b_1.fq"), "@r\nA\n+\nI\n")?;
            Ok(Fixture { dir })
        }

        fn validate(&self, yaml: &str) -> Result<RunConfiguration, PipelineError> {
            let path = self.dir.path().join("job.yml");
            fs::write(&path, yaml).expect("write config");
            let raw = read_config(&path)?;
            validate(raw, &path, self.dir.path())
        }
    }

    const BASE: &str = "\
project_settings:
  project_folder: project/
  overwrite_folder: false
nanopore_input: raw/
references:
  enable_references: true
  folder: refs/
software_settings:
  mapping_threads: 4
  sorting_threads: 2
  max_parallel_jobs: 3
";

    fn with_mapping(extra: &str) -> String {
        format!("{}{}", BASE, extra)
    }

    const TWO_ORGANISMS: &str = "\
file_mapping:
  orgB:
    prefix: b
    reference: b.fasta
    illumina: b_1.fq
  orgA:
    prefix: a
    reference: a.fasta
";

    #[test]
    fn test_valid_config_keeps_document_order() -> Result<()> {
        let fixture = Fixture::new()?;
        let config = fixture.validate(&with_mapping(TWO_ORGANISMS))?;
        assert_eq!(config.prefixes(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(config.organisms[0].name, "orgB");
        assert_eq!(
            config.organisms[1].reference.as_deref(),
            Some(fixture.dir.path().join("refs/a.fasta").as_path())
        );
        assert_eq!(config.project_folder, fixture.dir.path().join("project/"));
        assert_eq!(config.raw_input, RawInput::Directory(fixture.dir.path().join("raw/")));
        assert_eq!(config.threads.mapping, 4);
        assert_eq!(config.threads.sorting, 2);
        assert_eq!(config.threads.max_parallel_jobs, 3);
        assert!(config.references_enabled());
        assert_eq!(config.tools.samtools, "samtools");
        Ok(())
    }

    #[test]
    fn test_project_folder_conflict() -> Result<()> {
        let fixture = Fixture::new()?;
        fs::create_dir_all(fixture.dir.path().join("project"))?;
        let err = fixture.validate(&with_mapping(TWO_ORGANISMS)).unwrap_err();
        assert!(matches!(err, PipelineError::ProjectFolderConflict(_)));

        let allowed = with_mapping(TWO_ORGANISMS).replace("overwrite_folder: false", "overwrite_folder: true");
        assert!(fixture.validate(&allowed)?.overwrite);
        Ok(())
    }

    #[test]
    fn test_raw_input_directory_or_archive() -> Result<()> {
        let fixture = Fixture::new()?;
        let missing_dir = with_mapping(TWO_ORGANISMS).replace("nanopore_input: raw/", "nanopore_input: nothing/");
        assert!(matches!(fixture.validate(&missing_dir).unwrap_err(), PipelineError::InputNotFound(_)));

        let archive = with_mapping(TWO_ORGANISMS).replace("nanopore_input: raw/", "nanopore_input: reads.tar.gz");
        assert!(matches!(fixture.validate(&archive).unwrap_err(), PipelineError::InputNotFound(_)));

        fs::write(fixture.dir.path().join("reads.tar.gz"), b"")?;
        let config = fixture.validate(&archive)?;
        assert!(matches!(config.raw_input, RawInput::Archive(_)));
        Ok(())
    }

    #[test]
    fn test_optional_folders_checked_only_when_enabled() -> Result<()> {
        let fixture = Fixture::new()?;
        let illumina = format!(
            "{}illumina_reads:\n  enable_illumina: true\n  folder: missing/\n",
            with_mapping(TWO_ORGANISMS)
        );
        assert!(matches!(
            fixture.validate(&illumina).unwrap_err(),
            PipelineError::SecondaryInputNotFound(_)
        ));

        let disabled = format!(
            "{}illumina_reads:\n  enable_illumina: false\n  folder: missing/\n",
            with_mapping(TWO_ORGANISMS)
        );
        assert!(fixture.validate(&disabled)?.secondary_reads_folder.is_none());

        let references = with_mapping(TWO_ORGANISMS).replace("folder: refs/", "folder: elsewhere/");
        assert!(matches!(
            fixture.validate(&references).unwrap_err(),
            PipelineError::ReferenceFolderNotFound(_)
        ));
        Ok(())
    }

    #[test]
    fn test_missing_reference_fails_before_any_workspace_exists() -> Result<()> {
        let fixture = Fixture::new()?;
        let yaml = with_mapping(&TWO_ORGANISMS.replace("reference: a.fasta", "reference: gone.fasta"));
        let err = fixture.validate(&yaml).unwrap_err();
        match &err {
            PipelineError::MissingReference { organism, path } => {
                assert_eq!(organism, "orgA");
                assert!(path.ends_with("refs/gone.fasta"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.exit_code(), 7);
        assert!(!fixture.dir.path().join("project").exists());

        let undeclared = with_mapping("file_mapping:\n  orgA:\n    prefix: a\n");
        assert!(matches!(
            fixture.validate(&undeclared).unwrap_err(),
            PipelineError::ReferenceNotDeclared { .. }
        ));
        Ok(())
    }

    #[test]
    fn test_secondary_reads_one_or_many() -> Result<()> {
        let fixture = Fixture::new()?;
        let enabled = "illumina_reads:\n  enable_illumina: true\n  folder: illumina/\n";
        let ok = format!("{}{}", with_mapping(TWO_ORGANISMS), enabled);
        let config = fixture.validate(&ok)?;
        assert_eq!(config.organisms[0].secondary_reads.len(), 1);

        let many = TWO_ORGANISMS.replace("illumina: b_1.fq", "illumina: [b_1.fq, b_2.fq]");
        let err = fixture.validate(&format!("{}{}", with_mapping(&many), enabled)).unwrap_err();
        match err {
            PipelineError::MissingSecondaryRead { organism, path } => {
                assert_eq!(organism, "orgB");
                assert!(path.ends_with("b_2.fq"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_prefix_rules() -> Result<()> {
        let fixture = Fixture::new()?;
        let duplicate = with_mapping(&TWO_ORGANISMS.replace("prefix: a", "prefix: b"));
        assert!(matches!(
            fixture.validate(&duplicate).unwrap_err(),
            PipelineError::DuplicatePrefix { .. }
        ));

        for bad in ["a_1", "a/b", "", "-a", "a b", "a.b"] {
            assert!(check_prefix("org", bad).is_err(), "{:?} accepted", bad);
        }
        for good in ["a", "nc201", "E-coli", "ab"] {
            assert!(check_prefix("org", good).is_ok(), "{:?} rejected", good);
        }
        Ok(())
    }

    #[test]
    fn test_references_enabled_requires_organisms() -> Result<()> {
        let fixture = Fixture::new()?;
        assert!(matches!(fixture.validate(BASE).unwrap_err(), PipelineError::NoOrganisms));

        let disabled = BASE.replace("enable_references: true", "enable_references: false");
        let config = fixture.validate(&disabled)?;
        assert!(!config.references_enabled());
        Ok(())
    }

    #[test]
    fn test_thread_hints_and_folder_names() -> Result<()> {
        let fixture = Fixture::new()?;
        let zero = with_mapping(TWO_ORGANISMS).replace("mapping_threads: 4", "mapping_threads: 0");
        assert!(matches!(fixture.validate(&zero).unwrap_err(), PipelineError::ConfigInvalid { .. }));

        let defaulted = with_mapping(TWO_ORGANISMS).replace("  max_parallel_jobs: 3\n", "");
        assert!(fixture.validate(&defaulted)?.threads.max_parallel_jobs >= 1);

        let nested = format!("{}gru_settings:\n  mapping_foldername: ../escape\n", with_mapping(TWO_ORGANISMS));
        assert!(matches!(fixture.validate(&nested).unwrap_err(), PipelineError::ConfigInvalid { .. }));
        Ok(())
    }
}
