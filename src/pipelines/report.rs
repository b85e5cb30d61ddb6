//! HTML summary of a run, built by filling the placeholders of a template.

use std::fs;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, error, warn};

use crate::config::defs::{OrganismFailure, PipelineError, Stage, Tool, CHART_CAPTIONS};
use crate::config::model::{RawInput, RunConfiguration};
use crate::pipelines::fanout::GenomeArtifacts;
use crate::utils::file::write_atomically;
use crate::utils::stats::SummaryReader;
use crate::utils::workspace::Workspace;

const BUILTIN_TEMPLATE: &str = include_str!("../../assets/template.html");

const MENU_GENERAL: &str = "<gru-menu-general/>";
const MENU_ORGANISMS: &str = "<gru-menu-organism-statistics/>";
const CONTENT_SETTINGS: &str = "<gru-content-settings-general/>";
const CONTENT_FILE_MAPPING: &str = "<gru-content-file-mapping/>";
const CONTENT_SOFTWARE: &str = "<gru-content-software-used/>";
const CONTENT_ORGANISMS: &str = "<gru-content-organisms-stats/>";

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

fn row(out: &mut String, label: &str, value: &str) {
    out.push_str(&format!("<tr><td>{}</td><td>{}</td></tr>", escape_html(label), escape_html(value)));
}

fn load_template(config: &RunConfiguration) -> Result<String, PipelineError> {
    match &config.template {
        Some(path) => fs::read_to_string(path).map_err(|e| PipelineError::Report {
            detail: format!("template {}: {}", path.display(), e),
        }),
        None => Ok(BUILTIN_TEMPLATE.to_string()),
    }
}

fn menu_general() -> String {
    let mut menu = String::from("<h3>General</h3><ul>");
    for (pane, label) in [
        ("gru-general-overview", "Input overview"),
        ("gru-general-organisms", "Organisms"),
        ("gru-general-software", "Software used"),
    ] {
        menu.push_str(&format!("<li><a href=\"#\" data-pane=\"{}\">{}</a></li>", pane, label));
    }
    menu.push_str("</ul>");
    menu
}

fn menu_organisms(rendered: &[&str]) -> String {
    if rendered.is_empty() {
        return String::new();
    }
    let mut menu = String::from("<h3>Organism statistics</h3><ul>");
    for prefix in rendered {
        let prefix = escape_html(prefix);
        menu.push_str(&format!("<li><a href=\"#\" data-pane=\"gru-stats-{0}\">{0}</a></li>", prefix));
    }
    menu.push_str("</ul>");
    menu
}

fn settings_general(config: &RunConfiguration) -> String {
    let mut rows = String::new();
    row(&mut rows, "Project folder", &config.project_folder.display().to_string());
    row(&mut rows, "Enable overwrite", yes_no(config.overwrite));
    let input = match &config.raw_input {
        RawInput::Directory(path) => path.display().to_string(),
        RawInput::Archive(path) => format!("{} (archive)", path.display()),
    };
    row(&mut rows, "Nanopore input", &input);
    row(&mut rows, "Enable Illumina reads", yes_no(config.secondary_reads_folder.is_some()));
    if let Some(folder) = &config.secondary_reads_folder {
        row(&mut rows, "Illumina folder", &folder.display().to_string());
    }
    row(&mut rows, "Enable references", yes_no(config.references_enabled()));
    if let Some(folder) = &config.references_folder {
        row(&mut rows, "References folder", &folder.display().to_string());
    }
    row(&mut rows, "Mapping threads", &config.threads.mapping.to_string());
    row(&mut rows, "Sorting threads", &config.threads.sorting.to_string());
    row(&mut rows, "Parallel organism jobs", &config.threads.max_parallel_jobs.to_string());
    rows
}

fn file_mapping(config: &RunConfiguration) -> String {
    let mut rows = String::new();
    for organism in &config.organisms {
        let secondary: Vec<String> = organism
            .secondary_reads
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&organism.name),
            escape_html(&organism.prefix),
            escape_html(organism.reference_name.as_deref().unwrap_or("-")),
            escape_html(&secondary.join(", ")),
        ));
    }
    rows
}

fn software_used(config: &RunConfiguration) -> String {
    let mut rows = String::new();
    let tools = [
        (Tool::Extractor, &config.tools.extractor),
        (Tool::Mapper, &config.tools.mapper),
        (Tool::Samtools, &config.tools.samtools),
        (Tool::Plotter, &config.tools.plotter),
    ];
    for (tool, program) in tools {
        row(&mut rows, tool.tag(), program);
    }
    rows
}

fn organism_section(artifacts: &GenomeArtifacts, reader: &dyn SummaryReader) -> Result<String, PipelineError> {
    let summary = reader.read_summary(&artifacts.stats).map_err(|e| PipelineError::Report {
        detail: format!("{:#}", e),
    })?;
    let prefix = escape_html(&artifacts.prefix);

    let mut section = format!(
        "<section class=\"gru-pane\" id=\"gru-stats-{0}\"><h1>Statistics {0}</h1><h2>Overview</h2><table><tbody>",
        prefix
    );
    for (label, value) in summary.rows() {
        section.push_str(&format!(
            "<tr><td>{}</td><td class=\"right\">{}</td></tr>",
            escape_html(label),
            escape_html(&value)
        ));
    }
    section.push_str("</tbody></table><h2>Charts</h2><div class=\"gru-charts\">");

    for (stem, path) in &artifacts.charts {
        let bytes = fs::read(path).map_err(|e| PipelineError::Report {
            detail: format!("chart {}: {}", path.display(), e),
        })?;
        let caption = CHART_CAPTIONS.get(stem).copied().unwrap_or(*stem);
        section.push_str(&format!(
            "<div class=\"gru-chart\"><img alt=\"{0}\" src=\"data:image/png;base64,{1}\"/><h3>{0}</h3></div>",
            escape_html(caption),
            STANDARD.encode(&bytes)
        ));
    }
    section.push_str("</div>");

    if !artifacts.missing_charts.is_empty() {
        warn!("[{}] Report skips missing charts: {}", artifacts.prefix, artifacts.missing_charts.join(", "));
        section.push_str(&format!(
            "<p class=\"gru-warning\">Charts not available: {}</p>",
            escape_html(&artifacts.missing_charts.join(", "))
        ));
    }
    section.push_str("</section>");
    Ok(section)
}

/// A rendered report and the organisms whose results could not be shown.
#[derive(Debug)]
pub struct Rendered {
    pub html: String,
    pub failures: Vec<OrganismFailure>,
}

/// Written report plus the organisms whose sections had to be replaced by a notice.
#[derive(Debug)]
pub struct ReportOutcome {
    pub path: PathBuf,
    pub failures: Vec<OrganismFailure>,
}

fn no_statistics(name: &str, prefix: &str) -> String {
    format!(
        "<p class=\"gru-warning\">No statistics for {} ({}): processing failed.</p>",
        escape_html(name),
        escape_html(prefix)
    )
}

/// Fills `template` with the sections for `config`. Organisms appear in configuration order;
/// those without results, or whose results cannot be read, get a short notice instead.
pub fn render(
    template: &str,
    config: &RunConfiguration,
    completed: &[GenomeArtifacts],
    reader: &dyn SummaryReader,
) -> Rendered {
    let mut organisms = String::new();
    let mut rendered = Vec::new();
    let mut failures = Vec::new();
    if config.references_enabled() {
        for organism in &config.organisms {
            let Some(artifacts) = completed.iter().find(|a| a.prefix == organism.prefix) else {
                organisms.push_str(&no_statistics(&organism.name, &organism.prefix));
                continue;
            };
            match organism_section(artifacts, reader) {
                Ok(section) => {
                    organisms.push_str(&section);
                    rendered.push(organism.prefix.as_str());
                }
                Err(e) => {
                    error!("[{}] Report section skipped: {}", organism.prefix, e);
                    organisms.push_str(&no_statistics(&organism.name, &organism.prefix));
                    failures.push(OrganismFailure {
                        prefix: organism.prefix.clone(),
                        step: Some(Stage::Stats),
                        error: e,
                    });
                }
            }
        }
    }

    let html = template
        .replace(MENU_GENERAL, &menu_general())
        .replace(MENU_ORGANISMS, &menu_organisms(&rendered))
        .replace(CONTENT_SETTINGS, &settings_general(config))
        .replace(CONTENT_FILE_MAPPING, &file_mapping(config))
        .replace(CONTENT_SOFTWARE, &software_used(config))
        .replace(CONTENT_ORGANISMS, &organisms);
    Rendered { html, failures }
}

/// Renders the report and writes it to the project folder.
pub fn assemble(
    config: &RunConfiguration,
    workspace: &Workspace,
    completed: &[GenomeArtifacts],
    reader: &dyn SummaryReader,
) -> Result<ReportOutcome, PipelineError> {
    let template = load_template(config)?;
    let Rendered { html, failures } = render(&template, config, completed, reader);
    let path = workspace.report();
    write_atomically(&path, html.as_bytes()).map_err(|e| PipelineError::Report {
        detail: format!("{}: {}", path.display(), e),
    })?;
    debug!("Wrote {} bytes of HTML", html.len());
    Ok(ReportOutcome { path, failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::path::Path;
    use tempfile::tempdir;

    use crate::utils::stats::AlignmentSummary;
    use crate::utils::workspace::tests::run_configuration;

    struct FixedReader;

    impl SummaryReader for FixedReader {
        fn read_summary(&self, _path: &Path) -> anyhow::Result<AlignmentSummary> {
            Ok(AlignmentSummary {
                raw_total_sequences: 10,
                reads_mapped: 5,
                ..AlignmentSummary::default()
            })
        }
    }

    /// Reads like `FixedReader` except for one prefix, whose statistics are unreadable.
    struct UnreadableFor(&'static str);

    impl SummaryReader for UnreadableFor {
        fn read_summary(&self, path: &Path) -> anyhow::Result<AlignmentSummary> {
            if path.file_name().is_some_and(|n| n.to_string_lossy() == format!("{}.bam.stats", self.0)) {
                anyhow::bail!("{}: no summary numbers found", path.display());
            }
            FixedReader.read_summary(path)
        }
    }

    fn artifacts(dir: &Path, prefix: &str) -> Result<GenomeArtifacts> {
        let chart = dir.join(format!("{}-coverage.png", prefix));
        fs::write(&chart, b"\x89PNG")?;
        Ok(GenomeArtifacts {
            prefix: prefix.to_string(),
            partition: dir.join(format!("{}.sam", prefix)),
            bam: dir.join(format!("{}.bam", prefix)),
            bam_index: dir.join(format!("{}.bam.bai", prefix)),
            stats: dir.join(format!("{}.bam.stats", prefix)),
            flagstat: dir.join(format!("{}.bam.flagstat", prefix)),
            charts: vec![("coverage", chart)],
            missing_charts: vec!["quals"],
        })
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;");
    }

    #[test]
    fn test_render_fills_every_placeholder() -> Result<()> {
        let dir = tempdir()?;
        let mut config = run_configuration(&dir.path().join("project"), &["a", "b"]);
        config.organisms[1].name = "<b>orgB</b>".into();
        let completed = vec![artifacts(dir.path(), "a")?];

        let rendered = render(BUILTIN_TEMPLATE, &config, &completed, &FixedReader);
        assert!(rendered.failures.is_empty());
        let html = rendered.html;
        assert!(!html.contains("<gru-"));
        assert!(html.contains("id=\"gru-stats-a\""));
        assert!(html.contains("50.00%"));
        assert!(html.contains("data:image/png;base64,iVBORw=="));
        assert!(html.contains("<h3>Coverage</h3>"));
        assert!(html.contains("Charts not available: quals"));
        assert!(html.contains("No statistics for &lt;b&gt;orgB&lt;/b&gt; (b)"));
        assert!(!html.contains("<b>orgB</b>"));
        Ok(())
    }

    #[test]
    fn test_unreadable_statistics_only_drop_that_organism() -> Result<()> {
        let dir = tempdir()?;
        let config = run_configuration(&dir.path().join("project"), &["a", "b"]);
        let completed = vec![artifacts(dir.path(), "a")?, artifacts(dir.path(), "b")?];

        let rendered = render(BUILTIN_TEMPLATE, &config, &completed, &UnreadableFor("b"));
        assert!(rendered.html.contains("id=\"gru-stats-a\""));
        assert!(!rendered.html.contains("id=\"gru-stats-b\""));
        assert!(!rendered.html.contains("data-pane=\"gru-stats-b\""));
        assert!(rendered.html.contains("No statistics for orgB (b)"));

        assert_eq!(rendered.failures.len(), 1);
        let failure = &rendered.failures[0];
        assert_eq!(failure.prefix, "b");
        assert_eq!(failure.step, Some(Stage::Stats));
        assert_eq!(failure.error.exit_code(), 60);
        assert!(failure.to_string().contains("b.bam.stats"));
        Ok(())
    }

    #[test]
    fn test_render_without_references_has_only_general_sections() -> Result<()> {
        let dir = tempdir()?;
        let mut config = run_configuration(&dir.path().join("project"), &["a"]);
        config.references_folder = None;

        let html = render(BUILTIN_TEMPLATE, &config, &[], &FixedReader).html;
        assert!(html.contains("Input overview"));
        assert!(!html.contains("Organism statistics"));
        assert!(!html.contains("gru-stats-"));
        Ok(())
    }

    #[test]
    fn test_assemble_uses_configured_template() -> Result<()> {
        let dir = tempdir()?;
        let template = dir.path().join("custom.html");
        fs::write(&template, "<p><gru-content-software-used/></p>")?;
        let mut config = run_configuration(&dir.path().join("project"), &["a"]);
        config.template = Some(template);
        let workspace = Workspace::provision(&config)?;

        let outcome = assemble(&config, &workspace, &[], &FixedReader)?;
        let path = outcome.path;
        assert_eq!(path, dir.path().join("project/gru-output.html"));
        let html = fs::read_to_string(&path)?;
        assert!(html.starts_with("<p><tr><td>poretools</td><td>poretools</td></tr>"));
        Ok(())
    }
}
