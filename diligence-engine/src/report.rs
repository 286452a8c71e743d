//! Report compilation and export
//!
//! Compiles the completed sections of a run in registry order and writes them
//! out, either as numbered Markdown files per section plus the compiled report,
//! or as a single JSON document.

use crate::error::{EngineError, EngineResult};
use crate::registry::SectionRegistry;
use crate::state::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, info};

/// One completed section as it appears in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSection {
    pub id: String,
    pub display_name: String,
    pub content: String,
    pub completed_at: DateTime<Utc>,
    pub source_refs: Vec<String>,
}

/// Completed sections of a run, in registry order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledReport {
    pub run_id: String,
    pub company_id: Option<String>,
    pub sections: Vec<ReportSection>,
    /// Registered sections without a recorded result
    pub missing: Vec<String>,
}

impl CompiledReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Section contents concatenated in registry order
    pub fn body(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn to_markdown(&self, title: &str) -> String {
        let mut markdown = format!("# {}\n\n", title);

        if let Some(company) = &self.company_id {
            markdown.push_str(&format!("**Company:** {}  \n", company));
        }
        markdown.push_str(&format!("**Run:** {}  \n", self.run_id));
        if let Some(generated) = self.sections.iter().map(|s| s.completed_at).max() {
            markdown.push_str(&format!(
                "**Generated:** {}  \n",
                generated.format("%Y-%m-%d")
            ));
        }
        markdown.push('\n');

        if !self.missing.is_empty() {
            markdown.push_str(&format!(
                "> Incomplete: {} section(s) not yet generated ({})\n\n",
                self.missing.len(),
                self.missing.join(", ")
            ));
        }

        for section in &self.sections {
            markdown.push_str(&format!("## {}\n\n", section.display_name));
            markdown.push_str(section.content.trim_end());
            markdown.push_str("\n\n");
        }

        let mut sources: Vec<&str> = Vec::new();
        for source in self.sections.iter().flat_map(|s| &s.source_refs) {
            if !sources.contains(&source.as_str()) {
                sources.push(source);
            }
        }
        if !sources.is_empty() {
            markdown.push_str("## Sources\n\n");
            for source in sources {
                markdown.push_str(&format!("- {}\n", source));
            }
        }

        markdown.trim_end().to_string() + "\n"
    }
}

/// Collect a run's completed sections in registry order
pub fn compile_report(registry: &SectionRegistry, state: &RunState) -> CompiledReport {
    let mut sections = Vec::new();
    let mut missing = Vec::new();

    for spec in registry.iter() {
        match state.result(&spec.id) {
            Some(result) => sections.push(ReportSection {
                id: spec.id.clone(),
                display_name: spec.display_name.clone(),
                content: result.content.clone(),
                completed_at: result.completed_at,
                source_refs: result.source_refs.clone(),
            }),
            None => missing.push(spec.id.clone()),
        }
    }

    CompiledReport {
        run_id: state.run_id.clone(),
        company_id: state.company_id.clone(),
        sections,
        missing,
    }
}

/// Export formats supported by the report exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One numbered Markdown file per section plus the compiled report
    #[default]
    Markdown,
    /// The compiled report as a single JSON file
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("Unsupported export format: {other}")),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Markdown => f.write_str("markdown"),
            ExportFormat::Json => f.write_str("json"),
        }
    }
}

/// Writes run results under `<output_dir>/<company>/`
#[derive(Debug, Clone)]
pub struct ReportExporter {
    output_dir: PathBuf,
    title: String,
    include_metadata_header: bool,
}

impl ReportExporter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            title: "Investment Due Diligence Report".to_string(),
            include_metadata_header: true,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_metadata_header(mut self, include: bool) -> Self {
        self.include_metadata_header = include;
        self
    }

    /// Export a run; returns the directory or file written
    pub async fn export(
        &self,
        registry: &SectionRegistry,
        state: &RunState,
        company: &str,
        format: ExportFormat,
    ) -> EngineResult<PathBuf> {
        let company_dir = self.output_dir.join(sanitize_filename(company));
        let report = compile_report(registry, state);

        match format {
            ExportFormat::Markdown => {
                self.export_markdown(registry, state, &report, company, &company_dir)
                    .await?;
                Ok(company_dir)
            }
            ExportFormat::Json => {
                let path = company_dir.join("report.json");
                self.export_json(&report, &path).await?;
                Ok(path)
            }
        }
    }

    async fn export_markdown(
        &self,
        registry: &SectionRegistry,
        state: &RunState,
        report: &CompiledReport,
        company: &str,
        company_dir: &Path,
    ) -> EngineResult<()> {
        info!("Exporting report as Markdown to: {:?}", company_dir);
        fs::create_dir_all(company_dir).await?;

        for section in &report.sections {
            let number = registry
                .position(&section.id)
                .map(|p| p + 1)
                .ok_or_else(|| EngineError::unknown_section(section.id.as_str()))?;
            let filename = sanitize_filename(&format!("{:02}.{}.md", number, section.id));
            let path = company_dir.join(&filename);

            fs::write(&path, self.render_section(section, company)).await?;
            debug!("Exported section: {} -> {:?}", section.id, path);
        }

        fs::write(company_dir.join("report.md"), report.to_markdown(&self.title)).await?;
        fs::write(
            company_dir.join("run_state.json"),
            serde_json::to_string_pretty(state)?,
        )
        .await?;

        info!(
            "Successfully exported {} sections as Markdown",
            report.sections.len()
        );
        Ok(())
    }

    async fn export_json(&self, report: &CompiledReport, path: &Path) -> EngineResult<()> {
        info!("Exporting report as JSON to: {:?}", path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_string_pretty(report)?).await?;
        Ok(())
    }

    fn render_section(&self, section: &ReportSection, company: &str) -> String {
        let mut content = String::new();
        if self.include_metadata_header {
            content.push_str(&format!("**Company:** {}  \n", company));
            content.push_str(&format!("**Section:** {}  \n", section.display_name));
            content.push_str(&format!(
                "**Generated:** {}  \n\n",
                section.completed_at.format("%Y-%m-%d")
            ));
        }
        content.push_str(&section.content);
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content
    }
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SectionSpec;
    use crate::state::SectionResult;
    use tempfile::TempDir;

    fn registry() -> SectionRegistry {
        SectionRegistry::from_specs([
            SectionSpec::new("overview", "Overview"),
            SectionSpec::new("market", "Market"),
            SectionSpec::new("report", "Full Report").depends_on(["overview", "market"]),
        ])
        .unwrap()
    }

    fn state_with(sections: &[(&str, &str)]) -> RunState {
        let mut state = RunState::new("run-1");
        for (id, content) in sections {
            state
                .apply_completion(
                    "acme",
                    id,
                    SectionResult::new(*content, vec![format!("{id}.src")]),
                    &[],
                )
                .unwrap();
        }
        state
    }

    #[test]
    fn test_compile_report_uses_registry_order() {
        let state = state_with(&[("market", "M"), ("overview", "O")]);
        let report = compile_report(&registry(), &state);

        let ids: Vec<&str> = report.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["overview", "market"]);
        assert_eq!(report.missing, vec!["report"]);
        assert_eq!(report.body(), "O\n\nM");
        assert!(!report.is_complete());
    }

    #[test]
    fn test_to_markdown() {
        let state = state_with(&[("overview", "O"), ("market", "M"), ("report", "R")]);
        let markdown = compile_report(&registry(), &state).to_markdown("Diligence");

        assert!(markdown.starts_with("# Diligence\n\n**Company:** acme"));
        assert!(markdown.contains("## Overview\n\nO\n\n## Market\n\nM\n\n## Full Report\n\nR"));
        assert!(markdown.contains("- market.src"));
        assert!(!markdown.contains("Incomplete"));
    }

    #[tokio::test]
    async fn test_markdown_export() {
        let dir = TempDir::new().unwrap();
        let state = state_with(&[("overview", "O"), ("market", "M")]);
        let exporter = ReportExporter::new(dir.path()).with_title("Acme Memo");

        let written = exporter
            .export(&registry(), &state, "Acme Robotics", ExportFormat::Markdown)
            .await
            .unwrap();

        assert_eq!(written, dir.path().join("Acme Robotics"));
        let overview = std::fs::read_to_string(written.join("01.overview.md")).unwrap();
        assert!(overview.starts_with("**Company:** Acme Robotics  \n**Section:** Overview  \n"));
        assert!(overview.ends_with("O\n"));
        assert!(written.join("02.market.md").exists());
        assert!(!written.join("03.report.md").exists());
        assert!(written.join("report.md").exists());

        let saved: RunState =
            serde_json::from_str(&std::fs::read_to_string(written.join("run_state.json")).unwrap())
                .unwrap();
        assert_eq!(saved, state);
    }

    #[tokio::test]
    async fn test_json_export_without_header() {
        let dir = TempDir::new().unwrap();
        let state = state_with(&[("overview", "O")]);
        let exporter = ReportExporter::new(dir.path()).with_metadata_header(false);

        let path = exporter
            .export(&registry(), &state, "acme", ExportFormat::Json)
            .await
            .unwrap();
        let report: CompiledReport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.missing, vec!["market", "report"]);
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("markdown".parse::<ExportFormat>(), Ok(ExportFormat::Markdown));
        assert_eq!("JSON".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_filename_sanitization() {
        assert_eq!(sanitize_filename("01.overview.md"), "01.overview.md");
        assert_eq!(
            sanitize_filename("acme/robotics:inc?"),
            "acme_robotics_inc_"
        );
    }
}
