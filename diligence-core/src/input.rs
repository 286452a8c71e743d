//! Company input sources
//!
//! Reads and validates the JSON files that describe where information about a
//! company lives (documents, channels, pages) and which reference reports to
//! imitate.

use crate::error::{DiligenceError, DiligenceResult, ErrorContext};
use crate::{not_found_error, validation_error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kind of an input source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "Google Docs")]
    GoogleDocs,
    Slack,
    Webpage,
    #[serde(rename = "PDF")]
    Pdf,
    Email,
    Database,
    #[serde(rename = "API")]
    Api,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceKind::GoogleDocs => "Google Docs",
            SourceKind::Slack => "Slack",
            SourceKind::Webpage => "Webpage",
            SourceKind::Pdf => "PDF",
            SourceKind::Email => "Email",
            SourceKind::Database => "Database",
            SourceKind::Api => "API",
        };
        f.write_str(label)
    }
}

/// A single input source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSource {
    /// Type of source
    pub source: SourceKind,
    /// URL, channel, or other identifier for the source
    pub identifier: String,
    /// What information this source contains
    pub description: String,
}

/// Everything known up front about the company under analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub company_name: String,
    pub company_sources: Vec<InputSource>,
    pub reference_sources: Vec<InputSource>,
}

impl CompanyProfile {
    /// Check required fields, trimming identifiers in place
    pub fn validate(&mut self) -> DiligenceResult<()> {
        if self.company_name.trim().is_empty() {
            return Err(validation_error!(
                "Company name cannot be empty",
                "company_name",
                "input_reader"
            ));
        }

        for (field, sources) in [
            ("company_sources", &mut self.company_sources),
            ("reference_sources", &mut self.reference_sources),
        ] {
            if sources.is_empty() {
                return Err(validation_error!(
                    "At least one input source must be provided",
                    field,
                    "input_reader"
                ));
            }
            for source in sources.iter_mut() {
                let trimmed = source.identifier.trim();
                if trimmed.is_empty() {
                    return Err(validation_error!(
                        "Identifier cannot be empty",
                        format!("{field}.identifier"),
                        "input_reader"
                    ));
                }
                source.identifier = trimmed.to_string();
            }
        }

        Ok(())
    }

    /// Stable identifier derived from the company name
    pub fn company_id(&self) -> String {
        slugify(&self.company_name)
    }

    /// Company sources of one kind
    pub fn sources_of(&self, kind: SourceKind) -> Vec<&InputSource> {
        self.company_sources
            .iter()
            .filter(|s| s.source == kind)
            .collect()
    }

    /// Human-readable listing used as the base context handed to generators
    pub fn to_text(&self) -> String {
        let mut lines = vec![
            format!("Company: {}", self.company_name),
            format!("Number of Input Sources: {}", self.company_sources.len()),
            String::new(),
            "Input Sources:".to_string(),
            "=".repeat(50),
        ];

        for (i, source) in self.company_sources.iter().enumerate() {
            lines.push(format!("{}. Source: {}", i + 1, source.source));
            lines.push(format!("   Identifier: {}", source.identifier));
            lines.push(format!("   Description: {}", source.description));
            lines.push(String::new());
        }

        if !self.reference_sources.is_empty() {
            lines.push("Reference Sources:".to_string());
            lines.push("=".repeat(50));
            for source in &self.reference_sources {
                lines.push(format!(
                    "- {}: {} ({})",
                    source.source, source.identifier, source.description
                ));
            }
        }

        lines.join("\n")
    }
}

/// Reader for a directory of company input-source files
#[derive(Debug, Clone)]
pub struct InputReader {
    sources_dir: PathBuf,
}

impl InputReader {
    pub fn new<P: AsRef<Path>>(sources_dir: P) -> DiligenceResult<Self> {
        let sources_dir = sources_dir.as_ref().to_path_buf();
        if !sources_dir.is_dir() {
            return Err(not_found_error!(
                format!("Input sources directory not found: {}", sources_dir.display()),
                "input_reader"
            ));
        }
        Ok(Self { sources_dir })
    }

    pub fn sources_dir(&self) -> &Path {
        &self.sources_dir
    }

    /// Read and validate one company's file; accepts `name` or `name.json`
    pub fn read_company(&self, company: &str) -> DiligenceResult<CompanyProfile> {
        let file_name = if company.ends_with(".json") {
            company.to_string()
        } else {
            format!("{company}.json")
        };
        let path = self.sources_dir.join(&file_name);

        if !path.is_file() {
            return Err(DiligenceError::NotFound {
                resource: format!("Company file not found: {}", path.display()),
                context: ErrorContext::new("input_reader")
                    .with_operation("read_company")
                    .with_suggestion("Run 'diligence companies' to list available companies"),
            });
        }

        let content = std::fs::read_to_string(&path)?;
        let mut profile: CompanyProfile =
            serde_json::from_str(&content).map_err(|e| DiligenceError::Validation {
                message: format!("Invalid JSON in {}: {}", file_name, e),
                field: None,
                context: ErrorContext::new("input_reader").with_operation("parse"),
            })?;
        profile.validate()?;

        debug!(
            company = %profile.company_name,
            sources = profile.company_sources.len(),
            "Loaded company input sources"
        );
        Ok(profile)
    }

    /// File stems of all available company files, sorted
    pub fn list_available_companies(&self) -> DiligenceResult<Vec<String>> {
        let mut companies = Vec::new();
        for entry in std::fs::read_dir(&self.sources_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    companies.push(stem.to_string());
                }
            }
        }
        companies.sort();
        Ok(companies)
    }
}

/// Lowercase, ASCII alphanumerics kept, everything else collapsed to `-`
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r##"{
        "company_name": "TensorStax",
        "company_sources": [
            {"source": "Google Docs", "identifier": "  https://docs.google.com/d/1  ", "description": "Questionnaire"},
            {"source": "Slack", "identifier": "#deal-tensorstax", "description": "Partner notes"}
        ],
        "reference_sources": [
            {"source": "PDF", "identifier": "reports/sample.pdf", "description": "Example memo"}
        ]
    }"##;

    fn write_sample(dir: &TempDir) {
        std::fs::write(dir.path().join("tensorstax.json"), SAMPLE).unwrap();
    }

    #[test]
    fn test_read_company_trims_identifiers() {
        let dir = TempDir::new().unwrap();
        write_sample(&dir);
        let reader = InputReader::new(dir.path()).unwrap();

        let profile = reader.read_company("tensorstax").unwrap();
        assert_eq!(profile.company_name, "TensorStax");
        assert_eq!(
            profile.company_sources[0].identifier,
            "https://docs.google.com/d/1"
        );
        assert_eq!(profile.sources_of(SourceKind::Slack).len(), 1);
        assert_eq!(profile.company_id(), "tensorstax");

        // Both spellings resolve to the same file
        assert!(reader.read_company("tensorstax.json").is_ok());
    }

    #[test]
    fn test_rejects_unknown_source_kind() {
        let dir = TempDir::new().unwrap();
        let bad = SAMPLE.replace("\"Slack\"", "\"Carrier Pigeon\"");
        std::fs::write(dir.path().join("bad.json"), bad).unwrap();
        let reader = InputReader::new(dir.path()).unwrap();

        assert!(matches!(
            reader.read_company("bad"),
            Err(DiligenceError::Validation { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_reference_sources() {
        let mut profile: CompanyProfile = serde_json::from_str(SAMPLE).unwrap();
        profile.reference_sources.clear();

        match profile.validate() {
            Err(DiligenceError::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("reference_sources"));
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_company_and_directory() {
        let dir = TempDir::new().unwrap();
        let reader = InputReader::new(dir.path()).unwrap();
        assert!(matches!(
            reader.read_company("nobody"),
            Err(DiligenceError::NotFound { .. })
        ));
        assert!(InputReader::new(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_list_available_companies_sorted() {
        let dir = TempDir::new().unwrap();
        write_sample(&dir);
        std::fs::write(dir.path().join("baseten.json"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let reader = InputReader::new(dir.path()).unwrap();

        assert_eq!(
            reader.list_available_companies().unwrap(),
            vec!["baseten".to_string(), "tensorstax".to_string()]
        );
    }

    #[test]
    fn test_to_text_lists_sources() {
        let profile: CompanyProfile = serde_json::from_str(SAMPLE).unwrap();
        let text = profile.to_text();
        assert!(text.starts_with("Company: TensorStax"));
        assert!(text.contains("1. Source: Google Docs"));
        assert!(text.contains("2. Source: Slack"));
        assert!(text.contains("- PDF: reports/sample.pdf (Example memo)"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Robotics, Inc."), "acme-robotics-inc");
        assert_eq!(slugify("  baseten "), "baseten");
    }
}
