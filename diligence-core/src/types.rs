//! Core data type definitions

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Output of one generation provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Generated section content
    pub content: String,
    /// References to the sources consulted, in the order the provider reported them
    #[serde(default)]
    pub source_refs: Vec<String>,
}

impl Generation {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source_refs: Vec::new(),
        }
    }

    pub fn with_source_refs<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_refs = refs.into_iter().map(Into::into).collect();
        self
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiligenceConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one persisted run state per run id
    pub state_dir: String,
    /// Directory receiving exported section files and compiled reports
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory holding company input-source JSON files
    pub sources_dir: String,
}

/// How sections are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Spawn an external program per section
    Command,
    /// POST to a generation service
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Program to run for `kind = "command"`
    pub command: Option<String>,
    /// Arguments passed to `command`
    pub args: Vec<String>,
    /// Service URL for `kind = "http"`
    pub endpoint: Option<String>,
    /// Name of the environment variable holding a bearer token
    pub api_key_env: Option<String>,
    /// Per-section timeout in seconds, 0 disables it
    pub timeout_secs: u64,
    /// Attempts per section, 1 disables retrying
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Heading of the compiled report
    pub title: String,
    /// Whether exported section files start with a company/section/date header
    pub include_metadata_header: bool,
}
