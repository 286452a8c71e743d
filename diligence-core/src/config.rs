//! Configuration management

use crate::error::{DiligenceError, DiligenceResult, ErrorContext};
use crate::logging::LoggingConfig;
use crate::types::{
    DiligenceConfig, InputConfig, ProviderConfig, ProviderKind, ReportConfig, StorageConfig,
};

use std::path::{Path, PathBuf};

impl Default for DiligenceConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            input: InputConfig::default(),
            provider: ProviderConfig::default(),
            report: ReportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: "~/.diligence/runs".to_string(),
            output_dir: "./task_outputs".to_string(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sources_dir: "./input_sources".to_string(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Command,
            command: Some("diligence-generate".to_string()),
            args: Vec::new(),
            endpoint: None,
            api_key_env: None,
            timeout_secs: 0,
            max_attempts: 1,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Investment Due Diligence Report".to_string(),
            include_metadata_header: true,
        }
    }
}

impl DiligenceConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> DiligenceResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DiligenceError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> DiligenceResult<Self> {
        toml::from_str(content).map_err(|e| DiligenceError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> DiligenceResult<()> {
        let content = self.to_toml_string()?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, content).map_err(|e| DiligenceError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    pub fn to_toml_string(&self) -> DiligenceResult<String> {
        toml::to_string_pretty(self).map_err(|e| DiligenceError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> DiligenceResult<()> {
        if self.storage.state_dir.trim().is_empty() {
            return Err(invalid("storage.state_dir must not be empty", "Set storage.state_dir"));
        }

        if self.storage.output_dir.trim().is_empty() {
            return Err(invalid("storage.output_dir must not be empty", "Set storage.output_dir"));
        }

        if self.provider.max_attempts == 0 {
            return Err(invalid(
                "provider.max_attempts must be greater than 0",
                "Set provider.max_attempts to 1 to disable retries",
            ));
        }

        match self.provider.kind {
            ProviderKind::Command => {
                let missing = self
                    .provider
                    .command
                    .as_deref()
                    .map_or(true, |c| c.trim().is_empty());
                if missing {
                    return Err(invalid(
                        "provider.command is required when provider.kind = \"command\"",
                        "Set provider.command to the generator program",
                    ));
                }
            }
            ProviderKind::Http => {
                let endpoint = self.provider.endpoint.as_deref().unwrap_or_default();
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(invalid(
                        "provider.endpoint must be an http(s) URL when provider.kind = \"http\"",
                        "Set provider.endpoint to the generation service URL",
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        expand_path(&self.storage.state_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_path(&self.storage.output_dir)
    }

    pub fn sources_dir(&self) -> PathBuf {
        expand_path(&self.input.sources_dir)
    }
}

/// Resolve a leading `~` against the home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(path)
}

fn invalid(message: &str, suggestion: &str) -> DiligenceError {
    DiligenceError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("config")
            .with_operation("validate")
            .with_suggestion(suggestion),
    }
}
