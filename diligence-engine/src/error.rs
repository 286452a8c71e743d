//! Engine error taxonomy

use diligence_core::DiligenceError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by registry, scheduler, executor and stores
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid section registration. Fatal at startup.
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        /// Section ids forming the offending cycle, first id repeated at the end
        cycle: Vec<String>,
    },

    /// A requested or declared section id is not registered
    #[error("Unknown section: {section_id}")]
    UnknownSection { section_id: String },

    /// The generation provider failed for a section; the run stays resumable
    #[error("Section '{section_id}' failed after {} completed section(s): {message}", .completed.len())]
    SectionExecution {
        section_id: String,
        /// Sections recorded by this invocation before the failure, in order
        completed: Vec<String>,
        message: String,
        #[source]
        source: Option<Box<DiligenceError>>,
    },

    /// A run id was resumed for a different company than it was created for
    #[error("Run '{run_id}' belongs to company '{expected}', not '{actual}'")]
    RunMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },

    #[error("Core error: {0}")]
    Core(#[from] DiligenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            cycle: Vec::new(),
        }
    }

    pub fn unknown_section<S: Into<String>>(section_id: S) -> Self {
        Self::UnknownSection {
            section_id: section_id.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Sections safely recorded before a `SectionExecution` failure
    pub fn completed_before_failure(&self) -> Option<&[String]> {
        match self {
            Self::SectionExecution { completed, .. } => Some(completed),
            _ => None,
        }
    }

    /// Id of the section that failed, for `SectionExecution` errors
    pub fn failed_section(&self) -> Option<&str> {
        match self {
            Self::SectionExecution { section_id, .. } => Some(section_id),
            _ => None,
        }
    }
}
