//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

pub type DiligenceResult<T> = Result<T, DiligenceError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the diligence pipeline
#[derive(Error, Debug)]
pub enum DiligenceError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Generation error: {message}")]
    Generation {
        message: String,
        provider: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled {
        operation: String,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DiligenceError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            DiligenceError::Config { context, .. } => Some(context),
            DiligenceError::Validation { context, .. } => Some(context),
            DiligenceError::NotFound { context, .. } => Some(context),
            DiligenceError::Storage { context, .. } => Some(context),
            DiligenceError::Generation { context, .. } => Some(context),
            DiligenceError::Timeout { context, .. } => Some(context),
            DiligenceError::Cancelled { context, .. } => Some(context),
            DiligenceError::Io(_) | DiligenceError::Serialization(_) => None,
        }
    }

    /// Check if error is recoverable
    ///
    /// Only meaningful to retrying providers; the engine itself never retries.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DiligenceError::Generation { .. } => true,
            DiligenceError::Timeout { .. } => true,
            DiligenceError::Io(_) => true,
            DiligenceError::Cancelled { .. } => false,
            DiligenceError::Config { .. } => false,
            DiligenceError::Validation { .. } => false,
            DiligenceError::NotFound { .. } => false,
            _ => false,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            DiligenceError::Storage { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Run state storage error"
                );
            }
            DiligenceError::Config { .. } | DiligenceError::Validation { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration or validation error"
                );
            }
            DiligenceError::Generation { .. }
            | DiligenceError::Timeout { .. }
            | DiligenceError::Cancelled { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Generation did not complete"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::DiligenceError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'diligence config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::DiligenceError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($resource:expr, $component:expr) => {
        $crate::DiligenceError::NotFound {
            resource: $resource.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Verify the path or identifier")
                .with_suggestion("Check if the resource exists and is accessible"),
        }
    };
}

#[macro_export]
macro_rules! generation_error {
    ($msg:expr, $provider:expr) => {
        $crate::DiligenceError::Generation {
            message: $msg.to_string(),
            provider: Some($provider.to_string()),
            source: None,
            context: $crate::ErrorContext::new("generation"),
        }
    };
    ($msg:expr, $provider:expr, $source:expr) => {
        $crate::DiligenceError::Generation {
            message: $msg.to_string(),
            provider: Some($provider.to_string()),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new("generation"),
        }
    };
}
