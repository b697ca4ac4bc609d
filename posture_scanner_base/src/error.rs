//! Runtime error types for the scanner engine
//!
//! Load-time problems live in `posture_catalog::CatalogError`; everything here
//! happens while a scan unit executes and is contained to that unit, discovery
//! or iteration.

use std::path::PathBuf;

/// A template path that does not resolve against the current scope
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Path '{path}' not found in scope")]
pub struct PathNotFound {
    pub path: String,
}

impl PathNotFound {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// A required call parameter could not be resolved
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Cannot resolve parameter '{param}' of action '{action}': {source}")]
pub struct TemplateResolutionError {
    pub action: String,
    pub param: String,
    #[source]
    pub source: PathNotFound,
}

/// Errors returned by vendor clients
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VendorError {
    /// Rate limits, 5xx responses, timeouts
    #[error("Transient vendor error in '{operation}': {message}")]
    Transient { operation: String, message: String },

    /// Permission denied, bad request, not found
    #[error("Vendor error in '{operation}': {message}")]
    Fatal { operation: String, message: String },
}

impl VendorError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        VendorError::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        VendorError::Fatal {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if the call may succeed when repeated
    pub fn is_transient(&self) -> bool {
        matches!(self, VendorError::Transient { .. })
    }
}

/// Failure of one discovery iteration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Template(#[from] TemplateResolutionError),

    #[error(transparent)]
    Vendor(#[from] VendorError),
}

/// Errors writing the artifact set
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to create output directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize '{artifact}': {source}")]
    Serialize {
        artifact: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised before a scan starts
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Invalid {kind} filter '{pattern}': {source}")]
    InvalidFilter {
        kind: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("No scan units to run: {reason}")]
    EmptyMatrix { reason: String },

    #[error(transparent)]
    Output(#[from] OutputError),
}
