//! Error types for catalog loading, compilation and planning
//!
//! Every error here is raised before any vendor call is made.

use std::path::PathBuf;

/// Template syntax errors found while parsing `{{ expr }}` markers
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateSyntaxError {
    #[error("Unclosed template marker at byte {position} in '{template}'")]
    Unclosed { template: String, position: usize },

    #[error("Empty template expression in '{template}'")]
    EmptyExpression { template: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Action names that cannot be mapped to a dispatch strategy
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Unrecognized action '{action}': expected list_<resource>, aggregatedList_<resource>, get_<resource>, get_<resource>_iam_policy or eval")]
    UnrecognizedAction { action: String },

    #[error("Action '{action}' has an invalid resource name '{resource}'")]
    InvalidResource { action: String, resource: String },
}

/// Dependency graph defects detected by the planner
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanValidationError {
    #[error("Duplicate discovery id '{id}'")]
    DuplicateId { id: String },

    #[error("Discovery '{id}' references itself")]
    SelfReference { id: String },

    #[error("Discovery '{id}' references unknown discovery '{reference}'")]
    DanglingReference { id: String, reference: String },

    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Catalog loading and compilation errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog '{origin}': {reason}")]
    Parse { origin: String, reason: String },

    #[error("Invalid catalog for service '{service}': {reason}")]
    Invalid { service: String, reason: String },

    #[error("Dispatch error in discovery '{discovery_id}' of service '{service}': {source}")]
    Dispatch {
        service: String,
        discovery_id: String,
        #[source]
        source: DispatchError,
    },

    #[error("Template error in {location} of service '{service}': {source}")]
    Template {
        service: String,
        location: String,
        #[source]
        source: TemplateSyntaxError,
    },

    #[error("Unknown operator '{operator}' in check '{check_id}'")]
    UnknownOperator { check_id: String, operator: String },

    #[error("Plan validation failed for service '{service}': {source}")]
    Plan {
        service: String,
        #[source]
        source: PlanValidationError,
    },

    #[error("Service '{service}' is defined by more than one catalog")]
    DuplicateService { service: String },

    #[error("Catalog directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },
}

impl CatalogError {
    /// Check if this error comes from an invalid dependency graph
    pub fn is_plan_error(&self) -> bool {
        matches!(self, CatalogError::Plan { .. })
    }

    /// Check if this error comes from an unrecognized action name
    pub fn is_dispatch_error(&self) -> bool {
        matches!(self, CatalogError::Dispatch { .. })
    }
}
