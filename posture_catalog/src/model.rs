//! # Catalog Document Model
//!
//! Serde types for the rule catalog as authored on disk (YAML or JSON).
//! These are the uncompiled shapes; see [`crate::compiler`] for the
//! executable form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Top-level document
// ============================================================================

/// One catalog document describes one cloud service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Cloud provider (e.g. "gcp", "aws")
    pub provider: String,

    /// Service name (e.g. "compute", "storage")
    pub service: String,

    /// Regional services are scanned per region, global ones once
    #[serde(default)]
    pub scope: ServiceScope,

    /// Optional catalog version, informational
    #[serde(default)]
    pub version: Option<String>,

    /// Discovery steps (order is informational; execution follows the plan)
    #[serde(default)]
    pub discovery: Vec<DiscoveryDef>,

    /// Checks evaluated against discovered items
    #[serde(default)]
    pub checks: Vec<CheckDef>,
}

/// Region scope of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
    #[default]
    Regional,
    Global,
}

// ============================================================================
// Discovery
// ============================================================================

/// A read-only discovery step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDef {
    /// Unique key within the catalog
    pub id: String,

    /// Ordered vendor calls
    #[serde(default)]
    pub calls: Vec<CallDef>,

    /// Parent discovery to iterate over, one iteration per parent item
    #[serde(default)]
    pub for_each: Option<String>,

    /// Ordering-only dependencies, no iteration
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Projection from raw responses to items
    #[serde(default)]
    pub emit: Option<EmitDef>,

    /// Per-iteration failure policy
    #[serde(default)]
    pub on_error: Option<OnError>,

    /// Item field holding the resource identifier
    #[serde(default)]
    pub id_field: Option<String>,
}

/// A single vendor call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallDef {
    pub action: String,

    #[serde(default)]
    pub params: serde_json::Map<String, Value>,

    #[serde(default)]
    pub save_as: Option<String>,
}

/// Emit projection
///
/// Without `items_for` a single item is produced per iteration; with it, one
/// item per element of the resolved collection, bound under `as`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitDef {
    #[serde(default)]
    pub items_for: Option<String>,

    #[serde(rename = "as", default)]
    pub bind_as: Option<String>,

    #[serde(default)]
    pub item: serde_json::Map<String, Value>,
}

/// Iteration failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Continue,
    Fail,
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnError::Continue => write!(f, "continue"),
            OnError::Fail => write!(f, "fail"),
        }
    }
}

// ============================================================================
// Checks
// ============================================================================

/// A compliance check over one discovery's items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDef {
    pub check_id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub severity: Severity,

    /// Discovery id whose items are checked
    pub for_each: String,

    #[serde(default)]
    pub logic: Logic,

    #[serde(default)]
    pub conditions: Vec<ConditionDef>,
}

/// One `(path, operator, expected)` triple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDef {
    pub path: String,

    pub operator: String,

    #[serde(default)]
    pub expected: Value,
}

/// How conditions of a check combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    #[default]
    #[serde(rename = "AND", alias = "and", alias = "And")]
    And,
    #[serde(rename = "OR", alias = "or", alias = "Or")]
    Or,
}

/// Severity levels for checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_defaults() {
        let yaml = r#"
provider: gcp
service: storage
discovery:
  - id: buckets
    calls:
      - action: list_buckets
checks:
  - check_id: storage.public
    for_each: buckets
    conditions:
      - path: iamConfiguration.publicAccessPrevention
        operator: equals
        expected: enforced
"#;
        let doc: CatalogDocument = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(doc.scope, ServiceScope::Regional);
        assert_eq!(doc.discovery[0].calls[0].save_as, None);
        assert_eq!(doc.discovery[0].on_error, None);
        assert_eq!(doc.checks[0].logic, Logic::And);
        assert_eq!(doc.checks[0].severity, Severity::Medium);
    }

    #[test]
    fn test_emit_list_projection() {
        let yaml = r#"
items_for: "{{ response.items }}"
as: fw
item:
  name: "{{ fw.name }}"
"#;
        let emit: EmitDef = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(emit.bind_as.as_deref(), Some("fw"));
        assert!(emit.item.contains_key("name"));
    }

    #[test]
    fn test_logic_aliases() {
        let logic: Logic = serde_yaml_ng::from_str("or").unwrap();
        assert_eq!(logic, Logic::Or);
        let logic: Logic = serde_yaml_ng::from_str("AND").unwrap();
        assert_eq!(logic, Logic::And);
    }
}
