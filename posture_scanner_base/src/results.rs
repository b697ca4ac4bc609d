//! # Scan Result Types
//!
//! Data structures produced by a scan: discovery inventories, check results,
//! per-unit reports and the aggregate index and summary. Everything here
//! serializes to JSON for the artifact set.

use chrono::{DateTime, Utc};
use posture_catalog::{CompiledCheck, Operator, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A discovered resource: ordered field -> value mapping
pub type Item = serde_json::Map<String, Value>;

/// Item fields tried, in order, when a discovery declares no `id_field`
pub const RESOURCE_ID_FIELDS: [&str; 4] = ["resource_id", "selfLink", "id", "name"];

/// Region used for global services
pub const GLOBAL_REGION: &str = "global";

// ============================================================================
// Discovery results
// ============================================================================

/// Lifecycle of a discovery within one scan unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStatus {
    Pending,
    Running,
    Emitted,
    Failed,
    Skipped,
}

impl fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveryStatus::Pending => "pending",
            DiscoveryStatus::Running => "running",
            DiscoveryStatus::Emitted => "emitted",
            DiscoveryStatus::Failed => "failed",
            DiscoveryStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Why a discovery failed or was skipped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusReason {
    /// The `for_each` parent emitted zero items
    NoParentItems { parent: String },
    /// The `for_each` parent failed, was skipped or never ran
    ParentUnavailable { parent: String },
    /// A discovery this one waits on failed, directly or transitively
    UpstreamFailed { discovery: String },
    /// An iteration failed under `on_error: fail`
    IterationFailed { message: String },
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReason::NoParentItems { parent } => {
                write!(f, "parent discovery '{}' produced no items", parent)
            }
            StatusReason::ParentUnavailable { parent } => {
                write!(f, "parent discovery '{}' is unavailable", parent)
            }
            StatusReason::UpstreamFailed { discovery } => {
                write!(f, "upstream discovery '{}' failed", discovery)
            }
            StatusReason::IterationFailed { message } => write!(f, "{}", message),
        }
    }
}

/// A failed iteration recorded under `on_error: continue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationFailure {
    /// Resource id of the parent item, absent for root discoveries
    pub parent_resource_id: Option<String>,
    pub error: String,
}

/// Items and status of one discovery in one scan unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub discovery_id: String,
    pub status: DiscoveryStatus,
    pub items: Vec<Item>,
    /// Resource identifier of each item, index-aligned with `items`
    pub resource_ids: Vec<String>,
    pub failures: Vec<IterationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,
}

impl DiscoveryResult {
    pub fn new(discovery_id: impl Into<String>) -> Self {
        Self {
            discovery_id: discovery_id.into(),
            status: DiscoveryStatus::Pending,
            items: Vec::new(),
            resource_ids: Vec::new(),
            failures: Vec::new(),
            reason: None,
        }
    }

    /// A discovery that never ran
    pub fn skipped(discovery_id: impl Into<String>, reason: StatusReason) -> Self {
        let mut result = Self::new(discovery_id);
        result.status = DiscoveryStatus::Skipped;
        result.reason = Some(reason);
        result
    }

    /// Skipped because the `for_each` parent had nothing to iterate
    pub fn is_empty_parent_skip(&self) -> bool {
        self.status == DiscoveryStatus::Skipped
            && matches!(self.reason, Some(StatusReason::NoParentItems { .. }))
    }

    /// Append an item, deriving its resource id
    pub fn push_item(&mut self, item: Item, id_field: Option<&str>) {
        let resource_id = resource_id_for(&item, id_field, &self.discovery_id, self.items.len());
        self.items.push(item);
        self.resource_ids.push(resource_id);
    }

    /// Items paired with their resource ids
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.resource_ids
            .iter()
            .map(String::as_str)
            .zip(self.items.iter())
    }

    pub fn is_emitted(&self) -> bool {
        self.status == DiscoveryStatus::Emitted
    }
}

/// Completed discoveries of one unit, keyed by id
pub type DiscoveryCache = BTreeMap<String, DiscoveryResult>;

/// Derive the resource identifier of an item
///
/// Uses `id_field` when declared, then the first present of
/// [`RESOURCE_ID_FIELDS`], then `<discovery_id>[<index>]`.
pub fn resource_id_for(item: &Item, id_field: Option<&str>, discovery_id: &str, index: usize) -> String {
    id_field
        .and_then(|field| item.get(field))
        .and_then(scalar_id)
        .or_else(|| {
            RESOURCE_ID_FIELDS
                .iter()
                .find_map(|field| item.get(*field).and_then(scalar_id))
        })
        .unwrap_or_else(|| format!("{}[{}]", discovery_id, index))
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Check results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Skip => "skip",
            CheckStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one condition against one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub path: String,
    pub operator: Operator,
    pub expected: Value,
    /// `None` when the path does not resolve
    pub actual: Option<Value>,
    pub passed: bool,
}

/// One row of a unit's check output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub title: String,
    pub severity: Severity,
    /// Absent only for unit-level skip rows
    pub resource_id: Option<String>,
    pub status: CheckStatus,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CheckResult {
    fn base(check: &CompiledCheck, status: CheckStatus, detail: String) -> Self {
        Self {
            check_id: check.check_id.clone(),
            title: check.title.clone(),
            severity: check.severity,
            resource_id: None,
            status,
            detail,
            conditions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Unit-level skip row
    pub fn skip(check: &CompiledCheck, reason: impl Into<String>) -> Self {
        Self::base(check, CheckStatus::Skip, reason.into())
    }

    /// Error row for a failed discovery iteration
    pub fn error(check: &CompiledCheck, resource_id: Option<String>, message: impl Into<String>) -> Self {
        let mut result = Self::base(check, CheckStatus::Error, message.into());
        result.resource_id = resource_id;
        result
    }

    /// Pass or fail row for an evaluated item
    pub fn evaluated(
        check: &CompiledCheck,
        resource_id: &str,
        passed: bool,
        conditions: Vec<ConditionOutcome>,
        warnings: Vec<String>,
    ) -> Self {
        let (status, detail) = if passed {
            (CheckStatus::Pass, "all conditions satisfied".to_string())
        } else {
            let failed: Vec<&str> = conditions
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.path.as_str())
                .collect();
            (
                CheckStatus::Fail,
                format!("conditions not satisfied: {}", failed.join(", ")),
            )
        };
        let mut result = Self::base(check, status, detail);
        result.resource_id = Some(resource_id.to_string());
        result.conditions = conditions;
        result.warnings = warnings;
        result
    }
}

/// Result counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn from_results(results: &[CheckResult]) -> Self {
        let mut counts = Self::default();
        for result in results {
            counts.record(result.status);
        }
        counts
    }

    pub fn record(&mut self, status: CheckStatus) {
        match status {
            CheckStatus::Pass => self.pass += 1,
            CheckStatus::Fail => self.fail += 1,
            CheckStatus::Skip => self.skip += 1,
            CheckStatus::Error => self.error += 1,
        }
    }

    pub fn merge(&mut self, other: &StatusCounts) {
        self.pass += other.pass;
        self.fail += other.fail;
        self.skip += other.skip;
        self.error += other.error;
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.skip + self.error
    }
}

// ============================================================================
// Units and reports
// ============================================================================

/// One (account, region, service) cell of the scan matrix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanUnit {
    pub account: String,
    pub region: String,
    pub service: String,
}

impl ScanUnit {
    pub fn new(account: impl Into<String>, region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            service: service.into(),
        }
    }

    /// File name stem shared by the unit's artifacts
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            sanitize_component(&self.account),
            sanitize_component(&self.region),
            sanitize_component(&self.service)
        )
    }
}

impl fmt::Display for ScanUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.region, self.service)
    }
}

/// Replace characters outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize_component(component: &str) -> String {
    let sanitized: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Completed,
    Error,
    Cancelled,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Completed => "completed",
            UnitStatus::Error => "error",
            UnitStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Everything one scan unit produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: ScanUnit,
    pub provider: String,
    pub status: UnitStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub discoveries: Vec<DiscoveryResult>,
    pub checks: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitReport {
    /// Report for a unit that was never started
    pub fn cancelled(unit: ScanUnit, provider: impl Into<String>) -> Self {
        Self {
            unit,
            provider: provider.into(),
            status: UnitStatus::Cancelled,
            started_at: None,
            finished_at: None,
            discoveries: Vec::new(),
            checks: Vec::new(),
            error: None,
        }
    }

    /// Report for a unit that produced no result of its own
    pub fn failed(unit: ScanUnit, provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Error,
            error: Some(error.into()),
            ..Self::cancelled(unit, provider)
        }
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_results(&self.checks)
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }

    pub fn discovery(&self, id: &str) -> Option<&DiscoveryResult> {
        self.discoveries.iter().find(|d| d.discovery_id == id)
    }
}

/// Host execution context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostContext {
    pub hostname: String,
    pub os_info: String,
    pub username: String,
    pub process_info: Option<String>,
}

impl HostContext {
    /// Create host context from system information
    pub fn from_system() -> Self {
        Self {
            hostname: hostname::get()
                .unwrap_or_else(|_| std::ffi::OsString::from("unknown"))
                .to_string_lossy()
                .to_string(),
            os_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            username: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            process_info: Some(format!("pid:{}", std::process::id())),
        }
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::from_system()
    }
}

/// Complete in-memory result of a scan
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub host: HostContext,
    pub units: Vec<UnitReport>,
}

impl ScanReport {
    pub fn totals(&self) -> StatusCounts {
        let mut totals = StatusCounts::default();
        for unit in &self.units {
            totals.merge(&unit.counts());
        }
        totals
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn unit(&self, unit: &ScanUnit) -> Option<&UnitReport> {
        self.units.iter().find(|u| &u.unit == unit)
    }

    pub fn count_units(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }

    /// Build the aggregate summary artifact
    pub fn summary(&self) -> ScanSummary {
        let mut accounts = BTreeSet::new();
        let mut regions = BTreeSet::new();
        let mut services = BTreeSet::new();
        let mut providers = BTreeSet::new();
        let mut failures_by_severity: BTreeMap<String, usize> = BTreeMap::new();

        for unit in &self.units {
            accounts.insert(unit.unit.account.clone());
            regions.insert(unit.unit.region.clone());
            services.insert(unit.unit.service.clone());
            providers.insert(unit.provider.clone());
            for result in unit.checks.iter().filter(|r| r.status == CheckStatus::Fail) {
                *failures_by_severity
                    .entry(result.severity.to_string())
                    .or_default() += 1;
            }
        }

        ScanSummary {
            scan_id: self.scan_id.clone(),
            totals: self.totals(),
            units_completed: self.count_units(UnitStatus::Completed),
            units_error: self.count_units(UnitStatus::Error),
            units_cancelled: self.count_units(UnitStatus::Cancelled),
            accounts: accounts.into_iter().collect(),
            regions: regions.into_iter().collect(),
            services: services.into_iter().collect(),
            providers: providers.into_iter().collect(),
            failures_by_severity,
        }
    }
}

/// `summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub totals: StatusCounts,
    pub units_completed: usize,
    pub units_error: usize,
    pub units_cancelled: usize,
    pub accounts: Vec<String>,
    pub regions: Vec<String>,
    pub services: Vec<String>,
    pub providers: Vec<String>,
    pub failures_by_severity: BTreeMap<String, usize>,
}

/// `index.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanIndex {
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub host: HostContext,
    pub units: Vec<UnitIndexEntry>,
    pub totals: StatusCounts,
}

/// One unit's line in `index.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitIndexEntry {
    pub account: String,
    pub region: String,
    pub service: String,
    pub provider: String,
    pub status: UnitStatus,
    pub checks_file: Option<String>,
    pub inventory_file: Option<String>,
    pub counts: StatusCounts,
    pub items_discovered: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
