//! # Check Executor
//!
//! Evaluates a catalog's checks against one unit's discovery results.
//!
//! Every check produces at least one row when its discovery is unusable, so a
//! missing discovery shows up as `skip` rather than as silence. Pass and fail
//! rows always name an item of the discovery they were evaluated against.

use crate::condition::evaluate_detailed;
use crate::resolver::resolve_in_item;
use crate::results::{CheckResult, ConditionOutcome, DiscoveryCache, Item};
use posture_catalog::{CompiledCatalog, CompiledCheck, Logic};

pub const DISCOVERY_UNAVAILABLE: &str = "discovery unavailable";
pub const NO_PARENT_ITEMS: &str = "parent discovery produced no items";

/// Run every check of the catalog
pub fn run_checks(catalog: &CompiledCatalog, cache: &DiscoveryCache) -> Vec<CheckResult> {
    catalog
        .checks
        .iter()
        .flat_map(|check| execute_check(check, cache))
        .collect()
}

/// Run one check over its discovery's items
pub fn execute_check(check: &CompiledCheck, cache: &DiscoveryCache) -> Vec<CheckResult> {
    let discovery = match cache.get(&check.for_each) {
        Some(discovery) if discovery.is_emitted() => discovery,
        Some(discovery) if discovery.is_empty_parent_skip() => {
            return vec![CheckResult::skip(check, NO_PARENT_ITEMS)];
        }
        Some(discovery) => {
            let detail = match &discovery.reason {
                Some(reason) => format!("{}: {}", DISCOVERY_UNAVAILABLE, reason),
                None => DISCOVERY_UNAVAILABLE.to_string(),
            };
            return vec![CheckResult::skip(check, detail)];
        }
        None => return vec![CheckResult::skip(check, DISCOVERY_UNAVAILABLE)],
    };

    let mut results: Vec<CheckResult> = discovery
        .iter()
        .map(|(resource_id, item)| evaluate_item(check, resource_id, item))
        .collect();

    results.extend(discovery.failures.iter().map(|failure| {
        CheckResult::error(
            check,
            failure.parent_resource_id.clone(),
            format!("discovery iteration failed: {}", failure.error),
        )
    }));

    results
}

fn evaluate_item(check: &CompiledCheck, resource_id: &str, item: &Item) -> CheckResult {
    let mut outcomes = Vec::with_capacity(check.conditions.len());
    let mut warnings = Vec::new();

    for condition in &check.conditions {
        let actual = resolve_in_item(&condition.path, item);
        let (passed, warning) =
            evaluate_detailed(actual.as_ref(), condition.operator, &condition.expected);

        if let Some(warning) = warning {
            log::warn!(
                "Check '{}' on {}: condition '{}' {}",
                check.check_id,
                resource_id,
                condition.path,
                warning
            );
            warnings.push(format!("{}: {}", condition.path, warning));
        }

        outcomes.push(ConditionOutcome {
            path: condition.path.to_string(),
            operator: condition.operator,
            expected: condition.expected.clone(),
            actual,
            passed,
        });
    }

    let passed = match check.logic {
        Logic::And => outcomes.iter().all(|o| o.passed),
        Logic::Or => outcomes.iter().any(|o| o.passed),
    };

    CheckResult::evaluated(check, resource_id, passed, outcomes, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{CheckStatus, DiscoveryResult, DiscoveryStatus, IterationFailure, StatusReason};
    use posture_catalog::{load_catalog_str, CatalogFormat};
    use serde_json::{json, Value};

    const CATALOG: &str = r#"
provider: gcp
service: storage
discovery:
  - id: buckets
    calls: [{ action: list_buckets }]
  - id: bucket_iam
    for_each: buckets
    calls: [{ action: get_buckets_iam_policy }]
checks:
  - check_id: storage.uniform_access
    title: Uniform bucket-level access
    severity: high
    for_each: buckets
    conditions:
      - path: iamConfiguration.uniformBucketLevelAccess.enabled
        operator: equals
        expected: true
  - check_id: storage.iam.no_public
    for_each: bucket_iam
    logic: OR
    conditions:
      - path: bindings[].members
        operator: not_contains
        expected: allUsers
      - path: public
        operator: equals
        expected: false
"#;

    fn catalog() -> CompiledCatalog {
        load_catalog_str(CATALOG, CatalogFormat::Yaml, "test").unwrap()
    }

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    fn emitted(id: &str, items: Vec<Value>) -> DiscoveryResult {
        let mut result = DiscoveryResult::new(id);
        for value in items {
            result.push_item(item(value), None);
        }
        result.status = DiscoveryStatus::Emitted;
        result
    }

    #[test]
    fn test_pass_and_fail_rows_reference_items() {
        let mut cache = DiscoveryCache::new();
        cache.insert(
            "buckets".to_string(),
            emitted(
                "buckets",
                vec![
                    json!({"name": "b1", "iamConfiguration": {"uniformBucketLevelAccess": {"enabled": true}}}),
                    json!({"name": "b2"}),
                ],
            ),
        );

        let catalog = catalog();
        let results = execute_check(&catalog.checks[0], &cache);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, CheckStatus::Pass);
        assert_eq!(results[1].status, CheckStatus::Fail);
        assert_eq!(results[1].conditions[0].actual, None);

        let ids = &cache["buckets"].resource_ids;
        for result in &results {
            assert!(ids.contains(result.resource_id.as_ref().unwrap()));
        }
    }

    #[test]
    fn test_or_logic_and_flattened_paths() {
        let mut cache = DiscoveryCache::new();
        cache.insert(
            "bucket_iam".to_string(),
            emitted(
                "bucket_iam",
                vec![
                    json!({"resource_id": "b1", "bindings": [{"members": ["user:a"]}]}),
                    json!({"resource_id": "b2", "bindings": [{"members": ["allUsers"]}], "public": true}),
                ],
            ),
        );
        let catalog = catalog();
        let results = execute_check(&catalog.checks[1], &cache);
        assert_eq!(results[0].status, CheckStatus::Pass);
        assert_eq!(results[1].status, CheckStatus::Fail);
        assert_eq!(results[1].resource_id.as_deref(), Some("b2"));
    }

    #[test]
    fn test_unavailable_discovery_yields_one_skip() {
        let catalog = catalog();

        let empty = DiscoveryCache::new();
        let results = execute_check(&catalog.checks[0], &empty);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Skip);
        assert_eq!(results[0].resource_id, None);
        assert_eq!(results[0].detail, DISCOVERY_UNAVAILABLE);

        let mut cache = DiscoveryCache::new();
        cache.insert(
            "bucket_iam".to_string(),
            DiscoveryResult::skipped(
                "bucket_iam",
                StatusReason::NoParentItems {
                    parent: "buckets".to_string(),
                },
            ),
        );
        let results = execute_check(&catalog.checks[1], &cache);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].detail, NO_PARENT_ITEMS);
    }

    #[test]
    fn test_failed_iterations_become_error_rows() {
        let mut bucket_iam = emitted("bucket_iam", vec![json!({"resource_id": "b1", "public": false})]);
        bucket_iam.failures.push(IterationFailure {
            parent_resource_id: Some("b2".to_string()),
            error: "permission denied".to_string(),
        });
        let mut cache = DiscoveryCache::new();
        cache.insert("bucket_iam".to_string(), bucket_iam);

        let catalog = catalog();
        let results = execute_check(&catalog.checks[1], &cache);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].status, CheckStatus::Error);
        assert_eq!(results[1].resource_id.as_deref(), Some("b2"));
    }

    #[test]
    fn test_type_mismatch_is_recorded_as_warning() {
        let catalog = load_catalog_str(
            r#"
provider: gcp
service: sql
discovery:
  - id: instances
    calls: [{ action: list_instances }]
checks:
  - check_id: sql.backup_retention
    for_each: instances
    conditions:
      - path: backupRetention
        operator: gte
        expected: 7
"#,
            CatalogFormat::Yaml,
            "test",
        )
        .unwrap();
        let mut cache = DiscoveryCache::new();
        cache.insert(
            "instances".to_string(),
            emitted(
                "instances",
                vec![
                    json!({"name": "db1", "backupRetention": "weekly"}),
                    json!({"name": "db2", "backupRetention": "14"}),
                ],
            ),
        );
        let results = execute_check(&catalog.checks[0], &cache);
        assert_eq!(results[0].status, CheckStatus::Fail);
        assert_eq!(results[0].warnings.len(), 1);
        assert_eq!(results[1].status, CheckStatus::Pass);
        assert!(results[1].warnings.is_empty());
    }

    #[test]
    fn test_run_checks_covers_every_check() {
        let catalog = catalog();
        let results = run_checks(&catalog, &DiscoveryCache::new());
        assert_eq!(results.len(), catalog.checks.len());
        assert!(results.iter().all(|r| r.status == CheckStatus::Skip));
    }
}
