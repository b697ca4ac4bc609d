//! # Scan Orchestrator
//!
//! Expands the scan matrix (accounts x regions x services) into units and
//! runs them on a bounded pool of worker threads pulling from a shared queue.
//! Each unit owns its discovery cache; the queue and the result sink are the
//! only shared state.
//!
//! Cancellation is cooperative: once the token is set no new unit is taken
//! from the queue, in-flight units finish, and units never started are
//! reported as `cancelled`. A unit whose worker panicked, or that was left
//! queued after every worker died, is reported as `error`.

use crate::check::run_checks;
use crate::client::VendorClient;
use crate::discovery::DiscoveryExecutor;
use crate::dispatch::UnitContext;
use crate::error::ScanError;
use crate::results::{
    DiscoveryStatus, HostContext, ScanReport, ScanUnit, UnitReport, UnitStatus, GLOBAL_REGION,
};
use crate::retry::RetryConfig;
use chrono::Utc;
use posture_catalog::CompiledCatalog;
use regex::Regex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

// ============================================================================
// Configuration
// ============================================================================

/// Include/exclude regex filter over names
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl NameFilter {
    /// Compile include and exclude patterns; `kind` names the filter in errors
    pub fn new(include: &[String], exclude: &[String], kind: &str) -> Result<Self, ScanError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, ScanError> {
            patterns
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|source| ScanError::InvalidFilter {
                        kind: kind.to_string(),
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// An empty include list admits every name not excluded
    pub fn allows(&self, name: &str) -> bool {
        (self.include.is_empty() || self.include.iter().any(|re| re.is_match(name)))
            && !self.exclude.iter().any(|re| re.is_match(name))
    }
}

/// Scan-wide settings
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub accounts: Vec<String>,
    pub account_filter: NameFilter,
    pub regions: Vec<String>,
    pub region_filter: NameFilter,
    /// Services to scan; empty means every loaded catalog
    pub services: Vec<String>,
    pub exclude_services: Vec<String>,
    pub workers: usize,
    pub intra_unit_parallelism: usize,
    pub retry: RetryConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            account_filter: NameFilter::default(),
            regions: Vec::new(),
            region_filter: NameFilter::default(),
            services: Vec::new(),
            exclude_services: Vec::new(),
            workers: default_workers(),
            intra_unit_parallelism: 1,
            retry: RetryConfig::default(),
        }
    }
}

/// Available parallelism capped at 8
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(4)
}

/// Cooperative cancellation flag shared between the caller and the workers
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Matrix
// ============================================================================

/// A unit of work: coordinates plus the catalog to run
#[derive(Debug, Clone)]
pub struct PlannedUnit {
    pub unit: ScanUnit,
    pub catalog: Arc<CompiledCatalog>,
}

/// Expand catalogs and configuration into the ordered list of scan units
///
/// Global services get the single region `global`.
pub fn build_matrix(catalogs: &[Arc<CompiledCatalog>], config: &ScanConfig) -> Vec<PlannedUnit> {
    let accounts = dedup_filtered(&config.accounts, &config.account_filter);
    let regions = dedup_filtered(&config.regions, &config.region_filter);

    let mut services: Vec<&Arc<CompiledCatalog>> = catalogs
        .iter()
        .filter(|c| config.services.is_empty() || config.services.contains(&c.service))
        .filter(|c| !config.exclude_services.contains(&c.service))
        .collect();
    services.sort_by(|a, b| a.service.cmp(&b.service));

    let mut units = Vec::new();
    for account in &accounts {
        for catalog in &services {
            if catalog.is_global() {
                units.push(PlannedUnit {
                    unit: ScanUnit::new(account, GLOBAL_REGION, &catalog.service),
                    catalog: Arc::clone(catalog),
                });
            } else {
                for region in &regions {
                    units.push(PlannedUnit {
                        unit: ScanUnit::new(account, region, &catalog.service),
                        catalog: Arc::clone(catalog),
                    });
                }
            }
        }
    }
    units
}

fn dedup_filtered(names: &[String], filter: &NameFilter) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| filter.allows(name))
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

// ============================================================================
// Execution
// ============================================================================

/// Runs a scan across the unit matrix
pub struct ScanOrchestrator {
    catalogs: Vec<Arc<CompiledCatalog>>,
    client: Arc<dyn VendorClient>,
    config: ScanConfig,
    cancel: CancellationToken,
}

impl ScanOrchestrator {
    pub fn new(
        catalogs: Vec<CompiledCatalog>,
        client: Arc<dyn VendorClient>,
        config: ScanConfig,
    ) -> Self {
        Self {
            catalogs: catalogs.into_iter().map(Arc::new).collect(),
            client,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token, e.g. to share one with a signal handler
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn plan_units(&self) -> Vec<PlannedUnit> {
        build_matrix(&self.catalogs, &self.config)
    }

    /// Run every unit and collect the reports
    pub fn run(&self) -> Result<ScanReport, ScanError> {
        let planned = self.plan_units();
        if planned.is_empty() {
            return Err(ScanError::EmptyMatrix {
                reason: format!(
                    "{} accounts, {} regions and {} catalogs left after filtering",
                    self.config.accounts.len(),
                    self.config.regions.len(),
                    self.catalogs.len()
                ),
            });
        }

        let scan_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let total = planned.len();
        let workers = self.config.workers.clamp(1, total);

        log::info!(
            "Starting scan {}: {} units on {} workers",
            scan_id,
            total,
            workers
        );

        let queue: Arc<Mutex<VecDeque<(usize, PlannedUnit)>>> =
            Arc::new(Mutex::new(planned.iter().cloned().enumerate().collect()));
        let sink: Arc<Mutex<BTreeMap<usize, UnitReport>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let runner = Arc::new(UnitRunner {
            client: Arc::clone(&self.client),
            retry: self.config.retry.clone(),
            intra_unit_parallelism: self.config.intra_unit_parallelism.max(1),
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let sink = Arc::clone(&sink);
            let runner = Arc::clone(&runner);
            let cancel = self.cancel.clone();

            handles.push(thread::spawn(move || loop {
                if cancel.is_cancelled() {
                    log::debug!("Worker {} stopping: scan cancelled", worker_id);
                    break;
                }
                let Some((position, planned)) = lock(&queue).pop_front() else {
                    break;
                };
                let report = runner.run(&planned);
                lock(&sink).insert(position, report);
            }));
        }

        for handle in handles {
            if handle.join().is_err() {
                log::error!("Scan worker panicked");
            }
        }

        let mut finished = std::mem::take(&mut *lock(&sink));
        let not_started: HashSet<usize> = lock(&queue).iter().map(|(i, _)| *i).collect();
        let cancelled = self.cancel.is_cancelled();

        let units: Vec<UnitReport> = planned
            .into_iter()
            .enumerate()
            .map(|(position, planned)| {
                let provider = planned.catalog.provider.clone();
                match finished.remove(&position) {
                    Some(report) => report,
                    None if not_started.contains(&position) && cancelled => {
                        UnitReport::cancelled(planned.unit, provider)
                    }
                    // Queue left over without cancellation: every worker died
                    None if not_started.contains(&position) => {
                        UnitReport::failed(planned.unit, provider, "unit not run: all scan workers stopped")
                    }
                    None => UnitReport::failed(planned.unit, provider, "unit worker panicked"),
                }
            })
            .collect();

        let report = ScanReport {
            scan_id,
            started_at,
            finished_at: Utc::now(),
            host: HostContext::from_system(),
            units,
        };

        let totals = report.totals();
        log::info!(
            "Scan {} finished: {} completed, {} error, {} cancelled units; {} pass, {} fail, {} skip, {} error results",
            report.scan_id,
            report.count_units(UnitStatus::Completed),
            report.count_units(UnitStatus::Error),
            report.count_units(UnitStatus::Cancelled),
            totals.pass,
            totals.fail,
            totals.skip,
            totals.error
        );

        Ok(report)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared, immutable per-scan state used by every worker
struct UnitRunner {
    client: Arc<dyn VendorClient>,
    retry: RetryConfig,
    intra_unit_parallelism: usize,
}

impl UnitRunner {
    fn run(&self, planned: &PlannedUnit) -> UnitReport {
        let unit = &planned.unit;
        let catalog = &planned.catalog;
        let started_at = Utc::now();
        log::info!("Scanning unit {}", unit);

        let executor = DiscoveryExecutor::new(
            self.client.as_ref(),
            self.retry.clone(),
            UnitContext {
                provider: catalog.provider.clone(),
                service: unit.service.clone(),
                account: unit.account.clone(),
                region: unit.region.clone(),
            },
        );

        let mut cache = executor.run_catalog(catalog, self.intra_unit_parallelism);
        let checks = run_checks(catalog, &cache);
        let discoveries: Vec<_> = catalog
            .plan
            .order
            .iter()
            .filter_map(|id| cache.remove(id))
            .collect();

        // A unit where nothing emitted and something failed did not run at all
        let first_failure = discoveries
            .iter()
            .find(|d| d.status == DiscoveryStatus::Failed);
        let (status, error) = match first_failure {
            Some(failed) if !discoveries.iter().any(|d| d.is_emitted()) => (
                UnitStatus::Error,
                Some(match &failed.reason {
                    Some(reason) => format!("discovery '{}' failed: {}", failed.discovery_id, reason),
                    None => format!("discovery '{}' failed", failed.discovery_id),
                }),
            ),
            _ => (UnitStatus::Completed, None),
        };

        let report = UnitReport {
            unit: unit.clone(),
            provider: catalog.provider.clone(),
            status,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            discoveries,
            checks,
            error,
        };

        let counts = report.counts();
        match report.status {
            UnitStatus::Error => log::error!(
                "Unit {} failed: {}",
                unit,
                report.error.as_deref().unwrap_or("unknown error")
            ),
            _ => log::info!(
                "Unit {} done in {}ms: {} pass, {} fail, {} skip, {} error",
                unit,
                report.duration_ms(),
                counts.pass,
                counts.fail,
                counts.skip,
                counts.error
            ),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::MockClient;
    use crate::client::VendorRequest;
    use crate::error::VendorError;
    use crate::results::CheckStatus;
    use assert_matches::assert_matches;
    use posture_catalog::{load_catalog_str, CatalogFormat};
    use serde_json::{json, Value};

    const COMPUTE: &str = r#"
provider: gcp
service: compute
discovery:
  - id: a
    calls:
      - action: list_things
  - id: b
    for_each: a
    calls:
      - action: get_things
    emit:
      item:
        id: "{{ item.id }}"
        enabled: "{{ response.enabled }}"
checks:
  - check_id: compute.things.enabled
    for_each: b
    conditions:
      - path: enabled
        operator: equals
        expected: true
"#;

    const IAM: &str = r#"
provider: gcp
service: iam
scope: global
discovery:
  - id: accounts
    calls: [{ action: list_service_accounts }]
checks:
  - check_id: iam.accounts.present
    for_each: accounts
    conditions: [{ path: email, operator: exists }]
"#;

    fn catalogs() -> Vec<CompiledCatalog> {
        vec![
            load_catalog_str(COMPUTE, CatalogFormat::Yaml, "compute").unwrap(),
            load_catalog_str(IAM, CatalogFormat::Yaml, "iam").unwrap(),
        ]
    }

    fn config(accounts: &[&str], regions: &[&str]) -> ScanConfig {
        ScanConfig {
            accounts: accounts.iter().map(|s| s.to_string()).collect(),
            regions: regions.iter().map(|s| s.to_string()).collect(),
            workers: 2,
            retry: RetryConfig::immediate(2),
            ..ScanConfig::default()
        }
    }

    fn client() -> Arc<MockClient> {
        Arc::new(
            MockClient::new()
                .respond("list_things", json!({"items": [{"id": "1"}, {"id": "2"}]}))
                .respond("get_things/1", json!({"enabled": true}))
                .fail("get_things/2", VendorError::fatal("get_things", "denied"))
                .respond("list_service_accounts", json!([{"email": "sa@x"}])),
        )
    }

    #[test]
    fn test_matrix_filters_and_global_scope() {
        let catalogs: Vec<_> = catalogs().into_iter().map(Arc::new).collect();
        let mut cfg = config(&["p1", "p2", "sandbox-1", "p1"], &["us-east1", "eu-west1"]);
        cfg.account_filter = NameFilter::new(&[], &["^sandbox".to_string()], "account").unwrap();
        cfg.region_filter = NameFilter::new(&["^us-".to_string()], &[], "region").unwrap();

        let units: Vec<ScanUnit> = build_matrix(&catalogs, &cfg)
            .into_iter()
            .map(|p| p.unit)
            .collect();
        assert_eq!(
            units,
            vec![
                ScanUnit::new("p1", "us-east1", "compute"),
                ScanUnit::new("p1", "global", "iam"),
                ScanUnit::new("p2", "us-east1", "compute"),
                ScanUnit::new("p2", "global", "iam"),
            ]
        );

        cfg.exclude_services = vec!["compute".to_string()];
        assert_eq!(build_matrix(&catalogs, &cfg).len(), 2);
    }

    #[test]
    fn test_invalid_filter_pattern() {
        assert_matches!(
            NameFilter::new(&["(".to_string()], &[], "region"),
            Err(ScanError::InvalidFilter { .. })
        );
    }

    #[test]
    fn test_end_to_end_partial_failure() {
        let orchestrator =
            ScanOrchestrator::new(catalogs(), client(), config(&["p1"], &["us-east1"]));
        let report = orchestrator.run().unwrap();
        assert_eq!(report.units.len(), 2);

        let compute = report
            .unit(&ScanUnit::new("p1", "us-east1", "compute"))
            .unwrap();
        assert_eq!(compute.status, UnitStatus::Completed);
        assert_eq!(compute.discovery("b").unwrap().items.len(), 1);

        let statuses: Vec<(CheckStatus, Option<&str>)> = compute
            .checks
            .iter()
            .map(|r| (r.status, r.resource_id.as_deref()))
            .collect();
        assert_eq!(
            statuses,
            vec![(CheckStatus::Pass, Some("1")), (CheckStatus::Error, Some("2"))]
        );

        let iam = report.unit(&ScanUnit::new("p1", "global", "iam")).unwrap();
        assert_eq!(iam.counts().pass, 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let orchestrator =
            ScanOrchestrator::new(catalogs(), client(), config(&["p1", "p2"], &["us-east1"]));
        orchestrator.cancellation_token().cancel();

        let report = orchestrator.run().unwrap();
        assert_eq!(report.count_units(UnitStatus::Cancelled), 4);
        assert!(report.units.iter().all(|u| u.checks.is_empty()));
    }

    #[test]
    fn test_unit_with_only_failures_is_error() {
        let failing = Arc::new(
            MockClient::new()
                .fail("list_things", VendorError::fatal("list_things", "denied"))
                .respond("list_service_accounts", json!([])),
        );
        let orchestrator =
            ScanOrchestrator::new(catalogs(), failing, config(&["p1"], &["us-east1"]));
        let report = orchestrator.run().unwrap();

        let compute = report
            .unit(&ScanUnit::new("p1", "us-east1", "compute"))
            .unwrap();
        assert_eq!(compute.status, UnitStatus::Error);
        assert!(compute.checks.iter().all(|r| r.status == CheckStatus::Skip));
        assert_eq!(compute.checks.len(), 1);
    }

    /// Lists service accounts, running `on_list` first
    struct HookedClient<F: Fn() + Send + Sync> {
        on_list: F,
    }

    impl<F: Fn() + Send + Sync> VendorClient for HookedClient<F> {
        fn list(&self, _request: &VendorRequest) -> Result<Value, VendorError> {
            (self.on_list)();
            Ok(json!([{"email": "sa@x"}]))
        }

        fn aggregated_list(&self, request: &VendorRequest) -> Result<Value, VendorError> {
            self.list(request)
        }

        fn get(&self, request: &VendorRequest) -> Result<Value, VendorError> {
            self.list(request)
        }

        fn get_iam_policy(&self, request: &VendorRequest) -> Result<Value, VendorError> {
            self.list(request)
        }

        fn client_id(&self) -> &str {
            "hooked"
        }
    }

    fn iam_only(accounts: &[&str]) -> (Vec<CompiledCatalog>, ScanConfig) {
        let mut cfg = config(accounts, &["us-east1"]);
        cfg.workers = 1;
        (vec![load_catalog_str(IAM, CatalogFormat::Yaml, "iam").unwrap()], cfg)
    }

    #[test]
    fn test_cancel_during_scan_finishes_in_flight_unit() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let client = Arc::new(HookedClient {
            on_list: move || trigger.cancel(),
        });
        let (catalogs, cfg) = iam_only(&["p1", "p2", "p3"]);
        let orchestrator = ScanOrchestrator::new(catalogs, client, cfg).with_cancellation(token);

        let report = orchestrator.run().unwrap();
        let statuses: Vec<UnitStatus> = report.units.iter().map(|u| u.status).collect();
        assert_eq!(
            statuses,
            vec![UnitStatus::Completed, UnitStatus::Cancelled, UnitStatus::Cancelled]
        );
        assert_eq!(report.units[0].counts().pass, 1);
    }

    #[test]
    fn test_dead_workers_leave_queued_units_in_error() {
        let client = Arc::new(HookedClient {
            on_list: || {
                panic!("client crashed");
            },
        });
        let (catalogs, cfg) = iam_only(&["p1", "p2", "p3"]);
        let report = ScanOrchestrator::new(catalogs, client, cfg).run().unwrap();

        assert_eq!(report.count_units(UnitStatus::Cancelled), 0);
        assert_eq!(report.count_units(UnitStatus::Error), 3);
        assert_eq!(report.units[0].error.as_deref(), Some("unit worker panicked"));
        assert!(report.units[1..]
            .iter()
            .all(|u| u.error.as_deref() == Some("unit not run: all scan workers stopped")));
    }

    #[test]
    fn test_empty_matrix() {
        let orchestrator = ScanOrchestrator::new(catalogs(), client(), config(&[], &["us-east1"]));
        assert_matches!(orchestrator.run(), Err(ScanError::EmptyMatrix { .. }));
    }
}
