//! # Posture Scanner SDK
//!
//! Vendor clients, run configuration and the scan pipeline behind the
//! `scanner` binary: validate the configuration, compile every catalog,
//! build the client, run the orchestrator and write the artifact set.

pub mod clients;
pub mod config;

use config::{ConfigError, RunConfig};
use posture_catalog::{load_catalog_dir, CatalogBatch, CatalogError, CompiledCatalog};
use posture_scanner_base::error::{OutputError, ScanError};
use posture_scanner_base::orchestrator::{CancellationToken, ScanOrchestrator};
use posture_scanner_base::output::OutputWriter;
use posture_scanner_base::results::ScanReport;
use std::path::{Path, PathBuf};

/// Exit code for configuration and catalog errors
pub const EXIT_INVALID_INPUT: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("{failed} of {total} catalogs failed to compile")]
    CatalogsInvalid { failed: usize, total: usize },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Output(_) | RunError::Scan(ScanError::Output(_)) => 1,
            _ => EXIT_INVALID_INPUT,
        }
    }
}

/// A finished scan and where its artifacts were written
#[derive(Debug)]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub output_dir: PathBuf,
}

/// Compile every catalog below `dir`, logging each failure
pub fn compile_catalogs(dir: &Path) -> Result<CatalogBatch, RunError> {
    let batch = load_catalog_dir(dir)?;
    for (path, error) in &batch.failed {
        log::error!("Catalog {} rejected: {}", path.display(), error);
    }
    log::info!("{}", batch.summary());
    Ok(batch)
}

/// Compiled catalogs, or an error when any catalog was rejected
pub fn load_catalogs(dir: &Path) -> Result<Vec<CompiledCatalog>, RunError> {
    let batch = compile_catalogs(dir)?;
    if !batch.is_clean() {
        return Err(RunError::CatalogsInvalid {
            failed: batch.failure_count(),
            total: batch.files_discovered,
        });
    }
    Ok(batch.loaded)
}

/// Run a complete scan and write its artifacts
pub fn run_scan(
    config: &RunConfig,
    cancel: Option<CancellationToken>,
) -> Result<ScanOutcome, RunError> {
    config.validate()?;
    let scan_config = config.scan_config()?;
    let client_config = config.client.as_ref().ok_or(ConfigError::MissingClient)?;

    let catalogs = load_catalogs(config.catalog_dir()?)?;
    for service in &scan_config.services {
        if !catalogs.iter().any(|c| &c.service == service) {
            log::warn!("No catalog loaded for requested service '{}'", service);
        }
    }

    let client = clients::build_client(client_config)?;
    let mut orchestrator = ScanOrchestrator::new(catalogs, client, scan_config);
    if let Some(token) = cancel {
        orchestrator = orchestrator.with_cancellation(token);
    }

    let report = orchestrator.run()?;
    let output_dir = OutputWriter::new(config.output_dir()).write(&report)?;
    Ok(ScanOutcome { report, output_dir })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use assert_matches::assert_matches;
    use posture_scanner_base::output::INDEX_FILE;
    use posture_scanner_base::results::UnitStatus;
    use serde_json::Value;
    use std::fs;
    use tempfile::TempDir;

    const FIREWALLS: &str = r#"
provider: gcp
service: compute
discovery:
  - id: firewalls
    calls:
      - action: list_firewalls
        params:
          project: "{{ account }}"
checks:
  - check_id: compute.firewall.no_open_ssh
    severity: high
    for_each: firewalls
    conditions:
      - path: sourceRanges
        operator: not_contains
        expected: 0.0.0.0/0
"#;

    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("catalogs")).unwrap();
            fs::create_dir_all(dir.path().join("fixtures/compute")).unwrap();
            fs::write(dir.path().join("catalogs/compute.yaml"), FIREWALLS).unwrap();
            fs::write(
                dir.path().join("fixtures/compute/list_firewalls.json"),
                r#"{"items": [
                    {"name": "allow-ssh", "sourceRanges": ["0.0.0.0/0"]},
                    {"name": "internal", "sourceRanges": ["10.0.0.0/8"]}
                ]}"#,
            )
            .unwrap();
            Self { dir }
        }

        fn config(&self) -> RunConfig {
            RunConfig {
                catalog_dir: Some(self.dir.path().join("catalogs")),
                output_dir: Some(self.dir.path().join("out")),
                accounts: vec!["proj-1".to_string()],
                regions: vec!["us-east1".to_string(), "us-west1".to_string()],
                workers: Some(2),
                client: Some(ClientConfig::Fixture {
                    fixture_dir: self.dir.path().join("fixtures"),
                }),
                ..RunConfig::default()
            }
        }
    }

    #[test]
    fn test_scan_with_fixtures_writes_artifacts() {
        let workspace = Workspace::new();
        let outcome = run_scan(&workspace.config(), None).unwrap();

        assert_eq!(outcome.report.units.len(), 2);
        assert_eq!(outcome.report.count_units(UnitStatus::Completed), 2);
        let totals = outcome.report.totals();
        assert_eq!((totals.pass, totals.fail), (2, 2));

        let index: Value = serde_json::from_str(
            &fs::read_to_string(outcome.output_dir.join(INDEX_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(index["units"].as_array().unwrap().len(), 2);
        assert!(outcome
            .output_dir
            .join("checks_proj-1_us-east1_compute.json")
            .is_file());
    }

    #[test]
    fn test_invalid_catalog_aborts_before_scanning() {
        let workspace = Workspace::new();
        fs::write(
            workspace.dir.path().join("catalogs/broken.yaml"),
            "provider: gcp\nservice: sql\ndiscovery:\n  - id: a\n    for_each: a\n    calls: [{ action: list_instances }]\n",
        )
        .unwrap();

        let err = run_scan(&workspace.config(), None).unwrap_err();
        assert_matches!(err, RunError::CatalogsInvalid { failed: 1, total: 2 });
        assert_eq!(err.exit_code(), EXIT_INVALID_INPUT);
        assert!(!workspace.dir.path().join("out").exists());
    }

    #[test]
    fn test_configuration_errors_exit_with_invalid_input() {
        let workspace = Workspace::new();
        let mut config = workspace.config();
        config.accounts.clear();

        let err = run_scan(&config, None).unwrap_err();
        assert_matches!(err, RunError::Config(ConfigError::Invalid { .. }));
        assert_eq!(err.exit_code(), EXIT_INVALID_INPUT);
    }

    #[test]
    fn test_demo_scan() {
        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos");
        let batch = compile_catalogs(&demos.join("catalogs")).unwrap();
        assert!(batch.is_clean(), "{:?}", batch.failed);
        assert_eq!(batch.success_count(), 3);

        let out = TempDir::new().unwrap();
        let config = RunConfig {
            catalog_dir: Some(demos.join("catalogs")),
            output_dir: Some(out.path().to_path_buf()),
            accounts: vec!["prod-1".to_string(), "prod-2".to_string()],
            regions: vec!["us-east1".to_string()],
            client: Some(ClientConfig::Fixture {
                fixture_dir: demos.join("fixtures"),
            }),
            ..RunConfig::default()
        };
        let outcome = run_scan(&config, None).unwrap();
        let report = &outcome.report;

        // compute per region plus the two global services, per account
        assert_eq!(report.units.len(), 6);
        let denied = report
            .unit(&posture_scanner_base::results::ScanUnit::new("prod-2", "us-east1", "compute"))
            .unwrap();
        assert_eq!(denied.status, UnitStatus::Error);
        assert_eq!(report.count_units(UnitStatus::Error), 1);
    }

    #[test]
    fn test_cancelled_scan_still_writes_index() {
        let workspace = Workspace::new();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = run_scan(&workspace.config(), Some(token)).unwrap();
        assert_eq!(outcome.report.count_units(UnitStatus::Cancelled), 2);
        assert!(outcome.output_dir.join(INDEX_FILE).is_file());
    }
}
