//! # Artifact Writer
//!
//! Writes the artifact set of a scan under `<output_dir>/<scan_id>/`:
//! `index.json`, `summary.json` and, per executed unit, a checks file and an
//! inventory file. File name components are sanitised and de-duplicated so
//! two units never share a file.

use crate::error::OutputError;
use crate::results::{
    CheckResult, DiscoveryResult, ScanIndex, ScanReport, StatusCounts, UnitIndexEntry,
    UnitReport, UnitStatus,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.json";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Serialize)]
struct ChecksArtifact<'a> {
    scan_id: &'a str,
    account: &'a str,
    region: &'a str,
    service: &'a str,
    provider: &'a str,
    status: UnitStatus,
    counts: StatusCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    results: &'a [CheckResult],
}

#[derive(Serialize)]
struct InventoryArtifact<'a> {
    scan_id: &'a str,
    account: &'a str,
    region: &'a str,
    service: &'a str,
    discoveries: &'a [DiscoveryResult],
}

/// Writes scan reports to disk
#[derive(Debug, Clone)]
pub struct OutputWriter {
    output_dir: PathBuf,
}

impl OutputWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory holding the artifacts of one scan
    pub fn scan_dir(&self, scan_id: &str) -> PathBuf {
        self.output_dir.join(scan_id)
    }

    /// Write the full artifact set, returning the scan directory
    pub fn write(&self, report: &ScanReport) -> Result<PathBuf, OutputError> {
        let dir = self.scan_dir(&report.scan_id);
        fs::create_dir_all(&dir).map_err(|source| OutputError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let mut used_stems = HashSet::new();
        let mut entries = Vec::with_capacity(report.units.len());

        for unit in &report.units {
            let (checks_file, inventory_file) = if unit.status == UnitStatus::Cancelled {
                (None, None)
            } else {
                let stem = unique_stem(&mut used_stems, unit.unit.file_stem());
                let checks_file = format!("checks_{}.json", stem);
                let inventory_file = format!("inventory_{}.json", stem);
                self.write_unit(&dir, &report.scan_id, unit, &checks_file, &inventory_file)?;
                (Some(checks_file), Some(inventory_file))
            };

            entries.push(UnitIndexEntry {
                account: unit.unit.account.clone(),
                region: unit.unit.region.clone(),
                service: unit.unit.service.clone(),
                provider: unit.provider.clone(),
                status: unit.status,
                checks_file,
                inventory_file,
                counts: unit.counts(),
                items_discovered: unit.discoveries.iter().map(|d| d.items.len()).sum(),
                duration_ms: unit.duration_ms(),
                error: unit.error.clone(),
            });
        }

        let index = ScanIndex {
            scan_id: report.scan_id.clone(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            duration_ms: report.duration_ms(),
            host: report.host.clone(),
            units: entries,
            totals: report.totals(),
        };
        write_json(&dir.join(INDEX_FILE), INDEX_FILE, &index)?;
        write_json(&dir.join(SUMMARY_FILE), SUMMARY_FILE, &report.summary())?;

        log::info!(
            "Wrote {} unit artifacts to {}",
            report.units.len() - report.count_units(UnitStatus::Cancelled),
            dir.display()
        );
        Ok(dir)
    }

    fn write_unit(
        &self,
        dir: &Path,
        scan_id: &str,
        unit: &UnitReport,
        checks_file: &str,
        inventory_file: &str,
    ) -> Result<(), OutputError> {
        let checks = ChecksArtifact {
            scan_id,
            account: &unit.unit.account,
            region: &unit.unit.region,
            service: &unit.unit.service,
            provider: &unit.provider,
            status: unit.status,
            counts: unit.counts(),
            error: unit.error.as_deref(),
            results: &unit.checks,
        };
        write_json(&dir.join(checks_file), checks_file, &checks)?;

        let inventory = InventoryArtifact {
            scan_id,
            account: &unit.unit.account,
            region: &unit.unit.region,
            service: &unit.unit.service,
            discoveries: &unit.discoveries,
        };
        write_json(&dir.join(inventory_file), inventory_file, &inventory)
    }
}

fn unique_stem(used: &mut HashSet<String>, stem: String) -> String {
    if used.insert(stem.clone()) {
        return stem;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn write_json<T: Serialize>(path: &Path, artifact: &str, value: &T) -> Result<(), OutputError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| OutputError::Serialize {
        artifact: artifact.to_string(),
        source,
    })?;
    fs::write(path, bytes).map_err(|source| OutputError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{HostContext, ScanUnit};
    use chrono::Utc;
    use serde_json::Value;
    use tempfile::TempDir;

    fn unit_report(account: &str, region: &str, status: UnitStatus) -> UnitReport {
        let mut report = UnitReport::cancelled(ScanUnit::new(account, region, "compute"), "gcp");
        report.status = status;
        report
    }

    fn scan(units: Vec<UnitReport>) -> ScanReport {
        let now = Utc::now();
        ScanReport {
            scan_id: "scan-1".to_string(),
            started_at: now,
            finished_at: now,
            host: HostContext::from_system(),
            units,
        }
    }

    #[test]
    fn test_writes_index_summary_and_unit_files() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(dir.path());
        let report = scan(vec![
            unit_report("proj-1", "us-east1", UnitStatus::Completed),
            unit_report("proj-2", "us-east1", UnitStatus::Cancelled),
        ]);

        let scan_dir = writer.write(&report).unwrap();
        assert!(scan_dir.join(INDEX_FILE).is_file());
        assert!(scan_dir.join(SUMMARY_FILE).is_file());
        assert!(scan_dir.join("checks_proj-1_us-east1_compute.json").is_file());
        assert!(scan_dir.join("inventory_proj-1_us-east1_compute.json").is_file());

        let index: Value =
            serde_json::from_str(&fs::read_to_string(scan_dir.join(INDEX_FILE)).unwrap()).unwrap();
        assert_eq!(index["units"][1]["status"], "cancelled");
        assert!(index["units"][1]["checks_file"].is_null());
    }

    #[test]
    fn test_colliding_names_are_disambiguated() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(dir.path());
        let report = scan(vec![
            unit_report("org/a", "r", UnitStatus::Completed),
            unit_report("org:a", "r", UnitStatus::Completed),
        ]);

        let scan_dir = writer.write(&report).unwrap();
        assert!(scan_dir.join("checks_org_a_r_compute.json").is_file());
        assert!(scan_dir.join("checks_org_a_r_compute-2.json").is_file());
    }
}
