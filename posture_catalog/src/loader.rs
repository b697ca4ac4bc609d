//! # Catalog Loading
//!
//! Reads catalog documents from strings, files or whole directories. Directory
//! loading is deterministic (sorted paths) and collects per-file failures
//! instead of stopping at the first one, so `validate` can report everything
//! that is wrong in a single pass.

use crate::compiler::{compile, CompiledCatalog};
use crate::error::CatalogError;
use crate::model::CatalogDocument;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Catalog file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Yaml,
    Json,
}

impl CatalogFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Some(CatalogFormat::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Some(CatalogFormat::Json)
        } else {
            None
        }
    }
}

/// Result of loading a catalog directory
#[derive(Debug, Default)]
pub struct CatalogBatch {
    pub loaded: Vec<CompiledCatalog>,
    pub failed: Vec<(PathBuf, CatalogError)>,
    pub files_discovered: usize,
    pub duration: Duration,
}

impl CatalogBatch {
    /// True when every discovered file compiled
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// Find a loaded catalog by service name
    pub fn service(&self, name: &str) -> Option<&CompiledCatalog> {
        self.loaded.iter().find(|c| c.service == name)
    }

    pub fn summary(&self) -> String {
        format!(
            "Catalog loading completed: {} files discovered, {} compiled, {} failed, {:.2}s total",
            self.files_discovered,
            self.success_count(),
            self.failure_count(),
            self.duration.as_secs_f64()
        )
    }
}

/// Parse and compile a catalog from text
pub fn load_catalog_str(
    content: &str,
    format: CatalogFormat,
    origin: &str,
) -> Result<CompiledCatalog, CatalogError> {
    let document: CatalogDocument = match format {
        CatalogFormat::Yaml => serde_yaml_ng::from_str(content).map_err(|e| CatalogError::Parse {
            origin: origin.to_string(),
            reason: e.to_string(),
        })?,
        CatalogFormat::Json => serde_json::from_str(content).map_err(|e| CatalogError::Parse {
            origin: origin.to_string(),
            reason: e.to_string(),
        })?,
    };
    compile(&document)
}

/// Load a single catalog file
pub fn load_catalog_file(path: &Path) -> Result<CompiledCatalog, CatalogError> {
    let format = CatalogFormat::from_path(path).ok_or_else(|| CatalogError::Parse {
        origin: path.display().to_string(),
        reason: "unsupported extension, expected .yaml, .yml or .json".to_string(),
    })?;

    let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut catalog = load_catalog_str(&content, format, &path.display().to_string())?;
    catalog.source = Some(path.to_path_buf());
    Ok(catalog)
}

/// Load every catalog under a directory
///
/// Fails only when the directory itself is missing; per-file problems are
/// collected in [`CatalogBatch::failed`]. A service defined twice keeps the
/// first file (in path order) and records the second as a failure.
pub fn load_catalog_dir(dir: &Path) -> Result<CatalogBatch, CatalogError> {
    let start = Instant::now();

    if !dir.is_dir() {
        return Err(CatalogError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| CatalogError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
        })?;
        if entry.file_type().is_file() && CatalogFormat::from_path(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }
    files.sort();

    log::info!(
        "Discovered {} catalog files in {}",
        files.len(),
        dir.display()
    );

    let mut batch = CatalogBatch {
        files_discovered: files.len(),
        ..CatalogBatch::default()
    };
    let mut services = HashSet::new();

    for path in files {
        match load_catalog_file(&path) {
            Ok(catalog) => {
                if !services.insert(catalog.service.clone()) {
                    log::error!(
                        "Duplicate service '{}' in {}",
                        catalog.service,
                        path.display()
                    );
                    batch.failed.push((
                        path,
                        CatalogError::DuplicateService {
                            service: catalog.service,
                        },
                    ));
                    continue;
                }
                log::debug!(
                    "Loaded catalog '{}' from {}",
                    catalog.service,
                    path.display()
                );
                batch.loaded.push(catalog);
            }
            Err(error) => {
                log::error!("Catalog {} rejected: {}", path.display(), error);
                batch.failed.push((path, error));
            }
        }
    }

    batch.duration = start.elapsed();
    log::info!("{}", batch.summary());
    Ok(batch)
}
