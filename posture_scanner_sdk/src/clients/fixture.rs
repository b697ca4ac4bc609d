//! Fixture client: replays recorded vendor responses from a directory tree.
//!
//! Lookup order for a request, first hit wins:
//!
//! ```text
//! <root>/<account>/<region>/<service>/<action>__<ref>.json
//! <root>/<account>/<region>/<service>/<action>.json
//! <root>/<service>/<action>__<ref>.json
//! <root>/<service>/<action>.json
//! ```
//!
//! `<ref>` is the sanitised resource reference of `get` style requests. A
//! fixture whose top-level object has a `vendor_error` key replays an error
//! instead of a response.

use posture_scanner_base::client::{VendorClient, VendorRequest};
use posture_scanner_base::error::VendorError;
use posture_scanner_base::results::sanitize_component;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const ERROR_KEY: &str = "vendor_error";

#[derive(Debug, Deserialize)]
struct RecordedError {
    #[serde(default)]
    transient: bool,
    message: String,
}

/// Replays `*.json` fixtures indexed at construction
#[derive(Debug, Clone)]
pub struct FixtureClient {
    root: PathBuf,
    index: HashMap<String, PathBuf>,
    id: String,
}

impl FixtureClient {
    /// Index every `*.json` file below `root`
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("fixture directory '{}' does not exist", root.display()),
            ));
        }

        let mut index = HashMap::new();
        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = entry.map_err(std::io::Error::other)?;
            let path = entry.path();
            if !entry.file_type().is_file() || !matches!(path.extension(), Some(ext) if ext == "json") {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(&root) {
                index.insert(index_key(relative), path.to_path_buf());
            }
        }

        log::debug!(
            "Indexed {} fixtures under {}",
            index.len(),
            root.display()
        );
        Ok(Self {
            id: format!("fixture:{}", root.display()),
            root,
            index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fixture_count(&self) -> usize {
        self.index.len()
    }

    /// Candidate index keys for a request, most specific first
    fn candidates(request: &VendorRequest) -> Vec<String> {
        let unit_dir = format!(
            "{}/{}/{}",
            sanitize_component(&request.account),
            sanitize_component(&request.region),
            sanitize_component(&request.service)
        );
        let service_dir = sanitize_component(&request.service);
        let names: Vec<String> = match &request.resource_ref {
            Some(reference) => vec![
                format!("{}__{}.json", request.action, sanitize_component(reference)),
                format!("{}.json", request.action),
            ],
            None => vec![format!("{}.json", request.action)],
        };

        [unit_dir, service_dir]
            .iter()
            .flat_map(|dir| names.iter().map(move |name| format!("{}/{}", dir, name)))
            .collect()
    }

    fn replay(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        let candidates = Self::candidates(request);
        let path = candidates
            .iter()
            .find_map(|key| self.index.get(key))
            .ok_or_else(|| {
                VendorError::fatal(
                    &request.action,
                    format!("no fixture found (tried {})", candidates.join(", ")),
                )
            })?;

        log::debug!("Replaying {} from {}", request.action, path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            VendorError::fatal(&request.action, format!("{}: {}", path.display(), e))
        })?;
        let value: Value = serde_json::from_str(&content).map_err(|e| {
            VendorError::fatal(&request.action, format!("{}: {}", path.display(), e))
        })?;

        match value.get(ERROR_KEY) {
            Some(recorded) => {
                let recorded: RecordedError =
                    serde_json::from_value(recorded.clone()).map_err(|e| {
                        VendorError::fatal(&request.action, format!("{}: {}", path.display(), e))
                    })?;
                Err(if recorded.transient {
                    VendorError::transient(&request.action, recorded.message)
                } else {
                    VendorError::fatal(&request.action, recorded.message)
                })
            }
            None => Ok(value),
        }
    }
}

/// Forward-slash relative path, independent of the platform separator
fn index_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl VendorClient for FixtureClient {
    fn list(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        self.replay(request)
    }

    fn aggregated_list(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        self.replay(request)
    }

    fn get(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        self.replay(request)
    }

    fn get_iam_policy(&self, request: &VendorRequest) -> Result<Value, VendorError> {
        self.replay(request)
    }

    fn client_id(&self) -> &str {
        &self.id
    }
}
