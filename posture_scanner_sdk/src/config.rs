//! Run configuration
//!
//! A TOML file merged with command line overrides. Everything is validated
//! before the first catalog is loaded.

use posture_scanner_base::error::ScanError;
use posture_scanner_base::orchestrator::{NameFilter, ScanConfig};
use posture_scanner_base::retry::RetryConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_OUTPUT_DIR: &str = "scan_output";
pub const MAX_DEFAULT_WORKERS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("No vendor client configured: set [client] in the config file or pass --fixtures")]
    MissingClient,

    #[error("Environment variable '{var}' holding the API token is not set")]
    MissingToken { var: String },

    #[error("Failed to build vendor client: {reason}")]
    Client { reason: String },

    #[error(transparent)]
    Filter(#[from] ScanError),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Retry settings as written in the config file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Settings for the HTTP client
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestSettings {
    /// Name of the environment variable holding a bearer token
    #[serde(default)]
    pub token_env: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Service name to API base URL
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Which vendor client to run the scan with
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClientConfig {
    /// Replay recorded JSON responses from disk
    Fixture { fixture_dir: PathBuf },
    /// Call a JSON-over-HTTP API
    Rest(RestSettings),
}

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub catalog_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,

    pub accounts: Vec<String>,
    pub include_accounts: Vec<String>,
    pub exclude_accounts: Vec<String>,

    pub regions: Vec<String>,
    pub include_regions: Vec<String>,
    pub exclude_regions: Vec<String>,

    pub services: Vec<String>,
    pub exclude_services: Vec<String>,

    pub workers: Option<usize>,
    pub intra_unit_parallelism: Option<usize>,

    pub retry: RetrySettings,
    pub client: Option<ClientConfig>,
}

/// Values given on the command line; each one replaces the file's value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub catalog_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub accounts: Vec<String>,
    pub regions: Vec<String>,
    pub services: Vec<String>,
    pub workers: Option<usize>,
    pub fixture_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content, path)?;
        log::debug!("Loaded run configuration from {}", path.display());
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(dir) = overrides.catalog_dir {
            self.catalog_dir = Some(dir);
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = Some(dir);
        }
        if !overrides.accounts.is_empty() {
            self.accounts = overrides.accounts;
        }
        if !overrides.regions.is_empty() {
            self.regions = overrides.regions;
        }
        if !overrides.services.is_empty() {
            self.services = overrides.services;
        }
        if let Some(workers) = overrides.workers {
            self.workers = Some(workers);
        }
        if let Some(fixture_dir) = overrides.fixture_dir {
            self.client = Some(ClientConfig::Fixture { fixture_dir });
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog_dir.is_none() {
            return Err(ConfigError::invalid("catalog_dir", "a catalog directory is required"));
        }
        if self.accounts.is_empty() {
            return Err(ConfigError::invalid("accounts", "at least one account is required"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.intra_unit_parallelism == Some(0) {
            return Err(ConfigError::invalid("intra_unit_parallelism", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                format!(
                    "{} exceeds retry.max_delay_ms ({})",
                    self.retry.base_delay_ms, self.retry.max_delay_ms
                ),
            ));
        }
        match &self.client {
            None => Err(ConfigError::MissingClient),
            Some(ClientConfig::Rest(rest)) if rest.endpoints.is_empty() => Err(
                ConfigError::invalid("client.endpoints", "at least one service endpoint is required"),
            ),
            Some(_) => Ok(()),
        }
    }

    pub fn catalog_dir(&self) -> Result<&Path, ConfigError> {
        self.catalog_dir
            .as_deref()
            .ok_or_else(|| ConfigError::invalid("catalog_dir", "a catalog directory is required"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    /// Engine settings; compiles the include/exclude filters
    pub fn scan_config(&self) -> Result<ScanConfig, ConfigError> {
        Ok(ScanConfig {
            accounts: self.accounts.clone(),
            account_filter: NameFilter::new(
                &self.include_accounts,
                &self.exclude_accounts,
                "account",
            )?,
            regions: self.regions.clone(),
            region_filter: NameFilter::new(&self.include_regions, &self.exclude_regions, "region")?,
            services: self.services.clone(),
            exclude_services: self.exclude_services.clone(),
            workers: self
                .workers
                .unwrap_or_else(|| num_cpus::get().min(MAX_DEFAULT_WORKERS)),
            intra_unit_parallelism: self.intra_unit_parallelism.unwrap_or(1),
            retry: RetryConfig::from(&self.retry),
        })
    }
}
