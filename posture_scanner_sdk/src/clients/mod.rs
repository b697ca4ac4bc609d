//! Concrete vendor clients

pub mod fixture;
pub mod rest;

pub use fixture::FixtureClient;
pub use rest::RestClient;

use crate::config::{ClientConfig, ConfigError};
use posture_scanner_base::client::VendorClient;
use std::sync::Arc;
use std::time::Duration;

/// Build the client named by the run configuration
pub fn build_client(config: &ClientConfig) -> Result<Arc<dyn VendorClient>, ConfigError> {
    match config {
        ClientConfig::Fixture { fixture_dir } => {
            let client = FixtureClient::new(fixture_dir).map_err(|e| ConfigError::Client {
                reason: e.to_string(),
            })?;
            log::info!(
                "Using fixture client with {} recorded responses from {}",
                client.fixture_count(),
                fixture_dir.display()
            );
            Ok(Arc::new(client))
        }
        ClientConfig::Rest(settings) => {
            let token = match &settings.token_env {
                Some(var) => Some(
                    std::env::var(var).map_err(|_| ConfigError::MissingToken { var: var.clone() })?,
                ),
                None => None,
            };
            let client = RestClient::new(
                settings.endpoints.clone(),
                token,
                Duration::from_secs(settings.timeout_secs),
            )
            .map_err(|e| ConfigError::Client {
                reason: e.to_string(),
            })?;
            log::info!(
                "Using REST client for {} services",
                settings.endpoints.len()
            );
            Ok(Arc::new(client))
        }
    }
}
