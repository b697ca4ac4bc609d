//! Vendor client seam
//!
//! The engine never talks to a cloud API directly. Every remote action is
//! routed through a [`VendorClient`], one method per dispatch strategy, so
//! providers plug in without any per-service branching in the engine.

use crate::error::VendorError;
use serde_json::{Map, Value};

/// Everything a client needs to perform one call
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRequest {
    pub provider: String,
    pub service: String,
    pub account: String,
    pub region: String,
    /// Catalog action name, e.g. `list_firewalls`
    pub action: String,
    /// Resource collection the action targets
    pub resource: String,
    /// Resolved call parameters
    pub params: Map<String, Value>,
    /// Identifier of the single resource for `get` style actions
    pub resource_ref: Option<String>,
}

/// Read-only access to a cloud provider API
pub trait VendorClient: Send + Sync {
    /// Collection listing scoped to the account and region
    fn list(&self, request: &VendorRequest) -> Result<Value, VendorError>;

    /// Collection listing across all regions
    fn aggregated_list(&self, request: &VendorRequest) -> Result<Value, VendorError>;

    /// Fetch one resource by `resource_ref`
    fn get(&self, request: &VendorRequest) -> Result<Value, VendorError>;

    /// Fetch the IAM policy of the resource named by `resource_ref`
    fn get_iam_policy(&self, request: &VendorRequest) -> Result<Value, VendorError>;

    /// Client identifier for logs
    fn client_id(&self) -> &str;
}
