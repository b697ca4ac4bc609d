//! # Posture Scanner Base - execution engine
//!
//! Runs compiled catalogs against cloud accounts through a [`VendorClient`]:
//! discovery execution with templated parameters, check evaluation, the
//! account x region x service worker pool and the JSON artifact set.

pub mod check;
pub mod client;
pub mod condition;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod resolver;
pub mod results;
pub mod retry;
pub mod scope;

// Convenience re-exports
pub use client::{VendorClient, VendorRequest};
pub use error::{DiscoveryError, OutputError, PathNotFound, ScanError, VendorError};
pub use orchestrator::{CancellationToken, NameFilter, ScanConfig, ScanOrchestrator};
pub use output::OutputWriter;
pub use results::{ScanReport, ScanSummary, ScanUnit, UnitReport, UnitStatus};

pub mod prelude {
    pub use crate::client::{VendorClient, VendorRequest};
    pub use crate::error::{DiscoveryError, OutputError, ScanError, VendorError};
    pub use crate::orchestrator::{
        build_matrix, default_workers, CancellationToken, NameFilter, PlannedUnit, ScanConfig,
        ScanOrchestrator,
    };
    pub use crate::output::{OutputWriter, INDEX_FILE, SUMMARY_FILE};
    pub use crate::results::{
        CheckResult, CheckStatus, DiscoveryCache, DiscoveryResult, DiscoveryStatus, Item,
        ScanReport, ScanSummary, ScanUnit, StatusCounts, UnitReport, UnitStatus,
    };
    pub use crate::retry::RetryConfig;

    pub use crate::check::run_checks;
    pub use crate::discovery::DiscoveryExecutor;
    pub use crate::dispatch::UnitContext;
}
