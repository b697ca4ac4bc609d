//! # Posture Catalog
//!
//! Loads rule catalog documents (one per cloud service), compiles them into
//! an executable form and plans the discovery order.
//!
//! Everything that can be decided before touching a cloud account is decided
//! here: template syntax, action shapes, condition operators and the
//! `for_each` dependency graph. A catalog that compiles is safe to hand to the
//! scanner.

pub mod action;
pub mod compiler;
pub mod error;
pub mod loader;
pub mod model;
pub mod operator;
pub mod planner;
pub mod template;

pub use action::ActionDescriptor;
pub use compiler::{
    compile, CompiledCall, CompiledCatalog, CompiledCheck, CompiledCondition, CompiledDiscovery,
    CompiledEmit,
};
pub use error::{CatalogError, DispatchError, PlanValidationError, TemplateSyntaxError};
pub use loader::{load_catalog_dir, load_catalog_file, load_catalog_str, CatalogBatch, CatalogFormat};
pub use model::{
    CallDef, CatalogDocument, CheckDef, ConditionDef, DiscoveryDef, EmitDef, Logic, OnError,
    ServiceScope, Severity,
};
pub use operator::Operator;
pub use planner::{plan, ExecutionPlan};
pub use template::{Expr, ParamValue, PathExpr, PathStep, Segment, Template};
