//! # Catalog Compiler
//!
//! Turns a [`CatalogDocument`] into a [`CompiledCatalog`]: action names become
//! typed descriptors, templates become ASTs, operators are parsed and the
//! discovery plan is validated. A catalog that fails any of these steps is
//! rejected as a whole.

use crate::action::ActionDescriptor;
use crate::error::{CatalogError, TemplateSyntaxError};
use crate::model::{CatalogDocument, CheckDef, DiscoveryDef, EmitDef, Logic, OnError, ServiceScope, Severity};
use crate::operator::Operator;
use crate::planner::{self, ExecutionPlan};
use crate::template::{ParamValue, PathExpr, Template};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Default scope name for a call response without `save_as`
pub const DEFAULT_SAVE_AS: &str = "response";

/// Default loop variable for list emits without `as`
pub const DEFAULT_EMIT_VAR: &str = "entry";

// ============================================================================
// Compiled types
// ============================================================================

/// A catalog ready for execution
#[derive(Debug, Clone)]
pub struct CompiledCatalog {
    pub provider: String,
    pub service: String,
    pub scope: ServiceScope,
    pub version: Option<String>,
    pub source: Option<PathBuf>,
    pub discoveries: Vec<CompiledDiscovery>,
    pub checks: Vec<CompiledCheck>,
    pub plan: ExecutionPlan,
    index: HashMap<String, usize>,
}

impl CompiledCatalog {
    /// Look up a discovery by id
    pub fn discovery(&self, id: &str) -> Option<&CompiledDiscovery> {
        self.index.get(id).map(|&i| &self.discoveries[i])
    }

    /// Discoveries that depend on `id`, directly or transitively
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        let mut found: Vec<&str> = Vec::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for discovery in &self.discoveries {
                if discovery.waits_on(current) && !found.contains(&discovery.id.as_str()) {
                    found.push(&discovery.id);
                    frontier.push(&discovery.id);
                }
            }
        }
        found
    }

    pub fn is_global(&self) -> bool {
        self.scope == ServiceScope::Global
    }
}

/// A discovery step with parsed calls and emit
#[derive(Debug, Clone)]
pub struct CompiledDiscovery {
    pub id: String,
    pub calls: Vec<CompiledCall>,
    pub for_each: Option<String>,
    pub depends_on: Vec<String>,
    pub emit: Option<CompiledEmit>,
    /// Effective policy: explicit, else `continue` under `for_each` and `fail` for roots
    pub on_error: OnError,
    pub id_field: Option<String>,
}

impl CompiledDiscovery {
    /// Check whether this discovery waits on `id`
    pub fn waits_on(&self, id: &str) -> bool {
        self.for_each.as_deref() == Some(id) || self.depends_on.iter().any(|d| d == id)
    }
}

/// A vendor call with its action parsed and params compiled
#[derive(Debug, Clone)]
pub struct CompiledCall {
    pub action: ActionDescriptor,
    pub params: Vec<(String, ParamValue)>,
    pub save_as: String,
}

/// Compiled emit projection
#[derive(Debug, Clone)]
pub enum CompiledEmit {
    /// One item per iteration
    Single { fields: Vec<(String, ParamValue)> },
    /// One item per element of `items_for`, bound under `bind_as`
    List {
        items_for: Template,
        bind_as: String,
        fields: Vec<(String, ParamValue)>,
    },
}

/// A check with parsed condition paths and operators
#[derive(Debug, Clone)]
pub struct CompiledCheck {
    pub check_id: String,
    pub title: String,
    pub severity: Severity,
    pub for_each: String,
    pub logic: Logic,
    pub conditions: Vec<CompiledCondition>,
}

#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub path: PathExpr,
    pub operator: Operator,
    pub expected: Value,
}

// ============================================================================
// Compilation
// ============================================================================

/// Compile a catalog document
pub fn compile(document: &CatalogDocument) -> Result<CompiledCatalog, CatalogError> {
    let service = document.service.trim().to_string();
    if service.is_empty() {
        return Err(CatalogError::Invalid {
            service: "<unnamed>".to_string(),
            reason: "service name is empty".to_string(),
        });
    }
    if document.provider.trim().is_empty() {
        return Err(invalid(&service, "provider is empty"));
    }

    // Plan first: cycles and dangling references abort before anything else
    let plan = planner::plan(&document.discovery).map_err(|source| CatalogError::Plan {
        service: service.clone(),
        source,
    })?;

    let mut discoveries = Vec::with_capacity(document.discovery.len());
    let mut index = HashMap::new();
    for def in &document.discovery {
        let compiled = compile_discovery(&service, def)?;
        index.insert(compiled.id.clone(), discoveries.len());
        discoveries.push(compiled);
    }

    let mut check_ids = HashSet::new();
    let mut checks = Vec::with_capacity(document.checks.len());
    for def in &document.checks {
        if !check_ids.insert(def.check_id.as_str()) {
            return Err(invalid(
                &service,
                format!("duplicate check id '{}'", def.check_id),
            ));
        }
        if !index.contains_key(&def.for_each) {
            return Err(invalid(
                &service,
                format!(
                    "check '{}' references unknown discovery '{}'",
                    def.check_id, def.for_each
                ),
            ));
        }
        checks.push(compile_check(&service, def)?);
    }

    log::debug!(
        "Compiled catalog '{}/{}': {} discoveries, {} checks",
        document.provider,
        service,
        discoveries.len(),
        checks.len()
    );

    Ok(CompiledCatalog {
        provider: document.provider.trim().to_string(),
        service,
        scope: document.scope,
        version: document.version.clone(),
        source: None,
        discoveries,
        checks,
        plan,
        index,
    })
}

fn compile_discovery(service: &str, def: &DiscoveryDef) -> Result<CompiledDiscovery, CatalogError> {
    if def.id.trim().is_empty() {
        return Err(invalid(service, "discovery with empty id"));
    }
    if def.calls.is_empty() {
        return Err(invalid(
            service,
            format!("discovery '{}' declares no calls", def.id),
        ));
    }

    let mut calls = Vec::with_capacity(def.calls.len());
    for (position, call) in def.calls.iter().enumerate() {
        let action =
            ActionDescriptor::parse(&call.action).map_err(|source| CatalogError::Dispatch {
                service: service.to_string(),
                discovery_id: def.id.clone(),
                source,
            })?;

        let params = ParamValue::compile_map(&call.params).map_err(|source| {
            template_error(
                service,
                format!("params of call {} in discovery '{}'", position, def.id),
                source,
            )
        })?;

        let save_as = call
            .save_as
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SAVE_AS)
            .to_string();

        calls.push(CompiledCall {
            action,
            params,
            save_as,
        });
    }

    let emit = def
        .emit
        .as_ref()
        .map(|emit| compile_emit(service, &def.id, emit))
        .transpose()?;

    let on_error = def.on_error.unwrap_or(if def.for_each.is_some() {
        OnError::Continue
    } else {
        OnError::Fail
    });

    Ok(CompiledDiscovery {
        id: def.id.clone(),
        calls,
        for_each: def.for_each.clone(),
        depends_on: def.depends_on.clone(),
        emit,
        on_error,
        id_field: def.id_field.clone(),
    })
}

fn compile_emit(
    service: &str,
    discovery_id: &str,
    emit: &EmitDef,
) -> Result<CompiledEmit, CatalogError> {
    let location = format!("emit of discovery '{}'", discovery_id);
    let fields = ParamValue::compile_map(&emit.item)
        .map_err(|source| template_error(service, location.clone(), source))?;

    match &emit.items_for {
        Some(items_for) => {
            let items_for = Template::parse(items_for)
                .map_err(|source| template_error(service, location.clone(), source))?;
            let bind_as = emit
                .bind_as
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_EMIT_VAR)
                .to_string();
            Ok(CompiledEmit::List {
                items_for,
                bind_as,
                fields,
            })
        }
        None => {
            if fields.is_empty() {
                return Err(invalid(
                    service,
                    format!("{} has neither items_for nor item fields", location),
                ));
            }
            Ok(CompiledEmit::Single { fields })
        }
    }
}

fn compile_check(service: &str, def: &CheckDef) -> Result<CompiledCheck, CatalogError> {
    if def.conditions.is_empty() {
        return Err(invalid(
            service,
            format!("check '{}' declares no conditions", def.check_id),
        ));
    }

    let mut conditions = Vec::with_capacity(def.conditions.len());
    for condition in &def.conditions {
        let operator: Operator =
            condition
                .operator
                .parse()
                .map_err(|_| CatalogError::UnknownOperator {
                    check_id: def.check_id.clone(),
                    operator: condition.operator.clone(),
                })?;
        let path = PathExpr::parse(&condition.path).map_err(|source| {
            template_error(service, format!("check '{}'", def.check_id), source)
        })?;
        conditions.push(CompiledCondition {
            path,
            operator,
            expected: condition.expected.clone(),
        });
    }

    Ok(CompiledCheck {
        check_id: def.check_id.clone(),
        title: if def.title.is_empty() {
            def.check_id.clone()
        } else {
            def.title.clone()
        },
        severity: def.severity,
        for_each: def.for_each.clone(),
        logic: def.logic,
        conditions,
    })
}

fn invalid(service: &str, reason: impl Into<String>) -> CatalogError {
    CatalogError::Invalid {
        service: service.to_string(),
        reason: reason.into(),
    }
}

fn template_error(service: &str, location: String, source: TemplateSyntaxError) -> CatalogError {
    CatalogError::Template {
        service: service.to_string(),
        location,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse(yaml: &str) -> CatalogDocument {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    const FIREWALLS: &str = r#"
provider: gcp
service: compute
scope: global
discovery:
  - id: firewalls
    calls:
      - action: list_firewalls
        params:
          project: "{{ account }}"
    emit:
      items_for: "{{ response.items }}"
      as: fw
      item:
        name: "{{ fw.name }}"
        ranges: "{{ fw.sourceRanges }}"
  - id: firewall_detail
    for_each: firewalls
    calls:
      - action: get_firewalls
        params:
          resource: "{{ item.name }}"
        save_as: detail
checks:
  - check_id: compute.firewall.no_world_ssh
    title: Firewalls must not allow 0.0.0.0/0
    severity: high
    for_each: firewalls
    conditions:
      - path: ranges
        operator: not_contains
        expected: 0.0.0.0/0
"#;

    #[test]
    fn test_compile_catalog() {
        let catalog = compile(&parse(FIREWALLS)).unwrap();
        assert!(catalog.is_global());
        assert_eq!(catalog.plan.order, vec!["firewalls", "firewall_detail"]);

        let root = catalog.discovery("firewalls").unwrap();
        assert_eq!(root.on_error, OnError::Fail);
        assert_eq!(root.calls[0].save_as, DEFAULT_SAVE_AS);
        assert_matches!(root.emit, Some(CompiledEmit::List { ref bind_as, .. }) if bind_as == "fw");

        let child = catalog.discovery("firewall_detail").unwrap();
        assert_eq!(child.on_error, OnError::Continue);
        assert_eq!(child.calls[0].save_as, "detail");

        assert_eq!(catalog.checks[0].conditions[0].operator, Operator::NotContains);
        assert_eq!(catalog.dependents_of("firewalls"), vec!["firewall_detail"]);
    }

    #[test]
    fn test_unknown_action_rejected_at_load() {
        let doc = parse(
            r#"
provider: gcp
service: compute
discovery:
  - id: x
    calls:
      - action: describe_things
"#,
        );
        let err = compile(&doc).unwrap_err();
        assert!(err.is_dispatch_error());
    }

    #[test]
    fn test_cycle_rejected_at_load() {
        let doc = parse(
            r#"
provider: gcp
service: compute
discovery:
  - id: a
    for_each: b
    calls: [{ action: list_a }]
  - id: b
    for_each: a
    calls: [{ action: list_b }]
"#,
        );
        let err = compile(&doc).unwrap_err();
        assert!(err.is_plan_error());
    }

    #[test]
    fn test_check_unknown_discovery() {
        let doc = parse(
            r#"
provider: gcp
service: compute
discovery:
  - id: a
    calls: [{ action: list_a }]
checks:
  - check_id: c1
    for_each: missing
    conditions: [{ path: x, operator: exists }]
"#,
        );
        assert_matches!(compile(&doc), Err(CatalogError::Invalid { .. }));
    }

    #[test]
    fn test_unknown_operator() {
        let doc = parse(
            r#"
provider: gcp
service: compute
discovery:
  - id: a
    calls: [{ action: list_a }]
checks:
  - check_id: c1
    for_each: a
    conditions: [{ path: x, operator: resembles }]
"#,
        );
        assert_matches!(
            compile(&doc),
            Err(CatalogError::UnknownOperator { operator, .. }) if operator == "resembles"
        );
    }

    #[test]
    fn test_bad_template_rejected() {
        let doc = parse(
            r#"
provider: gcp
service: compute
discovery:
  - id: a
    calls:
      - action: list_a
        params:
          project: "{{ account"
"#,
        );
        assert_matches!(compile(&doc), Err(CatalogError::Template { .. }));
    }

    #[test]
    fn test_explicit_on_error_wins() {
        let doc = parse(
            r#"
provider: gcp
service: compute
discovery:
  - id: a
    calls: [{ action: list_a }]
  - id: b
    for_each: a
    on_error: fail
    calls: [{ action: get_a }]
"#,
        );
        let catalog = compile(&doc).unwrap();
        assert_eq!(catalog.discovery("b").unwrap().on_error, OnError::Fail);
    }
}
