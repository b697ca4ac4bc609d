//! # Discovery Executor
//!
//! Runs a compiled catalog's discoveries for one scan unit, wave by wave.
//!
//! Each discovery moves `pending -> running -> emitted | failed | skipped`.
//! A `for_each` discovery runs one iteration per parent item; roots run once.
//! An iteration extends the unit scope, performs its calls in order (binding
//! each response under `save_as`) and projects the responses into items.
//!
//! Only discoveries of earlier waves are visible under `discoveries.<id>`, so
//! what a template sees does not depend on intra-unit parallelism.

use crate::client::VendorClient;
use crate::dispatch::{Dispatcher, UnitContext};
use crate::error::{DiscoveryError, TemplateResolutionError};
use crate::resolver::{resolve, resolve_fields, resolve_params};
use crate::results::{
    DiscoveryCache, DiscoveryResult, DiscoveryStatus, Item, IterationFailure, StatusReason,
};
use crate::retry::RetryConfig;
use crate::scope::{Scope, ITEM};
use posture_catalog::{CompiledCatalog, CompiledDiscovery, CompiledEmit, OnError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::thread;

/// Field used when a scalar has to become an item
const SCALAR_FIELD: &str = "value";

/// Executes discoveries for one scan unit
pub struct DiscoveryExecutor<'c> {
    dispatcher: Dispatcher<'c>,
    context: UnitContext,
}

impl<'c> DiscoveryExecutor<'c> {
    pub fn new(client: &'c dyn VendorClient, retry: RetryConfig, context: UnitContext) -> Self {
        Self {
            dispatcher: Dispatcher::new(client, retry),
            context,
        }
    }

    pub fn context(&self) -> &UnitContext {
        &self.context
    }

    /// Run every discovery of the catalog in plan order
    ///
    /// With `parallelism > 1`, members of one wave run on scoped threads.
    pub fn run_catalog(&self, catalog: &CompiledCatalog, parallelism: usize) -> DiscoveryCache {
        let mut cache = DiscoveryCache::new();
        let mut blocked: BTreeMap<String, StatusReason> = BTreeMap::new();

        for wave in &catalog.plan.waves {
            let results = if parallelism > 1 && wave.len() > 1 {
                self.run_wave_parallel(catalog, wave, &cache, &blocked, parallelism)
            } else {
                wave.iter()
                    .filter_map(|id| catalog.discovery(id))
                    .map(|d| self.run_one(d, &cache, &blocked))
                    .collect()
            };

            for result in results {
                if result.status == DiscoveryStatus::Failed {
                    for dependent in catalog.dependents_of(&result.discovery_id) {
                        blocked
                            .entry(dependent.to_string())
                            .or_insert_with(|| StatusReason::UpstreamFailed {
                                discovery: result.discovery_id.clone(),
                            });
                    }
                }
                cache.insert(result.discovery_id.clone(), result);
            }
        }

        cache
    }

    fn run_wave_parallel(
        &self,
        catalog: &CompiledCatalog,
        wave: &[String],
        cache: &DiscoveryCache,
        blocked: &BTreeMap<String, StatusReason>,
        parallelism: usize,
    ) -> Vec<DiscoveryResult> {
        let chunk_size = wave.len().div_ceil(parallelism);

        thread::scope(|s| {
            let handles: Vec<_> = wave
                .chunks(chunk_size)
                .map(|chunk| {
                    let handle = s.spawn(move || {
                        chunk
                            .iter()
                            .filter_map(|id| catalog.discovery(id))
                            .map(|d| self.run_one(d, cache, blocked))
                            .collect::<Vec<_>>()
                    });
                    (chunk, handle)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(chunk, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        log::error!("Discovery worker panicked in unit {}", self.unit_label());
                        chunk
                            .iter()
                            .map(|id| {
                                let mut result = DiscoveryResult::new(id.clone());
                                result.status = DiscoveryStatus::Failed;
                                result.reason = Some(StatusReason::IterationFailed {
                                    message: "discovery worker panicked".to_string(),
                                });
                                result
                            })
                            .collect()
                    })
                })
                .collect()
        })
    }

    fn run_one(
        &self,
        discovery: &CompiledDiscovery,
        cache: &DiscoveryCache,
        blocked: &BTreeMap<String, StatusReason>,
    ) -> DiscoveryResult {
        if let Some(reason) = blocked.get(&discovery.id) {
            log::debug!("Skipping discovery '{}': {}", discovery.id, reason);
            return DiscoveryResult::skipped(discovery.id.clone(), reason.clone());
        }
        self.execute(discovery, cache)
    }

    /// Execute one discovery against the completed discoveries in `cache`
    pub fn execute(&self, discovery: &CompiledDiscovery, cache: &DiscoveryCache) -> DiscoveryResult {
        for dependency in &discovery.depends_on {
            if cache
                .get(dependency)
                .is_some_and(|r| r.status == DiscoveryStatus::Failed)
            {
                return DiscoveryResult::skipped(
                    discovery.id.clone(),
                    StatusReason::UpstreamFailed {
                        discovery: dependency.clone(),
                    },
                );
            }
        }

        let parent = match &discovery.for_each {
            Some(parent_id) => match cache.get(parent_id) {
                Some(parent) if parent.is_emitted() && parent.items.is_empty() => {
                    log::debug!(
                        "Discovery '{}' skipped: parent '{}' produced no items",
                        discovery.id,
                        parent_id
                    );
                    return DiscoveryResult::skipped(
                        discovery.id.clone(),
                        StatusReason::NoParentItems {
                            parent: parent_id.clone(),
                        },
                    );
                }
                Some(parent) if parent.is_emitted() => Some(parent),
                _ => {
                    return DiscoveryResult::skipped(
                        discovery.id.clone(),
                        StatusReason::ParentUnavailable {
                            parent: parent_id.clone(),
                        },
                    );
                }
            },
            None => None,
        };

        let mut result = DiscoveryResult::new(discovery.id.clone());
        result.status = DiscoveryStatus::Running;

        let unit_scope = Scope::for_unit(
            &self.context.provider,
            &self.context.service,
            &self.context.account,
            &self.context.region,
        )
        .with_discoveries(cache);

        let iterations: Vec<(Option<&str>, Option<&Item>)> = match parent {
            Some(parent) => parent.iter().map(|(id, item)| (Some(id), Some(item))).collect(),
            None => vec![(None, None)],
        };

        for (parent_id, parent_item) in iterations {
            match self.run_iteration(discovery, &unit_scope, parent_id, parent_item) {
                Ok(items) => {
                    for item in items {
                        result.push_item(item, discovery.id_field.as_deref());
                    }
                }
                Err(error) => match discovery.on_error {
                    OnError::Continue => {
                        log::warn!(
                            "Discovery '{}' iteration for {} failed, continuing: {}",
                            discovery.id,
                            parent_id.unwrap_or("<root>"),
                            error
                        );
                        result.failures.push(IterationFailure {
                            parent_resource_id: parent_id.map(str::to_string),
                            error: error.to_string(),
                        });
                    }
                    OnError::Fail => {
                        log::error!(
                            "Discovery '{}' failed in unit {}: {}",
                            discovery.id,
                            self.unit_label(),
                            error
                        );
                        result.status = DiscoveryStatus::Failed;
                        result.reason = Some(StatusReason::IterationFailed {
                            message: error.to_string(),
                        });
                        return result;
                    }
                },
            }
        }

        result.status = DiscoveryStatus::Emitted;
        log::debug!(
            "Discovery '{}' emitted {} items ({} failed iterations)",
            discovery.id,
            result.items.len(),
            result.failures.len()
        );
        result
    }

    fn run_iteration(
        &self,
        discovery: &CompiledDiscovery,
        unit_scope: &Scope<'_>,
        parent_id: Option<&str>,
        parent_item: Option<&Item>,
    ) -> Result<Vec<Item>, DiscoveryError> {
        let mut scope = unit_scope.child();
        if let Some(item) = parent_item {
            scope = scope.with_item(ITEM, item);
        }

        let mut last_response = Value::Null;
        for call in &discovery.calls {
            let params = resolve_params(&call.params, &scope).map_err(|(param, source)| {
                TemplateResolutionError {
                    action: call.action.to_string(),
                    param,
                    source,
                }
            })?;
            let request = self
                .dispatcher
                .request(&self.context, &call.action, params, parent_id);
            let response = self.dispatcher.dispatch(&call.action, &request)?;
            scope.bind_value(call.save_as.clone(), response.clone());
            last_response = response;
        }

        Ok(match &discovery.emit {
            None => normalize_response(last_response),
            Some(CompiledEmit::Single { fields }) => vec![resolve_fields(fields, &scope)],
            Some(CompiledEmit::List {
                items_for,
                bind_as,
                fields,
            }) => {
                let collection = resolve(items_for, &scope).unwrap_or_else(|e| {
                    log::debug!(
                        "items_for of discovery '{}' did not resolve, emitting nothing: {}",
                        discovery.id,
                        e
                    );
                    Value::Null
                });
                elements(collection)
                    .into_iter()
                    .map(|element| {
                        if fields.is_empty() {
                            into_item(element)
                        } else {
                            let entry_scope = scope.child().with_value(bind_as.clone(), element);
                            resolve_fields(fields, &entry_scope)
                        }
                    })
                    .collect()
            }
        })
    }

    fn unit_label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.context.account, self.context.region, self.context.service
        )
    }
}

/// Default projection of a response without `emit`
///
/// An array yields one item per element, an object holding an `items` array
/// yields one item per element, any other object one item, null nothing.
pub fn normalize_response(response: Value) -> Vec<Item> {
    match response {
        Value::Object(mut map) => {
            if !matches!(map.get("items"), Some(Value::Array(_))) {
                return vec![map];
            }
            match map.remove("items") {
                Some(Value::Array(items)) => items.into_iter().map(into_item).collect(),
                _ => Vec::new(),
            }
        }
        other => elements(other).into_iter().map(into_item).collect(),
    }
}

fn elements(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn into_item(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        other => {
            let mut item = Item::new();
            item.insert(SCALAR_FIELD.to_string(), other);
            item
        }
    }
}
