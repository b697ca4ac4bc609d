//! # Template Resolver
//!
//! Evaluates compiled templates and paths against a [`Scope`].
//!
//! A template that is exactly one `{{ expr }}` marker resolves to the native
//! value found (number, bool, list, map or null). Any literal text around a
//! marker makes the result a string: null renders empty, strings render raw
//! and other values render as compact JSON.
//!
//! `name[]` applies the rest of the path to every element of the collection.
//! Elements where the rest does not resolve are dropped and array results
//! are concatenated, so `response.items[].sourceRanges` yields one flat list.

use crate::error::PathNotFound;
use crate::results::{DiscoveryCache, Item};
use crate::scope::{Binding, Scope};
use posture_catalog::{Expr, ParamValue, PathExpr, PathStep, Segment, Template};
use serde_json::{Map, Value};

/// Borrowed position while walking a path
#[derive(Clone, Copy)]
enum Node<'a> {
    Value(&'a Value),
    Item(&'a Item),
    Items(&'a [Item]),
    Discoveries(&'a DiscoveryCache),
}

impl<'a> Node<'a> {
    fn from_binding(binding: &'a Binding<'a>) -> Self {
        match binding {
            Binding::Value(value) => Node::Value(value),
            Binding::Item(item) => Node::Item(*item),
            Binding::Items(items) => Node::Items(*items),
            Binding::Discoveries(cache) => Node::Discoveries(*cache),
        }
    }

    fn key(self, key: &str) -> Option<Node<'a>> {
        match self {
            Node::Value(Value::Object(map)) => map.get(key).map(Node::Value),
            Node::Item(item) => item.get(key).map(Node::Value),
            Node::Discoveries(cache) => cache.get(key).map(|r| Node::Items(r.items.as_slice())),
            _ => None,
        }
    }

    /// Positional step; on a mapping the digits are a key
    fn index(self, index: usize) -> Option<Node<'a>> {
        match self {
            Node::Value(Value::Array(items)) => items.get(index).map(Node::Value),
            Node::Items(items) => items.get(index).map(Node::Item),
            Node::Value(Value::Object(_)) | Node::Item(_) | Node::Discoveries(_) => {
                self.key(&index.to_string())
            }
            _ => None,
        }
    }

    fn elements(self) -> Option<Vec<Node<'a>>> {
        match self {
            Node::Value(Value::Array(items)) => Some(items.iter().map(Node::Value).collect()),
            Node::Items(items) => Some(items.iter().map(Node::Item).collect()),
            _ => None,
        }
    }

    fn to_value(self) -> Value {
        match self {
            Node::Value(value) => value.clone(),
            Node::Item(item) => Value::Object(item.clone()),
            Node::Items(items) => Value::Array(items.iter().cloned().map(Value::Object).collect()),
            Node::Discoveries(cache) => Value::Object(
                cache
                    .iter()
                    .map(|(id, result)| {
                        (
                            id.clone(),
                            Value::Array(result.items.iter().cloned().map(Value::Object).collect()),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

fn walk(node: Node<'_>, steps: &[PathStep]) -> Option<Value> {
    let Some((step, rest)) = steps.split_first() else {
        return Some(node.to_value());
    };

    match step {
        PathStep::Key(key) => walk(node.key(key)?, rest),
        PathStep::Index(index) => walk(node.index(*index)?, rest),
        PathStep::Flatten => {
            let mut out = Vec::new();
            for element in node.elements()? {
                match walk(element, rest) {
                    Some(Value::Array(values)) => out.extend(values),
                    Some(value) => out.push(value),
                    None => {}
                }
            }
            Some(Value::Array(out))
        }
    }
}

/// Resolve a dotted path against the scope
pub fn resolve_path(path: &PathExpr, scope: &Scope<'_>) -> Result<Value, PathNotFound> {
    let not_found = || PathNotFound::new(path.as_str());

    let (root, rest) = match path.steps().split_first() {
        Some((PathStep::Key(root), rest)) => (root, rest),
        _ => return Err(not_found()),
    };

    let binding = scope.lookup(root).ok_or_else(not_found)?;
    walk(Node::from_binding(binding), rest).ok_or_else(not_found)
}

/// Resolve a path relative to a single item
///
/// Returns `None` when the path does not resolve.
pub fn resolve_in_item(path: &PathExpr, item: &Item) -> Option<Value> {
    walk(Node::Item(item), path.steps())
}

fn resolve_expr(expr: &Expr, scope: &Scope<'_>) -> Result<Value, PathNotFound> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => resolve_path(path, scope),
    }
}

/// Resolve a template, applying the typing rule
pub fn resolve(template: &Template, scope: &Scope<'_>) -> Result<Value, PathNotFound> {
    if let Some(expr) = template.single_expression() {
        return resolve_expr(expr, scope);
    }

    let mut out = String::new();
    for segment in template.segments() {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Expr(expr) => render_into(&mut out, &resolve_expr(expr, scope)?),
        }
    }
    Ok(Value::String(out))
}

fn render_into(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

/// Resolve a compiled parameter tree
pub fn resolve_param(param: &ParamValue, scope: &Scope<'_>) -> Result<Value, PathNotFound> {
    match param {
        ParamValue::Template(template) => resolve(template, scope),
        ParamValue::Literal(value) => Ok(value.clone()),
        ParamValue::List(items) => items
            .iter()
            .map(|p| resolve_param(p, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        ParamValue::Map(entries) => entries
            .iter()
            .map(|(k, p)| resolve_param(p, scope).map(|v| (k.clone(), v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
    }
}

/// Resolve every named parameter; the first unresolvable one is returned with its name
pub fn resolve_params(
    params: &[(String, ParamValue)],
    scope: &Scope<'_>,
) -> Result<Map<String, Value>, (String, PathNotFound)> {
    let mut resolved = Map::new();
    for (name, param) in params {
        let value = resolve_param(param, scope).map_err(|e| (name.clone(), e))?;
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

/// Resolve emit fields; unresolvable fields become `null`
pub fn resolve_fields(fields: &[(String, ParamValue)], scope: &Scope<'_>) -> Item {
    fields
        .iter()
        .map(|(name, param)| {
            let value = resolve_param(param, scope).unwrap_or_else(|e| {
                log::debug!("Emit field '{}' resolved to null: {}", name, e);
                Value::Null
            });
            (name.clone(), value)
        })
        .collect()
}
