//! # Resolution Scope
//!
//! An immutable chain of binding frames. A child scope is built from its
//! parent by extension; the parent is never modified, so sibling iterations
//! cannot see each other's bindings.

use crate::results::{DiscoveryCache, Item};
use serde_json::Value;

/// Name under which completed discoveries are exposed
pub const DISCOVERIES: &str = "discoveries";

/// Name of the current parent item in `for_each` discoveries
pub const ITEM: &str = "item";

/// Value bound to a scope name
#[derive(Debug, Clone)]
pub enum Binding<'a> {
    Value(Value),
    Item(&'a Item),
    Items(&'a [Item]),
    Discoveries(&'a DiscoveryCache),
}

/// A frame of bindings plus an optional parent
#[derive(Debug, Clone, Default)]
pub struct Scope<'a> {
    parent: Option<&'a Scope<'a>>,
    bindings: Vec<(String, Binding<'a>)>,
}

impl<'a> Scope<'a> {
    /// Empty root scope
    pub fn root() -> Self {
        Self {
            parent: None,
            bindings: Vec::new(),
        }
    }

    /// Root scope for a scan unit
    ///
    /// `project` is bound as an alias of `account`.
    pub fn for_unit(provider: &str, service: &str, account: &str, region: &str) -> Self {
        Self::root()
            .with_value("provider", Value::from(provider))
            .with_value("service", Value::from(service))
            .with_value("account", Value::from(account))
            .with_value("project", Value::from(account))
            .with_value("region", Value::from(region))
    }

    /// New empty frame on top of this scope
    pub fn child(&'a self) -> Scope<'a> {
        Scope {
            parent: Some(self),
            bindings: Vec::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.push((name.into(), Binding::Value(value)));
        self
    }

    pub fn with_item(mut self, name: impl Into<String>, item: &'a Item) -> Self {
        self.bindings.push((name.into(), Binding::Item(item)));
        self
    }

    pub fn with_items(mut self, name: impl Into<String>, items: &'a [Item]) -> Self {
        self.bindings.push((name.into(), Binding::Items(items)));
        self
    }

    pub fn with_discoveries(mut self, cache: &'a DiscoveryCache) -> Self {
        self.bindings
            .push((DISCOVERIES.to_string(), Binding::Discoveries(cache)));
        self
    }

    /// Bind a value into this frame in place
    ///
    /// Only the frame being built is touched; used for `save_as` responses
    /// as calls of one iteration complete.
    pub fn bind_value(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.push((name.into(), Binding::Value(value)));
    }

    /// Innermost binding for `name`; later bindings in a frame shadow earlier ones
    pub fn lookup(&self, name: &str) -> Option<&Binding<'a>> {
        self.bindings
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, binding)| binding)
            .or_else(|| self.parent.and_then(|parent| parent.lookup(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_bindings() {
        let scope = Scope::for_unit("gcp", "compute", "proj-1", "us-east1");
        assert!(matches!(scope.lookup("project"), Some(Binding::Value(v)) if v == "proj-1"));
        assert!(matches!(scope.lookup("region"), Some(Binding::Value(v)) if v == "us-east1"));
        assert!(scope.lookup("item").is_none());
    }

    #[test]
    fn test_child_shadows_without_touching_parent() {
        let root = Scope::root().with_value("response", json!(1));
        let child = root.child().with_value("response", json!(2));
        assert!(matches!(child.lookup("response"), Some(Binding::Value(v)) if v == &json!(2)));
        assert!(matches!(root.lookup("response"), Some(Binding::Value(v)) if v == &json!(1)));
    }
}
