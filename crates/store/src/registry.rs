//! Module registration and the operation routing table.
//!
//! Operation names are parsed once into an [`OperationKey`]; lookups try the
//! namespaced entry first and fall back to a root entry registered under the
//! raw name.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::MutationError;
use crate::getters::GetterScope;
use crate::store::{ActionContext, Dispatched};

/// Separator between a module namespace and an operation name.
pub const NAMESPACE_SEPARATOR: char = '/';

pub type MutationFn = Arc<dyn Fn(&mut Value, Value) -> Result<(), MutationError> + Send + Sync>;
pub type ActionFn = Arc<dyn Fn(ActionContext, Value) -> Dispatched + Send + Sync>;
pub type GetterFn = Arc<dyn Fn(&GetterScope<'_>) -> Value + Send + Sync>;

/// Routing key for a mutation, action or getter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey {
    pub namespace: Option<String>,
    pub operation: String,
}

impl OperationKey {
    pub fn root(operation: impl Into<String>) -> Self {
        Self {
            namespace: None,
            operation: operation.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            operation: operation.into(),
        }
    }

    /// Split `"module/operation"` at the first separator.
    pub fn parse(name: &str) -> Self {
        match name.split_once(NAMESPACE_SEPARATOR) {
            Some((namespace, operation)) => Self::namespaced(namespace, operation),
            None => Self::root(name),
        }
    }

    /// Prefix `name` with `namespace` unless it is already qualified.
    pub fn qualify(namespace: Option<&str>, name: &str) -> String {
        match namespace {
            Some(ns) if !name.contains(NAMESPACE_SEPARATOR) => {
                format!("{ns}{NAMESPACE_SEPARATOR}{name}")
            }
            _ => name.to_string(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}{NAMESPACE_SEPARATOR}{}", self.operation),
            None => f.write_str(&self.operation),
        }
    }
}

/// A registered handler together with the key it was registered under.
pub(crate) struct Route<H> {
    pub key: OperationKey,
    pub handler: H,
}

/// A `{state, getters, mutations, actions}` bundle.
///
/// Used both for the root definition and for namespaced modules.
#[derive(Clone)]
pub struct Module {
    pub(crate) state: Value,
    pub(crate) getters: Vec<(String, GetterFn)>,
    pub(crate) mutations: Vec<(String, MutationFn)>,
    pub(crate) actions: Vec<(String, ActionFn)>,
}

impl Default for Module {
    fn default() -> Self {
        Self {
            state: Value::Object(Map::new()),
            getters: Vec::new(),
            mutations: Vec::new(),
            actions: Vec::new(),
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("state", &self.state)
            .field("getters", &names_of(&self.getters))
            .field("mutations", &names_of(&self.mutations))
            .field("actions", &names_of(&self.actions))
            .finish()
    }
}

fn names_of<H>(ops: &[(String, H)]) -> Vec<&str> {
    ops.iter().map(|(n, _)| n.as_str()).collect()
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial state of the module. `null` is treated as an empty object.
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = match state {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        self
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&GetterScope<'_>) -> Value + Send + Sync + 'static,
    {
        self.getters.push((name.into(), Arc::new(getter)));
        self
    }

    pub fn mutation<F>(mut self, name: impl Into<String>, mutation: F) -> Self
    where
        F: Fn(&mut Value, Value) -> Result<(), MutationError> + Send + Sync + 'static,
    {
        self.mutations.push((name.into(), Arc::new(mutation)));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Dispatched + Send + Sync + 'static,
    {
        self.actions.push((name.into(), Arc::new(action)));
        self
    }

    pub fn state(&self) -> &Value {
        &self.state
    }
}

/// Merged routing tables for every registered module.
#[derive(Default)]
pub(crate) struct Registry {
    mutations: HashMap<OperationKey, Route<MutationFn>>,
    actions: HashMap<OperationKey, Route<ActionFn>>,
    getters: BTreeMap<String, Route<GetterFn>>,
}

impl Registry {
    /// Register the root definition and every module, returning the merged
    /// initial state tree.
    pub fn build(root: Module, modules: Vec<(String, Module)>) -> (Self, Map<String, Value>) {
        let mut registry = Self::default();
        let mut state = match root.state {
            Value::Object(map) => map,
            other => {
                warn!(state = %other, "root state is not an object; starting empty");
                Map::new()
            }
        };

        registry.register(None, root.getters, root.mutations, root.actions);

        for (name, module) in modules {
            if state.insert(name.clone(), module.state).is_some() {
                warn!(module = %name, "module state replaces an existing state key");
            }
            registry.register(Some(&name), module.getters, module.mutations, module.actions);
            debug!(module = %name, "registered module");
        }

        (registry, state)
    }

    fn register(
        &mut self,
        namespace: Option<&str>,
        getters: Vec<(String, GetterFn)>,
        mutations: Vec<(String, MutationFn)>,
        actions: Vec<(String, ActionFn)>,
    ) {
        let key_for = |name: String| match namespace {
            Some(ns) => OperationKey::namespaced(ns, name),
            None => OperationKey::root(name),
        };

        for (name, handler) in getters {
            let key = key_for(name);
            if self
                .getters
                .insert(key.to_string(), Route { key: key.clone(), handler })
                .is_some()
            {
                warn!(getter = %key, "duplicate getter replaced");
            }
        }
        for (name, handler) in mutations {
            let key = key_for(name);
            if self
                .mutations
                .insert(key.clone(), Route { key: key.clone(), handler })
                .is_some()
            {
                warn!(mutation = %key, "duplicate mutation replaced");
            }
        }
        for (name, handler) in actions {
            let key = key_for(name);
            if self
                .actions
                .insert(key.clone(), Route { key: key.clone(), handler })
                .is_some()
            {
                warn!(action = %key, "duplicate action replaced");
            }
        }
    }

    pub fn mutation(&self, name: &str) -> Option<&Route<MutationFn>> {
        lookup(&self.mutations, name)
    }

    pub fn action(&self, name: &str) -> Option<&Route<ActionFn>> {
        lookup(&self.actions, name)
    }

    pub fn getter(&self, name: &str) -> Option<&Route<GetterFn>> {
        self.getters.get(name)
    }

    pub fn getter_names(&self) -> impl Iterator<Item = &str> {
        self.getters.keys().map(String::as_str)
    }
}

fn lookup<'a, H>(table: &'a HashMap<OperationKey, Route<H>>, name: &str) -> Option<&'a Route<H>> {
    let parsed = OperationKey::parse(name);
    if parsed.namespace.is_some() {
        if let Some(route) = table.get(&parsed) {
            return Some(route);
        }
    }
    table.get(&OperationKey::root(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_mutation() -> impl Fn(&mut Value, Value) -> Result<(), MutationError> {
        |_, _| Ok(())
    }

    #[test]
    fn parse_splits_at_first_separator() {
        assert_eq!(OperationKey::parse("colors/add"), OperationKey::namespaced("colors", "add"));
        assert_eq!(OperationKey::parse("toggle"), OperationKey::root("toggle"));
        assert_eq!(
            OperationKey::parse("a/b/c"),
            OperationKey::namespaced("a", "b/c")
        );
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(OperationKey::namespaced("colors", "add").to_string(), "colors/add");
        assert_eq!(OperationKey::root("toggle").to_string(), "toggle");
    }

    #[test]
    fn qualify_respects_existing_namespace() {
        assert_eq!(OperationKey::qualify(Some("colors"), "add"), "colors/add");
        assert_eq!(OperationKey::qualify(Some("colors"), "audit/log"), "audit/log");
        assert_eq!(OperationKey::qualify(None, "add"), "add");
    }

    #[test]
    fn modules_are_nested_under_their_name() {
        let root = Module::new().with_state(json!({ "title": "x" }));
        let colors = Module::new()
            .with_state(json!({ "colors": [] }))
            .mutation("add", noop_mutation());
        let (registry, state) = Registry::build(root, vec![("colors".into(), colors)]);

        assert_eq!(state["title"], json!("x"));
        assert_eq!(state["colors"], json!({ "colors": [] }));
        let route = registry.mutation("colors/add").unwrap();
        assert_eq!(route.key, OperationKey::namespaced("colors", "add"));
        assert!(registry.mutation("add").is_none());
    }

    #[test]
    fn namespaced_lookup_falls_back_to_root() {
        let root = Module::new().mutation("legacy/reset", noop_mutation());
        let (registry, _) = Registry::build(root, Vec::new());
        let route = registry.mutation("legacy/reset").unwrap();
        assert_eq!(route.key, OperationKey::root("legacy/reset"));
    }

    #[test]
    fn null_module_state_becomes_empty_object() {
        let module = Module::new().with_state(Value::Null);
        assert_eq!(module.state(), &json!({}));
    }
}
