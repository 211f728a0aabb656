//! Memoized getters.
//!
//! A getter is computed against an immutable snapshot through a
//! [`GetterScope`] that records which top-level keys it touched. The result is
//! cached together with the versions of those keys and reused until one of
//! them moves.

use parking_lot::Mutex;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::reactive::Dependency;
use crate::store::Store;

static NULL: Value = Value::Null;

/// Read access handed to a getter body.
///
/// Every read is recorded as a dependency of the getter being computed.
pub struct GetterScope<'a> {
    store: &'a Store,
    namespace: Option<&'a str>,
    root: &'a Value,
    stack: &'a RefCell<Vec<String>>,
    deps: RefCell<BTreeSet<Dependency>>,
}

impl<'a> GetterScope<'a> {
    /// The module's own state slice, or the whole tree for root getters.
    pub fn slice(&self) -> &'a Value {
        match self.namespace {
            Some(ns) => self.root(ns).unwrap_or(&NULL),
            None => self.root_state(),
        }
    }

    /// A single top-level key of the root tree.
    pub fn root(&self, key: &str) -> Option<&'a Value> {
        self.deps.borrow_mut().insert(Dependency::Key(key.to_string()));
        self.root.get(key)
    }

    /// The whole root tree. Any change invalidates the getter.
    pub fn root_state(&self) -> &'a Value {
        self.deps.borrow_mut().insert(Dependency::Everything);
        self.root
    }

    /// Current value of another getter; unknown names read as `null`.
    pub fn getter(&self, name: &str) -> Arc<Value> {
        match self.store.inner.getters.read(self.store, name, self.stack) {
            Some((value, deps)) => {
                self.deps.borrow_mut().extend(deps);
                value
            }
            None => {
                warn!(getter = name, "unknown getter read from getter body");
                Arc::new(Value::Null)
            }
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace
    }
}

struct CacheEntry {
    value: Arc<Value>,
    deps: Vec<(Dependency, u64)>,
}

/// Cache of computed getter values.
#[derive(Default)]
pub(crate) struct GetterCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl GetterCache {
    /// Read `name`, recomputing if any recorded dependency changed.
    ///
    /// `stack` holds the getters currently being computed on this call path
    /// and is used to break cycles.
    pub fn read(
        &self,
        store: &Store,
        name: &str,
        stack: &RefCell<Vec<String>>,
    ) -> Option<(Arc<Value>, Vec<Dependency>)> {
        let route = store.inner.registry.getter(name)?;

        if stack.borrow().iter().any(|g| g == name) {
            warn!(getter = name, "getter cycle detected; reading null");
            return Some((Arc::new(Value::Null), Vec::new()));
        }

        if let Some(hit) = self.cached(store, name) {
            return Some(hit);
        }

        let observed = store.inner.state.observe();
        stack.borrow_mut().push(name.to_string());
        let scope = GetterScope {
            store,
            namespace: route.key.namespace.as_deref(),
            root: observed.root.as_ref(),
            stack,
            deps: RefCell::new(BTreeSet::new()),
        };
        let value = Arc::new((route.handler)(&scope));
        stack.borrow_mut().pop();

        let deps: Vec<Dependency> = scope.deps.into_inner().into_iter().collect();
        trace!(getter = name, deps = deps.len(), "getter recomputed");
        let entry = CacheEntry {
            value: value.clone(),
            deps: deps
                .iter()
                .map(|dep| (dep.clone(), observed.version(dep)))
                .collect(),
        };
        self.entries.lock().insert(name.to_string(), entry);
        Some((value, deps))
    }

    fn cached(&self, store: &Store, name: &str) -> Option<(Arc<Value>, Vec<Dependency>)> {
        let (value, deps) = {
            let entries = self.entries.lock();
            let entry = entries.get(name)?;
            (entry.value.clone(), entry.deps.clone())
        };
        if !store.inner.state.is_current(&deps) {
            return None;
        }
        Some((value, deps.into_iter().map(|(dep, _)| dep).collect()))
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::{Module, Store};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_store(calls: Arc<AtomicUsize>) -> Store {
        let tally = calls.clone();
        Store::builder()
            .state(json!({ "title": "palette", "dark": false }))
            .getter("shout", move |scope| {
                tally.fetch_add(1, Ordering::SeqCst);
                let title = scope.root("title").and_then(Value::as_str).unwrap_or("");
                json!(title.to_uppercase())
            })
            .getter("banner", |scope| {
                let title = scope.root("title").and_then(Value::as_str).unwrap_or("");
                let dark = scope.root("dark").and_then(Value::as_bool).unwrap_or(false);
                json!(format!("{title} ({})", if dark { "dark" } else { "light" }))
            })
            .getter("everything", |scope| json!(scope.root_state().as_object().map(|m| m.len())))
            .mutation("setTitle", |state, payload| {
                state["title"] = payload;
                Ok(())
            })
            .mutation("setDark", |state, payload| {
                state["dark"] = payload;
                Ok(())
            })
            .module(
                "colors",
                Module::new()
                    .with_state(json!({ "colors": ["red"] }))
                    .getter("count", |scope| {
                        json!(scope.slice()["colors"].as_array().map_or(0, Vec::len))
                    })
                    .getter("summary", |scope| {
                        let count = scope.getter("colors/count");
                        json!(format!("{} colors", count))
                    })
                    .mutation("push", |slice, payload| {
                        if let Some(list) = slice["colors"].as_array_mut() {
                            list.push(payload);
                        }
                        Ok(())
                    }),
            )
            .build()
    }

    #[test]
    fn repeated_reads_hit_the_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counted_store(calls.clone());
        let first = store.getter("shout").unwrap();
        let second = store.getter("shout").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, json!("PALETTE"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrelated_change_keeps_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counted_store(calls.clone());
        let first = store.getter("shout").unwrap();
        store.commit("setDark", json!(true));
        let second = store.getter("shout").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn getter_over_two_keys_recomputes_when_either_changes() {
        let store = counted_store(Arc::new(AtomicUsize::new(0)));
        let first = store.getter("banner").unwrap();
        assert_eq!(*first, json!("palette (light)"));

        store.commit("colors/push", json!("blue"));
        assert!(Arc::ptr_eq(&first, &store.getter("banner").unwrap()));

        store.commit("setDark", json!(true));
        let second = store.getter("banner").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second, json!("palette (dark)"));

        store.commit("setTitle", json!("hue"));
        let third = store.getter("banner").unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(*third, json!("hue (dark)"));
    }

    #[test]
    fn relevant_change_recomputes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counted_store(calls.clone());
        store.getter("shout").unwrap();
        store.commit("setTitle", json!("hues"));
        assert_eq!(*store.getter("shout").unwrap(), json!("HUES"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn whole_tree_getter_tracks_everything() {
        let store = counted_store(Arc::new(AtomicUsize::new(0)));
        let first = store.getter("everything").unwrap();
        store.commit("setDark", json!(true));
        let second = store.getter("everything").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn getter_of_getter_inherits_dependencies() {
        let store = counted_store(Arc::new(AtomicUsize::new(0)));
        assert_eq!(*store.getter("colors/summary").unwrap(), json!("1 colors"));
        store.commit("colors/push", json!("blue"));
        assert_eq!(*store.getter("colors/summary").unwrap(), json!("2 colors"));
    }

    #[test]
    fn cycles_read_null() {
        let store = Store::builder()
            .getter("a", |scope| (*scope.getter("b")).clone())
            .getter("b", |scope| (*scope.getter("a")).clone())
            .build();
        assert_eq!(*store.getter("a").unwrap(), Value::Null);
    }

    #[test]
    fn unknown_getter_is_none() {
        let store = Store::builder().build();
        assert!(store.getter("missing").is_none());
    }
}
