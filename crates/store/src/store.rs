use futures::future::BoxFuture;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::error::{ActionError, MutationError};
use crate::getters::{GetterCache, GetterScope};
use crate::reactive::{Change, ReactiveState, SubscriptionId};
use crate::registry::{Module, OperationKey, Registry};

/// Result an action resolves to.
pub type ActionResult = Result<Value, ActionError>;

/// Everything the store needs at construction time.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Root state, getters, mutations and actions.
    pub root: Module,
    /// Namespaced modules, registered in order.
    pub modules: Vec<(String, Module)>,
}

/// Builder for [`StoreOptions`] and the [`Store`] itself.
#[derive(Debug, Default)]
pub struct StoreBuilder {
    options: StoreOptions,
}

impl StoreBuilder {
    pub fn state(mut self, state: Value) -> Self {
        self.options.root = self.options.root.with_state(state);
        self
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&GetterScope<'_>) -> Value + Send + Sync + 'static,
    {
        self.options.root = self.options.root.getter(name, getter);
        self
    }

    pub fn mutation<F>(mut self, name: impl Into<String>, mutation: F) -> Self
    where
        F: Fn(&mut Value, Value) -> Result<(), MutationError> + Send + Sync + 'static,
    {
        self.options.root = self.options.root.mutation(name, mutation);
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Dispatched + Send + Sync + 'static,
    {
        self.options.root = self.options.root.action(name, action);
        self
    }

    pub fn module(mut self, name: impl Into<String>, module: Module) -> Self {
        self.options.modules.push((name.into(), module));
        self
    }

    pub fn options(self) -> StoreOptions {
        self.options
    }

    pub fn build(self) -> Store {
        Store::new(self.options)
    }
}

pub(crate) struct StoreInner {
    pub state: ReactiveState,
    pub registry: Registry,
    pub getters: GetterCache,
}

/// Handle to the state container.
///
/// Cloning is cheap; all clones share one state tree. All state changes go
/// through [`Store::commit`]; [`Store::dispatch`] runs actions that may commit
/// and await.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("epoch", &self.epoch())
            .field("getters", &self.getter_names())
            .field("subscribers", &self.inner.state.subscriber_count())
            .finish()
    }
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Register every module and build the root state tree.
    pub fn new(options: StoreOptions) -> Self {
        let (registry, state) = Registry::build(options.root, options.modules);
        Self {
            inner: Arc::new(StoreInner {
                state: ReactiveState::new(state),
                registry,
                getters: GetterCache::default(),
            }),
        }
    }

    /// Read-only snapshot of the full state tree.
    pub fn state(&self) -> Arc<Value> {
        self.inner.state.snapshot()
    }

    /// Copy of a single top-level key, e.g. a module's state.
    pub fn slice(&self, key: &str) -> Option<Value> {
        self.inner.state.snapshot().get(key).cloned()
    }

    /// Number of committed changes so far.
    pub fn epoch(&self) -> u64 {
        self.inner.state.epoch()
    }

    /// Current value of a getter, computed at most once per dependency change.
    pub fn getter(&self, name: &str) -> Option<Arc<Value>> {
        let stack = RefCell::new(Vec::new());
        self.inner
            .getters
            .read(self, name, &stack)
            .map(|(value, _)| value)
    }

    /// Every getter, evaluated.
    pub fn getters(&self) -> BTreeMap<String, Arc<Value>> {
        self.getter_names()
            .into_iter()
            .filter_map(|name| self.getter(&name).map(|value| (name, value)))
            .collect()
    }

    pub fn getter_names(&self) -> Vec<String> {
        self.inner
            .registry
            .getter_names()
            .map(str::to_string)
            .collect()
    }

    /// Apply a mutation synchronously.
    ///
    /// Unknown names and rejected payloads are logged and ignored; this never
    /// fails from the caller's point of view.
    pub fn commit(&self, mutation: &str, payload: Value) {
        let Some(route) = self.inner.registry.mutation(mutation) else {
            warn!(mutation, "unknown mutation type");
            return;
        };
        let scope = route.key.namespace.as_deref();
        let handler = &route.handler;
        match self
            .inner
            .state
            .apply(scope, mutation, |slice| handler(slice, payload))
        {
            Ok(Some(change)) => {
                debug!(mutation, changed = ?change.changed_keys, epoch = change.epoch, "committed");
            }
            Ok(None) => debug!(mutation, "mutation left state unchanged"),
            Err(err) => warn!(mutation, error = %err, "mutation rejected; state unchanged"),
        }
    }

    /// Run an action.
    ///
    /// The synchronous part of the action runs before this returns; await the
    /// result for any asynchronous part. Unknown names resolve to `null`.
    pub fn dispatch(&self, action: &str, payload: Value) -> Dispatched {
        let Some(route) = self.inner.registry.action(action) else {
            warn!(action, "unknown action type");
            return Dispatched::empty();
        };
        debug!(action, "dispatching");
        let context = ActionContext {
            store: self.clone(),
            namespace: route.key.namespace.clone(),
        };
        (route.handler)(context, payload)
    }

    /// Key a mutation name resolves to, if any.
    pub fn resolve_mutation(&self, mutation: &str) -> Option<OperationKey> {
        self.inner
            .registry
            .mutation(mutation)
            .map(|route| route.key.clone())
    }

    /// Key an action name resolves to, if any.
    pub fn resolve_action(&self, action: &str) -> Option<OperationKey> {
        self.inner
            .registry
            .action(action)
            .map(|route| route.key.clone())
    }

    /// Scoped handle whose operations default to `namespace`.
    pub fn module(&self, namespace: impl Into<String>) -> ModuleHandle {
        ModuleHandle {
            store: self.clone(),
            namespace: namespace.into(),
        }
    }

    /// Call `subscriber` after every committed change.
    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&Change, &Value) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(Arc::new(subscriber))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.state.unsubscribe(id)
    }

    /// Rewrite the top-level state map without notifying subscribers.
    ///
    /// Meant for restoring persisted state right after construction. Returns
    /// the keys that changed.
    pub fn hydrate<F>(&self, f: F) -> Vec<String>
    where
        F: FnOnce(&mut serde_json::Map<String, Value>),
    {
        let changed = self.inner.state.hydrate(f);
        if !changed.is_empty() {
            debug!(keys = ?changed, "state hydrated");
        }
        changed
    }

    /// Drop every subscriber and cached getter value.
    ///
    /// The store stays usable in memory; nothing is persisted afterwards.
    pub fn dispose(&self) {
        let dropped = self.inner.state.clear_subscribers();
        self.inner.getters.clear();
        debug!(subscribers = dropped, "store disposed");
    }
}

/// Context handed to an action.
#[derive(Clone)]
pub struct ActionContext {
    store: Store,
    namespace: Option<String>,
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ActionContext {
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The invoking module's state slice, or the root tree for root actions.
    pub fn state(&self) -> Value {
        let root = self.store.state();
        match &self.namespace {
            Some(ns) => root.get(ns).cloned().unwrap_or(Value::Null),
            None => (*root).clone(),
        }
    }

    pub fn root_state(&self) -> Arc<Value> {
        self.store.state()
    }

    /// Commit a mutation; unqualified names resolve inside this module.
    pub fn commit(&self, mutation: &str, payload: Value) {
        let qualified = OperationKey::qualify(self.namespace.as_deref(), mutation);
        self.store.commit(&qualified, payload);
    }

    /// Dispatch any action by its full name.
    pub fn dispatch(&self, action: &str, payload: Value) -> Dispatched {
        self.store.dispatch(action, payload)
    }

    pub fn getter(&self, name: &str) -> Option<Arc<Value>> {
        self.store.getter(name)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// Store handle scoped to one module namespace.
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    store: Store,
    namespace: String,
}

impl ModuleHandle {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn state(&self) -> Option<Value> {
        self.store.slice(&self.namespace)
    }

    pub fn commit(&self, mutation: &str, payload: Value) {
        self.store.commit(&self.qualify(mutation), payload);
    }

    pub fn dispatch(&self, action: &str, payload: Value) -> Dispatched {
        self.store.dispatch(&self.qualify(action), payload)
    }

    pub fn getter(&self, name: &str) -> Option<Arc<Value>> {
        self.store.getter(&self.qualify(name))
    }

    pub fn resolve_action(&self, action: &str) -> Option<OperationKey> {
        self.store.resolve_action(&self.qualify(action))
    }

    fn qualify(&self, name: &str) -> String {
        OperationKey::qualify(Some(&self.namespace), name)
    }
}

/// Outcome of [`Store::dispatch`].
///
/// Either already complete (synchronous actions, unknown names) or a boxed
/// future for actions that await. Implements `Future` in both cases.
pub struct Dispatched {
    inner: DispatchedInner,
}

enum DispatchedInner {
    Ready(Option<ActionResult>),
    Deferred(BoxFuture<'static, ActionResult>),
}

impl Dispatched {
    pub fn ready(result: ActionResult) -> Self {
        Self {
            inner: DispatchedInner::Ready(Some(result)),
        }
    }

    pub fn done(value: Value) -> Self {
        Self::ready(Ok(value))
    }

    pub fn empty() -> Self {
        Self::done(Value::Null)
    }

    pub fn failed(err: ActionError) -> Self {
        Self::ready(Err(err))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = ActionResult> + Send + 'static,
    {
        Self {
            inner: DispatchedInner::Deferred(Box::pin(future)),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner, DispatchedInner::Ready(_))
    }

    /// The result, if the action already completed.
    pub fn into_ready(self) -> Option<ActionResult> {
        match self.inner {
            DispatchedInner::Ready(result) => result,
            DispatchedInner::Deferred(_) => None,
        }
    }
}

impl fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            DispatchedInner::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            DispatchedInner::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl Future for Dispatched {
    type Output = ActionResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            DispatchedInner::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(Value::Null))),
            DispatchedInner::Deferred(future) => future.as_mut().poll(cx),
        }
    }
}
