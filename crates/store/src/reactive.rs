//! Observable state tree.
//!
//! The tree is a JSON object held behind an `Arc` so readers can take cheap
//! immutable snapshots while the committer writes copy-on-write. Every
//! top-level key carries a version counter; the container epoch counts all
//! committed changes. Getters compare recorded versions to decide whether a
//! cached value is still valid, and subscribers are called synchronously once
//! per committed mutation.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::MutationError;

/// Notification delivered to subscribers after a mutation changed the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Mutation type as passed to `commit`, after namespace qualification.
    pub mutation: String,
    /// Top-level state keys whose value changed.
    pub changed_keys: Vec<String>,
    /// Container epoch after the change.
    pub epoch: u64,
}

/// Handle returned by [`crate::Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type Subscriber = Arc<dyn Fn(&Change, &Value) + Send + Sync>;

/// A piece of state a getter read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
    /// A single top-level key of the root tree.
    Key(String),
    /// The whole tree; invalidated by any change.
    Everything,
}

/// A snapshot together with the versions it was taken at.
pub(crate) struct Observed {
    pub root: Arc<Value>,
    versions: HashMap<String, u64>,
    epoch: u64,
}

impl Observed {
    pub fn version(&self, dep: &Dependency) -> u64 {
        match dep {
            Dependency::Key(key) => self.versions.get(key).copied().unwrap_or(0),
            Dependency::Everything => self.epoch,
        }
    }
}

struct Tree {
    root: Arc<Value>,
    versions: HashMap<String, u64>,
    epoch: u64,
}

impl Tree {
    fn version(&self, dep: &Dependency) -> u64 {
        match dep {
            Dependency::Key(key) => self.versions.get(key).copied().unwrap_or(0),
            Dependency::Everything => self.epoch,
        }
    }

    fn bump(&mut self, keys: &[String]) {
        self.epoch += 1;
        for key in keys {
            *self.versions.entry(key.clone()).or_insert(0) += 1;
        }
    }
}

pub(crate) struct ReactiveState {
    tree: Mutex<Tree>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

impl ReactiveState {
    pub fn new(initial: Map<String, Value>) -> Self {
        Self {
            tree: Mutex::new(Tree {
                root: Arc::new(Value::Object(initial)),
                versions: HashMap::new(),
                epoch: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> Arc<Value> {
        self.tree.lock().root.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.tree.lock().epoch
    }

    pub fn observe(&self) -> Observed {
        let tree = self.tree.lock();
        Observed {
            root: tree.root.clone(),
            versions: tree.versions.clone(),
            epoch: tree.epoch,
        }
    }

    /// Whether every recorded dependency is still at the recorded version.
    pub fn is_current(&self, deps: &[(Dependency, u64)]) -> bool {
        let tree = self.tree.lock();
        deps.iter().all(|(dep, version)| tree.version(dep) == *version)
    }

    /// Run `f` against the slice named by `scope` (or the whole tree).
    ///
    /// On error the slice is restored and nothing is notified. Returns
    /// `Ok(None)` when the mutation left the tree unchanged.
    pub fn apply<F>(
        &self,
        scope: Option<&str>,
        mutation: &str,
        f: F,
    ) -> Result<Option<Change>, MutationError>
    where
        F: FnOnce(&mut Value) -> Result<(), MutationError>,
    {
        let (change, snapshot) = {
            let mut tree = self.tree.lock();
            let changed = {
                let root = Arc::make_mut(&mut tree.root);
                match scope {
                    Some(namespace) => apply_to_slice(root, namespace, f)?,
                    None => apply_to_root(root, f)?,
                }
            };
            if changed.is_empty() {
                return Ok(None);
            }
            tree.bump(&changed);
            let change = Change {
                mutation: mutation.to_string(),
                changed_keys: changed,
                epoch: tree.epoch,
            };
            (change, tree.root.clone())
        };
        self.notify(&change, &snapshot);
        Ok(Some(change))
    }

    /// Rewrite the tree without notifying subscribers. Used once, before
    /// anything is subscribed, to restore persisted state.
    pub fn hydrate<F>(&self, f: F) -> Vec<String>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut tree = self.tree.lock();
        let before = (*tree.root).clone();
        if let Value::Object(map) = Arc::make_mut(&mut tree.root) {
            f(map);
        }
        let changed = changed_keys(&before, &tree.root);
        if !changed.is_empty() {
            tree.bump(&changed);
        }
        changed
    }

    pub fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, subscriber));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn clear_subscribers(&self) -> usize {
        std::mem::take(&mut *self.subscribers.lock()).len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn notify(&self, change: &Change, snapshot: &Value) {
        // Called outside the tree lock so subscribers may read the store.
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        for subscriber in subscribers {
            subscriber(change, snapshot);
        }
    }
}

fn apply_to_slice<F>(root: &mut Value, namespace: &str, f: F) -> Result<Vec<String>, MutationError>
where
    F: FnOnce(&mut Value) -> Result<(), MutationError>,
{
    let Some(slice) = root.get_mut(namespace) else {
        return Err(MutationError::MissingSlice(namespace.to_string()));
    };
    let before = slice.clone();
    if let Err(err) = f(slice) {
        *slice = before;
        return Err(err);
    }
    if *slice == before {
        Ok(Vec::new())
    } else {
        Ok(vec![namespace.to_string()])
    }
}

fn apply_to_root<F>(root: &mut Value, f: F) -> Result<Vec<String>, MutationError>
where
    F: FnOnce(&mut Value) -> Result<(), MutationError>,
{
    let before = root.clone();
    if let Err(err) = f(root) {
        *root = before;
        return Err(err);
    }
    if !root.is_object() {
        *root = before;
        return Err(MutationError::rejected("root state must remain an object"));
    }
    Ok(changed_keys(&before, root))
}

fn changed_keys(before: &Value, after: &Value) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for value in [before, after] {
        if let Value::Object(map) = value {
            keys.extend(map.keys().cloned());
        }
    }
    keys.into_iter()
        .filter(|key| before.get(key) != after.get(key))
        .collect()
}
