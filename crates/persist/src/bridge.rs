use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

use decolorize_store::{Change, Store, SubscriptionId};

use crate::storage::{DurableStorage, StorageError};

/// Storage key the whole state tree is written under.
pub const DEFAULT_STORAGE_KEY: &str = "de-colorizer-store";

/// Connects a [`Store`] to durable storage.
///
/// On [`attach`](Self::attach) the saved snapshot (if any) is merged into the
/// freshly built state, then every committed change rewrites the snapshot.
/// Storage failures are logged and never reach the store's callers.
#[derive(Clone)]
pub struct PersistenceBridge {
    storage: Option<Arc<dyn DurableStorage>>,
    key: String,
    validators: Vec<(String, Validator)>,
}

/// Checks a restored top-level value; `Err` carries the reason it was refused.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

impl std::fmt::Debug for PersistenceBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceBridge")
            .field("key", &self.key)
            .field("configured", &self.storage.is_some())
            .field(
                "validated",
                &self.validators.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PersistenceBridge {
    pub fn new(storage: impl DurableStorage + 'static) -> Self {
        Self {
            storage: Some(Arc::new(storage)),
            key: DEFAULT_STORAGE_KEY.to_string(),
            validators: Vec::new(),
        }
    }

    /// A bridge with no storage behind it; the store runs in memory only.
    pub fn unconfigured() -> Self {
        Self {
            storage: None,
            key: DEFAULT_STORAGE_KEY.to_string(),
            validators: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Check the restored value of top-level `key` before the store sees it.
    ///
    /// A value the validator refuses is dropped and the key keeps its
    /// default.
    pub fn with_validator<F>(mut self, key: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push((key.into(), Arc::new(validator)));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_configured(&self) -> bool {
        self.storage.is_some()
    }

    /// Hydrate `store` from storage and subscribe to its changes.
    ///
    /// Writes happen in commit order: a change older than the last one
    /// written is skipped, since the newer snapshot already contains it.
    /// Returns `None` when no storage is configured.
    pub fn attach(&self, store: &Store) -> Option<SubscriptionId> {
        let Some(storage) = self.storage.clone() else {
            warn!(key = %self.key, "no durable storage configured; state is kept in memory only");
            return None;
        };

        if let Some(saved) = self.load() {
            let changed = store.hydrate(|state| {
                let defaults: Vec<(String, Value)> = self
                    .validators
                    .iter()
                    .filter_map(|(key, _)| Some((key.clone(), state.get(key)?.clone())))
                    .collect();
                merge_snapshot(state, saved);
                self.validate(state, defaults);
            });
            debug!(key = %self.key, keys = ?changed, "restored persisted state");
        }

        let key = self.key.clone();
        let written = Mutex::new(0u64);
        Some(store.subscribe(move |change: &Change, tree: &Value| {
            let mut last = written.lock();
            if change.epoch <= *last {
                debug!(key = %key, epoch = change.epoch, last = *last, "skipping stale snapshot");
                return;
            }
            match save(storage.as_ref(), &key, tree) {
                Ok(()) => *last = change.epoch,
                Err(err) => {
                    error!(key = %key, mutation = %change.mutation, error = %err, "failed to save state");
                }
            }
        }))
    }

    fn validate(&self, state: &mut Map<String, Value>, defaults: Vec<(String, Value)>) {
        for (key, default) in defaults {
            let Some(restored) = state.get(&key) else { continue };
            let verdict = self
                .validators
                .iter()
                .filter(|(name, _)| *name == key)
                .try_for_each(|(_, validator)| validator(restored));
            if let Err(reason) = verdict {
                error!(key = %key, reason = %reason, "persisted value is unusable; keeping default");
                state.insert(key, default);
            }
        }
    }

    /// Read and parse the saved snapshot. Failures are logged and read as
    /// "nothing saved".
    pub fn load(&self) -> Option<Map<String, Value>> {
        let storage = self.storage.as_ref()?;
        let raw = match storage.get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                error!(key = %self.key, error = %err, "failed to read persisted state");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Some(map),
            Ok(other) => {
                error!(key = %self.key, kind = kind_of(&other), "persisted state is not an object");
                None
            }
            Err(err) => {
                error!(key = %self.key, error = %err, "failed to parse persisted state");
                None
            }
        }
    }

    /// Write `tree` under the bridge's key right away.
    pub fn save_now(&self, tree: &Value) -> Result<(), StorageError> {
        match &self.storage {
            Some(storage) => save(storage.as_ref(), &self.key, tree),
            None => Ok(()),
        }
    }
}

fn save(storage: &dyn DurableStorage, key: &str, tree: &Value) -> Result<(), StorageError> {
    let serialized = serde_json::to_string(tree)?;
    storage.set_item(key, &serialized)?;
    debug!(key, bytes = serialized.len(), "state saved");
    Ok(())
}

/// Merge a saved snapshot into freshly initialized state.
///
/// Only keys present in `state` are considered. Object values are merged
/// field by field, limited to fields the default already has; other values
/// are replaced when the saved value has the same JSON type. A `null`
/// default field accepts any saved value. Returns the keys that took saved
/// content.
pub fn merge_snapshot(state: &mut Map<String, Value>, saved: Map<String, Value>) -> Vec<String> {
    let mut merged = Vec::new();
    for (key, saved_value) in saved {
        let Some(current) = state.get_mut(&key) else {
            debug!(key = %key, "dropping persisted key absent from current state");
            continue;
        };
        match (current, saved_value) {
            (Value::Object(fields), Value::Object(saved_fields)) => {
                for (field, value) in saved_fields {
                    match fields.get_mut(&field) {
                        Some(slot) if slot.is_null() || same_kind(slot, &value) => *slot = value,
                        Some(slot) => warn!(
                            key = %key,
                            field = %field,
                            expected = kind_of(slot),
                            found = kind_of(&value),
                            "persisted field has a different type; keeping default"
                        ),
                        None => debug!(key = %key, field = %field, "dropping unknown persisted field"),
                    }
                }
                merged.push(key);
            }
            (current, saved_value) if same_kind(&*current, &saved_value) => {
                *current = saved_value;
                merged.push(key);
            }
            (current, saved_value) => {
                warn!(
                    key = %key,
                    expected = kind_of(current),
                    found = kind_of(&saved_value),
                    "persisted value has a different type; keeping default"
                );
            }
        }
    }
    merged
}

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use decolorize_store::Module;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn store() -> Store {
        Store::builder()
            .state(json!({ "appName": "De-Colorize", "isDarkMode": false }))
            .mutation("setDarkMode", |state, payload| {
                state["isDarkMode"] = payload;
                Ok(())
            })
            .module(
                "colors",
                Module::new()
                    .with_state(json!({ "colors": [], "searchTerm": "" }))
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
    fn merge_keeps_defaults_and_drops_unknown_keys() {
        let mut state = object(json!({
            "colors": { "colors": [], "searchTerm": "", "sortOptions": { "sortBy": "date" } },
            "appName": "De-Colorize"
        }));
        let saved = object(json!({
            "colors": { "colors": [{ "id": 1 }], "legacyField": true },
            "retired": { "x": 1 }
        }));
        let merged = merge_snapshot(&mut state, saved);

        assert_eq!(merged, vec!["colors".to_string()]);
        assert_eq!(state["colors"]["colors"], json!([{ "id": 1 }]));
        assert_eq!(state["colors"]["sortOptions"], json!({ "sortBy": "date" }));
        assert!(state["colors"].get("legacyField").is_none());
        assert!(!state.contains_key("retired"));
    }

    #[test]
    fn merge_replaces_scalars_of_same_type_only() {
        let mut state = object(json!({ "isDarkMode": false, "version": "1.0.0" }));
        let saved = object(json!({ "isDarkMode": true, "version": 2 }));
        merge_snapshot(&mut state, saved);
        assert_eq!(state["isDarkMode"], json!(true));
        assert_eq!(state["version"], json!("1.0.0"));
    }

    #[test]
    fn every_change_is_written_through() {
        let storage = MemoryStorage::new();
        let store = store();
        let bridge = PersistenceBridge::new(storage.clone());
        assert!(bridge.attach(&store).is_some());
        assert!(storage.is_empty());

        store.commit("colors/push", json!("red"));
        let raw = storage.get_item(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        let saved: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved, *store.state());
    }

    #[test]
    fn restart_restores_saved_state() {
        let storage = MemoryStorage::new();
        {
            let store = store();
            PersistenceBridge::new(storage.clone()).attach(&store);
            store.commit("colors/push", json!("red"));
            store.commit("setDarkMode", json!(true));
        }

        let restarted = store();
        PersistenceBridge::new(storage.clone()).attach(&restarted);
        assert_eq!(restarted.state()["colors"]["colors"], json!(["red"]));
        assert_eq!(restarted.state()["isDarkMode"], json!(true));
    }

    #[test]
    fn hydration_does_not_write_back() {
        let storage = MemoryStorage::new();
        storage
            .set_item(DEFAULT_STORAGE_KEY, r#"{"colors":{"colors":["x"]},"gone":1}"#)
            .unwrap();
        let store = store();
        PersistenceBridge::new(storage.clone()).attach(&store);
        let raw = storage.get_item(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        assert!(raw.contains("gone"));
        assert_eq!(store.state()["colors"]["colors"], json!(["x"]));
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_defaults() {
        let storage = MemoryStorage::new();
        storage.set_item(DEFAULT_STORAGE_KEY, "{not json").unwrap();
        let store = store();
        PersistenceBridge::new(storage.clone()).attach(&store);
        assert_eq!(store.state()["colors"]["colors"], json!([]));

        storage.set_item(DEFAULT_STORAGE_KEY, "[1,2]").unwrap();
        assert!(PersistenceBridge::new(storage).load().is_none());
    }

    #[test]
    fn unconfigured_bridge_keeps_store_in_memory() {
        let store = store();
        let bridge = PersistenceBridge::unconfigured();
        assert!(bridge.attach(&store).is_none());
        store.commit("colors/push", json!("red"));
        assert_eq!(store.state()["colors"]["colors"], json!(["red"]));
    }

    #[test]
    fn custom_key_and_file_storage() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path()).unwrap();
        let store = store();
        PersistenceBridge::new(storage.clone())
            .with_key("palette")
            .attach(&store);
        store.commit("setDarkMode", json!(true));
        assert!(tmp.path().join("palette.json").is_file());
        assert!(storage.get_item(DEFAULT_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn nested_fields_of_another_type_keep_their_defaults() {
        let mut state = object(json!({
            "colors": { "colors": [], "searchTerm": "", "selectedColor": null }
        }));
        let saved = object(json!({
            "colors": { "colors": {}, "searchTerm": "moss", "selectedColor": 42 }
        }));
        merge_snapshot(&mut state, saved);
        assert_eq!(state["colors"]["colors"], json!([]));
        assert_eq!(state["colors"]["searchTerm"], json!("moss"));
        assert_eq!(state["colors"]["selectedColor"], json!(42));
    }

    #[test]
    fn refused_values_fall_back_to_defaults() {
        let storage = MemoryStorage::new();
        storage
            .set_item(
                DEFAULT_STORAGE_KEY,
                r#"{"isDarkMode":true,"colors":{"colors":["red",7],"searchTerm":"r"}}"#,
            )
            .unwrap();
        let store = store();
        PersistenceBridge::new(storage)
            .with_validator("colors", |slice| {
                let all_strings = slice["colors"]
                    .as_array()
                    .is_some_and(|list| list.iter().all(Value::is_string));
                if all_strings {
                    Ok(())
                } else {
                    Err("colors must be strings".to_string())
                }
            })
            .attach(&store);

        assert_eq!(store.state()["isDarkMode"], json!(true));
        assert_eq!(store.state()["colors"], json!({ "colors": [], "searchTerm": "" }));
    }

    /// Storage whose first write stalls until a later commit has been made.
    struct StallingStorage {
        inner: MemoryStorage,
        stalled: AtomicBool,
        entered: AtomicBool,
    }

    impl DurableStorage for StallingStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                self.entered.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
            }
            self.inner.set_item(key, value)
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove_item(key)
        }
    }

    #[test]
    fn concurrent_commits_persist_the_newest_tree() {
        let memory = MemoryStorage::new();
        let storage = Arc::new(StallingStorage {
            inner: memory.clone(),
            stalled: AtomicBool::new(false),
            entered: AtomicBool::new(false),
        });
        let store = store();
        PersistenceBridge {
            storage: Some(storage.clone()),
            key: DEFAULT_STORAGE_KEY.to_string(),
            validators: Vec::new(),
        }
        .attach(&store);

        thread::scope(|scope| {
            scope.spawn(|| store.commit("setDarkMode", json!(true)));
            while !storage.entered.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            store.commit("colors/push", json!("red"));
        });

        let raw = memory.get_item(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        let saved: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved, *store.state());
        assert_eq!(saved["colors"]["colors"], json!(["red"]));
    }

    #[test]
    fn write_failures_do_not_block_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path()).unwrap();
        let store = store();
        PersistenceBridge::new(storage)
            .with_key("../outside")
            .attach(&store);
        store.commit("setDarkMode", json!(true));
        assert_eq!(store.state()["isDarkMode"], json!(true));
    }
}
