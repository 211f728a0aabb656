use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use decolorize_persist::PersistenceBridge;
use decolorize_store::{Dispatched, MutationError, Store, StoreOptions};
use decolorize_upload::Uploader;

use crate::facade::Colors;
use crate::module::{NAMESPACE, colors_module};
use crate::state::ColorsState;

pub const APP_NAME: &str = "De-Colorize";
pub const APP_VERSION: &str = "1.0.0";

/// Collaborators the application store is wired to.
#[derive(Clone)]
pub struct AppConfig {
    pub persistence: PersistenceBridge,
    pub uploader: Option<Arc<dyn Uploader>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceBridge::unconfigured(),
            uploader: None,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("persistence", &self.persistence)
            .field("uploader", &self.uploader.is_some())
            .finish()
    }
}

impl AppConfig {
    pub fn with_persistence(mut self, bridge: PersistenceBridge) -> Self {
        self.persistence = bridge;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }
}

/// Root module and `colors` module, without any collaborators attached.
pub fn app_options(uploader: Option<Arc<dyn Uploader>>) -> StoreOptions {
    Store::builder()
        .state(json!({
            "appName": APP_NAME,
            "isDarkMode": false,
            "version": APP_VERSION,
        }))
        .getter("isDarkMode", |scope| {
            scope.root("isDarkMode").cloned().unwrap_or(json!(false))
        })
        .getter("appName", |scope| {
            scope.root("appName").cloned().unwrap_or(Value::Null)
        })
        .getter("version", |scope| {
            scope.root("version").cloned().unwrap_or(Value::Null)
        })
        .mutation("setDarkMode", |state, payload| {
            let enabled: bool = serde_json::from_value(payload)?;
            set_root(state, "isDarkMode", json!(enabled))
        })
        .mutation("setAppName", |state, payload| {
            let name: String = serde_json::from_value(payload)?;
            set_root(state, "appName", json!(name))
        })
        .action("toggleDarkMode", |ctx, _payload| {
            let enabled = !ctx.state()["isDarkMode"].as_bool().unwrap_or(false);
            ctx.commit("setDarkMode", json!(enabled));
            Dispatched::done(json!(enabled))
        })
        .action("setAppName", |ctx, payload| {
            ctx.commit("setAppName", payload);
            Dispatched::empty()
        })
        .module(NAMESPACE, colors_module(uploader))
        .options()
}

/// Build the application store and attach persistence.
///
/// Each call builds a fresh store; persisted state is merged in before the
/// store is returned. A saved `colors` slice that no longer decodes is
/// replaced by the default slice.
pub fn create_store(config: AppConfig) -> Store {
    let store = Store::new(app_options(config.uploader));
    let persistence = config.persistence.with_validator(NAMESPACE, |slice| {
        ColorsState::deserialize(slice)
            .map(drop)
            .map_err(|err| err.to_string())
    });
    persistence.attach(&store);
    debug!(
        persisted = persistence.is_configured(),
        colors = Colors::new(&store).count(),
        "store ready"
    );
    store
}

fn set_root(state: &mut Value, key: &str, value: Value) -> Result<(), MutationError> {
    match state.as_object_mut() {
        Some(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        None => Err(MutationError::rejected("root state is not an object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decolorize_persist::MemoryStorage;

    #[test]
    fn root_defaults_and_getters() {
        let store = create_store(AppConfig::default());
        assert_eq!(*store.getter("appName").unwrap(), json!(APP_NAME));
        assert_eq!(*store.getter("version").unwrap(), json!("1.0.0"));
        assert_eq!(*store.getter("isDarkMode").unwrap(), json!(false));
    }

    #[test]
    fn toggle_dark_mode_flips_and_returns_new_value() {
        let store = create_store(AppConfig::default());
        let on = store.dispatch("toggleDarkMode", Value::Null).into_ready().unwrap().unwrap();
        assert_eq!(on, json!(true));
        assert_eq!(*store.getter("isDarkMode").unwrap(), json!(true));
        store.dispatch("toggleDarkMode", Value::Null);
        assert_eq!(*store.getter("isDarkMode").unwrap(), json!(false));
    }

    #[test]
    fn set_app_name_rejects_non_strings() {
        let store = create_store(AppConfig::default());
        store.dispatch("setAppName", json!(7));
        assert_eq!(store.state()["appName"], json!(APP_NAME));
        store.dispatch("setAppName", json!("Palette Lab"));
        assert_eq!(store.state()["appName"], json!("Palette Lab"));
    }

    #[test]
    fn settings_survive_a_restart() {
        let storage = MemoryStorage::new();
        let config = AppConfig::default().with_persistence(PersistenceBridge::new(storage.clone()));
        let first = create_store(config.clone());
        first.dispatch("toggleDarkMode", Value::Null);
        first.dispose();

        let second = create_store(config);
        assert_eq!(second.state()["isDarkMode"], json!(true));
        assert_eq!(second.state()["version"], json!(APP_VERSION));
    }
}
