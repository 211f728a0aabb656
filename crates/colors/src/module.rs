//! The `colors` store module.
//!
//! Mutations decode the module slice into [`ColorsState`], apply the change
//! and write the slice back. Actions validate their payload, then commit.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use decolorize_common::{ColorId, Timestamp};
use decolorize_store::{ActionContext, ActionError, Dispatched, GetterScope, Module, MutationError};
use decolorize_upload::{ENDPOINT_VAR, UploadError, Uploader};

use crate::model::{ColorRef, ColorUpdate, ImportRequest, NewColor, SortOptions, SortPatch};
use crate::state::ColorsState;

/// Namespace the module is registered under.
pub const NAMESPACE: &str = "colors";

/// Build the `colors` module. `uploader` backs the `importColor` action.
pub fn colors_module(uploader: Option<Arc<dyn Uploader>>) -> Module {
    Module::new()
        .with_state(to_json(&ColorsState::default()))
        .getter("allColors", |scope| field(scope, "colors", json!([])))
        .getter("selectedColor", |scope| {
            to_json(&read_state(scope.slice()).selected())
        })
        .getter("colorCount", |scope| {
            let count = scope
                .slice()
                .get("colors")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            json!(count)
        })
        .getter("colorHistory", |scope| field(scope, "colorHistory", json!([])))
        .getter("filteredColors", |scope| {
            to_json(&read_state(scope.slice()).filtered())
        })
        .getter("searchTerm", |scope| field(scope, "searchTerm", json!("")))
        .getter("sortOptions", |scope| {
            field(scope, "sortOptions", to_json(&SortOptions::default()))
        })
        .mutation("addColor", |slice, payload| {
            let new: NewColor = serde_json::from_value(payload)?;
            let color = edit(slice, |state| Ok(state.add(new, Timestamp::now())))?;
            debug!(id = %color.id, name = %color.name, "color added");
            Ok(())
        })
        .mutation("removeColor", |slice, payload| {
            let id = serde_json::from_value::<ColorRef>(payload)?.id();
            edit(slice, |state| {
                if state.remove(id, Timestamp::now()).is_none() {
                    debug!(%id, "no color to remove");
                }
                Ok(())
            })
        })
        .mutation("selectColor", |slice, payload| {
            let id = serde_json::from_value::<Option<ColorRef>>(payload)?.map(ColorRef::id);
            edit(slice, |state| {
                if state.select(id) {
                    Ok(())
                } else {
                    Err(MutationError::rejected(format!("no color with id {}", display(id))))
                }
            })
        })
        .mutation("clearColors", |slice, _payload| {
            edit(slice, |state| {
                state.clear(Timestamp::now());
                Ok(())
            })
        })
        .mutation("updateColor", |slice, payload| {
            let ColorUpdate { id, updates } = serde_json::from_value(payload)?;
            edit(slice, |state| {
                if state.update(id, updates, Timestamp::now()).is_none() {
                    debug!(%id, "no color to update");
                }
                Ok(())
            })
        })
        .mutation("setSearchTerm", |slice, payload| {
            let term: Option<String> = serde_json::from_value(payload)?;
            edit(slice, |state| {
                state.set_search_term(term.unwrap_or_default());
                Ok(())
            })
        })
        .mutation("setSortOptions", |slice, payload| {
            let patch: SortPatch = serde_json::from_value(payload)?;
            edit(slice, |state| {
                state.set_sort_options(patch);
                Ok(())
            })
        })
        .action("addColor", |ctx, payload| {
            if let Err(err) = decode::<NewColor>(&payload) {
                return Dispatched::failed(err);
            }
            let before = match current_state(&ctx) {
                Ok(state) => state.last_id(),
                Err(err) => return Dispatched::failed(err),
            };
            ctx.commit("addColor", payload);
            let after = read_state(&ctx.state());
            match after.colors.last() {
                Some(added) if Some(added.id) > before => Dispatched::done(to_json(added)),
                _ => Dispatched::failed(ActionError::failed("addColor was not applied")),
            }
        })
        .action("removeColor", commit_through("removeColor"))
        .action("selectColor", |ctx, payload| {
            let id = match decode::<Option<ColorRef>>(&payload) {
                Ok(target) => target.map(ColorRef::id),
                Err(err) => return Dispatched::failed(err),
            };
            if let Some(id) = id {
                if read_state(&ctx.state()).find(id).is_none() {
                    return Dispatched::failed(ActionError::failed(format!("no color with id {id}")));
                }
            }
            ctx.commit("selectColor", payload);
            Dispatched::empty()
        })
        .action("clearColors", commit_through("clearColors"))
        .action("updateColor", |ctx, payload| {
            let id = match decode::<ColorUpdate>(&payload) {
                Ok(update) => update.id,
                Err(err) => return Dispatched::failed(err),
            };
            let logged = match current_state(&ctx) {
                Ok(state) if state.find(id).is_none() => return Dispatched::done(Value::Null),
                Ok(state) => state.color_history.len(),
                Err(err) => return Dispatched::failed(err),
            };
            ctx.commit("updateColor", payload);
            let after = read_state(&ctx.state());
            match after.find(id) {
                Some(updated) if after.color_history.len() > logged => {
                    Dispatched::done(to_json(updated))
                }
                _ => Dispatched::failed(ActionError::failed("updateColor was not applied")),
            }
        })
        .action("setSearchTerm", commit_through("setSearchTerm"))
        .action("setSortOptions", commit_through("setSortOptions"))
        .action("importColor", import_color(uploader))
}

/// Upload the image first; only a successful upload commits `addColor`.
fn import_color(
    uploader: Option<Arc<dyn Uploader>>,
) -> impl Fn(ActionContext, Value) -> Dispatched + Send + Sync + 'static {
    move |ctx, payload| {
        let request = match decode::<ImportRequest>(&payload) {
            Ok(request) => request,
            Err(err) => return Dispatched::failed(err),
        };
        let Some(uploader) = uploader.clone() else {
            warn!("importColor called without an uploader");
            return Dispatched::failed(ActionError::collaborator(UploadError::NotConfigured {
                missing: ENDPOINT_VAR,
            }));
        };
        Dispatched::deferred(async move {
            let uploaded = uploader
                .upload(request.file, request.options)
                .await
                .map_err(ActionError::collaborator)?;
            let color = NewColor {
                name: request.name,
                value: request.value,
                image_url: Some(
                    uploaded
                        .public_url
                        .clone()
                        .unwrap_or_else(|| uploaded.path.clone()),
                ),
            };
            ctx.commit("addColor", serde_json::to_value(&color)?);
            Ok(serde_json::to_value(&uploaded)?)
        })
    }
}

fn commit_through(
    mutation: &'static str,
) -> impl Fn(ActionContext, Value) -> Dispatched + Send + Sync + 'static {
    move |ctx, payload| {
        ctx.commit(mutation, payload);
        Dispatched::empty()
    }
}

fn edit<T>(
    slice: &mut Value,
    f: impl FnOnce(&mut ColorsState) -> Result<T, MutationError>,
) -> Result<T, MutationError> {
    if slice.is_null() {
        return Err(MutationError::MissingSlice(NAMESPACE.to_string()));
    }
    let mut state: ColorsState = serde_json::from_value(slice.clone())?;
    let out = f(&mut state)?;
    *slice = serde_json::to_value(&state)?;
    Ok(out)
}

fn decode<T: DeserializeOwned>(payload: &Value) -> Result<T, ActionError> {
    Ok(T::deserialize(payload)?)
}

/// Strict read of the slice for actions that report what their commit did.
fn current_state(ctx: &ActionContext) -> Result<ColorsState, ActionError> {
    ColorsState::deserialize(&ctx.state())
        .map_err(|err| ActionError::failed(format!("colors state is unreadable: {err}")))
}

pub(crate) fn read_state(slice: &Value) -> ColorsState {
    ColorsState::deserialize(slice).unwrap_or_else(|err| {
        warn!(error = %err, "colors state has an unexpected shape; reading defaults");
        ColorsState::default()
    })
}

fn field(scope: &GetterScope<'_>, name: &str, default: Value) -> Value {
    scope.slice().get(name).cloned().unwrap_or(default)
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| {
        warn!(error = %err, "failed to serialize getter value");
        Value::Null
    })
}

fn display(id: Option<ColorId>) -> String {
    id.map_or_else(|| "null".to_string(), |id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use decolorize_store::Store;

    fn store() -> Store {
        Store::builder().module(NAMESPACE, colors_module(None)).build()
    }

    #[test]
    fn default_slice_has_the_full_shape() {
        let store = store();
        let slice = store.slice(NAMESPACE).unwrap();
        assert_eq!(
            slice,
            json!({
                "colors": [],
                "selectedColor": null,
                "searchTerm": "",
                "sortOptions": { "sortBy": "date", "sortDirection": "asc" },
                "colorHistory": []
            })
        );
    }

    #[test]
    fn add_action_returns_the_new_color() {
        let store = store();
        let added = store
            .dispatch("colors/addColor", json!({ "name": "Sunset", "value": "#ff7f50" }))
            .into_ready()
            .unwrap()
            .unwrap();
        assert_eq!(added["name"], "Sunset");
        assert!(added["id"].is_u64());
        assert_eq!(*store.getter("colors/colorCount").unwrap(), json!(1));
    }

    #[test]
    fn invalid_add_payload_fails_the_action_and_commits_nothing() {
        let store = store();
        let result = store
            .dispatch("colors/addColor", json!({ "name": 3 }))
            .into_ready()
            .unwrap();
        assert!(matches!(result, Err(ActionError::Payload(_))));
        assert_eq!(store.epoch(), 0);
    }

    #[test]
    fn rejected_selection_leaves_state_alone() {
        let store = store();
        store.commit("colors/selectColor", json!(99));
        assert_eq!(store.epoch(), 0);
        let result = store
            .dispatch("colors/selectColor", json!({ "id": 99 }))
            .into_ready()
            .unwrap();
        assert!(matches!(result, Err(ActionError::Failed(_))));
    }

    #[test]
    fn no_op_mutations_do_not_bump_the_epoch() {
        let store = store();
        store.commit("colors/removeColor", json!(12345));
        store.commit("colors/setSearchTerm", json!(""));
        assert_eq!(store.epoch(), 0);
    }

    #[test]
    fn import_without_uploader_fails() {
        let store = store();
        let result = store
            .dispatch(
                "colors/importColor",
                json!({ "name": "x", "value": "#000", "file": { "name": "x.png" } }),
            )
            .into_ready()
            .unwrap();
        assert!(matches!(result, Err(ActionError::Collaborator(_))));
        assert_eq!(*store.getter("colors/colorCount").unwrap(), json!(0));
    }

    fn unreadable_store() -> Store {
        let store = store();
        store.hydrate(|state| {
            state.insert(
                NAMESPACE.to_string(),
                json!({
                    "colors": [{ "id": 7, "name": "Moss", "value": "#8a9a5b", "createdAt": 7 }],
                    "colorHistory": [{ "type": "clear", "timestamp": "2024-01-01T00:00:00Z" }]
                }),
            );
        });
        store
    }

    #[test]
    fn add_action_fails_when_its_commit_is_not_applied() {
        let store = unreadable_store();
        let epoch = store.epoch();
        let result = store
            .dispatch("colors/addColor", json!({ "name": "Sunset", "value": "#ff7f50" }))
            .into_ready()
            .unwrap();
        assert!(matches!(result, Err(ActionError::Failed(_))));
        assert_eq!(store.epoch(), epoch);
    }

    #[test]
    fn update_action_fails_when_its_commit_is_not_applied() {
        let store = unreadable_store();
        let result = store
            .dispatch(
                "colors/updateColor",
                json!({ "id": 7, "updates": { "name": "Fern" } }),
            )
            .into_ready()
            .unwrap();
        assert!(matches!(result, Err(ActionError::Failed(_))));
        assert_eq!(store.state()[NAMESPACE]["colors"][0]["name"], "Moss");
    }

    #[test]
    fn update_action_returns_the_patched_color() {
        let store = store();
        let added = store
            .dispatch("colors/addColor", json!({ "name": "Sunset", "value": "#ff7f50" }))
            .into_ready()
            .unwrap()
            .unwrap();
        let updated = store
            .dispatch(
                "colors/updateColor",
                json!({ "id": added["id"], "updates": { "name": "Dusk" } }),
            )
            .into_ready()
            .unwrap()
            .unwrap();
        assert_eq!(updated["name"], "Dusk");
        assert_eq!(updated["id"], added["id"]);

        let missing = store
            .dispatch("colors/updateColor", json!({ "id": 1, "updates": { "name": "x" } }))
            .into_ready()
            .unwrap()
            .unwrap();
        assert!(missing.is_null());
    }
}
