use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use decolorize_common::ColorId;
use decolorize_store::{ActionError, ActionResult, ModuleHandle, Store};
use decolorize_upload::UploadedObject;

use crate::model::{
    Color, ColorPatch, ColorRef, ColorUpdate, HistoryEntry, ImportRequest, NewColor, SortOptions,
    SortPatch,
};
use crate::module::{NAMESPACE, read_state};
use crate::state::ColorsState;

/// Typed access to the `colors` module of a store.
///
/// Writes dispatch the module's actions, reads go through its getters, so
/// the facade behaves exactly like string-keyed callers.
#[derive(Debug, Clone)]
pub struct Colors {
    handle: ModuleHandle,
}

impl Colors {
    pub fn new(store: &Store) -> Self {
        Self {
            handle: store.module(NAMESPACE),
        }
    }

    pub fn handle(&self) -> &ModuleHandle {
        &self.handle
    }

    pub fn add(&self, color: NewColor) -> Result<Color, ActionError> {
        let added = self.run("addColor", to_payload(&color)?)?;
        Ok(serde_json::from_value(added)?)
    }

    pub fn remove(&self, id: ColorId) -> Result<(), ActionError> {
        self.run("removeColor", to_payload(&ColorRef::from(id))?)
            .map(drop)
    }

    pub fn select(&self, id: Option<ColorId>) -> Result<(), ActionError> {
        self.run("selectColor", to_payload(&id)?).map(drop)
    }

    /// Returns the updated color, or `None` if no color has `id`.
    pub fn update(&self, id: ColorId, updates: ColorPatch) -> Result<Option<Color>, ActionError> {
        let updated = self.run("updateColor", to_payload(&ColorUpdate { id, updates })?)?;
        Ok(serde_json::from_value(updated)?)
    }

    pub fn clear(&self) -> Result<(), ActionError> {
        self.run("clearColors", Value::Null).map(drop)
    }

    pub fn set_search_term(&self, term: &str) -> Result<(), ActionError> {
        self.run("setSearchTerm", Value::from(term)).map(drop)
    }

    pub fn set_sort_options(&self, patch: SortPatch) -> Result<(), ActionError> {
        self.run("setSortOptions", to_payload(&patch)?).map(drop)
    }

    /// Upload an image and add a color pointing at it.
    pub async fn import(&self, request: ImportRequest) -> Result<UploadedObject, ActionError> {
        let uploaded = self
            .handle
            .dispatch("importColor", to_payload(&request)?)
            .await?;
        Ok(serde_json::from_value(uploaded)?)
    }

    pub fn all(&self) -> Vec<Color> {
        self.read("allColors").unwrap_or_default()
    }

    pub fn filtered(&self) -> Vec<Color> {
        self.read("filteredColors").unwrap_or_default()
    }

    pub fn selected(&self) -> Option<Color> {
        self.read::<Option<Color>>("selectedColor").flatten()
    }

    pub fn count(&self) -> usize {
        self.read("colorCount").unwrap_or(0)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.read("colorHistory").unwrap_or_default()
    }

    pub fn search_term(&self) -> String {
        self.read("searchTerm").unwrap_or_default()
    }

    pub fn sort_options(&self) -> SortOptions {
        self.read("sortOptions").unwrap_or_default()
    }

    pub fn by_id(&self, id: ColorId) -> Option<Color> {
        self.all().into_iter().find(|color| color.id == id)
    }

    /// The whole module slice, decoded.
    pub fn state(&self) -> ColorsState {
        self.handle
            .state()
            .map(|slice| read_state(&slice))
            .unwrap_or_default()
    }

    fn run(&self, action: &str, payload: Value) -> ActionResult {
        self.handle
            .dispatch(action, payload)
            .into_ready()
            .unwrap_or_else(|| {
                Err(ActionError::failed(format!(
                    "action `{action}` did not complete synchronously"
                )))
            })
    }

    fn read<T: DeserializeOwned>(&self, getter: &str) -> Option<T> {
        let value = self.handle.getter(getter)?;
        match T::deserialize(value.as_ref()) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(getter, error = %err, "getter value has an unexpected shape");
                None
            }
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, ActionError> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppConfig, create_store};

    #[test]
    fn typed_round_trip_through_the_store() {
        let store = create_store(AppConfig::default());
        let colors = Colors::new(&store);

        let coral = colors.add(NewColor::new("Coral", "#ff7f50")).unwrap();
        let teal = colors.add(NewColor::new("Teal", "#008080")).unwrap();
        assert_eq!(colors.count(), 2);
        assert_eq!(colors.by_id(teal.id).map(|c| c.name), Some("Teal".to_string()));

        colors.select(Some(coral.id)).unwrap();
        assert_eq!(colors.selected().map(|c| c.id), Some(coral.id));

        let patch = ColorPatch {
            value: Some("#ff6f40".into()),
            ..ColorPatch::default()
        };
        let updated = colors.update(coral.id, patch).unwrap().unwrap();
        assert_eq!(updated.value, "#ff6f40");
        assert_eq!(colors.selected().map(|c| c.value), Some("#ff6f40".to_string()));

        assert!(colors.update(ColorId(1), ColorPatch::default()).unwrap().is_none());
        assert!(colors.select(Some(ColorId(1))).is_err());

        colors.clear().unwrap();
        assert!(colors.all().is_empty());
        assert!(colors.selected().is_none());
        assert_eq!(colors.history().len(), 4);
    }
}
