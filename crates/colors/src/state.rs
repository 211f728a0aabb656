use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use decolorize_common::{ColorId, Timestamp};

use crate::model::{
    Color, ColorPatch, HistoryEntry, HistoryKind, NewColor, SortBy, SortDirection, SortOptions,
    SortPatch,
};

/// State of the `colors` module.
///
/// `selected_color` only indexes into `colors`; it never owns an entity.
/// Every add, remove, update and clear appends to `color_history`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorsState {
    pub colors: Vec<Color>,
    pub selected_color: Option<ColorId>,
    pub search_term: String,
    pub sort_options: SortOptions,
    pub color_history: Vec<HistoryEntry>,
}

impl ColorsState {
    pub fn find(&self, id: ColorId) -> Option<&Color> {
        self.colors.iter().find(|color| color.id == id)
    }

    pub fn selected(&self) -> Option<&Color> {
        self.selected_color.and_then(|id| self.find(id))
    }

    /// Colors matching the search term, ordered by the sort options.
    ///
    /// The term is trimmed and matched case-insensitively against name and
    /// value. Colors created in the same millisecond sort by id.
    pub fn filtered(&self) -> Vec<Color> {
        let term = self.search_term.trim().to_lowercase();
        let mut list: Vec<Color> = self
            .colors
            .iter()
            .filter(|color| {
                term.is_empty()
                    || color.name.to_lowercase().contains(&term)
                    || color.value.to_lowercase().contains(&term)
            })
            .cloned()
            .collect();

        let SortOptions {
            sort_by,
            sort_direction,
        } = self.sort_options;
        list.sort_by(|a, b| {
            let ordering = match sort_by {
                SortBy::Name => compare_names(&a.name, &b.name),
                SortBy::Date => a
                    .created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id)),
            };
            match sort_direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
        list
    }

    /// Largest id ever handed out, including colors only left in history.
    pub fn last_id(&self) -> Option<ColorId> {
        let live = self.colors.iter().map(|color| color.id);
        let logged = self
            .color_history
            .iter()
            .flat_map(|entry| entry.color.iter().chain(entry.previous.iter()))
            .map(|color| color.id);
        live.chain(logged).max()
    }

    pub fn add(&mut self, new: NewColor, now: Timestamp) -> Color {
        let color = Color {
            id: ColorId::next_after(self.last_id(), now),
            name: new.name,
            value: new.value,
            created_at: now,
            image_url: new.image_url,
        };
        self.colors.push(color.clone());
        self.log(HistoryKind::Add, Some(color.clone()), None, now);
        color
    }

    /// Remove a color; clears the selection if it pointed at it.
    pub fn remove(&mut self, id: ColorId, now: Timestamp) -> Option<Color> {
        let index = self.colors.iter().position(|color| color.id == id)?;
        let removed = self.colors.remove(index);
        if self.selected_color == Some(id) {
            self.selected_color = None;
        }
        self.log(HistoryKind::Remove, Some(removed.clone()), None, now);
        Some(removed)
    }

    /// Overwrite the patched fields of a color. Returns the updated color.
    pub fn update(&mut self, id: ColorId, patch: ColorPatch, now: Timestamp) -> Option<Color> {
        let slot = self.colors.iter_mut().find(|color| color.id == id)?;
        let previous = slot.clone();
        if let Some(name) = patch.name {
            slot.name = name;
        }
        if let Some(value) = patch.value {
            slot.value = value;
        }
        if let Some(image_url) = patch.image_url {
            slot.image_url = Some(image_url);
        }
        let updated = slot.clone();
        self.log(HistoryKind::Update, Some(updated.clone()), Some(previous), now);
        Some(updated)
    }

    /// Point the selection at `id`. Returns false if no such color exists.
    pub fn select(&mut self, id: Option<ColorId>) -> bool {
        match id {
            Some(id) if self.find(id).is_none() => false,
            _ => {
                self.selected_color = id;
                true
            }
        }
    }

    pub fn clear(&mut self, now: Timestamp) {
        self.colors.clear();
        self.selected_color = None;
        self.log(HistoryKind::Clear, None, None, now);
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    pub fn set_sort_options(&mut self, patch: SortPatch) {
        if let Some(sort_by) = patch.sort_by {
            self.sort_options.sort_by = sort_by;
        }
        if let Some(direction) = patch.sort_direction {
            self.sort_options.sort_direction = direction;
        }
    }

    fn log(
        &mut self,
        kind: HistoryKind,
        color: Option<Color>,
        previous: Option<Color>,
        timestamp: Timestamp,
    ) {
        self.color_history.push(HistoryEntry {
            kind,
            color,
            previous,
            timestamp,
        });
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
