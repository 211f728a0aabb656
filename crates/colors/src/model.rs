use serde::{Deserialize, Serialize};

use decolorize_common::{ColorId, Timestamp};
use decolorize_upload::{UploadFile, UploadOptions};

/// A stored color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Color {
    pub id: ColorId,
    pub name: String,
    /// Color code as entered, e.g. `#ff7f50`.
    pub value: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Payload of `addColor`. Id and creation time are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewColor {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl NewColor {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            image_url: None,
        }
    }
}

/// Fields to overwrite on an existing color.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ColorPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.value.is_none() && self.image_url.is_none()
    }
}

/// Payload of `updateColor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorUpdate {
    pub id: ColorId,
    #[serde(default)]
    pub updates: ColorPatch,
}

/// A color referenced either by bare id or by an object carrying one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorRef {
    Id(ColorId),
    Entity { id: ColorId },
}

impl ColorRef {
    pub fn id(self) -> ColorId {
        match self {
            Self::Id(id) | Self::Entity { id } => id,
        }
    }
}

impl From<ColorId> for ColorRef {
    fn from(id: ColorId) -> Self {
        Self::Id(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Add,
    Remove,
    Update,
    Clear,
}

/// One entry of the append-only color history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    /// The color as it was before an `update`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Color>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Name,
    #[default]
    Date,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SortOptions {
    pub sort_by: SortBy,
    pub sort_direction: SortDirection,
}

/// Partial sort options; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<SortDirection>,
}

/// Payload of `importColor`: upload an image, then add a color pointing at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub name: String,
    pub value: String,
    pub file: UploadFile,
    #[serde(default)]
    pub options: UploadOptions,
}
