//! The De-Colorize application store.
//!
//! Root state holds the app settings (`appName`, `isDarkMode`, `version`);
//! the `colors` module holds the stored colors, the current selection, the
//! filter settings and an append-only history.

pub mod app;
pub mod facade;
pub mod model;
pub mod module;
pub mod state;

pub use app::{APP_NAME, APP_VERSION, AppConfig, app_options, create_store};
pub use facade::Colors;
pub use model::{
    Color, ColorPatch, ColorRef, ColorUpdate, HistoryEntry, HistoryKind, ImportRequest, NewColor,
    SortBy, SortDirection, SortOptions, SortPatch,
};
pub use module::{NAMESPACE, colors_module};
pub use state::ColorsState;
