//! Shared types for the de-colorize workspace.

pub mod types;

pub use types::{ColorId, Timestamp};
