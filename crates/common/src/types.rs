use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a stored color.
///
/// Ids are derived from the wall clock in milliseconds and bumped past the
/// largest id already in use, so they stay strictly increasing even when two
/// colors are created within the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorId(pub u64);

impl ColorId {
    /// Next id after `last`, never earlier than `now`.
    pub fn next_after(last: Option<ColorId>, now: Timestamp) -> Self {
        let floor = now.0.max(0) as u64;
        match last {
            Some(ColorId(prev)) if prev >= floor => Self(prev + 1),
            _ => Self(floor),
        }
    }
}

impl fmt::Display for ColorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Render as an RFC 3339 string, or the raw millis if out of range.
    pub fn to_rfc3339(self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.0.to_string())
    }
}
