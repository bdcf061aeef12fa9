//! Event rows and the filter used to select them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate event returned by the event source.
///
/// Identity for dedup is `id` alone; everything else is for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Remaining query columns, in query order, already formatted for display.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<(String, String)>,
}

impl Event {
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at,
            extra: vec![],
        }
    }

    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((column.into(), value.into()));
        self
    }
}

/// Sort events for presentation: oldest first, then by id.
///
/// Duplicate ids collapse to their first occurrence in the input.
pub fn sort_for_dispatch(events: Vec<Event>) -> Vec<Event> {
    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<Event> = events
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect();
    unique.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    unique
}

/// Parameters bound into the event query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventFilter {
    pub type_id: i64,
    pub status_id: Option<i64>,
    /// Case-insensitive substring the event name must contain.
    pub name_filter: String,
    /// Case-insensitive substring the event name must not contain.
    pub name_excluded: String,
    pub lookback_days: i32,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            type_id: 18,
            status_id: None,
            name_filter: "hot".into(),
            name_excluded: "vessel".into(),
            lookback_days: 17,
        }
    }
}

impl EventFilter {
    /// SQL `LIKE` pattern for the name filter.
    pub fn name_filter_pattern(&self) -> String {
        format!("%{}%", self.name_filter)
    }

    /// SQL `LIKE` pattern for the exclusion.
    pub fn name_excluded_pattern(&self) -> String {
        format!("%{}%", self.name_excluded)
    }
}
