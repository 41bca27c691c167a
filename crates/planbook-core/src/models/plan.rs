use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use super::row::{Row, RowId};

/// A row of the `plans` table.
///
/// Plans form a forest through `parent_id`. Siblings are ordered by `priority`,
/// which need not be unique.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Plan {
    pub id: RowId,
    #[serde(default, deserialize_with = "lenient")]
    pub parent_id: Option<RowId>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub priority: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub done: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub archived: bool,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub done_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient")]
    pub manhours_required: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub budget: Option<f64>,
}

impl Plan {
    /// Parse a cached row. Rows without an id or with mistyped fields yield `None`.
    pub fn from_row(row: &Row) -> Option<Self> {
        match serde_json::from_value(row.clone().into_value()) {
            Ok(plan) => Some(plan),
            Err(e) => {
                tracing::debug!("skipping malformed plan row {:?}: {}", row.id(), e);
                None
            }
        }
    }

    /// Done or archived plans no longer need work.
    pub fn is_closed(&self) -> bool {
        self.done || self.archived
    }

    pub fn estimate(&self, field: EstimateField) -> Option<f64> {
        match field {
            EstimateField::ManhoursRequired => self.manhours_required,
            EstimateField::Budget => self.budget,
        }
    }
}

/// The numeric estimate columns that rollups and placeholders work on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimateField {
    ManhoursRequired,
    Budget,
}

impl EstimateField {
    pub fn column(&self) -> &'static str {
        match self {
            EstimateField::ManhoursRequired => "manhours_required",
            EstimateField::Budget => "budget",
        }
    }
}

/// Column reader that never fails the row: `null` or a mistyped value reads as
/// the type's default (`None`, `false`, `0.0`).
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(T::default());
    }
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Ok(parsed),
        Err(e) => {
            warn!("ignoring mistyped plan column value {}: {}", value, e);
            Ok(T::default())
        }
    }
}

/// Accept RFC 3339 timestamps as well as offset-less `timestamp` columns (read as UTC).
/// Unparseable values are treated as absent rather than failing the whole row.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().and_then(parse_timestamp))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
