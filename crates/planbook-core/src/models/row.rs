use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::constants::columns;

/// Table-scoped row identifier.
///
/// Remote tables key rows either by integer or by uuid string. Both arrive here
/// in canonical string form; integer ids serialize back as JSON numbers so they
/// round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an identifier out of a JSON value. `null` and non-scalar values yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self.0.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(self.0.clone()),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for RowId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for RowId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RowId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RowId::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid row id: {}", value)))
    }
}

/// A single row of any table: field name to scalar value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value. Anything but an object is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<RowId> {
        self.0.get(columns::ID).and_then(RowId::from_value)
    }

    pub fn parent_id(&self) -> Option<RowId> {
        self.0.get(columns::PARENT_ID).and_then(RowId::from_value)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Builder form of [`Row::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Copy every field of `other` over this row; fields of `other` win.
    pub fn merge(&mut self, other: Row) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_id_accepts_numbers_and_strings() {
        assert_eq!(RowId::from_value(&json!(7)), Some(RowId::from(7)));
        assert_eq!(
            RowId::from_value(&json!("5f1c-aa")),
            Some(RowId::from("5f1c-aa"))
        );
        assert_eq!(RowId::from_value(&json!(null)), None);
        assert_eq!(RowId::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn test_integer_row_id_serializes_as_number() {
        assert_eq!(serde_json::to_value(RowId::from(12)).unwrap(), json!(12));
        assert_eq!(
            serde_json::to_value(RowId::from("abc")).unwrap(),
            json!("abc")
        );
    }

    #[test]
    fn test_row_accessors() {
        let row = Row::from_value(json!({"id": 3, "parent_id": null, "title": "x"})).unwrap();
        assert_eq!(row.id(), Some(RowId::from(3)));
        assert_eq!(row.parent_id(), None);
        assert_eq!(row.get("title"), Some(&json!("x")));
        assert!(Row::from_value(json!([1, 2])).is_none());
    }

    #[test]
    fn test_merge_overwrites_fields() {
        let mut row = Row::new().with("done", false).with("title", "a");
        row.merge(Row::new().with("done", true));
        assert_eq!(row.get("done"), Some(&json!(true)));
        assert_eq!(row.get("title"), Some(&json!("a")));
    }
}
