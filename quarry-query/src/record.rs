//! Generic result rows.

use chrono::{NaiveDateTime, SecondsFormat};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{QueryError, QueryResult};
use crate::metadata::{LogicalType, ModelMeta};

/// An ordered column-name to value map.
///
/// Drivers return rows in this shape; typed results are decoded from it
/// through serde.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(IndexMap<String, JsonValue>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; any other JSON value is rejected.
    pub fn from_json(value: JsonValue) -> QueryResult<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(QueryError::serialization(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    /// Get a column value.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.0.get(column)
    }

    /// Get a column as an integer.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.0.get(column).and_then(|v| match v {
            JsonValue::Bool(b) => Some(i64::from(*b)),
            other => other.as_i64(),
        })
    }

    /// Get a column as a string slice.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(JsonValue::as_str)
    }

    /// Set a column value, keeping its position if it already exists.
    pub fn insert(&mut self, column: impl Into<String>, value: JsonValue) {
        self.0.insert(column.into(), value);
    }

    /// Remove a column.
    pub fn remove(&mut self, column: &str) -> Option<JsonValue> {
        self.0.shift_remove(column)
    }

    /// Whether the column is present.
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    /// Column names in result order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Iterate over `(column, value)` pairs in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a JSON object.
    pub fn into_json(self) -> JsonValue {
        JsonValue::Object(self.0.into_iter().collect())
    }

    /// Decode into a concrete type.
    pub fn decode<T: DeserializeOwned>(self) -> QueryResult<T> {
        serde_json::from_value(self.into_json())
            .map_err(|e| QueryError::deserialization(e.to_string()).with_source(e))
    }

    /// Coerce driver representations back into the model's logical types.
    ///
    /// Engines without native booleans return 0/1, JSON columns may come
    /// back as text, and database-filled timestamps use the SQL
    /// `YYYY-MM-DD HH:MM:SS` form.
    pub fn normalize(&mut self, meta: &ModelMeta) {
        for column in meta.columns() {
            let Some(value) = self.0.get_mut(&column.name) else {
                continue;
            };
            match column.logical_type {
                LogicalType::Boolean => {
                    if let Some(n) = value.as_i64() {
                        *value = JsonValue::Bool(n != 0);
                    }
                }
                LogicalType::Json => {
                    let parsed = match value {
                        JsonValue::String(text) => serde_json::from_str::<JsonValue>(text).ok(),
                        _ => None,
                    };
                    if let Some(parsed) = parsed {
                        *value = parsed;
                    }
                }
                LogicalType::DateTime => {
                    let reformatted = match value {
                        JsonValue::String(text) => sql_timestamp_to_rfc3339(text),
                        _ => None,
                    };
                    if let Some(text) = reformatted {
                        *value = JsonValue::String(text);
                    }
                }
                _ => {}
            }
        }
    }
}

fn sql_timestamp_to_rfc3339(text: &str) -> Option<String> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some(naive.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

impl FromIterator<(String, JsonValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, JsonValue);
    type IntoIter = indexmap::map::IntoIter<String, JsonValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: i64,
        name: String,
    }

    #[test]
    fn test_preserves_column_order() {
        let record: Record = vec![
            ("z".to_string(), json!(1)),
            ("a".to_string(), json!(2)),
        ]
        .into_iter()
        .collect();
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["z", "a"]);
    }

    #[test]
    fn test_decode() {
        let record = Record::from_json(json!({"id": 7, "name": "Alice", "extra": true})).unwrap();
        let row: Row = record.decode().unwrap();
        assert_eq!(row, Row { id: 7, name: "Alice".into() });
    }

    #[test]
    fn test_from_json_rejects_scalars() {
        assert!(Record::from_json(json!(3)).is_err());
    }

    #[test]
    fn test_get_i64_accepts_bool() {
        let record = Record::from_json(json!({"present": true, "cnt": 3})).unwrap();
        assert_eq!(record.get_i64("present"), Some(1));
        assert_eq!(record.get_i64("cnt"), Some(3));
    }

    #[test]
    fn test_sql_timestamp_becomes_rfc3339() {
        assert_eq!(
            sql_timestamp_to_rfc3339("2024-03-01 12:30:00").as_deref(),
            Some("2024-03-01T12:30:00Z")
        );
        assert_eq!(sql_timestamp_to_rfc3339("2024-03-01T12:30:00Z"), None);
    }
}
