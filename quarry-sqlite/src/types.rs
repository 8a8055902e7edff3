//! Conversions between Quarry values and SQLite storage classes.

use quarry_query::{Record, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value as JsonValue;

/// Convert a bound parameter to a SQLite value.
///
/// SQLite has no boolean or JSON storage class: booleans become 0/1 and
/// JSON documents are stored as text.
pub fn to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Json(j) => SqlValue::Text(j.to_string()),
    }
}

/// Convert a column value to JSON.
///
/// Blobs become arrays of bytes so they decode into `Vec<u8>`.
pub fn from_sqlite(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect()),
    }
}

/// Read a whole row into a record, keeping column order.
pub fn row_to_record(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (index, name) in columns.iter().enumerate() {
        record.insert(name.clone(), from_sqlite(row.get_ref(index)?));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_sqlite() {
        assert_eq!(to_sqlite(&Value::Null), SqlValue::Null);
        assert_eq!(to_sqlite(&Value::Bool(true)), SqlValue::Integer(1));
        assert_eq!(to_sqlite(&Value::Int(42)), SqlValue::Integer(42));
        assert_eq!(to_sqlite(&Value::from("hi")), SqlValue::Text("hi".to_string()));
        assert_eq!(
            to_sqlite(&Value::Json(json!({"a": 1}))),
            SqlValue::Text("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_from_sqlite() {
        assert_eq!(from_sqlite(ValueRef::Null), JsonValue::Null);
        assert_eq!(from_sqlite(ValueRef::Integer(7)), json!(7));
        assert_eq!(from_sqlite(ValueRef::Real(1.5)), json!(1.5));
        assert_eq!(from_sqlite(ValueRef::Text(b"[1]")), json!("[1]"));
        assert_eq!(from_sqlite(ValueRef::Blob(&[1, 2])), json!([1, 2]));
    }
}
