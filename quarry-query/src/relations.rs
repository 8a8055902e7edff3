//! Eager relation loading.
//!
//! Each requested relation is loaded with separate `IN (...)` queries over
//! the parents' keys, batched so large result sets stay below driver
//! parameter limits. The related rows are stitched into each parent record
//! under the relation's name: an array for `HasMany`, an object or `null`
//! for `BelongsTo`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::filter::Filter;
use crate::metadata::{ModelMeta, Relation, RelationKind};
use crate::query::{Direction, OrderTerm, QueryParts};
use crate::record::Record;
use crate::session::Session;
use crate::value::Value;

/// Keys bound per related-rows query.
const BATCH_SIZE: usize = 100;

/// Load `names` for every row in `rows`.
pub(crate) async fn load(session: &Session, meta: &ModelMeta, rows: &mut [Record], names: &[String]) -> QueryResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for name in names {
        let relation = meta.relation(name)?;
        let target = session
            .registry()
            .lookup_id(relation.target)
            .ok_or_else(|| QueryError::model_not_registered(&relation.target_name))?;
        debug!(model = meta.name(), relation = %name, "Eager loading relation");

        match relation.kind {
            RelationKind::HasMany => {
                let keys = distinct_keys(rows, meta.primary_key());
                let children = fetch_related(session, &target, &relation.foreign_key, keys).await?;
                let mut groups: HashMap<String, Vec<JsonValue>> = HashMap::new();
                for child in children {
                    if let Some(key) = child.get(&relation.foreign_key).and_then(join_key) {
                        groups.entry(key).or_default().push(child.into_json());
                    }
                }
                for row in rows.iter_mut() {
                    let related = row
                        .get(meta.primary_key())
                        .and_then(join_key)
                        .and_then(|key| groups.get(&key).cloned())
                        .unwrap_or_default();
                    row.insert(relation.name.clone(), JsonValue::Array(related));
                }
            }
            RelationKind::BelongsTo => {
                attach_parents(session, &target, relation, rows).await?;
            }
        }
    }
    Ok(())
}

async fn attach_parents(session: &Session, target: &Arc<ModelMeta>, relation: &Relation, rows: &mut [Record]) -> QueryResult<()> {
    let keys = distinct_keys(rows, &relation.foreign_key);
    let parents = fetch_related(session, target, target.primary_key(), keys).await?;
    let by_key: HashMap<String, JsonValue> = parents
        .into_iter()
        .filter_map(|parent| {
            let key = parent.get(target.primary_key()).and_then(join_key)?;
            Some((key, parent.into_json()))
        })
        .collect();
    for row in rows.iter_mut() {
        let related = row
            .get(&relation.foreign_key)
            .and_then(join_key)
            .and_then(|key| by_key.get(&key).cloned())
            .unwrap_or(JsonValue::Null);
        row.insert(relation.name.clone(), related);
    }
    Ok(())
}

async fn fetch_related(
    session: &Session,
    target: &Arc<ModelMeta>,
    column: &str,
    keys: Vec<JsonValue>,
) -> QueryResult<Vec<Record>> {
    let mut related = Vec::new();
    for batch in keys.chunks(BATCH_SIZE) {
        let mut parts = QueryParts::new(target.clone());
        parts
            .filters
            .push(Filter::In(column.to_string(), batch.iter().map(Value::from_json).collect()));
        parts
            .order
            .push(OrderTerm::Column(target.primary_key().to_string(), Direction::Asc));
        let compiled = parts.compile_select(session.dialect().as_ref())?;
        let mut rows = session.fetch(&compiled, None).await?;
        for row in &mut rows {
            row.normalize(target);
        }
        related.extend(rows);
    }
    Ok(related)
}

fn distinct_keys(rows: &[Record], column: &str) -> Vec<JsonValue> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|value| join_key(value).is_some_and(|key| seen.insert(key)))
        .cloned()
        .collect()
}

// Text form used to match keys across tables; `null` never matches.
fn join_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: JsonValue) -> Record {
        Record::from_json(value).unwrap()
    }

    #[test]
    fn test_join_key_ignores_null() {
        assert_eq!(join_key(&json!(null)), None);
        assert_eq!(join_key(&json!(7)), Some("7".to_string()));
        assert_eq!(join_key(&json!("abc")), Some("abc".to_string()));
    }

    #[test]
    fn test_distinct_keys_skips_duplicates_and_nulls() {
        let rows = vec![
            record(json!({"author_id": 1})),
            record(json!({"author_id": 2})),
            record(json!({"author_id": 1})),
            record(json!({"author_id": null})),
        ];
        assert_eq!(distinct_keys(&rows, "author_id"), vec![json!(1), json!(2)]);
    }
}
