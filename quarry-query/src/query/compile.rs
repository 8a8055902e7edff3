//! Query descriptor to SQL compilation.

use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};
use crate::filter::Filter;
use crate::metadata::{ModelMeta, RelationKind};
use crate::sql::{CompiledQuery, SqlWriter};
use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            other => Err(QueryError::invalid_parameter(format!(
                "Unknown sort direction '{}'",
                other
            ))),
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OrderTerm {
    Column(String, Direction),
    Random,
}

/// Which soft-deleted rows a query sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashedMode {
    /// Live rows only.
    #[default]
    Exclude,
    /// Live and soft-deleted rows.
    Include,
    /// Soft-deleted rows only.
    Only,
}

/// How two selects are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    /// `UNION` (duplicates removed).
    Union,
    /// `UNION ALL`.
    UnionAll,
}

impl SetOperator {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Union => " UNION ",
            Self::UnionAll => " UNION ALL ",
        }
    }
}

/// A correlated relation count selected as `<relation>_count`.
#[derive(Debug, Clone)]
pub(crate) struct RelationCount {
    pub alias: String,
    pub kind: RelationKind,
    pub foreign_key: String,
    pub target: Arc<ModelMeta>,
}

/// Everything needed to render one SELECT.
#[derive(Debug, Clone)]
pub(crate) struct QueryParts {
    pub meta: Arc<ModelMeta>,
    pub select: Vec<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
    pub lock: bool,
    pub counts: Vec<RelationCount>,
    pub trashed: TrashedMode,
    pub set_ops: Vec<(SetOperator, QueryParts)>,
}

impl QueryParts {
    pub fn new(meta: Arc<ModelMeta>) -> Self {
        Self {
            meta,
            select: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            lock: false,
            counts: Vec::new(),
            trashed: TrashedMode::default(),
            set_ops: Vec::new(),
        }
    }

    /// Result column names, in order.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = if self.select.is_empty() {
            self.meta.column_names()
        } else {
            self.select.clone()
        };
        columns.extend(self.counts.iter().map(|c| c.alias.clone()));
        columns
    }

    /// Full SELECT including set operations, ordering, paging and locking.
    pub fn compile_select(&self, dialect: &dyn Dialect) -> QueryResult<CompiledQuery> {
        let mut w = SqlWriter::new(dialect);
        self.write_select(&mut w, true)?;
        Ok(w.finish())
    }

    /// `SELECT COUNT(*) AS cnt ...` honouring filters and soft deletes.
    pub fn compile_count(&self, dialect: &dyn Dialect) -> QueryResult<CompiledQuery> {
        let mut w = SqlWriter::new(dialect);
        let needs_subquery =
            self.distinct || !self.set_ops.is_empty() || self.limit.is_some() || self.offset.is_some();
        if needs_subquery {
            w.push("SELECT COUNT(*) AS cnt FROM (");
            self.write_select(&mut w, false)?;
            w.push(") AS counted");
        } else {
            w.push("SELECT COUNT(*) AS cnt FROM ");
            w.push_identifier(self.meta.table());
            self.write_where(&mut w)?;
        }
        Ok(w.finish())
    }

    /// `SELECT EXISTS(...) AS present`.
    pub fn compile_exists(&self, dialect: &dyn Dialect) -> QueryResult<CompiledQuery> {
        let mut w = SqlWriter::new(dialect);
        w.push("SELECT EXISTS(");
        self.write_select(&mut w, false)?;
        w.push(") AS present");
        Ok(w.finish())
    }

    /// `UPDATE t SET col = col + ? WHERE ...`. A negative `by` decrements.
    pub fn compile_increment(&self, dialect: &dyn Dialect, column: &str, by: i64) -> QueryResult<CompiledQuery> {
        self.compile_step(dialect, column, " + ", by)
    }

    /// `UPDATE t SET col = col - ? WHERE ...`. The amount is bound as given,
    /// so every `i64` including `i64::MIN` subtracts exactly.
    pub fn compile_decrement(&self, dialect: &dyn Dialect, column: &str, by: i64) -> QueryResult<CompiledQuery> {
        self.compile_step(dialect, column, " - ", by)
    }

    fn compile_step(&self, dialect: &dyn Dialect, column: &str, operator: &str, by: i64) -> QueryResult<CompiledQuery> {
        self.ensure_plain_write("increment")?;
        let col = self.meta.require_column(column)?;
        if col.primary_key {
            return Err(QueryError::invalid_operation(format!(
                "Cannot increment primary key '{}'",
                column
            )));
        }
        let mut w = SqlWriter::new(dialect);
        w.push("UPDATE ")
            .push_identifier(self.meta.table())
            .push(" SET ")
            .push_identifier(column)
            .push(" = ")
            .push_identifier(column)
            .push(operator)
            .push_param(Value::Int(by));
        self.write_where(&mut w)?;
        Ok(w.finish())
    }

    /// Soft delete (`UPDATE ... SET deleted_at = ?`) when the model has a
    /// soft-delete column and `force` is false, `DELETE` otherwise.
    pub fn compile_delete(&self, dialect: &dyn Dialect, force: bool, now: Value) -> QueryResult<CompiledQuery> {
        self.ensure_plain_write("delete")?;
        let mut w = SqlWriter::new(dialect);
        match self.meta.soft_delete_column() {
            Some(column) if !force => {
                w.push("UPDATE ")
                    .push_identifier(self.meta.table())
                    .push(" SET ")
                    .push_identifier(column)
                    .push(" = ")
                    .push_param(now);
            }
            _ => {
                w.push("DELETE FROM ").push_identifier(self.meta.table());
            }
        }
        self.write_where(&mut w)?;
        Ok(w.finish())
    }

    fn ensure_plain_write(&self, operation: &str) -> QueryResult<()> {
        if !self.set_ops.is_empty() || self.limit.is_some() || self.offset.is_some() {
            return Err(QueryError::invalid_operation(format!(
                "{} cannot be combined with union, limit or offset",
                operation
            ))
            .with_model(self.meta.name()));
        }
        Ok(())
    }

    fn write_select(&self, w: &mut SqlWriter<'_>, lock: bool) -> QueryResult<()> {
        self.write_core(w)?;

        if !self.set_ops.is_empty() {
            let left = self.output_columns();
            for (op, right) in &self.set_ops {
                right.ensure_union_operand()?;
                let right_columns = right.output_columns();
                if left != right_columns {
                    return Err(QueryError::shape_mismatch(&left, &right_columns));
                }
                w.push(op.as_sql());
                right.write_core(w)?;
            }
        }

        if !self.order.is_empty() {
            let outputs = self.output_columns();
            w.push(" ORDER BY ");
            for (i, term) in self.order.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                match term {
                    OrderTerm::Column(name, direction) => {
                        if self.meta.column(name).is_none() && !outputs.contains(name) {
                            return Err(QueryError::invalid_column(self.meta.name(), name));
                        }
                        w.push_identifier(name).push(" ").push(direction.as_sql());
                    }
                    OrderTerm::Random => {
                        let random = w.dialect().random_function();
                        w.push(random);
                    }
                }
            }
        }

        if let Some(tail) = w.dialect().limit_offset(self.limit, self.offset) {
            w.push(" ").push(&tail);
        }

        if lock && self.lock {
            if !self.set_ops.is_empty() {
                return Err(QueryError::invalid_operation(
                    "FOR UPDATE cannot be combined with union",
                ));
            }
            if let Some(clause) = w.dialect().for_update_clause() {
                w.push(" ").push(clause);
            }
        }
        Ok(())
    }

    fn ensure_union_operand(&self) -> QueryResult<()> {
        if !self.order.is_empty()
            || self.limit.is_some()
            || self.offset.is_some()
            || self.lock
            || !self.set_ops.is_empty()
        {
            return Err(QueryError::invalid_operation(
                "The right side of a union may not order, page, lock or nest unions",
            )
            .with_model(self.meta.name()));
        }
        Ok(())
    }

    // SELECT [DISTINCT] columns [, counts] FROM table [WHERE ...]
    fn write_core(&self, w: &mut SqlWriter<'_>) -> QueryResult<()> {
        w.push("SELECT ");
        if self.distinct {
            w.push("DISTINCT ");
        }

        let columns = if self.select.is_empty() {
            self.meta.column_names()
        } else {
            for column in &self.select {
                self.meta.require_column(column)?;
            }
            self.select.clone()
        };
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push_identifier(column);
        }

        for count in &self.counts {
            w.push(", ");
            self.write_relation_count(w, count)?;
        }

        w.push(" FROM ").push_identifier(self.meta.table());
        self.write_where(w)
    }

    fn write_relation_count(&self, w: &mut SqlWriter<'_>, count: &RelationCount) -> QueryResult<()> {
        let target = &count.target;
        w.push("(SELECT COUNT(*) FROM ")
            .push_identifier(target.table())
            .push(" WHERE ");
        match count.kind {
            RelationKind::HasMany => {
                target.require_column(&count.foreign_key)?;
                w.push_qualified(target.table(), &count.foreign_key)
                    .push(" = ")
                    .push_qualified(self.meta.table(), self.meta.primary_key());
            }
            RelationKind::BelongsTo => {
                w.push_qualified(target.table(), target.primary_key())
                    .push(" = ")
                    .push_qualified(self.meta.table(), &count.foreign_key);
            }
        }
        if let Some(deleted) = target.soft_delete_column() {
            w.push(" AND ")
                .push_qualified(target.table(), deleted)
                .push(" IS NULL");
        }
        w.push(") AS ").push_identifier(&count.alias);
        Ok(())
    }

    fn write_where(&self, w: &mut SqlWriter<'_>) -> QueryResult<()> {
        let soft_delete = match (self.trashed, self.meta.soft_delete_column()) {
            (TrashedMode::Include, _) | (TrashedMode::Exclude, None) => None,
            (TrashedMode::Exclude, Some(column)) => Some((column, " IS NULL")),
            (TrashedMode::Only, Some(column)) => Some((column, " IS NOT NULL")),
            (TrashedMode::Only, None) => {
                return Err(QueryError::invalid_operation(format!(
                    "{} does not use soft deletes",
                    self.meta.name()
                ))
                .with_model(self.meta.name()));
            }
        };

        if self.filters.is_empty() && soft_delete.is_none() {
            return Ok(());
        }

        w.push(" WHERE ");
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                w.push(" AND ");
            }
            filter.write(w, &self.meta, false)?;
        }
        if let Some((column, predicate)) = soft_delete {
            if !self.filters.is_empty() {
                w.push(" AND ");
            }
            w.push_identifier(column).push(predicate);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySql, Postgres, Sqlite};
    use crate::error::ErrorCode;
    use crate::filter::CompareOp;
    use crate::metadata::{Column, LogicalType, Model, ModelSchema};
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Author {
        id: i64,
        name: String,
    }

    impl Model for Author {
        fn schema() -> ModelSchema<Self> {
            ModelSchema::<Self>::new()
                .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
                .column(Column::new("name", LogicalType::String))
                .has_many::<Article>("articles", "author_id")
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Article {
        id: i64,
        author_id: i64,
        title: String,
        deleted_at: Option<String>,
    }

    impl Model for Article {
        fn schema() -> ModelSchema<Self> {
            ModelSchema::<Self>::new()
                .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
                .column(Column::new("author_id", LogicalType::BigInt))
                .column(Column::new("title", LogicalType::String))
                .column(Column::new("deleted_at", LogicalType::DateTime).nullable())
                .soft_delete("deleted_at")
        }
    }

    fn author() -> QueryParts {
        QueryParts::new(Arc::new(Author::schema().into_meta().unwrap()))
    }

    fn article() -> QueryParts {
        QueryParts::new(Arc::new(Article::schema().into_meta().unwrap()))
    }

    #[test]
    fn test_select_lists_columns_and_binds_values() {
        let mut parts = author();
        parts.filters.push(Filter::compare("name", CompareOp::Eq, "Alice"));
        parts.order.push(OrderTerm::Column("id".into(), Direction::Desc));
        parts.limit = Some(10);
        let compiled = parts.compile_select(&Postgres).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"id\", \"name\" FROM \"authors\" WHERE \"name\" = $1 ORDER BY \"id\" DESC LIMIT 10"
        );
        assert_eq!(compiled.placeholder_count(), compiled.params.len());
    }

    #[test]
    fn test_soft_delete_predicate() {
        let parts = article();
        let sql = parts.compile_select(&Sqlite).unwrap().sql;
        assert!(sql.ends_with("WHERE \"deleted_at\" IS NULL"), "{}", sql);

        let mut parts = article();
        parts.trashed = TrashedMode::Only;
        let sql = parts.compile_count(&Sqlite).unwrap().sql;
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS cnt FROM \"articles\" WHERE \"deleted_at\" IS NOT NULL"
        );

        let mut parts = article();
        parts.trashed = TrashedMode::Include;
        assert!(!parts.compile_select(&Sqlite).unwrap().sql.contains("deleted_at\" IS"));

        let mut parts = author();
        parts.trashed = TrashedMode::Only;
        let err = parts.compile_select(&Sqlite).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOperation);
    }

    #[test]
    fn test_relation_count_subquery() {
        let mut parts = author();
        parts.counts.push(RelationCount {
            alias: "articles_count".into(),
            kind: RelationKind::HasMany,
            foreign_key: "author_id".into(),
            target: article().meta,
        });
        parts.order.push(OrderTerm::Column("articles_count".into(), Direction::Desc));
        let sql = parts.compile_select(&Sqlite).unwrap().sql;
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\", (SELECT COUNT(*) FROM \"articles\" WHERE \"articles\".\"author_id\" = \
             \"authors\".\"id\" AND \"articles\".\"deleted_at\" IS NULL) AS \"articles_count\" FROM \"authors\" \
             ORDER BY \"articles_count\" DESC"
        );
    }

    #[test]
    fn test_union_shape_and_operand_rules() {
        let mut left = author();
        left.select = vec!["id".into()];
        let mut right = article();
        right.select = vec!["id".into()];
        left.set_ops.push((SetOperator::UnionAll, right));
        let compiled = left.compile_select(&Postgres).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"id\" FROM \"authors\" UNION ALL SELECT \"id\" FROM \"articles\" WHERE \"deleted_at\" IS NULL"
        );

        let mut left = author();
        left.set_ops.push((SetOperator::Union, article()));
        let err = left.compile_select(&Postgres).unwrap_err();
        assert_eq!(err.code, ErrorCode::ShapeMismatch);

        let mut left = author();
        let mut right = author();
        right.limit = Some(1);
        left.set_ops.push((SetOperator::Union, right));
        let err = left.compile_select(&Postgres).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOperation);
    }

    #[test]
    fn test_for_update_depends_on_dialect() {
        let mut parts = author();
        parts.lock = true;
        assert!(parts.compile_select(&MySql).unwrap().sql.ends_with("FOR UPDATE"));
        assert!(!parts.compile_select(&Sqlite).unwrap().sql.contains("FOR UPDATE"));
    }

    #[test]
    fn test_count_wraps_paged_queries() {
        let mut parts = author();
        parts.offset = Some(5);
        let sql = parts.compile_count(&Sqlite).unwrap().sql;
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS cnt FROM (SELECT \"id\", \"name\" FROM \"authors\" LIMIT -1 OFFSET 5) AS counted"
        );
    }

    #[test]
    fn test_writes() {
        let mut parts = article();
        parts.filters.push(Filter::eq("author_id", 3));
        let compiled = parts.compile_increment(&Postgres, "author_id", 2).unwrap();
        assert_eq!(
            compiled.sql,
            "UPDATE \"articles\" SET \"author_id\" = \"author_id\" + $1 WHERE \"author_id\" = $2 AND \"deleted_at\" IS NULL"
        );
        assert_eq!(compiled.params, vec![Value::Int(2), Value::Int(3)]);

        let down = parts.compile_decrement(&Postgres, "author_id", i64::MIN).unwrap();
        assert!(down.sql.contains("\"author_id\" = \"author_id\" - $1"));
        assert_eq!(down.params[0], Value::Int(i64::MIN));

        let soft = parts.compile_delete(&Sqlite, false, Value::from("now")).unwrap();
        assert!(soft.sql.starts_with("UPDATE \"articles\" SET \"deleted_at\" = ?"));
        let hard = parts.compile_delete(&Sqlite, true, Value::Null).unwrap();
        assert!(hard.sql.starts_with("DELETE FROM \"articles\" WHERE"));

        parts.limit = Some(1);
        assert!(parts.compile_delete(&Sqlite, true, Value::Null).is_err());
    }

    #[test]
    fn test_invalid_select_column() {
        let mut parts = author();
        parts.select = vec!["nickname".into()];
        let err = parts.compile_select(&Sqlite).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidColumn);
    }
}
