//! DDL generation from model metadata.
//!
//! Output depends only on the metadata and the dialect: columns appear in
//! declaration order and types come from [`Dialect::column_type`], so the
//! same model always yields byte-identical statements.

use std::sync::Arc;

use quarry_query::{Column, ColumnDefault, Dialect, DialectKind, ModelMeta, Value};

use crate::error::{MigrateResult, MigrationError};

/// Generates `CREATE TABLE`, `CREATE INDEX` and `DROP TABLE` statements.
#[derive(Clone)]
pub struct DdlGenerator {
    dialect: Arc<dyn Dialect>,
}

impl DdlGenerator {
    /// Create a generator for a dialect.
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self { dialect }
    }

    /// The target dialect.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// `CREATE TABLE` for a model.
    pub fn create_table(&self, meta: &ModelMeta) -> MigrateResult<String> {
        let table = self.identifier(meta.table())?;
        let columns = meta
            .columns()
            .iter()
            .map(|column| self.column_definition(column))
            .collect::<MigrateResult<Vec<_>>>()?;

        Ok(format!("CREATE TABLE {} (\n    {}\n)", table, columns.join(",\n    ")))
    }

    /// `CREATE INDEX` for every indexed column that is not already covered
    /// by a primary key or unique constraint.
    pub fn create_indexes(&self, meta: &ModelMeta) -> MigrateResult<Vec<String>> {
        let table = self.identifier(meta.table())?;
        meta.columns()
            .iter()
            .filter(|column| column.indexed && !column.unique && !column.primary_key)
            .map(|column| {
                let name = self.identifier(&index_name(meta.table(), &column.name))?;
                let column = self.identifier(&column.name)?;
                Ok(format!("CREATE INDEX {} ON {} ({})", name, table, column))
            })
            .collect()
    }

    /// The table followed by its indexes.
    pub fn create_statements(&self, meta: &ModelMeta) -> MigrateResult<Vec<String>> {
        let mut statements = vec![self.create_table(meta)?];
        statements.extend(self.create_indexes(meta)?);
        Ok(statements)
    }

    /// `DROP TABLE IF EXISTS` for a model.
    pub fn drop_table(&self, meta: &ModelMeta) -> MigrateResult<String> {
        Ok(format!("DROP TABLE IF EXISTS {}", self.identifier(meta.table())?))
    }

    fn column_definition(&self, column: &Column) -> MigrateResult<String> {
        let name = self.identifier(&column.name)?;
        if column.is_generated() {
            return Ok(format!(
                "{} {}",
                name,
                self.dialect.auto_increment_primary_key(column.logical_type)
            ));
        }

        let mut definition = format!("{} {}", name, self.dialect.column_type(column.logical_type));
        if !column.nullable || column.primary_key {
            definition.push_str(" NOT NULL");
        }
        if column.primary_key {
            definition.push_str(" PRIMARY KEY");
        } else if column.unique {
            definition.push_str(" UNIQUE");
        }
        if let Some(default) = &column.default {
            definition.push_str(" DEFAULT ");
            definition.push_str(&self.default_literal(default));
        }
        Ok(definition)
    }

    fn default_literal(&self, default: &ColumnDefault) -> String {
        match default {
            ColumnDefault::Value(value) => self.literal(value),
            ColumnDefault::CurrentTimestamp => match self.dialect.kind() {
                // DATETIME(6) only accepts a timestamp of matching precision.
                DialectKind::MySql => "CURRENT_TIMESTAMP(6)".to_string(),
                _ => "CURRENT_TIMESTAMP".to_string(),
            },
            ColumnDefault::Expression(expression) => format!("({})", expression),
        }
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => self.dialect.bool_literal(*b).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => quote_string(s),
            Value::Json(j) => quote_string(&j.to_string()),
        }
    }

    fn identifier(&self, name: &str) -> MigrateResult<String> {
        let max = self.dialect.capabilities().max_identifier_length;
        if name.len() > max {
            return Err(MigrationError::IdentifierTooLong {
                identifier: name.to_string(),
                length: name.len(),
                max,
                dialect: self.dialect.name(),
            });
        }
        Ok(self.dialect.quote_identifier(name))
    }
}

impl std::fmt::Debug for DdlGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdlGenerator")
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

fn index_name(table: &str, column: &str) -> String {
    format!("idx_{}_{}", table, column)
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
