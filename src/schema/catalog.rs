//! On-demand schema introspection with per-table memoization.
//!
//! Three reads per table: `DESCRIBE` for the column list in declared
//! order, `SHOW KEYS` for the primary key in ordinal order, and
//! `information_schema.KEY_COLUMN_USAGE` for foreign keys grouped by
//! constraint name. The raw DDL comes from `SHOW CREATE TABLE`.

use std::rc::Rc;

use ahash::AHashMap;

use super::{Column, ForeignKey, PrimaryKey, Table};
use crate::cancel::CancelToken;
use crate::error::{DumpError, Result};
use crate::source::{Row, RowSource};
use crate::value::SqlValue;

const FOREIGN_KEY_QUERY: &str = "SELECT CONSTRAINT_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
     FROM information_schema.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL \
     ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION";

/// Memoizing table catalog. Tables are introspected on first access and
/// immutable afterwards. Single-threaded by contract; parallel use would
/// need interior locking.
pub struct SchemaCatalog<'a> {
    source: &'a dyn RowSource,
    tables: AHashMap<String, Rc<Table>>,
}

impl<'a> SchemaCatalog<'a> {
    pub fn new(source: &'a dyn RowSource) -> Self {
        Self {
            source,
            tables: AHashMap::new(),
        }
    }

    /// Fetch the table description, introspecting on first call.
    pub fn get_table(&mut self, cancel: &CancelToken, name: &str) -> Result<Rc<Table>> {
        if let Some(table) = self.tables.get(name) {
            return Ok(Rc::clone(table));
        }

        let table = Rc::new(self.introspect(cancel, name)?);
        self.tables.insert(name.to_string(), Rc::clone(&table));
        Ok(table)
    }

    /// Raw DDL as reported by the database, with the leading
    /// `CREATE TABLE` rewritten to `CREATE TABLE IF NOT EXISTS` when asked.
    pub fn create_statement(
        &mut self,
        cancel: &CancelToken,
        name: &str,
        if_not_exists: bool,
    ) -> Result<String> {
        let table = self.get_table(cancel, name)?;
        if if_not_exists {
            Ok(table
                .create_statement
                .replacen("CREATE TABLE", "CREATE TABLE IF NOT EXISTS", 1))
        } else {
            Ok(table.create_statement.clone())
        }
    }

    fn introspect(&self, cancel: &CancelToken, name: &str) -> Result<Table> {
        let columns = self.read_columns(cancel, name)?;
        let primary_key = self.read_primary_key(cancel, name)?;
        let foreign_keys = self.read_foreign_keys(cancel, name)?;
        let create_statement = self.read_create_statement(cancel, name)?;

        Ok(Table::new(
            name.to_string(),
            columns,
            primary_key,
            foreign_keys,
            create_statement,
        ))
    }

    fn read_columns(&self, cancel: &CancelToken, name: &str) -> Result<Vec<Column>> {
        let rows = self
            .source
            .query(cancel, &format!("DESCRIBE `{name}`"), &[])
            .map_err(|e| schema_err(name, "describe", e))?;

        if rows.is_empty() {
            return Err(DumpError::Schema(format!("table {name} has no columns")));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(Column {
                name: row_text(row, "Field")?,
                nullable: row_text(row, "Null")? == "YES",
                physical_type: row_text(row, "Type")?,
                default: match row.get("Default") {
                    Some(SqlValue::Null) | None => None,
                    Some(value) => value.as_text(),
                },
            });
        }

        Ok(columns)
    }

    fn read_primary_key(&self, cancel: &CancelToken, name: &str) -> Result<Option<PrimaryKey>> {
        let rows = self
            .source
            .query(
                cancel,
                &format!("SHOW KEYS FROM `{name}` WHERE Key_name = 'PRIMARY'"),
                &[],
            )
            .map_err(|e| schema_err(name, "read primary key of", e))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut members: Vec<(i64, String)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let ordinal = row_text(row, "Seq_in_index")?
                .parse::<i64>()
                .map_err(|e| DumpError::Schema(format!("table {name}: bad key ordinal: {e}")))?;
            members.push((ordinal, row_text(row, "Column_name")?));
        }
        members.sort_by_key(|(ordinal, _)| *ordinal);

        Ok(Some(PrimaryKey {
            columns: members.into_iter().map(|(_, column)| column).collect(),
        }))
    }

    fn read_foreign_keys(&self, cancel: &CancelToken, name: &str) -> Result<Vec<ForeignKey>> {
        let rows = self
            .source
            .query(cancel, FOREIGN_KEY_QUERY, &[SqlValue::from(name)])
            .map_err(|e| schema_err(name, "read foreign keys of", e))?;

        // Rows arrive ordered by constraint name then ordinal position, so
        // composite keys reassemble by appending to the current group.
        let mut foreign_keys: Vec<ForeignKey> = Vec::new();
        for row in &rows {
            let constraint = row_text(row, "CONSTRAINT_NAME")?;
            let local_column = row_text(row, "COLUMN_NAME")?;
            let referenced_table = row_text(row, "REFERENCED_TABLE_NAME")?;
            let referenced_column = row_text(row, "REFERENCED_COLUMN_NAME")?;

            match foreign_keys.last_mut() {
                Some(fk) if fk.name == constraint => {
                    fk.local_columns.push(local_column);
                    fk.referenced_columns.push(referenced_column);
                }
                _ => foreign_keys.push(ForeignKey {
                    name: constraint,
                    local_columns: vec![local_column],
                    referenced_table,
                    referenced_columns: vec![referenced_column],
                }),
            }
        }

        Ok(foreign_keys)
    }

    fn read_create_statement(&self, cancel: &CancelToken, name: &str) -> Result<String> {
        let rows = self
            .source
            .query(cancel, &format!("SHOW CREATE TABLE `{name}`"), &[])
            .map_err(|e| schema_err(name, "read DDL of", e))?;

        let row = rows
            .first()
            .ok_or_else(|| DumpError::Schema(format!("SHOW CREATE TABLE {name} returned nothing")))?;

        row_text(row, "Create Table")
    }
}

fn schema_err(table: &str, action: &str, err: DumpError) -> DumpError {
    match err {
        DumpError::Cancelled => DumpError::Cancelled,
        other => DumpError::Schema(format!("{action} table {table}: {other}")),
    }
}

fn row_text(row: &Row, key: &str) -> Result<String> {
    row.get(key)
        .and_then(SqlValue::as_text)
        .ok_or_else(|| DumpError::Schema(format!("introspection row is missing {key}")))
}
