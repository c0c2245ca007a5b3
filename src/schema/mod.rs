//! Schema model for the closure walk.
//!
//! This module provides:
//! - Data models for tables, columns, primary keys, and foreign keys
//! - SQL literal rendering for driver values (`Column::format`)
//! - Primary-key fingerprinting used for row deduplication
//! - On-demand, memoized introspection of a live database (`SchemaCatalog`)

mod catalog;

pub use catalog::*;

use ahash::AHashMap;

use crate::error::{DumpError, Result};
use crate::source::Row;
use crate::value::SqlValue;

/// Column definition within a table.
///
/// `physical_type` retains the declared form exactly as the database
/// reports it (`int(11)`, `varchar(255)`, `datetime`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub nullable: bool,
    pub physical_type: String,
    pub default: Option<String>,
}

impl Column {
    /// Whether values of this column are rendered without quotes.
    pub fn is_numeric(&self) -> bool {
        self.physical_type.starts_with("int") || self.physical_type.starts_with("tinyint")
    }

    /// Render a driver value as a MySQL literal.
    ///
    /// Embedded quotes in text values are not escaped; the emitter targets
    /// trusted input and documents this limitation.
    pub fn format(&self, value: &SqlValue) -> Result<String> {
        match value {
            SqlValue::Null => {
                if self.nullable {
                    Ok("NULL".to_string())
                } else {
                    Err(DumpError::DataInvariant(format!(
                        "column {} is not nullable but the row holds NULL",
                        self.name
                    )))
                }
            }
            SqlValue::Bytes(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                if self.is_numeric() {
                    Ok(text.into_owned())
                } else {
                    Ok(format!("'{text}'"))
                }
            }
            SqlValue::Int(i) => Ok(i.to_string()),
            SqlValue::Float(f) => Ok(f.to_string()),
            SqlValue::Double(d) => Ok(d.to_string()),
        }
    }

    /// Literal used for cells the projection did not fetch or the config
    /// told us to ignore: the declared default if any, else NULL for
    /// nullable columns, else a zero value.
    pub fn default_value(&self) -> String {
        match &self.default {
            Some(default) => {
                if self.is_numeric() {
                    default.clone()
                } else {
                    format!("'{default}'")
                }
            }
            None if self.nullable => "NULL".to_string(),
            None if self.is_numeric() => "0".to_string(),
            None => "''".to_string(),
        }
    }
}

/// Ordered primary-key column list (composite keys keep ordinal order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub columns: Vec<String>,
}

impl PrimaryKey {
    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Foreign key constraint. Composite keys pair `local_columns[i]` with
/// `referenced_columns[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub local_columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// Complete table description, immutable after introspection.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    column_order: Vec<String>,
    columns: AHashMap<String, Column>,
    pub primary_key: Option<PrimaryKey>,
    pub foreign_keys: Vec<ForeignKey>,
    pub create_statement: String,
}

impl Table {
    pub fn new(
        name: String,
        columns_in_order: Vec<Column>,
        primary_key: Option<PrimaryKey>,
        foreign_keys: Vec<ForeignKey>,
        create_statement: String,
    ) -> Self {
        let column_order = columns_in_order.iter().map(|c| c.name.clone()).collect();
        let columns = columns_in_order
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        Self {
            name,
            column_order,
            columns,
            primary_key,
            foreign_keys,
            create_statement,
        }
    }

    /// Column names in declared order.
    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    fn require_column(&self, name: &str) -> Result<&Column> {
        self.columns.get(name).ok_or_else(|| {
            DumpError::Schema(format!("table {} has no column {name}", self.name))
        })
    }

    /// The foreign key that uses `column` as one of its local columns.
    pub fn foreign_key_on(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.local_columns.iter().any(|c| c == column))
    }

    /// Whether the column is a primary-key member or an FK local column.
    /// These columns are mandatory in every projection.
    pub fn is_key_column(&self, column: &str) -> bool {
        self.primary_key
            .as_ref()
            .is_some_and(|pk| pk.contains(column))
            || self.foreign_key_on(column).is_some()
    }

    /// Reorder `columns` to match the declared column order.
    pub fn sort_to_declared_order(&self, columns: &mut [String]) {
        columns.sort_by_key(|name| {
            self.column_order
                .iter()
                .position(|c| c == name)
                .unwrap_or(usize::MAX)
        });
    }

    /// Comma-joined formatted primary-key values of `row`, used as the
    /// deduplication set key. Stable across all selection paths because it
    /// always goes through [`Column::format`] in key ordinal order.
    pub fn fingerprint(&self, row: &Row) -> Result<String> {
        let pk = self.primary_key.as_ref().ok_or_else(|| {
            DumpError::Schema(format!(
                "table {} has no primary key and cannot be deduplicated",
                self.name
            ))
        })?;

        let mut fingerprint = String::new();
        for (i, column_name) in pk.columns.iter().enumerate() {
            if i > 0 {
                fingerprint.push(',');
            }
            let column = self.require_column(column_name)?;
            let value = row.get(column_name).unwrap_or(&SqlValue::Null);
            fingerprint.push_str(&column.format(value)?);
        }

        Ok(fingerprint)
    }

    /// Fingerprint for a tuple of values addressed at `columns` of this
    /// table, rendered exactly like [`Table::fingerprint`] would render the
    /// matching row.
    pub fn fingerprint_tuple(&self, columns: &[String], values: &[SqlValue]) -> Result<String> {
        let mut fingerprint = String::new();
        for (i, (column_name, value)) in columns.iter().zip(values).enumerate() {
            if i > 0 {
                fingerprint.push(',');
            }
            let column = self.require_column(column_name)?;
            fingerprint.push_str(&column.format(value)?);
        }

        Ok(fingerprint)
    }
}
